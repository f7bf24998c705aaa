use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};
use tokio::task::JoinHandle;

use crate::errors::DispatchError;
use crate::models::{ChangeEvent, Grade, RecipientId};
use crate::utils::store::SubscriberStore;

/// Something that can deliver a text message to a chat.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, recipient: RecipientId, text: &str) -> Result<(), DispatchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Broadcast,
    Owner,
}

#[derive(Debug)]
pub struct SendOutcome {
    pub recipient: RecipientId,
    pub audience: Audience,
    pub result: Result<(), DispatchError>,
}

#[derive(Debug)]
pub struct DispatchReport {
    pub had_changes: bool,
    pub outcomes: Vec<SendOutcome>,
}

impl DispatchReport {
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }

    /// Recipients in `audience` whose send failed, in event order.
    pub fn failed(&self, audience: Audience) -> Vec<RecipientId> {
        self.outcomes
            .iter()
            .filter(|o| o.audience == audience && o.result.is_err())
            .map(|o| o.recipient)
            .collect()
    }
}

// Subscribers only learn that something was posted, never the grade itself.
pub fn broadcast_message(event: &ChangeEvent) -> String {
    format!(
        "Heyho! Es wurden neue Noten eingetragen. Das Modul {} ({}) hat eine Note eingetragen.",
        event.record.course, event.record.exam_type
    )
}

pub fn owner_message(event: &ChangeEvent) -> String {
    let mut message = format!(
        "Heyho! Es wurden neue Noten eingetragen. Das Modul {} ({}) hat die Note {} eingetragen.",
        event.record.course, event.record.exam_type, event.record.grade
    );
    if let Some(Grade::Posted(old)) = &event.previous {
        message.push_str(&format!(" (vorher: {old})"));
    }
    message
}

/// Fans change events out to subscribers and the owner.
pub struct Notifier {
    messenger: Arc<dyn Messenger>,
    subscribers: Arc<SubscriberStore>,
    owner: RecipientId,
}

impl Notifier {
    pub fn new(messenger: Arc<dyn Messenger>, subscribers: Arc<SubscriberStore>, owner: RecipientId) -> Self {
        Self {
            messenger,
            subscribers,
            owner,
        }
    }

    pub fn owner(&self) -> RecipientId {
        self.owner
    }

    /// Sends one broadcast per subscriber and one owner message per event.
    ///
    /// Every send runs as its own task, so a failing chat does not hold back
    /// the others. Outcomes are returned in event order.
    pub async fn dispatch(&self, events: &[ChangeEvent]) -> DispatchReport {
        let broadcast: Vec<RecipientId> = self
            .subscribers
            .all()
            .into_iter()
            .filter(|id| *id != self.owner)
            .collect();

        let mut sends: Vec<(RecipientId, Audience, JoinHandle<Result<(), DispatchError>>)> = Vec::new();
        for event in events {
            let public = broadcast_message(event);
            for &recipient in &broadcast {
                sends.push((recipient, Audience::Broadcast, self.spawn_send(recipient, public.clone())));
            }
            sends.push((self.owner, Audience::Owner, self.spawn_send(self.owner, owner_message(event))));
        }

        let mut outcomes = Vec::with_capacity(sends.len());
        for (recipient, audience, handle) in sends {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(DispatchError::Aborted {
                    recipient,
                    reason: e.to_string(),
                }),
            };
            if let Err(e) = &result {
                warn!("Notification to {} not delivered: {}", recipient, e);
            }
            outcomes.push(SendOutcome {
                recipient,
                audience,
                result,
            });
        }

        DispatchReport {
            had_changes: !events.is_empty(),
            outcomes,
        }
    }

    /// Operator-only diagnostics: logged locally and mirrored to the owner.
    pub async fn report(&self, message: &str) {
        let content = format!("[DEBUG] {message}");
        info!("{}", content);
        if let Err(e) = self.messenger.send(self.owner, &content).await {
            warn!("Operator report not delivered: {}", e);
        }
    }

    fn spawn_send(&self, recipient: RecipientId, text: String) -> JoinHandle<Result<(), DispatchError>> {
        let messenger = Arc::clone(&self.messenger);
        tokio::spawn(async move { messenger.send(recipient, &text).await })
    }
}
