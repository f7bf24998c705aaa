use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{error, info};
use teloxide::dispatching::{HandlerExt, UpdateFilterExt, UpdateHandler};
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::User;
use teloxide::utils::command::BotCommands;
use teloxide::RequestError;

use crate::errors::{DispatchError, StorageWriteError};
use crate::models::RecipientId;
use crate::utils::notify::Messenger;
use crate::utils::scheduler::{CycleOutcome, Poller};
use crate::utils::store::{SubscriberStore, Subscription};

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Verfügbare Befehle:")]
pub enum Command {
    #[command(description = "Start the bot")]
    Start,
    #[command(description = "Prüfe auf Änderungen")]
    Check,
}

pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send(&self, recipient: RecipientId, text: &str) -> Result<(), DispatchError> {
        match self.bot.send_message(ChatId(recipient.0), text).await {
            Ok(message) => {
                info!("Text message sent successfully {:?}", message.id);
                Ok(())
            }
            Err(e) => Err(DispatchError::Delivery {
                recipient,
                reason: e.to_string(),
            }),
        }
    }
}

/// Shared by all update handlers.
pub struct BotState {
    pub poller: Arc<Poller>,
    pub subscribers: Arc<SubscriberStore>,
}

pub fn schema() -> UpdateHandler<RequestError> {
    Update::filter_message()
        .branch(dptree::entry().filter_command::<Command>().endpoint(handle_command))
        .branch(dptree::endpoint(handle_message))
}

pub fn recipient_of(user: &User) -> RecipientId {
    RecipientId(ChatId::from(user.id).0)
}

fn describe(message: &str, user: Option<&User>) -> String {
    let userdata = user
        .and_then(|user| serde_json::to_string_pretty(user).ok())
        .unwrap_or_default();
    format!("{message} | {userdata}")
}

pub fn welcome_reply(interval: Duration) -> String {
    format!(
        "Heyho! Schön, dass wir zusammen auf deine Noten warten, ich prüfe alle {} Minuten ob sich was getan hat. \
         Lehne dich zurück ich sage dir Bescheid!",
        interval.as_secs() / 60
    )
}

pub const ALREADY_SUBSCRIBED_REPLY: &str = "Heyho, schön, dass wir weiterhin zusammen warten! Keine Sorge du bist \
     schon auf der Benachrichtigungsliste und bekommst sofort mit wenn eine neue Note eingetragen wird!";

pub fn check_reply(outcome: CycleOutcome) -> &'static str {
    match outcome {
        CycleOutcome::NoChanges => "Alles beim alten, keine Änderungen.",
        CycleOutcome::Changes => "Da hattest du aber einen guten Riecher!",
        CycleOutcome::Failed => "Da ist leider etwas schiefgelaufen, ich versuche es später noch einmal.",
        CycleOutcome::Skipped => "Ich schaue gerade schon nach, gleich weißt du mehr!",
    }
}

pub fn unknown_reply(user: Option<&User>) -> String {
    let name = user.map(|user| user.first_name.as_str()).unwrap_or("");
    format!("Du musst lauter sprechen {name}!!! Ich kann dich nicht verstehen!!!")
}

/// Subscribes `sender` and picks the `/start` answer. The owner is never
/// subscribed and gets no answer.
pub fn start_reply(
    owner: RecipientId,
    sender: RecipientId,
    subscribers: &SubscriberStore,
    interval: Duration,
) -> Result<Option<String>, StorageWriteError> {
    if sender == owner {
        return Ok(None);
    }
    let reply = match subscribers.subscribe(sender)? {
        Subscription::AlreadySubscribed => ALREADY_SUBSCRIBED_REPLY.to_string(),
        Subscription::Added => {
            info!("New subscriber {}", sender);
            welcome_reply(interval)
        }
    };
    Ok(Some(reply))
}

async fn handle_command(bot: Bot, msg: Message, cmd: Command, state: Arc<BotState>) -> ResponseResult<()> {
    let notifier = state.poller.notifier();
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let sender = recipient_of(user);

    match cmd {
        Command::Start => {
            let reply = match start_reply(notifier.owner(), sender, &state.subscribers, state.poller.interval()) {
                Ok(Some(reply)) => reply,
                Ok(None) => {
                    info!("COMMAND /start: from private user: {}", sender);
                    return Ok(());
                }
                Err(e) => {
                    error!("Failed to store subscriber {}: {}", sender, e);
                    notifier.report(&format!("Error: {e} ({e:?})")).await;
                    check_reply(CycleOutcome::Failed).to_string()
                }
            };
            notifier.report(&describe("Command /start", Some(user))).await;
            bot.send_message(msg.chat.id, reply).reply_to_message_id(msg.id).await?;
        }
        Command::Check => {
            notifier.report(&describe("Command /check", Some(user))).await;
            bot.send_message(msg.chat.id, "Alright, ich checke ob sich was getan hat!")
                .reply_to_message_id(msg.id)
                .await?;

            let outcome = state.poller.trigger().await;
            bot.send_message(msg.chat.id, check_reply(outcome))
                .reply_to_message_id(msg.id)
                .await?;
        }
    }
    Ok(())
}

async fn handle_message(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let text = msg.text().unwrap_or_default();
    state
        .poller
        .notifier()
        .report(&describe(&format!("Message received: {text}"), msg.from()))
        .await;

    bot.send_message(msg.chat.id, unknown_reply(msg.from()))
        .reply_to_message_id(msg.id)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const OWNER: RecipientId = RecipientId(1);
    const INTERVAL: Duration = Duration::from_secs(15 * 60);

    fn users_file(dir: &TempDir) -> std::path::PathBuf {
        dir.path().join("telegram_users.json")
    }

    #[test]
    fn owner_start_is_ignored() {
        let dir = TempDir::new().unwrap();
        let subscribers = SubscriberStore::open(users_file(&dir)).unwrap();

        assert_eq!(start_reply(OWNER, OWNER, &subscribers, INTERVAL).unwrap(), None);
        assert!(subscribers.all().is_empty());
        assert!(!users_file(&dir).exists());
    }

    #[test]
    fn new_sender_is_stored_and_welcomed() {
        let dir = TempDir::new().unwrap();
        let subscribers = SubscriberStore::open(users_file(&dir)).unwrap();

        let reply = start_reply(OWNER, RecipientId(77), &subscribers, INTERVAL).unwrap();
        assert_eq!(reply, Some(welcome_reply(INTERVAL)));

        let reopened = SubscriberStore::open(users_file(&dir)).unwrap();
        assert_eq!(reopened.all(), vec![RecipientId(77)]);
    }

    #[test]
    fn repeated_start_gets_already_subscribed_reply() {
        let dir = TempDir::new().unwrap();
        let subscribers = SubscriberStore::open(users_file(&dir)).unwrap();
        start_reply(OWNER, RecipientId(77), &subscribers, INTERVAL).unwrap();

        let reply = start_reply(OWNER, RecipientId(77), &subscribers, INTERVAL).unwrap();
        assert_eq!(reply.as_deref(), Some(ALREADY_SUBSCRIBED_REPLY));
        assert_eq!(subscribers.all(), vec![RecipientId(77)]);
    }

    #[test]
    fn commands_parse_from_chat_text() {
        assert_eq!(Command::parse("/start", "notenbot").unwrap(), Command::Start);
        assert_eq!(Command::parse("/check@notenbot", "notenbot").unwrap(), Command::Check);
        assert!(Command::parse("/grades", "notenbot").is_err());
    }

    #[test]
    fn check_replies_distinguish_outcomes() {
        let replies = [
            check_reply(CycleOutcome::Changes),
            check_reply(CycleOutcome::NoChanges),
            check_reply(CycleOutcome::Failed),
            check_reply(CycleOutcome::Skipped),
        ];
        assert_eq!(replies[1], "Alles beim alten, keine Änderungen.");
        for (i, a) in replies.iter().enumerate() {
            for b in &replies[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn welcome_mentions_the_interval() {
        assert!(welcome_reply(Duration::from_secs(15 * 60)).contains("alle 15 Minuten"));
    }

    #[test]
    fn unknown_reply_without_sender_still_reads() {
        assert_eq!(
            unknown_reply(None),
            "Du musst lauter sprechen !!! Ich kann dich nicht verstehen!!!"
        );
    }
}
