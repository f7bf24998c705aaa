use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

use crate::models::RecipientId;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to the portal failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status} during {stage}")]
    Status { stage: &'static str, status: StatusCode },
    #[error("login redirect carried no location header")]
    MissingRedirect,
    #[error("no asi session token in portal response")]
    MissingSessionToken,
    #[error("unexpected grade table markup: {0}")]
    Markup(String),
    #[error("grade overview contained no exam rows")]
    EmptyListing,
}

#[derive(Debug, Error)]
pub enum StorageReadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed content in {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum StorageWriteError {
    #[error("failed to serialize {}: {source}", path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to deliver message to {recipient}: {reason}")]
    Delivery { recipient: RecipientId, reason: String },
    #[error("send task for {recipient} did not complete: {reason}")]
    Aborted { recipient: RecipientId, reason: String },
}

/// Failures that abort a cycle before anything is persisted.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    StorageRead(#[from] StorageReadError),
}
