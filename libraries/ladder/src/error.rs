use crate::level::{ItemId, MasteryRecord};

#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("remote table error: {0}")]
    Remote(#[from] RemoteError),

    #[error("device storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error")]
    Serialization(#[source] serde_json::Error),

    #[error("{0} is not a mastery level (expected 0, 20, 60, 80 or 100)")]
    InvalidLevel(i64),
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode response: {message}. Body: {body}")]
    Decode { message: String, body: String },
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("device storage is unavailable")]
    Unavailable,

    #[error("failed to write {key}: {message}")]
    Write { key: String, message: String },
}

/// An optimistic write whose persistence step failed.
///
/// The snapshot still shows `attempted`. Hand this to [`crate::ProgressStore::rollback`] to put `previous`
/// back.
#[derive(Debug, thiserror::Error)]
#[error("failed to persist item {item_id}: {source}")]
pub struct WriteFailed {
    pub item_id: ItemId,
    pub previous: Option<MasteryRecord>,
    pub attempted: MasteryRecord,
    #[source]
    pub source: ProgressError,
}
