use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ProgressError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LadderConfig {
    /// Device-storage key for the `{"<item id>": <level>}` blob.
    pub levels_key: String,
    /// Device-storage key for the `[<item id>, ...]` archived blob.
    pub archived_key: String,
    /// Name of the same-origin channel tabs talk over.
    pub relay_channel: String,
    /// How long a tab waits for a sibling to hand over a snapshot before loading on its own.
    #[serde(with = "millis")]
    pub relay_wait: Duration,
    /// Rows per upsert request when migrating anonymous progress into the remote table.
    pub migration_batch_size: usize,
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            levels_key: "kanji-progress".to_string(),
            archived_key: "kanji-archived".to_string(),
            relay_channel: "kanji-progress-relay".to_string(),
            relay_wait: Duration::from_millis(100),
            migration_batch_size: 500,
        }
    }
}

impl LadderConfig {
    /// Overrides from the host page. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ProgressError> {
        serde_json::from_str(json).map_err(ProgressError::Serialization)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
