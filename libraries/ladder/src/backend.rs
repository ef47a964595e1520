//! The collaborators the store talks to. Browser and Supabase implementations live in `web` and
//! `supabase`; the in-memory ones here back tests and native tools.

use std::{cell::RefCell, collections::BTreeMap, rc::Rc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::{RemoteError, StorageError},
    level::{ItemId, MasteryLevel, MasteryRecord},
    session::{Session, UserId},
};

/// Origin-scoped string blob store (`localStorage` in the browser).
pub trait DeviceStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

/// Who a remote call is made on behalf of.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: UserId,
    pub access_token: Option<String>,
}

impl Session {
    pub fn credentials(&self) -> Option<Credentials> {
        self.user_id.clone().map(|user_id| Credentials {
            user_id,
            access_token: self.access_token.clone(),
        })
    }
}

/// One row of the `user_progress` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRow {
    pub user_id: UserId,
    pub kanji_id: ItemId,
    pub progress_level: i64,
    #[serde(default, deserialize_with = "null_as_false")]
    pub is_archived: bool,
}

impl ProgressRow {
    pub fn new(user_id: &UserId, kanji_id: ItemId, record: MasteryRecord) -> Self {
        Self {
            user_id: user_id.clone(),
            kanji_id,
            progress_level: i64::from(record.level),
            is_archived: record.archived,
        }
    }

    pub fn record(&self) -> MasteryRecord {
        MasteryRecord {
            level: MasteryLevel::from_stored(self.kanji_id, self.progress_level),
            archived: self.is_archived,
        }
    }
}

fn null_as_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

/// Row-oriented remote datastore keyed by (user, item).
#[allow(async_fn_in_trait)]
pub trait RemoteTable {
    /// Every row belonging to the user.
    async fn select_all(&self, credentials: &Credentials) -> Result<Vec<ProgressRow>, RemoteError>;

    /// The user's rows for just these items. Items without a row are simply missing from the result.
    async fn select_items(
        &self,
        credentials: &Credentials,
        item_ids: &[ItemId],
    ) -> Result<Vec<ProgressRow>, RemoteError>;

    /// Insert or overwrite rows, resolving conflicts on (user_id, kanji_id).
    async fn upsert(&self, credentials: &Credentials, rows: &[ProgressRow])
    -> Result<(), RemoteError>;

    async fn delete_all(&self, credentials: &Credentials) -> Result<(), RemoteError>;
}

#[allow(async_fn_in_trait)]
pub trait Timer {
    async fn sleep(&self, duration: Duration);
}

/// A timer that never waits. Anything delivered synchronously by the bus has already arrived by the
/// time `sleep` returns.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImmediateTimer;

impl Timer for ImmediateTimer {
    async fn sleep(&self, _duration: Duration) {}
}

/// In-memory [`DeviceStorage`]. Clones share the same items, the way two tabs share one origin.
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    items: Rc<RefCell<BTreeMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }
}

impl DeviceStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items.borrow().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.items
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items.borrow_mut().remove(key);
        Ok(())
    }
}
