#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, BTreeSet},
    rc::Rc,
};

use ladder::{
    DeviceStorage, ImmediateTimer, ItemId, LadderConfig, MemoryBus, MemoryStorage, ProgressRow,
    ProgressStore, RemoteError, RemoteTable, Session, StorageError, UserId,
    backend::Credentials,
};

pub type TestStore = ProgressStore<FlakyStorage, FakeRemote, MemoryBus, ImmediateTimer>;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
struct RemoteState {
    rows: BTreeMap<(UserId, ItemId), ProgressRow>,
    select_all_calls: usize,
    select_items_calls: usize,
    upsert_calls: usize,
    delete_calls: usize,
    /// 1-based upsert call numbers that fail.
    failing_upserts: BTreeSet<usize>,
    fail_all_upserts: bool,
    fail_selects: bool,
    fail_deletes: bool,
}

/// An in-memory `user_progress` table. Clones share the same rows, like two tabs talking to one backend.
#[derive(Clone, Default)]
pub struct FakeRemote {
    state: Rc<RefCell<RemoteState>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, user_id: &str, rows: &[(ItemId, i64, bool)]) {
        let user_id = UserId::from(user_id);
        let mut state = self.state.borrow_mut();
        for &(kanji_id, progress_level, is_archived) in rows {
            state.rows.insert(
                (user_id.clone(), kanji_id),
                ProgressRow {
                    user_id: user_id.clone(),
                    kanji_id,
                    progress_level,
                    is_archived,
                },
            );
        }
    }

    pub fn rows_for(&self, user_id: &str) -> Vec<ProgressRow> {
        let user_id = UserId::from(user_id);
        self.state
            .borrow()
            .rows
            .values()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn row(&self, user_id: &str, item_id: ItemId) -> Option<ProgressRow> {
        self.state
            .borrow()
            .rows
            .get(&(UserId::from(user_id), item_id))
            .cloned()
    }

    pub fn select_all_calls(&self) -> usize {
        self.state.borrow().select_all_calls
    }

    pub fn select_items_calls(&self) -> usize {
        self.state.borrow().select_items_calls
    }

    pub fn upsert_calls(&self) -> usize {
        self.state.borrow().upsert_calls
    }

    pub fn delete_calls(&self) -> usize {
        self.state.borrow().delete_calls
    }

    pub fn fail_upsert_call(&self, call: usize) {
        self.state.borrow_mut().failing_upserts.insert(call);
    }

    pub fn fail_upserts(&self, fail: bool) {
        self.state.borrow_mut().fail_all_upserts = fail;
    }

    pub fn fail_selects(&self, fail: bool) {
        self.state.borrow_mut().fail_selects = fail;
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.state.borrow_mut().fail_deletes = fail;
    }
}

fn unavailable() -> RemoteError {
    RemoteError::Status {
        status: 503,
        body: "service unavailable".to_string(),
    }
}

impl RemoteTable for FakeRemote {
    async fn select_all(&self, credentials: &Credentials) -> Result<Vec<ProgressRow>, RemoteError> {
        let mut state = self.state.borrow_mut();
        state.select_all_calls += 1;
        if state.fail_selects {
            return Err(unavailable());
        }
        Ok(state
            .rows
            .values()
            .filter(|row| row.user_id == credentials.user_id)
            .cloned()
            .collect())
    }

    async fn select_items(
        &self,
        credentials: &Credentials,
        item_ids: &[ItemId],
    ) -> Result<Vec<ProgressRow>, RemoteError> {
        let mut state = self.state.borrow_mut();
        state.select_items_calls += 1;
        if state.fail_selects {
            return Err(unavailable());
        }
        Ok(state
            .rows
            .values()
            .filter(|row| row.user_id == credentials.user_id && item_ids.contains(&row.kanji_id))
            .cloned()
            .collect())
    }

    async fn upsert(
        &self,
        credentials: &Credentials,
        rows: &[ProgressRow],
    ) -> Result<(), RemoteError> {
        let mut state = self.state.borrow_mut();
        state.upsert_calls += 1;
        let call = state.upsert_calls;
        if state.fail_all_upserts || state.failing_upserts.contains(&call) {
            return Err(unavailable());
        }
        for row in rows {
            assert_eq!(row.user_id, credentials.user_id, "row for another user");
            state
                .rows
                .insert((row.user_id.clone(), row.kanji_id), row.clone());
        }
        Ok(())
    }

    async fn delete_all(&self, credentials: &Credentials) -> Result<(), RemoteError> {
        let mut state = self.state.borrow_mut();
        state.delete_calls += 1;
        if state.fail_deletes {
            return Err(unavailable());
        }
        state
            .rows
            .retain(|(user_id, _), _| *user_id != credentials.user_id);
        Ok(())
    }
}

/// [`MemoryStorage`] that can be told to start refusing writes.
#[derive(Clone, Default)]
pub struct FlakyStorage {
    pub inner: MemoryStorage,
    fail_writes: Rc<Cell<bool>>,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get_item(key).unwrap()
    }

    pub fn put(&self, key: &str, value: &str) {
        self.inner.set_item(key, value).unwrap();
    }
}

impl DeviceStorage for FlakyStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.inner.get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.fail_writes.get() {
            return Err(StorageError::Write {
                key: key.to_string(),
                message: "QuotaExceededError".to_string(),
            });
        }
        self.inner.set_item(key, value)
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        if self.fail_writes.get() {
            return Err(StorageError::Write {
                key: key.to_string(),
                message: "QuotaExceededError".to_string(),
            });
        }
        self.inner.remove_item(key)
    }
}

/// One simulated tab.
pub fn open_tab(
    session: Session,
    storage: &FlakyStorage,
    remote: Option<&FakeRemote>,
    bus: Option<MemoryBus>,
) -> Rc<TestStore> {
    ProgressStore::new(
        session,
        storage.clone(),
        remote.cloned(),
        bus,
        ImmediateTimer,
        LadderConfig::default(),
    )
}

pub fn anonymous_tab(storage: &FlakyStorage) -> Rc<TestStore> {
    open_tab(Session::anonymous(), storage, None, None)
}

pub fn signed_in(user_id: &str) -> Session {
    Session::signed_in(user_id, format!("token-{user_id}"))
}
