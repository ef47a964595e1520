//! # ProgressStore
//! The per-tab source of truth for mastery levels and archive flags.
//!
//! The store picks its backend from the session: anonymous learners (or an app without a configured remote)
//! read and write device storage, signed-in learners read and write the remote table. Writes are optimistic:
//! the snapshot changes first, persistence happens afterwards, and a failed persist is handed back to the
//! caller as a [`WriteFailed`] rather than silently reverted.
//!
//! We never hold a `RefCell` borrow across an `.await`, a bus post, or a listener call. Handlers for relay
//! messages run re-entrantly (a synchronous bus can deliver a reply while we are still inside `load`), so
//! that rule is what keeps this free of "already borrowed" panics.

use std::{
    cell::{Cell, RefCell},
    collections::BTreeSet,
    rc::{Rc, Weak},
};

use slotmap::SlotMap;

use crate::{
    DEMO_ITEM,
    backend::{Credentials, DeviceStorage, RemoteTable, Timer},
    config::LadderConfig,
    error::{ProgressError, WriteFailed},
    level::{ItemId, MasteryLevel, MasteryRecord},
    relay::{LocalBus, RelayMessage},
    session::{Scope, Session, UserId},
    snapshot::{Snapshot, parse_archived_blob, parse_levels_blob},
    stats::{CategoryCounts, ProgressStats},
};

slotmap::new_key_type! {
    pub struct ListenerKey;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A sibling tab handed over its snapshot; no remote read happened.
    Adopted,
    /// Bulk-read this many rows from the remote table.
    Remote { rows: usize },
    /// Read the device-storage blobs.
    Device,
    /// The scope was already loaded, or a load for it is in flight.
    AlreadyLoaded,
    /// The remote read failed. The snapshot is empty and a later `load` will try again.
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Nobody is signed in, or there is no remote to migrate into.
    NotApplicable,
    NothingToMigrate,
    Migrated { rows: usize },
    /// Some batch failed. Device data is untouched; the first `rows_written` rows did reach the remote.
    Failed { rows_written: usize },
}

#[derive(Default)]
struct StoreState {
    snapshot: Snapshot,
    hydrated: bool,
    loaded: Option<Scope>,
    loading: Option<Scope>,
    /// Set while we wait for a sibling tab to answer a `RequestSnapshot`.
    awaiting_handover: Option<UserId>,
    handed_over: Option<Snapshot>,
    /// The signed-in user whose device progress has already been migrated in this session.
    migrated_for: Option<UserId>,
}

pub struct ProgressStore<S, R, B, T> {
    config: LadderConfig,
    storage: S,
    remote: Option<R>,
    bus: Option<B>,
    timer: T,
    session: RefCell<Session>,
    state: RefCell<StoreState>,
    listeners: RefCell<SlotMap<ListenerKey, Rc<dyn Fn()>>>,
    notification_pending: Cell<bool>,
}

impl<S, R, B, T> ProgressStore<S, R, B, T>
where
    S: DeviceStorage + 'static,
    R: RemoteTable + 'static,
    B: LocalBus + 'static,
    T: Timer + 'static,
{
    /// `remote` is `None` when no backend is configured, in which case everything stays on the device even
    /// for signed-in users. `bus` is `None` when the platform has no broadcast primitive; every tab then
    /// loads on its own.
    pub fn new(
        session: Session,
        storage: S,
        remote: Option<R>,
        bus: Option<B>,
        timer: T,
        config: LadderConfig,
    ) -> Rc<Self> {
        let store = Rc::new(Self {
            config,
            storage,
            remote,
            bus,
            timer,
            session: RefCell::new(session),
            state: RefCell::new(StoreState::default()),
            listeners: RefCell::new(SlotMap::with_key()),
            notification_pending: Cell::new(false),
        });

        if let Some(bus) = &store.bus {
            let weak: Weak<Self> = Rc::downgrade(&store);
            bus.subscribe(Box::new(move |message| {
                if let Some(store) = weak.upgrade() {
                    store.receive(message);
                }
            }));
        }

        store
    }

    pub fn config(&self) -> &LadderConfig {
        &self.config
    }

    pub fn session(&self) -> Session {
        self.session.borrow().clone()
    }

    pub fn scope(&self) -> Scope {
        match (&self.remote, &self.session.borrow().user_id) {
            (Some(_), Some(user_id)) => Scope::User(user_id.clone()),
            _ => Scope::Device,
        }
    }

    fn credentials(&self) -> Option<Credentials> {
        self.session.borrow().credentials()
    }

    // =======
    // reads
    // =======

    pub fn is_hydrated(&self) -> bool {
        self.state.borrow().hydrated
    }

    pub fn is_loaded(&self) -> bool {
        let scope = self.scope();
        let state = self.state.borrow();
        state.hydrated && state.loaded.as_ref() == Some(&scope)
    }

    /// The level to show for an item.
    ///
    /// Until the first load finishes every item reads as locked, so the UI never flashes a value it is about
    /// to replace. Anonymous learners always see [`DEMO_ITEM`] as mastered; that override is never written
    /// anywhere.
    pub fn level_of(&self, item_id: ItemId) -> MasteryLevel {
        let device_scope = self.scope() == Scope::Device;
        let state = self.state.borrow();
        if !state.hydrated {
            return MasteryLevel::Locked;
        }
        if device_scope && item_id == DEMO_ITEM {
            return MasteryLevel::Mastered;
        }
        state.snapshot.level_of(item_id)
    }

    pub fn is_archived(&self, item_id: ItemId) -> bool {
        let state = self.state.borrow();
        state.hydrated && state.snapshot.is_archived(item_id)
    }

    pub fn archived_ids(&self) -> BTreeSet<ItemId> {
        let state = self.state.borrow();
        if !state.hydrated {
            return BTreeSet::new();
        }
        state.snapshot.archived_ids()
    }

    /// A copy of the raw snapshot, without the demo override.
    pub fn snapshot(&self) -> Snapshot {
        self.state.borrow().snapshot.clone()
    }

    pub fn stats(&self) -> ProgressStats {
        ProgressStats::of(&self.state.borrow().snapshot)
    }

    /// Per-level counts over `items`, skipping archived ones.
    pub fn category_counts(&self, items: impl IntoIterator<Item = ItemId>) -> CategoryCounts {
        if !self.is_hydrated() {
            return CategoryCounts::default();
        }
        CategoryCounts::tally(items, |item_id| self.level_of(item_id), |item_id| {
            self.is_archived(item_id)
        })
    }

    /// Sum of all levels divided by the number of items in the course, rounded to two decimals.
    /// Only meaningful for signed-in learners; anonymous learners get 0.
    pub fn overall_progress(&self, total_items: usize) -> f64 {
        if !self.is_loaded() || self.scope() == Scope::Device {
            return 0.0;
        }
        crate::stats::overall_progress(&self.state.borrow().snapshot, total_items)
    }

    // =======
    // loading
    // =======

    /// Populate the snapshot for the current scope. Never fails; see [`LoadOutcome`].
    pub async fn load(&self) -> LoadOutcome {
        let _flusher = FlushLater::new(self);

        let scope = self.scope();
        {
            let mut state = self.state.borrow_mut();
            if state.loaded.as_ref() == Some(&scope) || state.loading.as_ref() == Some(&scope) {
                return LoadOutcome::AlreadyLoaded;
            }
            state.loading = Some(scope.clone());
        }

        match scope {
            Scope::Device => {
                let snapshot = self.read_device_snapshot();
                self.install(&Scope::Device, snapshot);
                LoadOutcome::Device
            }
            Scope::User(user_id) => self.load_for_user(user_id).await,
        }
    }

    async fn load_for_user(&self, user_id: UserId) -> LoadOutcome {
        let scope = Scope::User(user_id.clone());

        let needs_migration = self.state.borrow().migrated_for.as_ref() != Some(&user_id);
        if needs_migration {
            let outcome = self.migrate().await;
            log::info!("Sign-in migration for {user_id}: {outcome:?}");
            // a failed batch leaves the device copy in place for the next session to retry
            if !matches!(outcome, MigrationOutcome::Failed { .. }) && self.scope() == scope {
                self.state.borrow_mut().migrated_for = Some(user_id.clone());
            }
        }

        if let Some(snapshot) = self.request_handover(&user_id).await {
            log::info!("Adopted progress snapshot from another tab for {user_id}");
            return if self.install(&scope, snapshot) {
                LoadOutcome::Adopted
            } else {
                LoadOutcome::Failed
            };
        }

        let (Some(remote), Some(credentials)) = (&self.remote, self.credentials()) else {
            self.abandon_load(&scope);
            return LoadOutcome::Failed;
        };

        match remote.select_all(&credentials).await {
            Ok(rows) => {
                let row_count = rows.len();
                let snapshot = Snapshot::from_rows(rows);
                if !self.install(&scope, snapshot.clone()) {
                    return LoadOutcome::Failed;
                }
                log::info!("Loaded {row_count} progress rows for {user_id}");
                self.broadcast(RelayMessage::snapshot_loaded(user_id, &snapshot));
                LoadOutcome::Remote { rows: row_count }
            }
            Err(e) => {
                log::error!("Error loading progress for {user_id}: {e}");
                self.abandon_load(&scope);
                LoadOutcome::Failed
            }
        }
    }

    /// Ask sibling tabs for their snapshot and wait a moment for an answer.
    async fn request_handover(&self, user_id: &UserId) -> Option<Snapshot> {
        let bus = self.bus.as_ref()?;

        {
            let mut state = self.state.borrow_mut();
            state.awaiting_handover = Some(user_id.clone());
            state.handed_over = None;
        }

        let request = RelayMessage::RequestSnapshot {
            identity: user_id.clone(),
        };
        if let Err(e) = bus.post(&request) {
            log::error!("Failed to request a progress snapshot from other tabs: {e}");
            self.state.borrow_mut().awaiting_handover = None;
            return None;
        }

        self.timer.sleep(self.config.relay_wait).await;

        let mut state = self.state.borrow_mut();
        if state.awaiting_handover.as_ref() != Some(user_id) {
            // the session changed while we were waiting
            return None;
        }
        state.awaiting_handover = None;
        state.handed_over.take()
    }

    /// Make `snapshot` the current one, unless the session moved on while we were loading it.
    fn install(&self, scope: &Scope, snapshot: Snapshot) -> bool {
        let mut state = self.state.borrow_mut();
        if state.loading.as_ref() != Some(scope) {
            log::warn!("Discarding progress loaded for a scope that is no longer current");
            return false;
        }
        state.snapshot = snapshot;
        state.hydrated = true;
        state.loaded = Some(scope.clone());
        state.loading = None;
        drop(state);
        self.mark_changed();
        true
    }

    fn abandon_load(&self, scope: &Scope) {
        let mut state = self.state.borrow_mut();
        if state.loading.as_ref() != Some(scope) {
            return;
        }
        state.snapshot = Snapshot::default();
        state.hydrated = true;
        state.loading = None;
        drop(state);
        self.mark_changed();
    }

    /// Both device blobs, each parsed on its own. A blob that doesn't parse counts as empty and is left in
    /// storage as is; the next write-through replaces it.
    fn read_device_snapshot(&self) -> Snapshot {
        let levels = self
            .read_blob(&self.config.levels_key)
            .and_then(|blob| {
                parse_levels_blob(&blob)
                    .inspect_err(|e| log::error!("Failed to parse saved progress: {e}"))
                    .ok()
            })
            .unwrap_or_default();
        let archived = self
            .read_blob(&self.config.archived_key)
            .and_then(|blob| {
                parse_archived_blob(&blob)
                    .inspect_err(|e| log::error!("Failed to parse saved archive list: {e}"))
                    .ok()
            })
            .unwrap_or_default();
        Snapshot::from_parts(levels, archived)
    }

    fn read_blob(&self, key: &str) -> Option<String> {
        self.storage
            .get_item(key)
            .inspect_err(|e| log::error!("Failed to read {key} from device storage: {e}"))
            .ok()
            .flatten()
    }

    // =======
    // sign-in
    // =======

    /// Copy anonymous progress into the signed-in user's remote rows, then clear it from the device.
    ///
    /// Rows go up in batches. If a batch fails the device data stays where it is, so nothing is lost, but the
    /// batches before it have already been written.
    pub async fn migrate(&self) -> MigrationOutcome {
        let (Scope::User(user_id), Some(remote), Some(credentials)) =
            (self.scope(), &self.remote, self.credentials())
        else {
            return MigrationOutcome::NotApplicable;
        };

        let local = self.read_device_snapshot();
        if local.is_empty() {
            return MigrationOutcome::NothingToMigrate;
        }

        let rows = local.to_rows(&user_id);
        let mut rows_written = 0;
        for batch in rows.chunks(self.config.migration_batch_size.max(1)) {
            if let Err(e) = remote.upsert(&credentials, batch).await {
                log::error!(
                    "Error migrating progress for {user_id} ({rows_written} of {} rows written): {e}",
                    rows.len()
                );
                return MigrationOutcome::Failed { rows_written };
            }
            rows_written += batch.len();
        }

        for key in [&self.config.levels_key, &self.config.archived_key] {
            if let Err(e) = self.storage.remove_item(key) {
                log::error!("Migrated progress but failed to clear {key}: {e}");
            }
        }

        log::info!("Successfully migrated {rows_written} progress records for {user_id}");
        MigrationOutcome::Migrated { rows: rows_written }
    }

    /// Handle an auth transition.
    ///
    /// A new identity starts from an empty snapshot and gets migrated again on its first load. A session for
    /// the same identity (a refreshed token) keeps the snapshot and migrates nothing.
    pub async fn set_session(&self, session: Session) -> LoadOutcome {
        let _flusher = FlushLater::new(self);

        let previous_scope = self.scope();
        *self.session.borrow_mut() = session;
        let scope = self.scope();

        if scope != previous_scope {
            {
                let mut state = self.state.borrow_mut();
                state.snapshot = Snapshot::default();
                state.loaded = None;
                state.loading = None;
                state.awaiting_handover = None;
                state.handed_over = None;
                state.migrated_for = None;
            }
            self.mark_changed();
        }

        self.load().await
    }

    // =======
    // writes
    // =======

    /// Optimistically set a level, then persist it.
    ///
    /// On `Err` the snapshot still shows the new level; pass the error to [`ProgressStore::rollback`] to undo
    /// it.
    pub async fn set_level(&self, item_id: ItemId, level: MasteryLevel) -> Result<(), WriteFailed> {
        let _flusher = FlushLater::new(self);

        let (previous, attempted) = {
            let mut state = self.state.borrow_mut();
            let previous = state.snapshot.record(item_id);
            (previous, state.snapshot.set_level(item_id, level))
        };
        self.mark_changed();

        if let Some(identity) = self.scope().user_id().cloned() {
            self.broadcast(RelayMessage::LevelChanged {
                identity,
                item_id,
                level,
            });
        }

        self.persist(item_id, attempted, Blob::Levels)
            .await
            .map_err(|source| WriteFailed {
                item_id,
                previous,
                attempted,
                source,
            })
    }

    /// Optimistically flip the archived flag, then persist it together with the current level.
    /// Returns the new flag.
    pub async fn toggle_archived(&self, item_id: ItemId) -> Result<bool, WriteFailed> {
        let _flusher = FlushLater::new(self);

        let (previous, attempted) = {
            let mut state = self.state.borrow_mut();
            let previous = state.snapshot.record(item_id);
            let archived = !previous.unwrap_or_default().archived;
            (previous, state.snapshot.set_archived(item_id, archived))
        };
        self.mark_changed();

        if let Some(identity) = self.scope().user_id().cloned() {
            self.broadcast(RelayMessage::ArchiveToggled {
                identity,
                item_id,
                archived: attempted.archived,
            });
        }

        self.persist(item_id, attempted, Blob::Archived)
            .await
            .map(|()| attempted.archived)
            .map_err(|source| WriteFailed {
                item_id,
                previous,
                attempted,
                source,
            })
    }

    /// Undo a failed optimistic write.
    ///
    /// Does nothing (and returns `false`) if the item has been written again since, so a stale failure
    /// can't clobber a newer value. Sibling tabs are told about the restored value.
    pub fn rollback(&self, failed: &WriteFailed) -> bool {
        let _flusher = FlushLater::new(self);

        let restored = {
            let mut state = self.state.borrow_mut();
            if state.snapshot.record(failed.item_id) != Some(failed.attempted) {
                log::warn!(
                    "Not rolling back item {}: it changed again after the failed write",
                    failed.item_id
                );
                return false;
            }
            state.snapshot.restore(failed.item_id, failed.previous);
            failed.previous.unwrap_or_default()
        };
        self.mark_changed();

        if let Some(identity) = self.scope().user_id().cloned() {
            if restored.level != failed.attempted.level {
                self.broadcast(RelayMessage::LevelChanged {
                    identity: identity.clone(),
                    item_id: failed.item_id,
                    level: restored.level,
                });
            }
            if restored.archived != failed.attempted.archived {
                self.broadcast(RelayMessage::ArchiveToggled {
                    identity,
                    item_id: failed.item_id,
                    archived: restored.archived,
                });
            }
        }
        true
    }

    /// Clear every record of the current scope, remotely or on the device, then empty the snapshot.
    /// If clearing the backend fails the snapshot is kept. Sibling tabs of a signed-in user get the empty
    /// snapshot too, so none of them hands the old one to a tab that opens later.
    pub async fn reset(&self) -> Result<(), ProgressError> {
        let _flusher = FlushLater::new(self);

        match self.scope() {
            Scope::User(user_id) => {
                if let (Some(remote), Some(credentials)) = (&self.remote, self.credentials()) {
                    remote.delete_all(&credentials).await?;
                }
                self.broadcast(RelayMessage::snapshot_loaded(user_id, &Snapshot::default()));
            }
            Scope::Device => {
                self.storage.remove_item(&self.config.levels_key)?;
                self.storage.remove_item(&self.config.archived_key)?;
            }
        }

        self.state.borrow_mut().snapshot = Snapshot::default();
        self.mark_changed();
        Ok(())
    }

    async fn persist(
        &self,
        item_id: ItemId,
        record: MasteryRecord,
        blob: Blob,
    ) -> Result<(), ProgressError> {
        match self.scope() {
            Scope::User(user_id) => {
                let (Some(remote), Some(credentials)) = (&self.remote, self.credentials()) else {
                    return Ok(());
                };
                let row = crate::backend::ProgressRow::new(&user_id, item_id, record);
                remote.upsert(&credentials, &[row]).await?;
                Ok(())
            }
            Scope::Device => {
                let loaded = self.state.borrow().loaded.as_ref() == Some(&Scope::Device);
                let snapshot = if loaded {
                    self.state.borrow().snapshot.clone()
                } else {
                    // nothing is in memory yet, so write on top of what the device already holds
                    let mut saved = self.read_device_snapshot();
                    match blob {
                        Blob::Levels => saved.set_level(item_id, record.level),
                        Blob::Archived => saved.set_archived(item_id, record.archived),
                    };
                    saved
                };
                let (key, value) = match blob {
                    Blob::Levels => (&self.config.levels_key, snapshot.levels_blob()),
                    Blob::Archived => (&self.config.archived_key, snapshot.archived_blob()),
                };
                self.storage
                    .set_item(key, &value)
                    .inspect_err(|e| log::error!("Failed to save progress to device storage: {e}"))
                    .map_err(ProgressError::from)
            }
        }
    }

    // =======
    // relay
    // =======

    fn broadcast(&self, message: RelayMessage) {
        let Some(bus) = &self.bus else {
            return;
        };
        if let Err(e) = bus.post(&message) {
            log::error!("Failed to relay progress change to other tabs: {e}");
        }
    }

    /// Apply a message from a sibling tab.
    fn receive(&self, message: RelayMessage) {
        let _flusher = FlushLater::new(self);

        let Scope::User(identity) = self.scope() else {
            return;
        };
        if message.identity() != &identity {
            return;
        }

        match message {
            RelayMessage::RequestSnapshot { .. } => {
                let reply = {
                    let state = self.state.borrow();
                    if state.loaded.as_ref() == Some(&Scope::User(identity.clone())) {
                        Some(RelayMessage::snapshot_loaded(identity, &state.snapshot))
                    } else {
                        None
                    }
                };
                if let Some(reply) = reply {
                    self.broadcast(reply);
                }
            }
            RelayMessage::SnapshotLoaded {
                levels,
                archived_ids,
                ..
            } => {
                let snapshot = Snapshot::from_parts(levels, archived_ids);
                let mut state = self.state.borrow_mut();
                if state.awaiting_handover.as_ref() == Some(&identity) {
                    state.handed_over = Some(snapshot);
                } else if state.loaded.as_ref() == Some(&Scope::User(identity)) {
                    // another tab has fresher data, e.g. right after a reset
                    state.snapshot = snapshot;
                    drop(state);
                    self.mark_changed();
                }
            }
            RelayMessage::LevelChanged { item_id, level, .. } => {
                if self.patch(&identity, |snapshot| {
                    snapshot.set_level(item_id, level);
                }) {
                    log::info!("Item {item_id} changed to {} in another tab", level.label());
                }
            }
            RelayMessage::ArchiveToggled {
                item_id, archived, ..
            } => {
                self.patch(&identity, |snapshot| {
                    snapshot.set_archived(item_id, archived);
                });
            }
        }
    }

    /// Patches only apply to a loaded snapshot; a tab that is still loading will read the new value anyway.
    fn patch(&self, identity: &UserId, f: impl FnOnce(&mut Snapshot)) -> bool {
        {
            let mut state = self.state.borrow_mut();
            if state.loaded.as_ref() != Some(&Scope::User(identity.clone())) {
                return false;
            }
            f(&mut state.snapshot);
        }
        self.mark_changed();
        true
    }

    // =======
    // listeners
    // =======

    /// Called (with no arguments) whenever anything a reader could observe may have changed.
    pub fn register_listener(&self, listener: impl Fn() + 'static) -> ListenerKey {
        self.listeners.borrow_mut().insert(Rc::new(listener))
    }

    pub fn unregister_listener(&self, key: ListenerKey) {
        self.listeners.borrow_mut().remove(key);
    }

    fn mark_changed(&self) {
        self.notification_pending.set(true);
    }

    fn flush_notifications(&self) {
        if !self.notification_pending.replace(false) {
            return;
        }
        // clone the listeners out so they can call back into the store, or (un)register
        let listeners: Vec<Rc<dyn Fn()>> = self.listeners.borrow().values().cloned().collect();
        for listener in listeners {
            listener();
        }
    }
}

#[derive(Clone, Copy)]
enum Blob {
    Levels,
    Archived,
}

/// Flushes listeners when dropped, whichever way the function it lives in returns.
struct FlushLater<'a, S, R, B, T>
where
    S: DeviceStorage + 'static,
    R: RemoteTable + 'static,
    B: LocalBus + 'static,
    T: Timer + 'static,
{
    store: &'a ProgressStore<S, R, B, T>,
}

impl<'a, S, R, B, T> FlushLater<'a, S, R, B, T>
where
    S: DeviceStorage + 'static,
    R: RemoteTable + 'static,
    B: LocalBus + 'static,
    T: Timer + 'static,
{
    fn new(store: &'a ProgressStore<S, R, B, T>) -> Self {
        Self { store }
    }
}

impl<S, R, B, T> Drop for FlushLater<'_, S, R, B, T>
where
    S: DeviceStorage + 'static,
    R: RemoteTable + 'static,
    B: LocalBus + 'static,
    T: Timer + 'static,
{
    fn drop(&mut self) {
        self.store.flush_notifications();
    }
}
