use std::rc::Rc;

use crate::{
    backend::{DeviceStorage, RemoteTable, Timer},
    error::{ProgressError, WriteFailed},
    level::{ItemId, MasteryLevel},
    relay::LocalBus,
    session::Session,
    store::{LoadOutcome, ProgressStore},
};

/// What the UI talks to. Wraps a [`ProgressStore`] and decides what happens when a write doesn't stick:
/// the failure is logged and the optimistic value is rolled back.
pub struct ProgressTracker<S, R, B, T> {
    store: Rc<ProgressStore<S, R, B, T>>,
}

impl<S, R, B, T> Clone for ProgressTracker<S, R, B, T> {
    fn clone(&self) -> Self {
        Self {
            store: Rc::clone(&self.store),
        }
    }
}

impl<S, R, B, T> ProgressTracker<S, R, B, T>
where
    S: DeviceStorage + 'static,
    R: RemoteTable + 'static,
    B: LocalBus + 'static,
    T: Timer + 'static,
{
    pub fn new(store: Rc<ProgressStore<S, R, B, T>>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Rc<ProgressStore<S, R, B, T>> {
        &self.store
    }

    pub async fn load(&self) -> LoadOutcome {
        self.store.load().await
    }

    pub async fn sign_in(&self, session: Session) -> LoadOutcome {
        self.store.set_session(session).await
    }

    pub async fn sign_out(&self) -> LoadOutcome {
        self.store.set_session(Session::anonymous()).await
    }

    /// Returns whether the new level was persisted. If it wasn't, the old level is back in place.
    pub async fn set_level(&self, item_id: ItemId, level: MasteryLevel) -> bool {
        match self.store.set_level(item_id, level).await {
            Ok(()) => true,
            Err(failed) => {
                self.revert(&failed);
                false
            }
        }
    }

    /// Same as [`ProgressTracker::set_level`] for a level that came from outside (a select box, a URL).
    /// Values off the ladder are refused before anything changes.
    pub async fn set_level_raw(&self, item_id: ItemId, raw: i64) -> Result<bool, ProgressError> {
        let level = MasteryLevel::try_from(raw)?;
        Ok(self.set_level(item_id, level).await)
    }

    /// Returns the archived flag the item ends up with.
    pub async fn toggle_archived(&self, item_id: ItemId) -> bool {
        match self.store.toggle_archived(item_id).await {
            Ok(archived) => archived,
            Err(failed) => {
                self.revert(&failed);
                self.store.is_archived(item_id)
            }
        }
    }

    pub async fn reset(&self) -> bool {
        match self.store.reset().await {
            Ok(()) => true,
            Err(e) => {
                log::error!("Error resetting progress: {e}");
                false
            }
        }
    }

    fn revert(&self, failed: &WriteFailed) {
        log::error!("Error updating progress: {failed}");
        self.store.rollback(failed);
    }
}
