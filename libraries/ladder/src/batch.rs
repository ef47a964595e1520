//! Progress for one page of items at a time, for grids that don't want the whole snapshot.

use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, HashSet},
};

use crate::{
    DEMO_ITEM,
    backend::RemoteTable,
    level::{ItemId, MasteryLevel, MasteryRecord},
    session::Session,
};

pub type BatchProgress = BTreeMap<ItemId, MasteryRecord>;

pub struct BatchedProgress<R> {
    remote: Option<R>,
    cache: RefCell<BatchProgress>,
    /// Sorted id lists that have been fetched successfully.
    loaded_batches: RefCell<HashSet<Vec<ItemId>>>,
    in_flight: Cell<usize>,
}

impl<R: RemoteTable> BatchedProgress<R> {
    pub fn new(remote: Option<R>) -> Self {
        Self {
            remote,
            cache: RefCell::new(BTreeMap::new()),
            loaded_batches: RefCell::new(HashSet::new()),
            in_flight: Cell::new(0),
        }
    }

    /// Records for `item_ids`.
    ///
    /// A batch that was fetched before is answered from the cache. Anonymous sessions (or no remote) get
    /// defaults, with [`DEMO_ITEM`] mastered. If the fetch fails every item gets the default record and the
    /// batch is not cached, so asking again retries.
    pub async fn load_batch(&self, session: &Session, item_ids: &[ItemId]) -> BatchProgress {
        let mut batch_key = item_ids.to_vec();
        batch_key.sort_unstable();
        batch_key.dedup();

        if self.loaded_batches.borrow().contains(&batch_key) {
            let cache = self.cache.borrow();
            return batch_key
                .iter()
                .filter_map(|item_id| cache.get(item_id).map(|record| (*item_id, *record)))
                .collect();
        }

        let (Some(remote), Some(credentials)) = (&self.remote, session.credentials()) else {
            return batch_key
                .iter()
                .map(|&item_id| {
                    let level = if item_id == DEMO_ITEM {
                        MasteryLevel::Mastered
                    } else {
                        MasteryLevel::Locked
                    };
                    (
                        item_id,
                        MasteryRecord {
                            level,
                            archived: false,
                        },
                    )
                })
                .collect();
        };

        self.in_flight.set(self.in_flight.get() + 1);
        let result = remote.select_items(&credentials, &batch_key).await;
        self.in_flight.set(self.in_flight.get() - 1);

        let rows = match result {
            Ok(rows) => rows,
            Err(e) => {
                log::error!("Error loading progress batch: {e}");
                return batch_key
                    .iter()
                    .map(|&item_id| (item_id, MasteryRecord::default()))
                    .collect();
            }
        };

        let mut progress: BatchProgress = batch_key
            .iter()
            .map(|&item_id| (item_id, MasteryRecord::default()))
            .collect();
        for row in rows {
            // the remote is filtered by id already; anything else is ignored
            if let Some(record) = progress.get_mut(&row.kanji_id) {
                *record = row.record();
            }
        }

        self.cache.borrow_mut().extend(progress.iter().map(|(k, v)| (*k, *v)));
        self.loaded_batches.borrow_mut().insert(batch_key);
        progress
    }

    pub fn level_of(&self, item_id: ItemId) -> MasteryLevel {
        self.cache
            .borrow()
            .get(&item_id)
            .map(|record| record.level)
            .unwrap_or_default()
    }

    pub fn is_archived(&self, item_id: ItemId) -> bool {
        self.cache
            .borrow()
            .get(&item_id)
            .is_some_and(|record| record.archived)
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.get() > 0
    }

    /// Forget everything fetched so far, e.g. after the learner signs out.
    pub fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
        self.loaded_batches.borrow_mut().clear();
    }
}
