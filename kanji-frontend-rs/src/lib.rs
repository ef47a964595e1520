mod platform;
mod supabase;
mod utils;

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::sync::LazyLock;

use ladder::{
    BatchedProgress, CategoryCounts, ItemId, LadderConfig, ListenerKey, LoadOutcome, MasteryLevel,
    ProgressFilter, ProgressStats, ProgressStore, ProgressTracker, Session,
    supabase::SupabaseTable,
};
use serde::{Deserialize, Serialize};
use wasm_bindgen::prelude::*;

use crate::utils::to_js_error;

type Tracker = ProgressTracker<platform::Storage, SupabaseTable, platform::Bus, platform::Timer>;

// putting this inside LOGGER prevents us from accidentally initializing the logger more than once
#[allow(clippy::declare_interior_mutable_const)]
const LOGGER: LazyLock<()> = LazyLock::new(|| {
    utils::set_panic_hook();

    wasm_logger::init(wasm_logger::Config::default());
    log::info!("Logging initialized");
});

#[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
pub fn is_supabase_configured() -> bool {
    supabase::is_configured()
}

/// The five ladder steps as `LevelInfo[]`, for rendering the level picker.
#[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
pub fn mastery_levels() -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(&level_infos()).map_err(to_js_error)
}

fn level_infos() -> Vec<LevelInfo> {
    MasteryLevel::ALL.into_iter().map(LevelInfo::from).collect()
}

#[wasm_bindgen]
pub struct Progress {
    // we never hold a borrow across an .await, so none of these can panic with "already borrowed"
    tracker: Tracker,
    batch: BatchedProgress<SupabaseTable>,
    session: RefCell<Session>,
    listeners: RefCell<BTreeMap<u32, ListenerKey>>,
    next_listener: Cell<u32>,
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
impl Progress {
    /// `config` is an optional JSON object overriding storage keys, the relay channel or timings.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen(constructor))]
    pub fn new(
        user_id: Option<String>,
        access_token: Option<String>,
        config: Option<String>,
    ) -> Result<Progress, JsValue> {
        // used to only initialize the logger once
        #[allow(clippy::borrow_interior_mutable_const)]
        *LOGGER;

        let config = match config {
            Some(json) => LadderConfig::from_json(&json)
                .inspect_err(|e| log::error!("Invalid progress config: {e}"))
                .map_err(to_js_error)?,
            None => LadderConfig::default(),
        };
        let session = session_from(user_id, access_token);
        let bus = platform::bus(&config.relay_channel);
        if bus.is_none() {
            log::warn!("No BroadcastChannel; this tab will load progress on its own");
        }

        let store = ProgressStore::new(
            session.clone(),
            platform::storage(),
            supabase::table(),
            bus,
            platform::Timer::default(),
            config,
        );

        Ok(Self {
            tracker: ProgressTracker::new(store),
            batch: BatchedProgress::new(supabase::table()),
            session: RefCell::new(session),
            listeners: RefCell::new(BTreeMap::new()),
            next_listener: Cell::new(0),
        })
    }

    /// Resolves once the first load has finished, successfully or not. Returns whether progress is loaded.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn load(&self) -> bool {
        let outcome = self.tracker.load().await;
        log::info!("Progress load: {outcome:?}");
        outcome != LoadOutcome::Failed
    }

    /// Call on every auth state change. Signing in migrates anonymous progress before loading.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn set_session(&self, user_id: Option<String>, access_token: Option<String>) -> bool {
        let session = session_from(user_id, access_token);
        let identity_changed = self.session.borrow().user_id != session.user_id;
        *self.session.borrow_mut() = session.clone();
        if identity_changed {
            self.batch.clear_cache();
        }
        let outcome = self.tracker.sign_in(session).await;
        outcome != LoadOutcome::Failed
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn is_hydrated(&self) -> bool {
        self.tracker.store().is_hydrated()
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn is_loaded(&self) -> bool {
        self.tracker.store().is_loaded()
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn get_level(&self, item_id: ItemId) -> u8 {
        self.tracker.store().level_of(item_id).value()
    }

    /// Rejects values that aren't one of 0, 20, 60, 80 or 100. Resolves to `false` if the write didn't
    /// persist, in which case the previous level is already back.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn set_level(&self, item_id: ItemId, level: i32) -> Result<bool, JsValue> {
        self.tracker
            .set_level_raw(item_id, i64::from(level))
            .await
            .map_err(to_js_error)
    }

    /// Resolves to the archived flag the item ends up with.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn toggle_archived(&self, item_id: ItemId) -> bool {
        self.tracker.toggle_archived(item_id).await
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn is_archived(&self, item_id: ItemId) -> bool {
        self.tracker.store().is_archived(item_id)
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn archived_ids(&self) -> Vec<ItemId> {
        self.tracker.store().archived_ids().into_iter().collect()
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn reset(&self) -> bool {
        let reset = self.tracker.reset().await;
        if reset {
            self.batch.clear_cache();
        }
        reset
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn stats(&self) -> ProgressStatsView {
        self.tracker.store().stats().into()
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn category_counts(&self, item_ids: Vec<ItemId>) -> CategoryCountsView {
        self.tracker.store().category_counts(item_ids).into()
    }

    /// `filter` is the progress page's query parameter: `all`, or a level name.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn filter_items(&self, item_ids: Vec<ItemId>, filter: String) -> Vec<ItemId> {
        let store = self.tracker.store();
        ProgressFilter::from_query(&filter).filter_items(
            item_ids,
            |item_id| store.level_of(item_id),
            |item_id| store.is_archived(item_id),
        )
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn overall_progress(&self, total_items: usize) -> f64 {
        self.tracker.store().overall_progress(total_items)
    }

    /// Progress for one page of items, fetched on its own rather than from the loaded snapshot.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn load_batch(&self, item_ids: Vec<ItemId>) -> BatchView {
        let session = self.session.borrow().clone();
        let progress = self.batch.load_batch(&session, &item_ids).await;
        BatchView {
            progress: progress
                .into_iter()
                .map(|(item_id, record)| {
                    (
                        item_id,
                        ItemProgress {
                            progress: record.level.value(),
                            is_archived: record.archived,
                        },
                    )
                })
                .collect(),
        }
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn clear_batch_cache(&self) {
        self.batch.clear_cache();
    }

    /// The raw snapshot as `{ levels: {id: level}, archived_ids: [id] }`, for debugging and export.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn export(&self) -> Result<JsValue, JsValue> {
        let snapshot = self.tracker.store().snapshot();
        let export = SnapshotExport {
            levels: snapshot
                .levels()
                .map(|(item_id, level)| (item_id.to_string(), level.value()))
                .collect(),
            archived_ids: snapshot.archived_ids().into_iter().collect(),
        };
        serde_wasm_bindgen::to_value(&export).map_err(to_js_error)
    }

    /// `callback` is called with no arguments whenever progress may have changed, including changes made
    /// in other tabs. Returns a handle for [`Progress::unsubscribe`].
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn subscribe(&self, callback: js_sys::Function) -> u32 {
        let key = self.tracker.store().register_listener(move || {
            #[cfg(target_arch = "wasm32")]
            {
                let this = JsValue::null();
                if let Err(e) = callback.call0(&this) {
                    log::error!("Progress listener threw: {e:?}");
                }
            }
            #[cfg(not(target_arch = "wasm32"))]
            {
                let _ = &callback;
            }
        });

        let handle = self.next_listener.get();
        self.next_listener.set(handle.wrapping_add(1));
        self.listeners.borrow_mut().insert(handle, key);
        handle
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn unsubscribe(&self, handle: u32) {
        let key = self.listeners.borrow_mut().remove(&handle);
        if let Some(key) = key {
            self.tracker.store().unregister_listener(key);
        }
    }
}

fn session_from(user_id: Option<String>, access_token: Option<String>) -> Session {
    match user_id {
        Some(user_id) => Session {
            user_id: Some(user_id.as_str().into()),
            access_token,
        },
        None => Session::anonymous(),
    }
}

#[derive(Clone, Debug, tsify::Tsify, Serialize, Deserialize, PartialEq, Eq)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct LevelInfo {
    pub value: u8,
    pub label: String,
    pub description: String,
}

impl From<MasteryLevel> for LevelInfo {
    fn from(level: MasteryLevel) -> Self {
        Self {
            value: level.value(),
            label: level.label().to_string(),
            description: level.description().to_string(),
        }
    }
}

#[derive(Clone, Debug, tsify::Tsify, Serialize, Deserialize, PartialEq, Eq)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct ProgressStatsView {
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
}

impl From<ProgressStats> for ProgressStatsView {
    fn from(stats: ProgressStats) -> Self {
        Self {
            total: stats.total,
            completed: stats.completed,
            in_progress: stats.in_progress,
        }
    }
}

#[derive(Clone, Debug, tsify::Tsify, Serialize, Deserialize, PartialEq, Eq)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct CategoryCountsView {
    pub all: usize,
    pub locked: usize,
    pub discovered: usize,
    pub equipped: usize,
    pub skilled: usize,
    pub mastered: usize,
}

impl From<CategoryCounts> for CategoryCountsView {
    fn from(counts: CategoryCounts) -> Self {
        Self {
            all: counts.all,
            locked: counts.locked,
            discovered: counts.discovered,
            equipped: counts.equipped,
            skilled: counts.skilled,
            mastered: counts.mastered,
        }
    }
}

#[derive(Clone, Debug, tsify::Tsify, Serialize, Deserialize, PartialEq, Eq)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct ItemProgress {
    pub progress: u8,
    pub is_archived: bool,
}

#[derive(Clone, Debug, tsify::Tsify, Serialize, Deserialize, PartialEq, Eq)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct BatchView {
    pub progress: BTreeMap<ItemId, ItemProgress>,
}

#[derive(Serialize)]
struct SnapshotExport {
    levels: BTreeMap<String, u8>,
    archived_ids: Vec<ItemId>,
}
