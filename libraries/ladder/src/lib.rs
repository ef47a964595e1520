//! Local-first mastery progress for the kanji app, with optional cloud mirroring.
//!
//! How it works:
//! 1. Every kanji has a mastery level (one of five steps) and an archived flag.
//! 2. Anonymous learners keep that state in two device-storage blobs. Signed-in learners keep it in a
//!    remote `user_progress` table, one row per (user, kanji).
//! 3. Each tab holds one in-memory snapshot. Reads are served from it, writes update it first and persist
//!    afterwards; the caller decides what to do when persisting fails (usually [`ProgressStore::rollback`]).
//! 4. When a learner signs in, whatever they did anonymously is copied into their remote rows once, and the
//!    device copy is cleared.
//! 5. Tabs of the same browser talk over a local bus so that only one of them has to do the bulk remote read,
//!    and so that edits made in one tab show up in the others.

pub mod backend;
pub mod batch;
pub mod config;
pub mod error;
pub mod level;
pub mod relay;
pub mod session;
pub mod snapshot;
pub mod stats;
pub mod store;
pub mod tracker;

#[cfg(feature = "supabase")]
pub mod supabase;

#[cfg(target_arch = "wasm32")]
#[cfg(feature = "web")]
pub mod web;

pub use backend::{DeviceStorage, ImmediateTimer, MemoryStorage, ProgressRow, RemoteTable, Timer};
pub use batch::BatchedProgress;
pub use config::LadderConfig;
pub use error::{ProgressError, RemoteError, StorageError, WriteFailed};
pub use level::{ItemId, MasteryLevel, MasteryRecord};
pub use relay::{LocalBus, MemoryBus, RelayMessage};
pub use session::{Scope, Session, UserId};
pub use snapshot::Snapshot;
pub use stats::{CategoryCounts, ProgressFilter, ProgressStats};
pub use store::{ListenerKey, LoadOutcome, MigrationOutcome, ProgressStore};
pub use tracker::ProgressTracker;

/// The kanji that anonymous learners always see as mastered, so a fresh visitor has an example of what a
/// mastered card looks like.
pub const DEMO_ITEM: ItemId = 1;
