//! # itch-core
//!
//! Core library for the itch bridge: reconciles the itch desktop client's
//! butler database into owned/installed game catalogs, tracks playtime across
//! launches, and refreshes both catalogs on a self-throttled schedule.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. Refreshes run on plain threads.
//! - **Explicit state**: Caches live in [`BridgeEngine`], never in globals.
//! - **Stale beats empty**: A failed refresh leaves cached entries untouched.
//! - **Injectable edges**: Repository, key-value store, launcher and clock are
//!   traits so every policy is testable without the itch client installed.

pub mod clock;
pub mod engine;
pub mod error;
pub mod installation;
pub mod kv;
pub mod launcher;
pub mod ownership;
pub mod playtime;
pub mod repository;
pub mod scheduler;
pub mod storage;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{BridgeEngine, EngineSettings, EngineStatus, LaunchedRefresh, StalenessPolicy};
pub use error::{ItchError, Result};
pub use kv::{JsonFileStore, KeyValueStore, MemoryStore};
pub use launcher::{Launcher, SystemLauncher};
pub use playtime::PlaytimeTracker;
pub use repository::{ButlerDb, CatalogRepository};
pub use scheduler::{RefreshIntervals, RefreshScheduler, RefreshTask, TaskState};
pub use storage::StorageConfig;
pub use types::*;
