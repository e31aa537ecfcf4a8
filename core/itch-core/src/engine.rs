//! BridgeEngine - the state behind every host entry point.
//!
//! The engine owns the owned-games and installed-games caches, the refresh
//! scheduler and the playtime tracker. Host calls read the caches; the
//! host's periodic `tick` keeps them fresh in the background.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use itch_core::{BridgeEngine, ButlerDb, JsonFileStore, SystemClock, SystemLauncher};
//!
//! let engine = Arc::new(BridgeEngine::new(
//!     Arc::new(ButlerDb::new(db_path)),
//!     Arc::new(JsonFileStore::open(cache_path)?),
//!     Arc::new(SystemLauncher),
//!     Arc::new(SystemClock),
//!     EngineSettings::default(),
//! ));
//! engine.tick();
//! let games = engine.owned_games()?;
//! ```

use itch_bridge_protocol::{Authentication, Game, GameTime, LocalGame, OsCompatibility};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{ItchError, Result};
use crate::installation;
use crate::kv::KeyValueStore;
use crate::launcher::{game_uri, Launcher};
use crate::ownership;
use crate::playtime::PlaytimeTracker;
use crate::repository::CatalogRepository;
use crate::scheduler::{RefreshIntervals, RefreshLease, RefreshScheduler, RefreshTask, TaskSnapshot};
use crate::types::{canonical_game_id, CatalogEntry, InstalledEntry};

pub const DEFAULT_URI_SCHEME: &str = "itch";

/// What a successful refresh does with titles that left the raw source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalenessPolicy {
    /// Keep them cached; entries are only ever overwritten.
    #[default]
    Sticky,
    /// Replace the cache with exactly what the refresh produced.
    Prune,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub intervals: RefreshIntervals,
    pub staleness: StalenessPolicy,
    pub uri_scheme: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            intervals: RefreshIntervals::default(),
            staleness: StalenessPolicy::default(),
            uri_scheme: DEFAULT_URI_SCHEME.to_string(),
        }
    }
}

type FileExists = dyn Fn(&Path) -> bool + Send + Sync;

struct Cache<T> {
    entries: BTreeMap<String, T>,
    refreshed_at: Option<i64>,
}

impl<T> Default for Cache<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            refreshed_at: None,
        }
    }
}

impl<T> Cache<T> {
    fn apply(&mut self, fresh: BTreeMap<String, T>, policy: StalenessPolicy, now: i64) {
        match policy {
            StalenessPolicy::Sticky => self.entries.extend(fresh),
            StalenessPolicy::Prune => self.entries = fresh,
        }
        self.refreshed_at = Some(now);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub owned_games: usize,
    pub installed_games: usize,
    pub owned_refreshed_at: Option<i64>,
    pub installed_refreshed_at: Option<i64>,
    pub refresh_tasks: Vec<TaskSnapshot>,
}

/// A refresh started by [`BridgeEngine::tick`].
#[derive(Debug)]
pub struct LaunchedRefresh {
    pub task: RefreshTask,
    handle: JoinHandle<()>,
}

impl LaunchedRefresh {
    /// Blocks until the refresh has finished and its guard is released.
    pub fn join(self) {
        if self.handle.join().is_err() {
            warn!(task = self.task.name(), "Refresh thread panicked");
        }
    }
}

pub struct BridgeEngine {
    repo: Arc<dyn CatalogRepository>,
    launcher: Arc<dyn Launcher>,
    clock: Arc<dyn Clock>,
    tracker: PlaytimeTracker,
    scheduler: Arc<RefreshScheduler>,
    file_exists: Box<FileExists>,
    settings: EngineSettings,
    owned: RwLock<Cache<CatalogEntry>>,
    installed: RwLock<Cache<InstalledEntry>>,
}

impl BridgeEngine {
    pub fn new(
        repo: Arc<dyn CatalogRepository>,
        store: Arc<dyn KeyValueStore>,
        launcher: Arc<dyn Launcher>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        let scheduler = Arc::new(RefreshScheduler::new(
            settings.intervals,
            Arc::clone(&store),
            Arc::clone(&clock),
        ));

        Self {
            repo,
            launcher,
            clock,
            tracker: PlaytimeTracker::new(store),
            scheduler,
            file_exists: Box::new(|path: &Path| path.is_file()),
            settings,
            owned: RwLock::new(Cache::default()),
            installed: RwLock::new(Cache::default()),
        }
    }

    /// Replaces the filesystem check used to gate installed executables.
    pub fn with_file_exists(
        mut self,
        file_exists: impl Fn(&Path) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.file_exists = Box::new(file_exists);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn scheduler(&self) -> &Arc<RefreshScheduler> {
        &self.scheduler
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Scheduling
    // ─────────────────────────────────────────────────────────────────────────

    /// Launches every due refresh on its own thread and returns immediately.
    pub fn tick(self: &Arc<Self>) -> Vec<LaunchedRefresh> {
        self.scheduler
            .claim_due()
            .into_iter()
            .filter_map(|lease| self.spawn_refresh(lease))
            .collect()
    }

    fn spawn_refresh(self: &Arc<Self>, lease: RefreshLease) -> Option<LaunchedRefresh> {
        let task = lease.task();
        let engine = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("refresh-{}", task.name()))
            .spawn(move || {
                let _lease = lease;
                engine.run_refresh_logged(task);
            });

        match spawned {
            Ok(handle) => {
                info!(task = task.name(), "Refresh started");
                Some(LaunchedRefresh { task, handle })
            }
            Err(err) => {
                // The closure (and the lease inside it) is dropped here.
                warn!(task = task.name(), error = %err, "Failed to spawn refresh thread");
                None
            }
        }
    }

    fn run_refresh_logged(&self, task: RefreshTask) {
        match self.refresh(task) {
            Ok(count) => info!(task = task.name(), entries = count, "Refresh completed"),
            Err(err) => warn!(
                task = task.name(),
                error = %err,
                "Refresh failed; keeping cached entries"
            ),
        }
    }

    /// Runs one refresh pipeline on the calling thread and applies the result
    /// to the cache. Does not touch the scheduler; callers hold the lease.
    pub fn refresh(&self, task: RefreshTask) -> Result<usize> {
        let now = self.clock.now();
        match task {
            RefreshTask::Ownership => {
                let rows = self.repo.fetch_ownership_rows()?;
                let fresh = ownership::classify(&rows);
                let count = fresh.len();
                write_cache(&self.owned).apply(fresh, self.settings.staleness, now);
                Ok(count)
            }
            RefreshTask::Installation => {
                let rows = self.repo.fetch_installation_rows()?;
                let fresh = installation::resolve(&rows, self.file_exists.as_ref());
                let count = fresh.len();
                write_cache(&self.installed).apply(fresh, self.settings.staleness, now);
                Ok(count)
            }
        }
    }

    /// Populates a cache that has never been refreshed, through the same
    /// guard the scheduler uses. A refresh already in flight is waited on;
    /// if it fails, the caller runs its own so the error is surfaced.
    fn ensure_primed(&self, task: RefreshTask) -> Result<()> {
        loop {
            if self.is_primed(task) {
                return Ok(());
            }

            if let Some(_lease) = self.scheduler.try_claim(task) {
                return self.refresh(task).map(|_| ());
            }

            debug!(task = task.name(), "Cold read waiting for in-flight refresh");
            self.scheduler.wait_until_idle(task);
        }
    }

    fn is_primed(&self, task: RefreshTask) -> bool {
        match task {
            RefreshTask::Ownership => read_cache(&self.owned).refreshed_at.is_some(),
            RefreshTask::Installation => read_cache(&self.installed).refreshed_at.is_some(),
        }
    }

    pub fn status(&self) -> EngineStatus {
        let owned = read_cache(&self.owned);
        let installed = read_cache(&self.installed);
        EngineStatus {
            owned_games: owned.entries.len(),
            installed_games: installed.entries.len(),
            owned_refreshed_at: owned.refreshed_at,
            installed_refreshed_at: installed.refreshed_at,
            refresh_tasks: self.scheduler.snapshot(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Host entry points
    // ─────────────────────────────────────────────────────────────────────────

    pub fn authenticate(&self) -> Result<Authentication> {
        let user = self.repo.fetch_current_user()?;
        info!(user_id = user.id, "Authenticated itch user");
        Ok(Authentication {
            user_id: user.id.to_string(),
            user_name: user.username,
        })
    }

    pub fn owned_games(&self) -> Result<Vec<Game>> {
        self.ensure_primed(RefreshTask::Ownership)?;
        Ok(read_cache(&self.owned)
            .entries
            .values()
            .map(CatalogEntry::to_game)
            .collect())
    }

    pub fn local_games(&self) -> Result<Vec<LocalGame>> {
        self.ensure_primed(RefreshTask::Installation)?;
        Ok(read_cache(&self.installed)
            .entries
            .values()
            .map(InstalledEntry::to_local_game)
            .collect())
    }

    pub fn game_time(&self, game_id: &str) -> Result<GameTime> {
        let game_id = canonical_game_id(game_id);
        Ok(GameTime {
            time_played: self.tracker.total_minutes(&game_id)?,
            last_played_time: self.tracker.last_played(&game_id)?,
            game_id,
        })
    }

    /// Runs the game, blocks until it exits and records the session.
    pub fn launch_game(&self, game_id: &str) -> Result<GameTime> {
        let game_id = canonical_game_id(game_id);
        let executable = self.executable_for(&game_id)?;

        info!(game_id = %game_id, executable = %executable.display(), "Launching game");
        let (start, end) = self.run_session(&executable)?;
        let total = self.tracker.record_session(&game_id, start, end)?;

        Ok(GameTime {
            game_id,
            time_played: Some(total),
            last_played_time: Some(end),
        })
    }

    fn run_session(&self, executable: &Path) -> Result<(i64, i64)> {
        let start = self.clock.now();
        self.launcher.run_executable(executable)?;
        let end = self.clock.now();
        Ok((start, end))
    }

    fn executable_for(&self, game_id: &str) -> Result<PathBuf> {
        let cached = read_cache(&self.installed)
            .entries
            .get(game_id)
            .map(|entry| entry.executable.clone());
        if let Some(executable) = cached {
            if (self.file_exists)(&executable) {
                return Ok(executable);
            }
            debug!(game_id, "Cached executable vanished; re-reading verdict");
        }

        let row = self
            .repo
            .fetch_installation_row(game_id)?
            .ok_or_else(|| ItchError::GameNotInstalled(game_id.to_string()))?;
        let entry = installation::resolve_row(&row, self.file_exists.as_ref())?
            .ok_or_else(|| ItchError::GameNotInstalled(game_id.to_string()))?;

        let executable = entry.executable.clone();
        write_cache(&self.installed)
            .entries
            .insert(entry.id.clone(), entry);
        Ok(executable)
    }

    pub fn install_game(&self, game_id: &str) -> Result<()> {
        self.open_game_uri(game_id)
    }

    pub fn uninstall_game(&self, game_id: &str) -> Result<()> {
        self.open_game_uri(game_id)
    }

    fn open_game_uri(&self, game_id: &str) -> Result<()> {
        let uri = game_uri(&self.settings.uri_scheme, &canonical_game_id(game_id));
        self.launcher.open_uri(&uri)
    }

    /// The integration only reports Windows builds.
    pub fn os_compatibility(&self, _game_id: &str) -> OsCompatibility {
        OsCompatibility::Windows
    }
}

fn read_cache<T>(lock: &RwLock<Cache<T>>) -> std::sync::RwLockReadGuard<'_, Cache<T>> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_cache<T>(lock: &RwLock<Cache<T>>) -> std::sync::RwLockWriteGuard<'_, Cache<T>> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
