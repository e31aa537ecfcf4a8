//! Per-title playtime accrued across launches.
//!
//! Each title owns two persistent keys: `time<id>` (total whole minutes) and
//! `last<id>` (epoch seconds at the end of the last session). A missing key
//! means "unknown", which callers must keep distinct from zero.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::error::{ItchError, Result};
use crate::kv::KeyValueStore;

pub fn time_played_key(game_id: &str) -> String {
    format!("time{}", game_id)
}

pub fn last_played_key(game_id: &str) -> String {
    format!("last{}", game_id)
}

/// Whole minutes between `start` and `end`; partial minutes are dropped and
/// a clock that went backwards contributes nothing.
pub fn session_minutes(start: i64, end: i64) -> u64 {
    (end.saturating_sub(start).max(0) / 60) as u64
}

pub struct PlaytimeTracker {
    store: Arc<dyn KeyValueStore>,
    title_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PlaytimeTracker {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            title_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Adds one completed session to the title's total and returns the new
    /// total. Sessions for the same title are serialised; a failed write is
    /// returned to the caller.
    pub fn record_session(&self, game_id: &str, start: i64, end: i64) -> Result<u64> {
        let lock = self.title_lock(game_id);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let previous = self.total_minutes(game_id)?.unwrap_or(0);
        let session = session_minutes(start, end);
        let total = previous.saturating_add(session);

        self.store
            .set(&time_played_key(game_id), &total.to_string())?;
        self.store
            .set(&last_played_key(game_id), &end.to_string())?;

        info!(
            game_id,
            session_minutes = session,
            total_minutes = total,
            last_played = end,
            "Recorded play session"
        );
        Ok(total)
    }

    pub fn total_minutes(&self, game_id: &str) -> Result<Option<u64>> {
        self.read_number(game_id, &time_played_key(game_id))
            .map(|value| value.map(|minutes| minutes.max(0.0) as u64))
    }

    pub fn last_played(&self, game_id: &str) -> Result<Option<i64>> {
        self.read_number(game_id, &last_played_key(game_id))
            .map(|value| value.map(|secs| secs as i64))
    }

    // Values are decimal strings; older caches may hold floats.
    fn read_number(&self, game_id: &str, key: &str) -> Result<Option<f64>> {
        let Some(raw) = self.store.get(key) else {
            return Ok(None);
        };
        raw.trim()
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(Some)
            .ok_or_else(|| {
                ItchError::malformed(game_id, format!("{} holds non-numeric value {:?}", key, raw))
            })
    }

    fn title_lock(&self, game_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .title_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(game_id.to_string()).or_default())
    }
}
