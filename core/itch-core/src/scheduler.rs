//! Self-throttled refresh scheduling.
//!
//! Each refresh task has an independent wait interval and a persisted
//! last-check timestamp. A task is due when it is idle and more than its
//! interval has passed since the last check; a task that was never checked is
//! always due.
//!
//! Claiming a due task flips it to `Running` under the same lock that decided
//! it was due, so two ticks racing each other cannot both launch it. The
//! returned [`RefreshLease`] flips it back to `Idle` and stamps the completion
//! time when dropped, whether the refresh succeeded, failed or panicked.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::kv::KeyValueStore;

pub const DEFAULT_OWNERSHIP_INTERVAL_SECS: i64 = 24 * 60 * 60;
pub const DEFAULT_INSTALLATION_INTERVAL_SECS: i64 = 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshTask {
    Ownership,
    Installation,
}

impl RefreshTask {
    pub const ALL: [RefreshTask; 2] = [RefreshTask::Ownership, RefreshTask::Installation];

    pub fn name(self) -> &'static str {
        match self {
            RefreshTask::Ownership => "ownership",
            RefreshTask::Installation => "installation",
        }
    }

    /// Persistent-cache key holding the last completed check.
    pub fn last_check_key(self) -> String {
        format!("last_check_{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshIntervals {
    pub ownership_secs: i64,
    pub installation_secs: i64,
}

impl Default for RefreshIntervals {
    fn default() -> Self {
        Self {
            ownership_secs: DEFAULT_OWNERSHIP_INTERVAL_SECS,
            installation_secs: DEFAULT_INSTALLATION_INTERVAL_SECS,
        }
    }
}

impl RefreshIntervals {
    pub fn for_task(&self, task: RefreshTask) -> i64 {
        match task {
            RefreshTask::Ownership => self.ownership_secs,
            RefreshTask::Installation => self.installation_secs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskStatus {
    pub task: RefreshTask,
    pub last_check: Option<i64>,
    pub interval_secs: i64,
    pub state: TaskState,
}

pub fn is_due(now: i64, status: &TaskStatus) -> bool {
    if status.state == TaskState::Running {
        return false;
    }
    match status.last_check {
        Some(last_check) => now.saturating_sub(last_check) > status.interval_secs,
        None => true,
    }
}

/// Tasks that should be launched at `now`, in declaration order.
pub fn due_tasks(now: i64, statuses: &[TaskStatus]) -> Vec<RefreshTask> {
    statuses
        .iter()
        .filter(|status| is_due(now, status))
        .map(|status| status.task)
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub task: RefreshTask,
    pub state: TaskState,
    pub last_check: Option<i64>,
    pub interval_secs: i64,
    /// Seconds until the task becomes due; zero when already due.
    pub due_in_secs: i64,
}

#[derive(Default)]
struct SchedulerState {
    running: HashMap<RefreshTask, TaskState>,
    last_checks: HashMap<RefreshTask, i64>,
}

pub struct RefreshScheduler {
    intervals: RefreshIntervals,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    state: Mutex<SchedulerState>,
    idle: Condvar,
}

impl RefreshScheduler {
    /// Guards start idle; last checks are loaded from the persistent store.
    pub fn new(
        intervals: RefreshIntervals,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut state = SchedulerState::default();
        for task in RefreshTask::ALL {
            if let Some(last_check) = load_last_check(store.as_ref(), task) {
                state.last_checks.insert(task, last_check);
            }
        }

        Self {
            intervals,
            store,
            clock,
            state: Mutex::new(state),
            idle: Condvar::new(),
        }
    }

    pub fn intervals(&self) -> RefreshIntervals {
        self.intervals
    }

    pub fn last_check(&self, task: RefreshTask) -> Option<i64> {
        self.lock_state().last_checks.get(&task).copied()
    }

    pub fn state(&self, task: RefreshTask) -> TaskState {
        self.lock_state()
            .running
            .get(&task)
            .copied()
            .unwrap_or_default()
    }

    /// Claims every due task, flipping each to `Running` before returning.
    pub fn claim_due(self: &Arc<Self>) -> Vec<RefreshLease> {
        let now = self.clock.now();
        let mut state = self.lock_state();

        let statuses: Vec<TaskStatus> = RefreshTask::ALL
            .iter()
            .map(|task| self.status_of(&state, *task))
            .collect();

        due_tasks(now, &statuses)
            .into_iter()
            .map(|task| {
                state.running.insert(task, TaskState::Running);
                debug!(task = task.name(), now, "Refresh claimed");
                RefreshLease {
                    scheduler: Arc::clone(self),
                    task,
                }
            })
            .collect()
    }

    /// Claims `task` regardless of its interval, unless it is already running.
    pub fn try_claim(self: &Arc<Self>, task: RefreshTask) -> Option<RefreshLease> {
        let mut state = self.lock_state();
        if state.running.get(&task).copied().unwrap_or_default() == TaskState::Running {
            return None;
        }
        state.running.insert(task, TaskState::Running);
        Some(RefreshLease {
            scheduler: Arc::clone(self),
            task,
        })
    }

    /// Blocks until `task` is not running. Returns immediately when idle.
    pub fn wait_until_idle(&self, task: RefreshTask) {
        let state = self.lock_state();
        let _state = self
            .idle
            .wait_while(state, |state| {
                state.running.get(&task).copied().unwrap_or_default() == TaskState::Running
            })
            .unwrap_or_else(|poisoned| poisoned.into_inner());
    }

    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        let now = self.clock.now();
        let state = self.lock_state();
        RefreshTask::ALL
            .iter()
            .map(|task| {
                let status = self.status_of(&state, *task);
                let due_in_secs = match status.last_check {
                    Some(last_check) if !is_due(now, &status) => {
                        (last_check + status.interval_secs + 1 - now).max(0)
                    }
                    _ => 0,
                };
                TaskSnapshot {
                    task: *task,
                    state: status.state,
                    last_check: status.last_check,
                    interval_secs: status.interval_secs,
                    due_in_secs,
                }
            })
            .collect()
    }

    // Stamp before releasing the guard so a concurrent tick never sees an
    // idle task with the previous timestamp.
    fn finish(&self, task: RefreshTask) {
        let completed_at = self.clock.now();
        let mut state = self.lock_state();
        state.last_checks.insert(task, completed_at);
        if let Err(err) = self
            .store
            .set(&task.last_check_key(), &completed_at.to_string())
        {
            warn!(
                task = task.name(),
                error = %err,
                "Failed to persist refresh timestamp; keeping it in memory"
            );
        }
        state.running.insert(task, TaskState::Idle);
        self.idle.notify_all();
        debug!(task = task.name(), completed_at, "Refresh finished");
    }

    fn status_of(&self, state: &SchedulerState, task: RefreshTask) -> TaskStatus {
        TaskStatus {
            task,
            last_check: state.last_checks.get(&task).copied(),
            interval_secs: self.intervals.for_task(task),
            state: state.running.get(&task).copied().unwrap_or_default(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Proof that a refresh is in flight. Dropping it completes the refresh.
pub struct RefreshLease {
    scheduler: Arc<RefreshScheduler>,
    task: RefreshTask,
}

impl RefreshLease {
    pub fn task(&self) -> RefreshTask {
        self.task
    }
}

impl Drop for RefreshLease {
    fn drop(&mut self) {
        self.scheduler.finish(self.task);
    }
}

impl std::fmt::Debug for RefreshLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshLease")
            .field("task", &self.task)
            .finish()
    }
}

fn load_last_check(store: &dyn KeyValueStore, task: RefreshTask) -> Option<i64> {
    let raw = store.get(&task.last_check_key())?;
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Some(value as i64),
        _ => {
            warn!(
                task = task.name(),
                value = %raw,
                "Ignoring unparseable refresh timestamp; treating task as never checked"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::kv::MemoryStore;

    const HOUR: i64 = 60 * 60;
    const DAY: i64 = 24 * HOUR;

    fn scheduler(
        store: &Arc<MemoryStore>,
        clock: &Arc<ManualClock>,
    ) -> Arc<RefreshScheduler> {
        Arc::new(RefreshScheduler::new(
            RefreshIntervals::default(),
            store.clone(),
            clock.clone(),
        ))
    }

    fn tasks(leases: &[RefreshLease]) -> Vec<RefreshTask> {
        leases.iter().map(RefreshLease::task).collect()
    }

    #[test]
    fn never_checked_task_is_due() {
        let status = TaskStatus {
            task: RefreshTask::Ownership,
            last_check: None,
            interval_secs: DAY,
            state: TaskState::Idle,
        };
        assert!(is_due(0, &status));
        assert!(is_due(i64::MIN, &status));
    }

    #[test]
    fn interval_must_be_strictly_exceeded() {
        let status = TaskStatus {
            task: RefreshTask::Installation,
            last_check: Some(1000),
            interval_secs: HOUR,
            state: TaskState::Idle,
        };
        assert!(!is_due(1000 + HOUR, &status));
        assert!(is_due(1000 + HOUR + 1, &status));
    }

    #[test]
    fn running_task_is_never_due() {
        let status = TaskStatus {
            task: RefreshTask::Ownership,
            last_check: None,
            interval_secs: DAY,
            state: TaskState::Running,
        };
        assert!(due_tasks(0, &[status]).is_empty());
    }

    #[test]
    fn first_tick_claims_both_tasks() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(10_000));
        let scheduler = scheduler(&store, &clock);

        let leases = scheduler.claim_due();
        assert_eq!(
            tasks(&leases),
            vec![RefreshTask::Ownership, RefreshTask::Installation]
        );
        assert_eq!(scheduler.state(RefreshTask::Ownership), TaskState::Running);
    }

    #[test]
    fn second_tick_while_in_flight_claims_nothing() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(10_000));
        let scheduler = scheduler(&store, &clock);

        let first = scheduler.claim_due();
        assert_eq!(first.len(), 2);
        let second = scheduler.claim_due();
        assert!(second.is_empty());
        assert!(scheduler.try_claim(RefreshTask::Ownership).is_none());
    }

    #[test]
    fn dropping_lease_stamps_completion_time() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(10_000));
        let scheduler = scheduler(&store, &clock);

        let leases = scheduler.claim_due();
        clock.advance(30);
        drop(leases);

        assert_eq!(scheduler.state(RefreshTask::Ownership), TaskState::Idle);
        assert_eq!(scheduler.last_check(RefreshTask::Ownership), Some(10_030));
        assert_eq!(
            store.get("last_check_installation").as_deref(),
            Some("10030")
        );
        assert!(scheduler.claim_due().is_empty());
    }

    #[test]
    fn tasks_keep_independent_windows() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let scheduler = scheduler(&store, &clock);
        drop(scheduler.claim_due());

        clock.advance(HOUR + 1);
        assert_eq!(
            tasks(&scheduler.claim_due()),
            vec![RefreshTask::Installation]
        );

        clock.set(DAY + 1);
        let due = tasks(&scheduler.claim_due());
        assert_eq!(due, vec![RefreshTask::Ownership, RefreshTask::Installation]);
    }

    #[test]
    fn restart_respects_persisted_timestamps() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(50_000));
        {
            let scheduler = scheduler(&store, &clock);
            let leases = scheduler.claim_due();
            // Simulate a crash of a later refresh: guard state is not persisted.
            drop(leases);
            let in_flight = scheduler.try_claim(RefreshTask::Installation);
            assert!(in_flight.is_some());
            std::mem::forget(in_flight);
        }

        clock.advance(HOUR - 10);
        let restarted = scheduler(&store, &clock);
        assert_eq!(restarted.state(RefreshTask::Installation), TaskState::Idle);
        assert!(restarted.claim_due().is_empty());

        clock.advance(11);
        assert_eq!(
            tasks(&restarted.claim_due()),
            vec![RefreshTask::Installation]
        );
    }

    #[test]
    fn unparseable_timestamp_is_treated_as_never_checked() {
        let store = Arc::new(MemoryStore::new());
        store
            .set("last_check_ownership", "yesterday")
            .expect("seed");
        store
            .set("last_check_installation", "1000.5")
            .expect("seed");
        let clock = Arc::new(ManualClock::new(1500));
        let scheduler = scheduler(&store, &clock);

        assert_eq!(scheduler.last_check(RefreshTask::Ownership), None);
        assert_eq!(scheduler.last_check(RefreshTask::Installation), Some(1000));
        assert_eq!(tasks(&scheduler.claim_due()), vec![RefreshTask::Ownership]);
    }

    #[test]
    fn persistence_failure_still_releases_guard() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(100));
        let scheduler = scheduler(&store, &clock);
        store.fail_writes(true);

        drop(scheduler.claim_due());
        assert_eq!(scheduler.state(RefreshTask::Ownership), TaskState::Idle);
        assert_eq!(scheduler.last_check(RefreshTask::Ownership), Some(100));
        assert_eq!(store.get("last_check_ownership"), None);
    }

    #[test]
    fn snapshot_reports_time_until_due() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let scheduler = scheduler(&store, &clock);
        drop(scheduler.claim_due());
        clock.advance(600);

        let snapshot = scheduler.snapshot();
        let installation = snapshot
            .iter()
            .find(|entry| entry.task == RefreshTask::Installation)
            .expect("installation snapshot");
        assert_eq!(installation.state, TaskState::Idle);
        assert_eq!(installation.due_in_secs, HOUR + 1 - 600);
    }

    #[test]
    fn wait_until_idle_blocks_until_lease_drops() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(DAY));
        let sched = scheduler(&store, &clock);

        sched.wait_until_idle(RefreshTask::Ownership);

        let lease = sched.try_claim(RefreshTask::Ownership).expect("claim");
        let holder = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            drop(lease);
        });

        sched.wait_until_idle(RefreshTask::Ownership);
        assert_eq!(sched.state(RefreshTask::Ownership), TaskState::Idle);
        assert_eq!(sched.last_check(RefreshTask::Ownership), Some(DAY));
        holder.join().expect("holder");
    }
}
