//! Trigger engine: turns schedules into fire times and dispatches due tasks.
//!
//! One background clock evaluates the registry and hands every due task to
//! the worker pool. The clock itself never waits on a run.

use super::worker_pool::WorkerPool;
use crate::error::{EngineError, Result};
use crate::models::{TaskSchedule, TriggerRecord};
use crate::storage::TriggerStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use skybit_storage::time_utils::now_ms;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Callback invoked on a worker when a task's fire time elapses.
#[async_trait]
pub trait TriggerHandler: Send + Sync + 'static {
    async fn on_fire(&self, task_id: &str);
}

/// Trigger engine configuration.
#[derive(Debug, Clone)]
pub struct TriggerEngineConfig {
    /// Longest the clock sleeps before re-evaluating the registry.
    pub max_tick: Duration,
}

impl Default for TriggerEngineConfig {
    fn default() -> Self {
        Self {
            max_tick: Duration::from_millis(1000),
        }
    }
}

struct TriggerEntry {
    schedule: TaskSchedule,
    anchor_at: i64,
    next_fire_at: i64,
    handler: Arc<dyn TriggerHandler>,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<String, TriggerEntry>,
    /// Tasks whose dispatch is still running on a worker.
    in_flight: HashSet<String>,
}

/// Clears the in-flight mark when a dispatch ends, even by panic.
struct InFlightGuard {
    registry: Arc<Mutex<Registry>>,
    task_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.lock().in_flight.remove(&self.task_id);
    }
}

pub struct TriggerEngine {
    registry: Arc<Mutex<Registry>>,
    store: TriggerStore,
    pool: Arc<WorkerPool>,
    wake: Notify,
    config: TriggerEngineConfig,
}

impl TriggerEngine {
    pub fn new(store: TriggerStore, pool: Arc<WorkerPool>, config: TriggerEngineConfig) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            store,
            pool,
            wake: Notify::new(),
            config,
        }
    }

    /// Register (or replace) the trigger for `task_id`, anchored now.
    ///
    /// Returns the first fire time. Any previous registration for the same ID
    /// is replaced, so there is never more than one timer per task.
    pub fn register(
        &self,
        task_id: &str,
        schedule: &TaskSchedule,
        handler: Arc<dyn TriggerHandler>,
    ) -> Result<i64> {
        self.install(task_id, schedule, now_ms(), handler)
    }

    /// Re-register after a restart, keeping the persisted interval phase
    /// when the stored schedule still matches.
    pub fn restore(
        &self,
        task_id: &str,
        schedule: &TaskSchedule,
        handler: Arc<dyn TriggerHandler>,
    ) -> Result<i64> {
        let now = now_ms();
        let anchor_at = match self.store.get(task_id)? {
            Some(record) if record.schedule == *schedule && record.anchor_at <= now => {
                record.anchor_at
            }
            _ => now,
        };
        self.install(task_id, schedule, anchor_at, handler)
    }

    fn install(
        &self,
        task_id: &str,
        schedule: &TaskSchedule,
        anchor_at: i64,
        handler: Arc<dyn TriggerHandler>,
    ) -> Result<i64> {
        schedule.validate()?;
        let now = now_ms();
        let next_fire_at = schedule.next_fire_after(anchor_at, now).ok_or_else(|| {
            EngineError::Validation(format!("schedule {schedule} has no upcoming fire time"))
        })?;

        self.store.put(&TriggerRecord {
            task_id: task_id.to_string(),
            schedule: schedule.clone(),
            anchor_at,
            next_fire_at: Some(next_fire_at),
            registered_at: now,
        })?;

        let replaced = self
            .registry
            .lock()
            .entries
            .insert(
                task_id.to_string(),
                TriggerEntry {
                    schedule: schedule.clone(),
                    anchor_at,
                    next_fire_at,
                    handler,
                },
            )
            .is_some();
        self.wake.notify_one();

        info!(
            task_id = %task_id,
            schedule = %schedule,
            next_fire_at,
            replaced,
            "Trigger registered"
        );
        Ok(next_fire_at)
    }

    /// Put back a trigger on a known phase, as captured by
    /// [`registration`](Self::registration) before it was removed.
    pub fn reinstate(
        &self,
        task_id: &str,
        schedule: &TaskSchedule,
        anchor_at: i64,
        handler: Arc<dyn TriggerHandler>,
    ) -> Result<i64> {
        self.install(task_id, schedule, anchor_at, handler)
    }

    /// Remove the trigger for `task_id`. No-op if none is registered.
    ///
    /// The persisted record goes first; when that fails the live
    /// registration is left as it was.
    pub fn deregister(&self, task_id: &str) -> Result<()> {
        let persisted = self.store.delete(task_id)?;
        let removed = self.registry.lock().entries.remove(task_id).is_some();
        if removed || persisted {
            self.wake.notify_one();
            info!(task_id = %task_id, "Trigger removed");
        }
        Ok(())
    }

    pub fn next_fire_time(&self, task_id: &str) -> Option<i64> {
        self.registry
            .lock()
            .entries
            .get(task_id)
            .map(|entry| entry.next_fire_at)
    }

    /// Schedule and interval anchor of the live registration.
    pub fn registration(&self, task_id: &str) -> Option<(TaskSchedule, i64)> {
        self.registry
            .lock()
            .entries
            .get(task_id)
            .map(|entry| (entry.schedule.clone(), entry.anchor_at))
    }

    pub fn is_registered(&self, task_id: &str) -> bool {
        self.registry.lock().entries.contains_key(task_id)
    }

    pub fn registered_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.registry.lock().entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Delete persisted trigger records whose task is not in `keep`.
    pub fn prune_records(&self, keep: &HashSet<String>) -> Result<usize> {
        let mut pruned = 0;
        for record in self.store.list()? {
            if !keep.contains(&record.task_id) {
                self.store.delete(&record.task_id)?;
                pruned += 1;
                debug!(task_id = %record.task_id, "Pruned stale trigger record");
            }
        }
        Ok(pruned)
    }

    /// Dispatch every task whose fire time is at or before `now`.
    ///
    /// Each due entry advances to its first fire time strictly after `now`,
    /// so missed fires collapse into one. A due task whose previous dispatch
    /// is still running is skipped. Returns the IDs handed to the pool.
    pub fn fire_due(&self, now: i64) -> Vec<String> {
        let mut due = Vec::new();
        {
            let mut registry = self.registry.lock();
            let Registry { entries, in_flight } = &mut *registry;
            for (task_id, entry) in entries.iter_mut() {
                if entry.next_fire_at > now {
                    continue;
                }
                match entry.schedule.next_fire_after(entry.anchor_at, now) {
                    Some(next) => entry.next_fire_at = next,
                    // No further fire time; park it far away.
                    None => entry.next_fire_at = i64::MAX,
                }

                if in_flight.contains(task_id) {
                    debug!(task_id = %task_id, "Previous dispatch still running, fire coalesced");
                    continue;
                }
                in_flight.insert(task_id.clone());
                due.push((task_id.clone(), entry.handler.clone()));
            }
        }

        let mut dispatched = Vec::with_capacity(due.len());
        for (task_id, handler) in due {
            let guard = InFlightGuard {
                registry: self.registry.clone(),
                task_id: task_id.clone(),
            };
            let id = task_id.clone();
            let submitted = self.pool.submit(async move {
                let _guard = guard;
                handler.on_fire(&id).await;
            });
            match submitted {
                Ok(()) => {
                    debug!(task_id = %task_id, "Trigger fired");
                    dispatched.push(task_id);
                }
                // The rejected job (and its guard) is dropped, clearing the mark.
                Err(_) => warn!(task_id = %task_id, "Worker pool closed, fire dropped"),
            }
        }
        dispatched
    }

    fn earliest_fire(&self) -> Option<i64> {
        self.registry
            .lock()
            .entries
            .values()
            .map(|entry| entry.next_fire_at)
            .min()
    }

    /// Spawn the clock loop.
    pub fn start(self: &Arc<Self>) -> ClockHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let engine = self.clone();
        let join = tokio::spawn(async move {
            info!("Trigger clock started");
            loop {
                let now = now_ms();
                engine.fire_due(now);

                let max_tick = engine.config.max_tick;
                let sleep_for = match engine.earliest_fire() {
                    Some(next) => {
                        let wait_ms = u64::try_from(next.saturating_sub(now_ms())).unwrap_or(0);
                        Duration::from_millis(wait_ms).min(max_tick)
                    }
                    None => max_tick,
                };

                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = engine.wake.notified() => {}
                    _ = tokio::time::sleep(sleep_for) => {}
                }
            }
            info!("Trigger clock stopped");
        });

        ClockHandle {
            stop_tx: Some(stop_tx),
            join: Some(join),
        }
    }
}

/// Handle to the running clock loop.
pub struct ClockHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl ClockHandle {
    pub async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::worker_pool::WorkerPoolConfig;
    use redb::Database;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    const MINUTE_MS: i64 = 60_000;

    struct CountingHandler {
        calls: AtomicUsize,
        hold: Duration,
    }

    impl CountingHandler {
        fn new(hold: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                hold,
            })
        }
    }

    #[async_trait]
    impl TriggerHandler for CountingHandler {
        async fn on_fire(&self, _task_id: &str) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.hold).await;
        }
    }

    fn setup(workers: usize) -> (Arc<TriggerEngine>, Arc<WorkerPool>, TriggerStore, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let db = Arc::new(Database::create(temp_dir.path().join("test.db")).unwrap());
        let store = TriggerStore::new(db).unwrap();
        let pool = Arc::new(WorkerPool::new(WorkerPoolConfig {
            worker_count: workers,
        }));
        pool.start();
        let engine = Arc::new(TriggerEngine::new(
            store.clone(),
            pool.clone(),
            TriggerEngineConfig::default(),
        ));
        (engine, pool, store, temp_dir)
    }

    fn force_due(engine: &TriggerEngine, task_id: &str, at: i64) {
        engine
            .registry
            .lock()
            .entries
            .get_mut(task_id)
            .unwrap()
            .next_fire_at = at;
    }

    #[tokio::test]
    async fn test_register_replaces_existing() {
        let (engine, _pool, store, _temp_dir) = setup(2);
        let handler = CountingHandler::new(Duration::ZERO);

        let before = now_ms();
        let first = engine
            .register("report", &TaskSchedule::interval(10), handler.clone())
            .unwrap();
        assert!(first >= before + 10 * MINUTE_MS);

        engine
            .register("report", &TaskSchedule::cron("0 9 * * *"), handler)
            .unwrap();
        assert_eq!(engine.registered_ids(), vec!["report".to_string()]);
        assert_eq!(
            store.get("report").unwrap().unwrap().schedule,
            TaskSchedule::cron("0 9 * * *")
        );
    }

    #[tokio::test]
    async fn test_invalid_schedule_is_not_registered() {
        let (engine, _pool, store, _temp_dir) = setup(1);
        let result = engine.register(
            "report",
            &TaskSchedule::interval(0),
            CountingHandler::new(Duration::ZERO),
        );
        assert!(matches!(result, Err(EngineError::Validation(_))));
        assert!(!engine.is_registered("report"));
        assert!(store.get("report").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deregister_is_idempotent() {
        let (engine, _pool, store, _temp_dir) = setup(1);
        engine
            .register(
                "report",
                &TaskSchedule::interval(5),
                CountingHandler::new(Duration::ZERO),
            )
            .unwrap();

        engine.deregister("report").unwrap();
        engine.deregister("report").unwrap();
        assert!(engine.next_fire_time("report").is_none());
        assert!(store.get("report").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reinstate_keeps_interval_phase() {
        let (engine, _pool, store, _temp_dir) = setup(1);
        let handler = CountingHandler::new(Duration::ZERO);
        let first = engine
            .register("report", &TaskSchedule::interval(15), handler.clone())
            .unwrap();
        let (schedule, anchor_at) = engine.registration("report").unwrap();
        assert_eq!(schedule, TaskSchedule::interval(15));

        engine.deregister("report").unwrap();
        assert!(engine.registration("report").is_none());

        let next = engine
            .reinstate("report", &schedule, anchor_at, handler)
            .unwrap();
        assert_eq!(next, first);
        assert_eq!(store.get("report").unwrap().unwrap().anchor_at, anchor_at);
    }

    #[tokio::test]
    async fn test_fire_due_advances_and_coalesces() {
        let (engine, pool, _store, _temp_dir) = setup(4);
        let handler = CountingHandler::new(Duration::from_millis(200));
        engine
            .register("slow", &TaskSchedule::interval(1), handler.clone())
            .unwrap();

        let now = now_ms();
        force_due(&engine, "slow", now - 1);
        assert_eq!(engine.fire_due(now), vec!["slow".to_string()]);
        let next = engine.next_fire_time("slow").unwrap();
        assert!(next > now);

        // Still running: a second elapsed fire is skipped, not queued.
        force_due(&engine, "slow", now);
        assert!(engine.fire_due(now).is_empty());

        pool.shutdown().await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_in_flight_mark_clears_after_dispatch() {
        let (engine, _pool, _store, _temp_dir) = setup(1);
        let handler = CountingHandler::new(Duration::ZERO);
        engine
            .register("quick", &TaskSchedule::interval(1), handler.clone())
            .unwrap();

        let now = now_ms();
        force_due(&engine, "quick", now);
        assert_eq!(engine.fire_due(now).len(), 1);

        tokio::time::timeout(Duration::from_secs(5), async {
            while !engine.registry.lock().in_flight.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        force_due(&engine, "quick", now);
        assert_eq!(engine.fire_due(now).len(), 1);
    }

    #[tokio::test]
    async fn test_restore_keeps_interval_phase() {
        let (engine, _pool, store, _temp_dir) = setup(1);
        let schedule = TaskSchedule::interval(60);
        let anchor = now_ms() - 150 * MINUTE_MS;
        store
            .put(&TriggerRecord {
                task_id: "hourly".to_string(),
                schedule: schedule.clone(),
                anchor_at: anchor,
                next_fire_at: None,
                registered_at: anchor,
            })
            .unwrap();

        let next = engine
            .restore("hourly", &schedule, CountingHandler::new(Duration::ZERO))
            .unwrap();
        assert_eq!(next, anchor + 180 * MINUTE_MS);
        assert_eq!(store.get("hourly").unwrap().unwrap().anchor_at, anchor);
    }

    #[tokio::test]
    async fn test_restore_reanchors_changed_schedule() {
        let (engine, _pool, store, _temp_dir) = setup(1);
        let anchor = now_ms() - 150 * MINUTE_MS;
        store
            .put(&TriggerRecord {
                task_id: "hourly".to_string(),
                schedule: TaskSchedule::interval(60),
                anchor_at: anchor,
                next_fire_at: None,
                registered_at: anchor,
            })
            .unwrap();

        let before = now_ms();
        engine
            .restore(
                "hourly",
                &TaskSchedule::interval(30),
                CountingHandler::new(Duration::ZERO),
            )
            .unwrap();
        assert!(store.get("hourly").unwrap().unwrap().anchor_at >= before);
    }

    #[tokio::test]
    async fn test_prune_records() {
        let (engine, _pool, store, _temp_dir) = setup(1);
        let handler = CountingHandler::new(Duration::ZERO);
        engine
            .register("keep", &TaskSchedule::interval(5), handler.clone())
            .unwrap();
        engine
            .register("drop", &TaskSchedule::interval(5), handler)
            .unwrap();

        let keep: HashSet<String> = ["keep".to_string()].into_iter().collect();
        assert_eq!(engine.prune_records(&keep).unwrap(), 1);
        assert!(store.get("drop").unwrap().is_none());
        assert!(store.get("keep").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clock_loop_dispatches_due_task() {
        let (engine, _pool, _store, _temp_dir) = setup(1);
        let handler = CountingHandler::new(Duration::ZERO);
        engine
            .register("tick", &TaskSchedule::interval(1), handler.clone())
            .unwrap();
        force_due(&engine, "tick", now_ms());

        let clock = engine.start();
        tokio::time::timeout(Duration::from_secs(5), async {
            while handler.calls.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        clock.stop().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }
}
