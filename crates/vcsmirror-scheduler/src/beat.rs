//! The database-backed scheduler loop.
//!
//! [`DatabaseScheduler`] keeps an in-memory map of entries built from the
//! enabled periodic task rows and a min-heap of their next check times. Each
//! tick it rebuilds both when the schedule version moved, dispatches due
//! entries to the task queue and writes run bookkeeping back.

use crate::cron::CronSchedule;
use crate::entry::{EntryCheck, ScheduleEntry};
use crate::error::{Result, SchedulerError};
use crate::schedule::{DEFAULT_MAX_INTERVAL, MIN_RECHECK, Schedule};
use chrono::{DateTime, Duration, Utc};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};
use vcsmirror_core::TaskQueue;
use vcsmirror_store::{CrontabFields, NewPeriodicTask, PeriodicTaskRow, ScheduleStore, Store};

/// Name of the built-in cleanup entry.
pub const BACKEND_CLEANUP: &str = "backend_cleanup";

/// Expiry of dispatched cleanup tasks.
const BACKEND_CLEANUP_EXPIRES_SECS: i64 = 12 * 3600;

/// Upper bound of one sleep slice in [`DatabaseScheduler::run`].
const SLEEP_SLICE: std::time::Duration = std::time::Duration::from_millis(100);

type Heap = BinaryHeap<Reverse<(DateTime<Utc>, String)>>;

/// Scheduler instance; one per beat process.
pub struct DatabaseScheduler {
    store: Arc<Store>,
    queue: Arc<dyn TaskQueue>,
    max_interval: Duration,
    entries: HashMap<String, ScheduleEntry>,
    heap: Option<Heap>,
    dirty: HashSet<String>,
    last_update: Option<DateTime<Utc>>,
    initialized: bool,
    rebuilds: u64,
}

impl fmt::Debug for DatabaseScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseScheduler")
            .field("max_interval", &self.max_interval)
            .field("entries", &self.entries.len())
            .field("dirty", &self.dirty)
            .field("last_update", &self.last_update)
            .field("rebuilds", &self.rebuilds)
            .finish_non_exhaustive()
    }
}

impl DatabaseScheduler {
    /// Create a scheduler over `store` dispatching to `queue`.
    #[must_use]
    pub fn new(store: Arc<Store>, queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            store,
            queue,
            max_interval: DEFAULT_MAX_INTERVAL,
            entries: HashMap::new(),
            heap: None,
            dirty: HashSet::new(),
            last_update: None,
            initialized: false,
            rebuilds: 0,
        }
    }

    /// Cap the sleep between ticks.
    #[must_use]
    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval.max(Duration::milliseconds(1));
        self
    }

    /// Current entries by name.
    #[must_use]
    pub const fn entries(&self) -> &HashMap<String, ScheduleEntry> {
        &self.entries
    }

    /// Names with unsaved run bookkeeping.
    #[must_use]
    pub const fn dirty(&self) -> &HashSet<String> {
        &self.dirty
    }

    /// Number of full rebuilds so far.
    #[must_use]
    pub const fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Install built-in entries that do not exist yet.
    ///
    /// # Errors
    /// Returns error if the store write fails.
    pub fn install_default_entries(&self) -> Result<()> {
        self.store.write(|tx| {
            let schedules = ScheduleStore::new(tx);
            if schedules.get_by_name(BACKEND_CLEANUP)?.is_some() {
                return Ok(());
            }
            let crontab = schedules.find_or_create_crontab(&CrontabFields {
                minute: "0".into(),
                hour: "4".into(),
                ..CrontabFields::default()
            })?;
            let mut new = NewPeriodicTask::new(BACKEND_CLEANUP, BACKEND_CLEANUP).with_crontab(crontab.id);
            new.expire_seconds = Some(BACKEND_CLEANUP_EXPIRES_SECS);
            new.description = "Purge expired task results and locks".into();
            schedules.create_task(&new)?;
            info!(name = BACKEND_CLEANUP, "installed default periodic task");
            Ok(())
        })?;
        Ok(())
    }

    /// Run one iteration and return how long to sleep before the next.
    ///
    /// Store failures are logged and retried on later ticks.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Duration {
        self.refresh_if_changed(now);

        let mut heap = self.heap.take().unwrap_or_else(|| {
            self.entries
                .keys()
                .map(|name| Reverse((now, name.clone())))
                .collect()
        });

        while let Some(Reverse((when, _))) = heap.peek() {
            if *when > now {
                break;
            }
            let Some(Reverse((_, name))) = heap.pop() else {
                break;
            };
            let Some(entry) = self.entries.get(&name).cloned() else {
                continue;
            };
            match entry.check(now) {
                EntryCheck::Retire => self.retire(&entry),
                EntryCheck::Scheduled(state) => {
                    if state.is_due && !self.apply(&entry, now) {
                        continue;
                    }
                    let next_check = state.next_check.max(MIN_RECHECK);
                    let at = now
                        .checked_add_signed(next_check)
                        .unwrap_or(DateTime::<Utc>::MAX_UTC);
                    heap.push(Reverse((at, name)));
                }
            }
        }

        let sleep = heap
            .peek()
            .map_or(self.max_interval, |Reverse((when, _))| *when - now);
        self.heap = Some(heap);
        self.sync();
        sleep.clamp(Duration::zero(), self.max_interval)
    }

    /// Tick until `stop` is set, then flush.
    ///
    /// # Errors
    /// Returns error if the default entries cannot be installed.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<()> {
        self.install_default_entries()?;
        info!(max_interval = ?self.max_interval, "scheduler started");
        while !stop.load(Ordering::Relaxed) {
            let sleep = self.tick(Utc::now()).to_std().unwrap_or_default();
            let mut slept = std::time::Duration::ZERO;
            while slept < sleep && !stop.load(Ordering::Relaxed) {
                let slice = SLEEP_SLICE.min(sleep - slept);
                std::thread::sleep(slice);
                slept += slice;
            }
        }
        self.sync();
        info!("scheduler stopped");
        Ok(())
    }

    fn refresh_if_changed(&mut self, now: DateTime<Utc>) {
        let observed = match self.store.read(|conn| ScheduleStore::new(conn).last_update()) {
            Ok(observed) => observed,
            Err(err) if self.initialized => {
                warn!(error = %err, "could not read schedule version");
                return;
            }
            Err(err) => {
                warn!(error = %err, "could not read schedule version, loading anyway");
                None
            }
        };
        if self.initialized && observed <= self.last_update {
            return;
        }

        debug!(?observed, previous = ?self.last_update, "schedule changed");
        self.sync();
        match self.rebuild(now) {
            Ok(()) => {
                self.last_update = observed;
                self.initialized = true;
            }
            Err(err) => warn!(error = %err, "could not load schedule, keeping previous entries"),
        }
    }

    fn rebuild(&mut self, now: DateTime<Utc>) -> Result<()> {
        let rows = self
            .store
            .read(|conn| ScheduleStore::new(conn).enabled_tasks())?;

        let mut entries = HashMap::with_capacity(rows.len());
        for row in rows {
            let schedule = match self.resolve_schedule(&row) {
                Ok(Some(schedule)) => schedule,
                Ok(None) => {
                    debug!(name = %row.name, "schedule row vanished, skipping entry");
                    continue;
                }
                Err(err) => {
                    warn!(name = %row.name, error = %err, "invalid schedule, skipping entry");
                    continue;
                }
            };
            match ScheduleEntry::from_row(&row, schedule, now) {
                Ok(entry) => {
                    // Keep bookkeeping that has not been saved yet.
                    let entry = match self.entries.get(&row.name) {
                        Some(old) if self.dirty.contains(&row.name) => ScheduleEntry {
                            last_run_at: old.last_run_at,
                            total_run_count: old.total_run_count,
                            ..entry
                        },
                        _ => entry,
                    };
                    entries.insert(row.name.clone(), entry);
                }
                Err(err) => {
                    error!(name = %row.name, error = %err, "disabling periodic task with invalid arguments");
                    if let Err(err) = self
                        .store
                        .write(|tx| ScheduleStore::new(tx).set_enabled(row.id, false, false))
                    {
                        warn!(name = %row.name, error = %err, "could not disable periodic task");
                    }
                }
            }
        }

        self.entries = entries;
        self.heap = None;
        self.rebuilds += 1;
        debug!(entries = self.entries.len(), "schedule rebuilt");
        Ok(())
    }

    fn resolve_schedule(&self, row: &PeriodicTaskRow) -> Result<Option<Schedule>> {
        if let Some(id) = row.crontab_id {
            let Some(crontab) = self.store.read(|conn| ScheduleStore::new(conn).crontab(id))? else {
                return Ok(None);
            };
            return CronSchedule::from_fields(&crontab.fields).map(|c| Some(Schedule::Crontab(c)));
        }
        if let Some(id) = row.interval_id {
            let Some(interval) = self.store.read(|conn| ScheduleStore::new(conn).interval(id))? else {
                return Ok(None);
            };
            let every = interval
                .run_every()
                .map_err(|err| SchedulerError::invalid_entry(&row.name, err.to_string()))?;
            return Ok(Some(Schedule::Interval(every)));
        }
        Err(SchedulerError::invalid_entry(&row.name, "no schedule set"))
    }

    /// Dispatch `entry`. Returns `false` if the entry is gone.
    fn apply(&mut self, entry: &ScheduleEntry, now: DateTime<Utc>) -> bool {
        match self
            .store
            .read(|conn| ScheduleStore::new(conn).get_task(entry.id))
        {
            Ok(Some(row)) if row.enabled => {}
            Ok(_) => {
                debug!(name = %entry.name, "periodic task removed, skipping");
                self.entries.remove(&entry.name);
                self.dirty.remove(&entry.name);
                return false;
            }
            Err(err) => warn!(name = %entry.name, error = %err, "could not verify periodic task"),
        }

        let signature = entry.signature(now);
        self.entries.insert(entry.name.clone(), entry.next(now));
        self.dirty.insert(entry.name.clone());

        match self.queue.enqueue(signature) {
            Ok(handle) => info!(name = %entry.name, task = %entry.task, id = %handle.id, "sending due task"),
            Err(err) => error!(name = %entry.name, task = %entry.task, error = %err, "message error"),
        }
        true
    }

    fn retire(&mut self, entry: &ScheduleEntry) {
        info!(name = %entry.name, "disabling one-off periodic task that already ran");
        self.entries.remove(&entry.name);
        self.dirty.remove(&entry.name);
        if let Err(err) = self
            .store
            .write(|tx| ScheduleStore::new(tx).retire_one_off(entry.id))
        {
            warn!(name = %entry.name, error = %err, "could not disable one-off periodic task");
        }
    }

    /// Write dirty bookkeeping back. Names that fail stay dirty.
    pub fn sync(&mut self) -> usize {
        if self.dirty.is_empty() {
            return 0;
        }
        let names: Vec<String> = self.dirty.drain().collect();
        let mut failed = HashSet::new();
        let mut saved = 0;

        for name in names {
            let Some(entry) = self.entries.get(&name) else {
                continue;
            };
            let (last_run_at, count) = (entry.last_run_at, entry.total_run_count);
            match self
                .store
                .write(|tx| ScheduleStore::new(tx).save_run_state(&name, last_run_at, count))
            {
                Ok(true) => saved += 1,
                Ok(false) => {
                    debug!(name = %name, "periodic task gone before sync");
                    self.entries.remove(&name);
                }
                Err(err) => {
                    warn!(name = %name, error = %err, "could not save periodic task, will retry");
                    failed.insert(name);
                }
            }
        }

        self.dirty.extend(failed);
        saved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcsmirror_store::IntervalPeriod;
    use vcsmirror_test_utils::RecordingQueue;

    fn scheduler() -> (Arc<Store>, Arc<RecordingQueue>, DatabaseScheduler) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let queue = Arc::new(RecordingQueue::new());
        let beat = DatabaseScheduler::new(store.clone(), queue.clone());
        (store, queue, beat)
    }

    fn every_second(store: &Store, name: &str, last_run_at: DateTime<Utc>) -> i64 {
        store
            .write(|tx| {
                let s = ScheduleStore::new(tx);
                let interval = s.find_or_create_interval(1, IntervalPeriod::Seconds)?;
                let row = s.create_task(
                    &NewPeriodicTask::new(name, "sync_pull_mirror_cron")
                        .with_interval(interval.id)
                        .with_args("[1]"),
                )?;
                s.save_run_state(name, last_run_at, 0)?;
                Ok(row.id)
            })
            .unwrap()
    }

    #[test]
    fn default_entries_are_installed_once() {
        let (store, _, beat) = scheduler();
        beat.install_default_entries().unwrap();
        beat.install_default_entries().unwrap();
        let rows = store
            .read(|conn| ScheduleStore::new(conn).list_tasks())
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, BACKEND_CLEANUP);
        assert_eq!(rows[0].expire_seconds, Some(BACKEND_CLEANUP_EXPIRES_SECS));
    }

    #[test]
    fn due_entry_is_dispatched_and_saved() {
        let (store, queue, mut beat) = scheduler();
        let now = Utc::now();
        every_second(&store, "pull-1-nightly", now - Duration::seconds(10));

        let sleep = beat.tick(now);
        assert_eq!(queue.names(), vec!["sync_pull_mirror_cron".to_string()]);
        assert!(sleep <= Duration::seconds(1));
        assert!(beat.dirty().is_empty());

        let row = store
            .read(|conn| ScheduleStore::new(conn).get_by_name("pull-1-nightly"))
            .unwrap()
            .unwrap();
        assert_eq!(row.total_run_count, 1);
        assert_eq!(
            row.last_run_at.map(|t| t.timestamp_micros()),
            Some(now.timestamp_micros())
        );
    }

    #[test]
    fn unchanged_version_reuses_entries() {
        let (store, _, mut beat) = scheduler();
        let now = Utc::now();
        every_second(&store, "pull-1-nightly", now);
        beat.tick(now);
        beat.tick(now + Duration::milliseconds(100));
        assert_eq!(beat.rebuilds(), 1);
    }

    #[test]
    fn malformed_arguments_disable_without_version_bump() {
        let (store, queue, mut beat) = scheduler();
        let id = every_second(&store, "broken", Utc::now() - Duration::minutes(1));
        store
            .write(|tx| {
                tx.execute("UPDATE periodic_task SET args = 'nope' WHERE id = ?1", [id])?;
                Ok(())
            })
            .unwrap();
        let version = store
            .read(|conn| ScheduleStore::new(conn).last_update())
            .unwrap();

        beat.tick(Utc::now());
        assert!(queue.names().is_empty());
        assert!(beat.entries().is_empty());
        let row = store
            .read(|conn| ScheduleStore::new(conn).get_task(id))
            .unwrap()
            .unwrap();
        assert!(!row.enabled);
        assert_eq!(
            store.read(|conn| ScheduleStore::new(conn).last_update()).unwrap(),
            version
        );
    }

    #[test]
    fn one_off_entry_runs_once() {
        let (store, queue, mut beat) = scheduler();
        let now = Utc::now();
        let id = every_second(&store, "once", now - Duration::minutes(1));
        store
            .write(|tx| {
                tx.execute("UPDATE periodic_task SET one_off = 1 WHERE id = ?1", [id])?;
                Ok(())
            })
            .unwrap();

        beat.tick(now);
        beat.tick(now + Duration::seconds(2));
        beat.tick(now + Duration::seconds(4));
        assert_eq!(queue.names().len(), 1);
        let row = store
            .read(|conn| ScheduleStore::new(conn).get_task(id))
            .unwrap()
            .unwrap();
        assert!(!row.enabled);
        assert_eq!(row.total_run_count, 0);
    }

    #[test]
    fn deleted_row_is_skipped() {
        let (store, queue, mut beat) = scheduler();
        let now = Utc::now();
        let id = every_second(&store, "doomed", now);
        beat.tick(now);

        // Remove the row behind the scheduler's back without a version bump.
        store
            .write(|tx| {
                tx.execute("DELETE FROM periodic_task WHERE id = ?1", [id])?;
                Ok(())
            })
            .unwrap();
        beat.tick(now + Duration::seconds(5));
        assert!(queue.names().is_empty());
        assert!(!beat.entries().contains_key("doomed"));
    }

    fn run_count(store: &Store, name: &str) -> i64 {
        store
            .read(|conn| ScheduleStore::new(conn).get_by_name(name))
            .unwrap()
            .unwrap()
            .total_run_count
    }

    #[test]
    fn sub_tick_interval_is_dispatched_once_per_tick() {
        let (store, queue, mut beat) = scheduler();
        let now = Utc::now();
        store
            .write(|tx| {
                let s = ScheduleStore::new(tx);
                let interval = s.find_or_create_interval(1, IntervalPeriod::Microseconds)?;
                s.create_task(&NewPeriodicTask::new("hot", "sync_pull_mirror_cron").with_interval(interval.id))?;
                s.save_run_state("hot", now - Duration::minutes(1), 0)?;
                Ok(())
            })
            .unwrap();

        let sleep = beat.tick(now);
        assert_eq!(queue.names().len(), 1);
        assert_eq!(sleep, MIN_RECHECK);
    }

    #[test]
    fn zero_interval_row_is_skipped() {
        let (store, queue, mut beat) = scheduler();
        let now = Utc::now();
        every_second(&store, "stuck", now - Duration::minutes(1));
        store
            .read(|conn| {
                conn.execute_batch(
                    "PRAGMA ignore_check_constraints = ON;
                     UPDATE interval_schedule SET every = 0;
                     PRAGMA ignore_check_constraints = OFF;",
                )?;
                Ok(())
            })
            .unwrap();

        let sleep = beat.tick(now);
        assert!(queue.names().is_empty());
        assert!(beat.entries().is_empty());
        assert_eq!(sleep, DEFAULT_MAX_INTERVAL);
    }

    #[test]
    fn overflowing_interval_row_is_skipped() {
        let (store, queue, mut beat) = scheduler();
        let now = Utc::now();
        every_second(&store, "far", now - Duration::minutes(1));
        every_second(&store, "near", now - Duration::minutes(1));
        store
            .write(|tx| {
                tx.execute(
                    "INSERT INTO interval_schedule (every, period) VALUES (1000000000000, 'days')",
                    [],
                )?;
                tx.execute(
                    "UPDATE periodic_task SET interval_id = last_insert_rowid() WHERE name = 'far'",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        beat.tick(now);
        assert_eq!(queue.names().len(), 1);
        assert!(!beat.entries().contains_key("far"));
        assert!(beat.entries().contains_key("near"));
    }

    #[test]
    fn failed_flush_keeps_entry_dirty_until_saved() {
        let (store, queue, mut beat) = scheduler();
        let now = Utc::now();
        every_second(&store, "flaky", now - Duration::seconds(10));
        store
            .write(|tx| {
                tx.execute_batch(
                    "CREATE TRIGGER refuse_run_state BEFORE UPDATE ON periodic_task
                     BEGIN SELECT RAISE(ABORT, 'disk busy'); END;",
                )?;
                Ok(())
            })
            .unwrap();

        beat.tick(now);
        assert_eq!(queue.names().len(), 1);
        assert!(beat.dirty().contains("flaky"));
        assert_eq!(run_count(&store, "flaky"), 0);

        store
            .write(|tx| {
                tx.execute_batch("DROP TRIGGER refuse_run_state")?;
                Ok(())
            })
            .unwrap();
        assert_eq!(beat.sync(), 1);
        assert!(beat.dirty().is_empty());
        assert_eq!(run_count(&store, "flaky"), 1);
        assert_eq!(queue.names().len(), 1);
    }

    #[test]
    fn stop_flag_ends_run() {
        let (_, _, mut beat) = scheduler();
        let stop = AtomicBool::new(true);
        beat.run(&stop).unwrap();
        assert_eq!(beat.rebuilds(), 0);
    }
}
