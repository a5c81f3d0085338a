//! The running scheduler follows edits made through the store.

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use rstest::{fixture, rstest};
use std::sync::Arc;
use vcsmirror_core::MirrorKind;
use vcsmirror_scheduler::{DatabaseScheduler, set_periodic_expression};
use vcsmirror_store::{IntervalPeriod, NewPeriodicTask, PullSettings, ScheduleStore, Store};
use vcsmirror_test_utils::{RecordingQueue, TempWorkspace};

struct Beat {
    ws: TempWorkspace,
    store: Arc<Store>,
    queue: Arc<RecordingQueue>,
    scheduler: DatabaseScheduler,
}

#[fixture]
fn beat() -> Beat {
    let ws = TempWorkspace::new();
    let store = Arc::new(Store::open(ws.database()).unwrap());
    let queue = Arc::new(RecordingQueue::new());
    let scheduler = DatabaseScheduler::new(store.clone(), queue.clone());
    Beat {
        ws,
        store,
        queue,
        scheduler,
    }
}

fn add_interval_task(store: &Store, name: &str, seconds: i64) {
    store
        .write(|tx| {
            let s = ScheduleStore::new(tx);
            let interval = s.find_or_create_interval(seconds, IntervalPeriod::Seconds)?;
            s.create_task(&NewPeriodicTask::new(name, "cleanup_task_meta").with_interval(interval.id))?;
            s.save_run_state(name, Utc::now() - Duration::hours(1), 0)?;
            Ok(())
        })
        .unwrap();
}

#[rstest]
fn entry_added_to_warm_schedule_is_picked_up(beat: Beat) {
    let Beat {
        store,
        queue,
        mut scheduler,
        ..
    } = beat;
    add_interval_task(&store, "first", 60);

    let now = Utc::now();
    scheduler.tick(now);
    scheduler.tick(now + Duration::seconds(1));
    assert_eq!(scheduler.rebuilds(), 1);
    assert_eq!(queue.names(), vec!["cleanup_task_meta".to_string()]);

    add_interval_task(&store, "second", 60);
    scheduler.tick(now + Duration::seconds(2));

    assert_eq!(scheduler.rebuilds(), 2);
    assert!(scheduler.entries().contains_key("second"));
    assert_eq!(queue.names().len(), 2);
    let second = queue.signatures().pop().unwrap();
    assert_eq!(second.options.periodic_task_name.as_deref(), Some("second"));
}

#[rstest]
fn unchanged_expression_does_not_trigger_rebuild(beat: Beat) {
    let Beat {
        ws,
        store,
        mut scheduler,
        ..
    } = beat;
    let user = ws.seed_user("ann").unwrap();
    let mirror = ws
        .seed_pull_mirror(user, "https://example.com/a.git", PullSettings::default())
        .unwrap()
        .mirror;
    set_periodic_expression(&store, MirrorKind::Pull, mirror.id, Some("0 4 * * *")).unwrap();

    let now = Utc::now();
    scheduler.tick(now);
    assert_eq!(scheduler.rebuilds(), 1);

    assert!(!set_periodic_expression(&store, MirrorKind::Pull, mirror.id, Some("0 4 * * *")).unwrap());
    scheduler.tick(now + Duration::seconds(1));
    assert_eq!(scheduler.rebuilds(), 1);

    assert!(set_periodic_expression(&store, MirrorKind::Pull, mirror.id, Some("0 5 * * *")).unwrap());
    scheduler.tick(now + Duration::seconds(2));
    assert_eq!(scheduler.rebuilds(), 2);
    let names: Vec<_> = scheduler.entries().keys().cloned().collect();
    assert_eq!(
        names,
        vec![format!("PullMirror (id:{}) periodic task 0 5 * * *", mirror.id)]
    );
}

#[rstest]
fn removed_entry_stops_firing(beat: Beat) {
    let Beat {
        store,
        queue,
        mut scheduler,
        ..
    } = beat;
    add_interval_task(&store, "short", 1);

    let now = Utc::now();
    scheduler.tick(now);
    assert_eq!(queue.names().len(), 1);

    store
        .write(|tx| {
            let s = ScheduleStore::new(tx);
            let row = s.get_by_name("short")?.unwrap();
            s.delete_task(row.id)?;
            Ok(())
        })
        .unwrap();
    scheduler.tick(now + Duration::seconds(3));
    assert_eq!(queue.names().len(), 1);
    assert!(scheduler.entries().is_empty());
}

#[rstest]
fn run_state_survives_restart(beat: Beat) {
    let Beat {
        store,
        queue,
        mut scheduler,
        ..
    } = beat;
    add_interval_task(&store, "hourly", 3600);

    let now = Utc::now();
    scheduler.tick(now);
    assert_eq!(queue.names().len(), 1);
    drop(scheduler);

    let mut restarted = DatabaseScheduler::new(store.clone(), queue.clone());
    restarted.tick(now + Duration::seconds(10));
    assert_eq!(queue.names().len(), 1);
    assert_eq!(restarted.entries()["hourly"].total_run_count, 1);
}
