//! Periodic tasks always carry exactly one schedule kind.

use proptest::prelude::*;
use rstest::{fixture, rstest};
use vcsmirror_store::{
    CrontabFields, IntervalPeriod, NewPeriodicTask, ScheduleStore, Store, StoreError,
};

struct Schedules {
    store: Store,
    crontab_id: i64,
    interval_id: i64,
}

#[fixture]
fn schedules() -> Schedules {
    let store = Store::open_in_memory().unwrap();
    let (crontab_id, interval_id) = store
        .write(|tx| {
            let s = ScheduleStore::new(tx);
            let crontab = s.find_or_create_crontab(&CrontabFields::default())?;
            let interval = s.find_or_create_interval(30, IntervalPeriod::Seconds)?;
            Ok((crontab.id, interval.id))
        })
        .unwrap();
    Schedules {
        store,
        crontab_id,
        interval_id,
    }
}

fn create(s: &Schedules, interval: bool, crontab: bool) -> vcsmirror_store::Result<i64> {
    let mut new = NewPeriodicTask::new("pull-1-nightly", "sync_pull_mirror_cron");
    new.interval_id = interval.then_some(s.interval_id);
    new.crontab_id = crontab.then_some(s.crontab_id);
    s.store
        .write(|tx| ScheduleStore::new(tx).create_task(&new))
        .map(|row| row.id)
}

#[rstest]
fn creation_without_schedule_is_rejected(schedules: Schedules) {
    let err = create(&schedules, false, false).unwrap_err();
    assert!(matches!(err, StoreError::Constraint { .. }));
}

#[rstest]
fn creation_with_both_schedules_is_rejected(schedules: Schedules) {
    let err = create(&schedules, true, true).unwrap_err();
    assert!(matches!(err, StoreError::Constraint { .. }));
    let count = schedules
        .store
        .read(|conn| ScheduleStore::new(conn).list_tasks())
        .unwrap()
        .len();
    assert_eq!(count, 0);
}

#[rstest]
fn raw_sql_cannot_bypass_the_check(schedules: Schedules) {
    let result: vcsmirror_store::Result<usize> = schedules.store.write(|tx| {
        Ok(tx.execute(
            "INSERT INTO periodic_task (name, task, interval_id, crontab_id) VALUES ('x', 't', ?1, ?2)",
            [schedules.interval_id, schedules.crontab_id],
        )?)
    });
    assert!(matches!(result, Err(StoreError::Constraint { .. })));
}

#[rstest]
fn rejected_version_bump_rolls_back(schedules: Schedules) {
    let before = schedules
        .store
        .read(|conn| ScheduleStore::new(conn).last_update())
        .unwrap();
    let _ = create(&schedules, true, true);
    let after = schedules
        .store
        .read(|conn| ScheduleStore::new(conn).last_update())
        .unwrap();
    assert_eq!(before, after);
}

#[derive(Debug, Clone, Copy)]
enum Mutation {
    Create { interval: bool, crontab: bool },
    Reschedule { interval: bool, crontab: bool },
    Delete,
}

fn mutation() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        (any::<bool>(), any::<bool>())
            .prop_map(|(interval, crontab)| Mutation::Create { interval, crontab }),
        (any::<bool>(), any::<bool>())
            .prop_map(|(interval, crontab)| Mutation::Reschedule { interval, crontab }),
        Just(Mutation::Delete),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_row_keeps_exactly_one_schedule(ops in prop::collection::vec(mutation(), 1..12)) {
        let s = schedules();
        let mut next_name = 0;
        for op in ops {
            let _ = s.store.write(|tx| {
                let store = ScheduleStore::new(tx);
                let existing = store.list_tasks()?;
                match op {
                    Mutation::Create { interval, crontab } => {
                        next_name += 1;
                        let mut new = NewPeriodicTask::new(format!("task-{next_name}"), "t");
                        new.interval_id = interval.then_some(s.interval_id);
                        new.crontab_id = crontab.then_some(s.crontab_id);
                        store.create_task(&new).map(|_| ())
                    }
                    Mutation::Reschedule { interval, crontab } => match existing.first() {
                        Some(row) => store.set_schedule(
                            row.id,
                            interval.then_some(s.interval_id),
                            crontab.then_some(s.crontab_id),
                        ),
                        None => Ok(()),
                    },
                    Mutation::Delete => match existing.last() {
                        Some(row) => store.delete_task(row.id).map(|_| ()),
                        None => Ok(()),
                    },
                }
            });
        }

        let rows = s.store.read(|conn| ScheduleStore::new(conn).list_tasks()).unwrap();
        for row in rows {
            prop_assert!(row.interval_id.is_some() != row.crontab_id.is_some());
        }
    }
}
