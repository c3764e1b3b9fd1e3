use chrono::NaiveDateTime;
use perftrack::cache::CachedStore;
use perftrack::model::{Month, NewEvaluation, NewGoal, NewUtilisation, Status, TIMESTAMP_FORMAT};
use perftrack::reconcile::{HistoryFilter, ViewFilter};
use perftrack::store::{MemoryStore, Sheet, StoreError, Table, TableStore, WorkbookStore};
use perftrack::tracker::{Tracker, TrackerError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

fn fixed_clock(raw: &'static str) -> impl Fn() -> NaiveDateTime + Send + Sync + 'static {
    move || NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).unwrap()
}

fn goal_form(resource: &str, goal: &str, year: &str, month: &str) -> NewGoal {
    NewGoal {
        resource: resource.to_string(),
        project: "P1".to_string(),
        goal: goal.to_string(),
        year: year.to_string(),
        month: month.to_string(),
    }
}

fn evaluation_form(goal_id: impl ToString, status: &str, rating: u8) -> NewEvaluation {
    NewEvaluation {
        goal_id: goal_id.to_string(),
        status: status.to_string(),
        rating,
        comments: "reviewed".to_string(),
        ..NewEvaluation::default()
    }
}

#[test]
fn empty_store_is_empty_not_an_error() {
    let tracker = Tracker::new(MemoryStore::new(), 0);
    assert!(tracker.goals().unwrap().is_empty());
    assert!(tracker.reconciled(&ViewFilter::default()).unwrap().is_empty());
    assert_eq!(tracker.summary(&ViewFilter::default()).unwrap().achievement_rate, 0.0);
}

#[test]
fn register_evaluate_and_reconcile() {
    let tracker = Tracker::new(MemoryStore::new(), 0).with_clock(fixed_clock("2025-03-20 17:00:00"));
    let ship = tracker.register_goal(goal_form("Alice", "Ship v1", "2025", "Mar")).unwrap();
    tracker.register_goal(goal_form("Bob", "Write docs", "2025", "Mar")).unwrap();

    tracker
        .record_evaluation(evaluation_form(ship.id, "Achieved", 5))
        .unwrap();

    let rows = tracker.reconciled(&ViewFilter::default()).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].status, Status::Achieved);
    assert_eq!(rows[1].status, Status::Pending);

    let summary = tracker.summary(&ViewFilter::default()).unwrap();
    assert_eq!(summary.achievement_rate, 50.0);
    assert_eq!(summary.mean_rating, 5.0);

    assert_eq!(tracker.projects().unwrap(), vec!["P1"]);
    assert_eq!(tracker.resources(Some("P1")).unwrap(), vec!["Alice", "Bob"]);
    assert!(tracker.resources(Some("P9")).unwrap().is_empty());
}

#[test]
fn invalid_forms_are_rejected_without_writing() {
    let tracker = Tracker::new(MemoryStore::new(), 0);
    let err = tracker.register_goal(goal_form("", "Ship", "2025", "Smarch")).unwrap_err();
    match err {
        TrackerError::Validation(v) => {
            assert!(v.has_field("resource"));
            assert!(v.has_field("month"));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert_eq!(tracker.store().read(Table::MasterList).unwrap().version, 0);
}

#[test]
fn evaluating_an_unknown_goal_is_not_found() {
    let tracker = Tracker::new(MemoryStore::new(), 0);
    let err = tracker
        .record_evaluation(evaluation_form(perftrack::model::GoalId::new(), "Achieved", 5))
        .unwrap_err();
    assert!(matches!(err, TrackerError::GoalNotFound(_)));
}

#[test]
fn history_is_newest_first() {
    let store = Arc::new(MemoryStore::new());
    let early = Tracker::new(store.clone(), 0).with_clock(fixed_clock("2025-03-10 09:00:00"));
    let late = Tracker::new(store.clone(), 0).with_clock(fixed_clock("2025-03-20 17:00:00"));

    let ship = early.register_goal(goal_form("Alice", "Ship v1", "2025", "Mar")).unwrap();
    late.record_evaluation(evaluation_form(ship.id, "Achieved", 5)).unwrap();
    early
        .record_evaluation(evaluation_form(ship.id, "Partially Achieved", 3))
        .unwrap();

    let history = early
        .history(&HistoryFilter {
            resource: Some("Alice".to_string()),
            goal_id: None,
        })
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, Status::Achieved);

    // Latest by time, not by insertion.
    let rows = early.reconciled(&ViewFilter::default()).unwrap();
    assert_eq!(rows[0].status, Status::Achieved);
}

#[test]
fn extend_carries_an_unachieved_goal_into_next_month() {
    let tracker = Tracker::new(MemoryStore::new(), 0);
    let goal = tracker.register_goal(goal_form("Alice", "Ship v1", "2025", "Dec")).unwrap();

    let mut form = evaluation_form(goal.id, "Not Completed", 2);
    form.revised_date = Some("2026-01-15".to_string());
    form.extend = true;
    let outcome = tracker.record_evaluation(form.clone()).unwrap();

    let next = outcome.carried_over.expect("goal should be carried over");
    assert_eq!(next.month, Month::Jan);
    assert_eq!(next.year.value(), 2026);
    assert_eq!(next.goal, "Ship v1");

    // A second extension does not duplicate the carried goal.
    let again = tracker.record_evaluation(form).unwrap();
    assert!(again.carried_over.is_none());
    assert_eq!(tracker.goals().unwrap().len(), 2);
}

#[test]
fn extend_is_ignored_once_achieved() {
    let tracker = Tracker::new(MemoryStore::new(), 0);
    let goal = tracker.register_goal(goal_form("Alice", "Ship v1", "2025", "Mar")).unwrap();
    let mut form = evaluation_form(goal.id, "Achieved", 5);
    form.extend = true;
    assert!(tracker.record_evaluation(form).unwrap().carried_over.is_none());
    assert_eq!(tracker.goals().unwrap().len(), 1);
}

#[test]
fn stale_update_is_a_conflict() {
    let shared = Arc::new(MemoryStore::new());
    let first = Tracker::new(CachedStore::new(shared.clone()), 0);
    let second = Tracker::new(CachedStore::new(shared.clone()), 0);

    let goal = first.register_goal(goal_form("Alice", "Ship v1", "2025", "Mar")).unwrap();
    // Both sessions now hold the same version in their caches.
    first.goals().unwrap();
    second.goals().unwrap();

    second
        .update_goal(goal.id, goal_form("Alice", "Ship v1.1", "2025", "Mar"))
        .unwrap();
    let err = first
        .update_goal(goal.id, goal_form("Alice", "Ship v2", "2025", "Mar"))
        .unwrap_err();
    assert!(matches!(err, TrackerError::Store(StoreError::Conflict { .. })));

    // The conflict dropped the stale copy; reloading sees the other write.
    let goals = first.goals().unwrap();
    assert_eq!(goals[0].goal, "Ship v1.1");
    first
        .update_goal(goal.id, goal_form("Alice", "Ship v2", "2025", "Mar"))
        .unwrap();
}

#[test]
fn delete_removes_the_goal_but_keeps_its_history() {
    let tracker = Tracker::new(MemoryStore::new(), 0);
    let goal = tracker.register_goal(goal_form("Alice", "Ship v1", "2025", "Mar")).unwrap();
    tracker.record_evaluation(evaluation_form(goal.id, "Achieved", 4)).unwrap();

    tracker.delete_goal(goal.id).unwrap();
    assert!(tracker.goals().unwrap().is_empty());
    assert!(tracker.reconciled(&ViewFilter::default()).unwrap().is_empty());
    assert_eq!(tracker.evaluations().unwrap().len(), 1);

    let err = tracker.delete_goal(goal.id).unwrap_err();
    assert!(matches!(err, TrackerError::GoalNotFound(_)));
}

#[test]
fn cache_serves_reads_until_a_write() {
    let tracker = Tracker::new(CachedStore::new(MemoryStore::new()), 0);
    tracker.goals().unwrap();
    tracker.goals().unwrap();
    assert_eq!(tracker.store().misses(), 1);
    assert_eq!(tracker.store().hits(), 1);

    tracker.register_goal(goal_form("Alice", "Ship v1", "2025", "Mar")).unwrap();
    assert_eq!(tracker.goals().unwrap().len(), 1);
}

#[test]
fn import_is_all_or_nothing() {
    let tracker = Tracker::new(MemoryStore::new(), 0);
    let bad = "Resource Name,Project,Goal,Year,Month\nAlice,P1,Ship v1,2025,Mar\nBob,P1,Docs,2025,Smarch\n";
    let err = tracker.import_goals_csv(bad).unwrap_err();
    match err {
        TrackerError::Validation(v) => assert!(v.fields[0].message.contains("line 3")),
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(tracker.goals().unwrap().is_empty());

    let good = "Resource Name,Project,Goal,Year,Month\nAlice,P1,Ship v1,2025.0,Mar\nBob,P1,Docs,2025,April\n";
    let goals = tracker.import_goals_csv(good).unwrap();
    assert_eq!(goals.len(), 2);
    assert_eq!(tracker.store().read(Table::MasterList).unwrap().version, 1);
}

#[test]
fn import_errors_name_the_file_line() {
    let tracker = Tracker::new(MemoryStore::new(), 0);
    let text = "Resource Name,Project,Goal,Year,Month\n\nAlice,P1,Ship v1,2025,Mar\n\nBob,P1,Docs,20x5,Apr\n";
    match tracker.import_goals_csv(text).unwrap_err() {
        TrackerError::Validation(v) => {
            assert_eq!(v.fields.len(), 1);
            assert!(v.fields[0].message.ends_with("(line 5)"), "{}", v.fields[0].message);
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

fn header(names: &[&str]) -> Sheet {
    Sheet {
        header: names.iter().map(|n| n.to_string()).collect(),
        rows: Vec::new(),
        version: 0,
    }
}

#[test]
fn writes_follow_a_reordered_header() {
    let store = MemoryStore::new();
    store
        .load_sheet(
            Table::MasterList,
            header(&["Month", "Year", "Goal", "Project", "Resource Name", "Goal ID", "Notes"]),
        )
        .unwrap();
    let tracker = Tracker::new(store, 0);

    let goal = tracker.register_goal(goal_form("Alice", "Ship v1", "2025", "Mar")).unwrap();
    assert_eq!(tracker.goals().unwrap(), vec![goal.clone()]);
    let raw = tracker.store().read(Table::MasterList).unwrap();
    assert_eq!(raw.rows[0][0], "Mar");
    assert_eq!(raw.rows[0][5], goal.id.to_string());

    // Cells in columns the tracker does not own survive an edit.
    let mut rows = raw.rows.clone();
    rows[0][6] = "from the sheet".to_string();
    tracker.store().replace(Table::MasterList, raw.version, rows).unwrap();

    let edited = tracker
        .update_goal(goal.id, goal_form("Alice", "Ship v2", "2025", "Apr"))
        .unwrap();
    assert_eq!(tracker.goals().unwrap(), vec![edited]);
    let raw = tracker.store().read(Table::MasterList).unwrap();
    assert_eq!(raw.rows[0][6], "from the sheet");
    assert_eq!(raw.rows[0][2], "Ship v2");
}

/// Lets the evaluation through, then refuses goal appends once `goals_down`
/// is set.
struct FlakyGoalsStore {
    inner: MemoryStore,
    goals_down: AtomicBool,
}

impl TableStore for FlakyGoalsStore {
    fn read(&self, table: Table) -> Result<Sheet, StoreError> {
        self.inner.read(table)
    }

    fn append(&self, table: Table, expected_version: u64, rows: Vec<Vec<String>>) -> Result<u64, StoreError> {
        if table == Table::MasterList && self.goals_down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("quota exceeded".to_string()));
        }
        self.inner.append(table, expected_version, rows)
    }

    fn replace(&self, table: Table, expected_version: u64, rows: Vec<Vec<String>>) -> Result<u64, StoreError> {
        self.inner.replace(table, expected_version, rows)
    }
}

#[test]
fn failed_carry_over_keeps_the_evaluation() {
    let store = FlakyGoalsStore {
        inner: MemoryStore::new(),
        goals_down: AtomicBool::new(false),
    };
    let tracker = Tracker::new(store, 0);
    let goal = tracker.register_goal(goal_form("Alice", "Ship v1", "2025", "Mar")).unwrap();
    tracker.store().goals_down.store(true, Ordering::SeqCst);

    let mut form = evaluation_form(goal.id, "In Progress", 3);
    form.extend = true;
    let outcome = tracker.record_evaluation(form).unwrap();

    assert!(outcome.carried_over.is_none());
    assert!(outcome.carry_over_error.unwrap().contains("quota exceeded"));
    assert_eq!(tracker.evaluations().unwrap().len(), 1);
    assert_eq!(tracker.goals().unwrap().len(), 1);
}

#[test]
fn no_carry_over_past_december_9999() {
    let tracker = Tracker::new(MemoryStore::new(), 0);
    let goal = tracker.register_goal(goal_form("Alice", "Ship v1", "9999", "Dec")).unwrap();

    let mut form = evaluation_form(goal.id, "Not Completed", 1);
    form.extend = true;
    let outcome = tracker.record_evaluation(form).unwrap();

    assert!(outcome.carried_over.is_none());
    assert!(outcome.carry_over_error.is_some());
    assert_eq!(tracker.goals().unwrap(), vec![goal]);
    assert_eq!(tracker.evaluations().unwrap().len(), 1);
}

#[test]
fn missing_column_is_a_schema_mismatch() {
    let store = MemoryStore::new();
    store
        .load_sheet(
            Table::MasterList,
            Sheet {
                header: vec!["Goal ID".into(), "Resource Name".into(), "Project".into()],
                rows: Vec::new(),
                version: 0,
            },
        )
        .unwrap();
    let tracker = Tracker::new(store, 0);
    let err = tracker.goals().unwrap_err();
    assert!(matches!(err, TrackerError::Store(StoreError::SchemaMismatch { .. })));
}

#[test]
fn unreachable_workbook_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let store = WorkbookStore::open(dir.path().join("db")).unwrap();
    let tracker = Tracker::new(store, 0);
    assert!(tracker.goals().unwrap().is_empty());

    std::fs::remove_dir_all(dir.path().join("db")).unwrap();
    let err = tracker.goals().unwrap_err();
    assert!(matches!(err, TrackerError::Store(StoreError::Unavailable(_))));
}

#[test]
fn workbook_keeps_data_between_sessions() {
    let dir = tempfile::tempdir().unwrap();
    {
        let tracker = Tracker::new(WorkbookStore::open(dir.path()).unwrap(), 0);
        let goal = tracker.register_goal(goal_form("Alice", "Ship v1", "2025", "Mar")).unwrap();
        tracker.record_evaluation(evaluation_form(goal.id, "Achieved", 5)).unwrap();
        tracker
            .record_utilisation(NewUtilisation {
                resource: "Alice".into(),
                project: "P1".into(),
                year: "2025".into(),
                month: "Mar".into(),
                kind: "Billable".into(),
            })
            .unwrap();
    }

    let tracker = Tracker::new(WorkbookStore::open(dir.path()).unwrap(), 0);
    let rows = tracker.reconciled(&ViewFilter::default()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, Status::Achieved);
    assert_eq!(tracker.utilisation_summary().unwrap().billable, 1);
}

/// Wraps a store and fails the first few appends with a conflict, the way a
/// concurrent writer would.
struct RacingStore {
    inner: MemoryStore,
    conflicts_left: AtomicU32,
}

impl TableStore for RacingStore {
    fn read(&self, table: Table) -> Result<Sheet, StoreError> {
        self.inner.read(table)
    }

    fn append(&self, table: Table, expected_version: u64, rows: Vec<Vec<String>>) -> Result<u64, StoreError> {
        if self
            .conflicts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Conflict {
                table,
                expected: expected_version,
                found: expected_version + 1,
            });
        }
        self.inner.append(table, expected_version, rows)
    }

    fn replace(&self, table: Table, expected_version: u64, rows: Vec<Vec<String>>) -> Result<u64, StoreError> {
        self.inner.replace(table, expected_version, rows)
    }
}

#[test]
fn appends_retry_after_losing_a_race() {
    let store = RacingStore {
        inner: MemoryStore::new(),
        conflicts_left: AtomicU32::new(2),
    };
    let tracker = Tracker::new(store, 3);
    tracker.register_goal(goal_form("Alice", "Ship v1", "2025", "Mar")).unwrap();
    assert_eq!(tracker.goals().unwrap().len(), 1);

    let store = RacingStore {
        inner: MemoryStore::new(),
        conflicts_left: AtomicU32::new(5),
    };
    let tracker = Tracker::new(store, 1);
    let err = tracker
        .register_goal(goal_form("Alice", "Ship v1", "2025", "Mar"))
        .unwrap_err();
    assert!(matches!(err, TrackerError::Store(StoreError::Conflict { .. })));
}
