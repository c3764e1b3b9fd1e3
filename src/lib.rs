/*!
# Performance Tracker

Monthly goal tracking for delivery teams, kept in a small workbook of
append-mostly tabs.

## Overview

Managers register goals for each resource (person), per project, for a
target month. At month end every goal is evaluated with a status, a 0-5
star rating and comments. Re-evaluating a goal appends a new entry; the most
recent evaluation is the current one. Resources also declare each month as
billable or non-billable.

## Architecture

### Storage Layer
- **store**: the three workbook tabs (`Master_List`, `Performance_Log`,
  `Utilisation_Log`) behind the [`TableStore`] trait, with versioned
  optimistic writes. [`WorkbookStore`] keeps them on disk as gzip-compressed
  bincode; [`MemoryStore`] is for tests and tooling.
- **cache**: [`CachedStore`], an explicit read-through cache dropped on every
  write attempt.
- **codec**: header-driven mapping between raw rows and typed records.

### Domain Layer
- **model**: goals, evaluations, utilisation entries and their validated forms
- **reconcile**: pairs each goal with its latest evaluation
- **report**: summary, leaderboard, status distribution and monthly trend
- **tracker**: [`Tracker`], the operations the front ends call

### Interfaces
- **loader**: CSV goal import
- **downloader**: CSV and XLSX export
- **graph**: PNG charts (web feature)
- **app**: HTTP API and single-page front end (web feature)
- **config**: TOML configuration

## REST API Endpoints

- `/api/goals` - Register and list goals; `/api/goals/{id}` to edit or delete
- `/api/evaluations` - Record and list evaluations
- `/api/view` - Reconciled goal view with filters
- `/api/analytics/summary`, `leaderboard`, `distribution`, `trend` - Aggregates
- `/api/utilisation` - Billable month declarations
- `/api/charts/status.png`, `leaderboard.png`, `trend.png` - Charts
- `/api/export/view.csv`, `view.xlsx`, `evaluations.csv`, `evaluations.xlsx` - Downloads

## Example

```
use perftrack::{CachedStore, MemoryStore, NewGoal, Tracker, ViewFilter};

let tracker = Tracker::new(CachedStore::new(MemoryStore::new()), 3);
tracker
    .register_goal(NewGoal {
        resource: "Alice".into(),
        project: "P1".into(),
        goal: "Ship v1".into(),
        year: "2025".into(),
        month: "Mar".into(),
    })
    .unwrap();

let view = tracker.reconciled(&ViewFilter::default()).unwrap();
assert_eq!(view[0].status.to_string(), "Pending");
```
*/

pub mod cache;
pub mod codec;
pub mod config;
pub mod downloader;
pub mod loader;
pub mod model;
pub mod reconcile;
pub mod report;
pub mod store;
pub mod tracker;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod graph;

pub use cache::CachedStore;
pub use config::{Config, ConfigError};
pub use model::{
    Evaluation, Goal, GoalId, Month, NewEvaluation, NewGoal, NewUtilisation, Rating, Status, Utilisation,
    UtilisationKind, ValidationError, Year,
};
pub use reconcile::{HistoryFilter, ReconciledGoal, ViewFilter};
pub use store::{MemoryStore, Sheet, StoreError, Table, TableStore, WorkbookStore};
pub use tracker::{EvaluationOutcome, Tracker, TrackerError, TrackerResult};
