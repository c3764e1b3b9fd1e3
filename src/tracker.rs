use crate::codec;
use crate::loader::{self, ImportedGoal};
use crate::model::{
    Evaluation, FieldError, Goal, GoalId, NewEvaluation, NewGoal, NewUtilisation, Status, Utilisation,
    ValidationError,
};
use crate::reconcile::{self, HistoryFilter, ReconciledGoal, ViewFilter};
use crate::report::{self, LeaderboardEntry, StatusCount, Summary, TrendPoint, UtilisationSummary};
use crate::store::{StoreError, Table, TableStore};
use chrono::{Local, NaiveDateTime, Timelike};
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeSet;

/// Errors surfaced by tracker operations
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("goal {0} not found")]
    GoalNotFound(GoalId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type TrackerResult<T> = Result<T, TrackerError>;

/// Result of recording an evaluation
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EvaluationOutcome {
    pub evaluation: Evaluation,
    /// Goal registered for the following month when an unachieved goal was extended
    pub carried_over: Option<Goal>,
    /// Why the extension failed; the evaluation itself is saved regardless
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carry_over_error: Option<String>,
}

type Clock = Box<dyn Fn() -> NaiveDateTime + Send + Sync>;

fn local_now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

/// Goal tracking operations on top of a [`TableStore`].
///
/// Every read goes to the store (put a [`crate::cache::CachedStore`] in
/// front of it to avoid refetching), and every derived view is recomputed
/// from the tabs it reads.
pub struct Tracker<S> {
    store: S,
    append_retries: u32,
    clock: Clock,
}

impl<S: TableStore> Tracker<S> {
    pub fn new(store: S, append_retries: u32) -> Self {
        Tracker {
            store,
            append_retries,
            clock: Box::new(local_now),
        }
    }

    /// Replaces the clock used to stamp evaluations and utilisation entries.
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDateTime + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // Appends commute, so a conflict only means the version moved; re-read
    // it and try again. Rows come in `table.header()` order and are laid out
    // against the header read on each attempt.
    fn append_rows(&self, table: Table, rows: &[Vec<String>]) -> TrackerResult<u64> {
        let mut attempt = 0;
        loop {
            let sheet = self.store.read(table)?;
            let placed = rows
                .iter()
                .map(|row| codec::place_row(table, &sheet, row.clone(), None))
                .collect::<Result<Vec<_>, _>>()?;
            match self.store.append(table, sheet.version, placed) {
                Ok(version) => return Ok(version),
                Err(StoreError::Conflict { found, .. }) if attempt < self.append_retries => {
                    attempt += 1;
                    warn!(
                        "{} moved to version {} during append, retrying ({}/{})",
                        table, found, attempt, self.append_retries
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub fn goals(&self) -> TrackerResult<Vec<Goal>> {
        Ok(codec::decode_goals(&self.store.read(Table::MasterList)?)?)
    }

    pub fn goal(&self, id: GoalId) -> TrackerResult<Goal> {
        self.goals()?
            .into_iter()
            .find(|g| g.id == id)
            .ok_or(TrackerError::GoalNotFound(id))
    }

    pub fn evaluations(&self) -> TrackerResult<Vec<Evaluation>> {
        Ok(codec::decode_evaluations(&self.store.read(Table::PerformanceLog)?)?)
    }

    pub fn utilisation(&self) -> TrackerResult<Vec<Utilisation>> {
        Ok(codec::decode_utilisation(&self.store.read(Table::UtilisationLog)?)?)
    }

    /// Distinct projects, sorted
    pub fn projects(&self) -> TrackerResult<Vec<String>> {
        let projects: BTreeSet<String> = self.goals()?.into_iter().map(|g| g.project).collect();
        Ok(projects.into_iter().collect())
    }

    /// Distinct resources, optionally limited to one project, sorted
    pub fn resources(&self, project: Option<&str>) -> TrackerResult<Vec<String>> {
        let project = project.map(str::trim).filter(|p| !p.is_empty());
        let resources: BTreeSet<String> = self
            .goals()?
            .into_iter()
            .filter(|g| project.is_none_or(|p| p == g.project))
            .map(|g| g.resource)
            .collect();
        Ok(resources.into_iter().collect())
    }

    /// Register a new goal in `Master_List`
    ///
    /// # Arguments
    /// * `form` - Raw goal fields as entered; validated before anything is written
    ///
    /// # Returns
    /// * `TrackerResult<Goal>` - The stored goal with its new id, a validation
    ///   error naming every bad field, or the store error that stopped the write
    ///
    /// # Examples
    /// ```
    /// use perftrack::{MemoryStore, NewGoal, Tracker};
    ///
    /// let tracker = Tracker::new(MemoryStore::new(), 3);
    /// let goal = tracker
    ///     .register_goal(NewGoal {
    ///         resource: "Alice".into(),
    ///         project: "P1".into(),
    ///         goal: "Ship v1".into(),
    ///         year: "2025".into(),
    ///         month: "3".into(),
    ///     })
    ///     .unwrap();
    /// assert_eq!(goal.month.to_string(), "Mar");
    /// assert_eq!(tracker.goals().unwrap(), vec![goal]);
    /// ```
    pub fn register_goal(&self, form: NewGoal) -> TrackerResult<Goal> {
        let goal = form.into_goal(GoalId::new())?;
        self.append_rows(Table::MasterList, &[codec::encode_goal(&goal)])?;
        info!(
            "Registered goal {} for {} ({} {} {})",
            goal.id, goal.resource, goal.project, goal.month, goal.year
        );
        Ok(goal)
    }

    /// Rewrites one goal in place. Fails with a conflict if the tab changed
    /// since it was read.
    ///
    /// # Arguments
    /// * `id` - Goal to edit
    /// * `form` - Replacement fields; cells in columns the tracker does not
    ///   know about are kept
    ///
    /// # Returns
    /// * `TrackerResult<Goal>` - The goal as stored, `GoalNotFound`, a
    ///   validation error, or a `Conflict` when another writer got there first
    pub fn update_goal(&self, id: GoalId, form: NewGoal) -> TrackerResult<Goal> {
        let sheet = self.store.read(Table::MasterList)?;
        let index = codec::find_goal_row(&sheet, id)?.ok_or(TrackerError::GoalNotFound(id))?;
        let goal = form.into_goal(id)?;

        let row = codec::place_row(
            Table::MasterList,
            &sheet,
            codec::encode_goal(&goal),
            Some(sheet.rows[index].as_slice()),
        )?;
        let mut rows = sheet.rows;
        rows[index] = row;
        self.store.replace(Table::MasterList, sheet.version, rows)?;
        info!("Updated goal {}", id);
        Ok(goal)
    }

    /// Removes one goal. Evaluations already recorded stay in the log.
    ///
    /// # Arguments
    /// * `id` - Goal to remove
    ///
    /// # Returns
    /// * `TrackerResult<Goal>` - The removed goal, `GoalNotFound`, or a
    ///   `Conflict` when the tab changed since it was read
    pub fn delete_goal(&self, id: GoalId) -> TrackerResult<Goal> {
        let sheet = self.store.read(Table::MasterList)?;
        let goal = codec::decode_goals(&sheet)?
            .into_iter()
            .find(|g| g.id == id)
            .ok_or(TrackerError::GoalNotFound(id))?;
        let index = codec::find_goal_row(&sheet, id)?.ok_or(TrackerError::GoalNotFound(id))?;

        let mut rows = sheet.rows;
        rows.remove(index);
        self.store.replace(Table::MasterList, sheet.version, rows)?;
        info!("Deleted goal {}", id);
        Ok(goal)
    }

    /// Registers every goal in a CSV import, or none of them if any row is
    /// invalid.
    ///
    /// # Arguments
    /// * `text` - CSV with a header row naming `Resource Name`, `Project`,
    ///   `Goal`, `Year` and `Month`
    ///
    /// # Returns
    /// * `TrackerResult<Vec<Goal>>` - The registered goals in file order, or a
    ///   validation error whose messages name the offending file lines
    ///
    /// # Examples
    /// ```
    /// use perftrack::{MemoryStore, Tracker, TrackerError};
    ///
    /// let tracker = Tracker::new(MemoryStore::new(), 3);
    /// let bad = "Resource Name,Project,Goal,Year,Month\nAlice,P1,Ship v1,2025,Smarch\n";
    /// match tracker.import_goals_csv(bad) {
    ///     Err(TrackerError::Validation(err)) => assert!(err.fields[0].message.contains("line 2")),
    ///     other => panic!("expected a validation error, got {:?}", other),
    /// }
    /// assert!(tracker.goals().unwrap().is_empty());
    /// ```
    pub fn import_goals_csv(&self, text: &str) -> TrackerResult<Vec<Goal>> {
        let imported = loader::goals_from_csv(text)?;

        let mut goals = Vec::with_capacity(imported.len());
        let mut problems = Vec::new();
        for ImportedGoal { line, form } in imported {
            match form.into_goal(GoalId::new()) {
                Ok(goal) => goals.push(goal),
                Err(err) => problems.extend(err.fields.into_iter().map(|f| FieldError {
                    field: f.field,
                    message: format!("{} (line {})", f.message, line),
                })),
            }
        }
        if !problems.is_empty() {
            return Err(ValidationError { fields: problems }.into());
        }
        if goals.is_empty() {
            return Ok(goals);
        }

        let rows: Vec<Vec<String>> = goals.iter().map(codec::encode_goal).collect();
        self.append_rows(Table::MasterList, &rows)?;
        info!("Imported {} goal(s)", goals.len());
        Ok(goals)
    }

    /// Appends an evaluation. Re-evaluating a goal appends again; the latest
    /// evaluation is the current one.
    ///
    /// With `extend` set on an evaluation that is not Achieved, the goal is
    /// also registered for the following month. A failed extension does not
    /// undo the evaluation; it is reported in
    /// [`EvaluationOutcome::carry_over_error`].
    ///
    /// # Arguments
    /// * `form` - Raw evaluation fields, including the id of the goal evaluated
    ///
    /// # Returns
    /// * `TrackerResult<EvaluationOutcome>` - The stored evaluation and any
    ///   carried-over goal, or the error that kept the evaluation from being saved
    ///
    /// # Examples
    /// ```
    /// use perftrack::{MemoryStore, NewEvaluation, NewGoal, Tracker};
    ///
    /// let tracker = Tracker::new(MemoryStore::new(), 3);
    /// let goal = tracker
    ///     .register_goal(NewGoal {
    ///         resource: "Alice".into(),
    ///         project: "P1".into(),
    ///         goal: "Ship v1".into(),
    ///         year: "2025".into(),
    ///         month: "Dec".into(),
    ///     })
    ///     .unwrap();
    /// let outcome = tracker
    ///     .record_evaluation(NewEvaluation {
    ///         goal_id: goal.id.to_string(),
    ///         status: "In Progress".into(),
    ///         rating: 3,
    ///         comments: "halfway".into(),
    ///         extend: true,
    ///         ..Default::default()
    ///     })
    ///     .unwrap();
    /// let next = outcome.carried_over.unwrap();
    /// assert_eq!(next.month.to_string(), "Jan");
    /// assert_eq!(next.year.to_string(), "2026");
    /// ```
    pub fn record_evaluation(&self, form: NewEvaluation) -> TrackerResult<EvaluationOutcome> {
        let input = form.check()?;
        let goal = self.goal(input.goal_id)?;
        let extend = input.extend;

        let evaluation = input.into_evaluation(&goal, (self.clock)());
        self.append_rows(Table::PerformanceLog, &[codec::encode_evaluation(&evaluation)])?;
        info!(
            "Recorded {} ({}/5) for goal {} of {}",
            evaluation.status,
            evaluation.rating,
            goal.id,
            goal.resource
        );

        let mut outcome = EvaluationOutcome {
            evaluation,
            carried_over: None,
            carry_over_error: None,
        };
        if extend && outcome.evaluation.status != Status::Achieved {
            match self.carry_over(&goal) {
                Ok(next) => outcome.carried_over = next,
                Err(err) => {
                    warn!("Evaluation of goal {} saved but not carried over: {}", goal.id, err);
                    outcome.carry_over_error = Some(err.to_string());
                }
            }
        }
        Ok(outcome)
    }

    // Registers the same goal for the following month unless it is already
    // there.
    fn carry_over(&self, goal: &Goal) -> TrackerResult<Option<Goal>> {
        let (month, rolled) = goal.month.succ();
        let year = if rolled {
            goal.year
                .succ()
                .ok_or_else(|| ValidationError::single("extend", "no month follows Dec 9999"))?
        } else {
            goal.year
        };

        let exists = self.goals()?.iter().any(|g| {
            g.resource == goal.resource
                && g.project == goal.project
                && g.goal == goal.goal
                && g.year == year
                && g.month == month
        });
        if exists {
            return Ok(None);
        }

        let next = self.register_goal(NewGoal {
            year: year.to_string(),
            month: month.to_string(),
            ..NewGoal::from(goal)
        })?;
        Ok(Some(next))
    }

    /// Append a billable or non-billable month declaration
    ///
    /// # Arguments
    /// * `form` - Raw declaration fields
    ///
    /// # Returns
    /// * `TrackerResult<Utilisation>` - The stored entry stamped with the
    ///   tracker's clock, or the validation or store error
    pub fn record_utilisation(&self, form: NewUtilisation) -> TrackerResult<Utilisation> {
        let entry = form.into_utilisation((self.clock)())?;
        self.append_rows(Table::UtilisationLog, &[codec::encode_utilisation(&entry)])?;
        info!(
            "Recorded {} month for {} ({} {})",
            entry.kind, entry.resource, entry.month, entry.year
        );
        Ok(entry)
    }

    /// The reconciled goal view, narrowed by `filter`
    pub fn reconciled(&self, filter: &ViewFilter) -> TrackerResult<Vec<ReconciledGoal>> {
        let goals = self.goals()?;
        let evaluations = self.evaluations()?;
        Ok(filter.apply(reconcile::reconcile(&goals, &evaluations)))
    }

    pub fn history(&self, filter: &HistoryFilter) -> TrackerResult<Vec<Evaluation>> {
        Ok(reconcile::history(self.evaluations()?, filter))
    }

    pub fn summary(&self, filter: &ViewFilter) -> TrackerResult<Summary> {
        Ok(report::summary(&self.reconciled(filter)?))
    }

    pub fn leaderboard(&self, filter: &ViewFilter, top_n: usize) -> TrackerResult<Vec<LeaderboardEntry>> {
        Ok(report::leaderboard(&self.reconciled(filter)?, top_n))
    }

    pub fn status_distribution(&self, filter: &ViewFilter) -> TrackerResult<Vec<StatusCount>> {
        Ok(report::status_distribution(&self.reconciled(filter)?))
    }

    pub fn monthly_trend(&self, filter: &ViewFilter) -> TrackerResult<Vec<TrendPoint>> {
        Ok(report::monthly_trend(&self.reconciled(filter)?))
    }

    pub fn utilisation_summary(&self) -> TrackerResult<UtilisationSummary> {
        Ok(report::utilisation_summary(&self.utilisation()?))
    }
}
