use crate::model::{Evaluation, Goal, GoalId, Month, Rating, Status, Year, timestamp_format};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::hash::Hash;

/// Keeps the latest row per key.
///
/// Rows are compared on their parsed timestamp. When two rows for the same
/// key carry the same timestamp, the one inserted later wins.
pub fn latest_by_key<'a, T, K>(
    rows: &'a [T],
    key: impl Fn(&T) -> K,
    timestamp: impl Fn(&T) -> NaiveDateTime,
) -> HashMap<K, &'a T>
where
    K: Eq + Hash,
{
    let mut latest: HashMap<K, &'a T> = HashMap::new();
    for row in rows {
        match latest.entry(key(row)) {
            Entry::Occupied(mut slot) => {
                if timestamp(row) >= timestamp(slot.get()) {
                    slot.insert(row);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(row);
            }
        }
    }
    latest
}

/// A goal joined with its current evaluation
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReconciledGoal {
    pub goal_id: GoalId,
    pub resource: String,
    pub project: String,
    pub goal: String,
    pub year: Year,
    pub month: Month,
    pub status: Status,
    pub rating: Rating,
    pub comments: String,
    pub recommended: bool,
    pub completion_pct: Option<u8>,
    pub revised_date: Option<NaiveDate>,
    #[serde(with = "timestamp_format::option")]
    pub evaluated_at: Option<NaiveDateTime>,
    /// How many evaluations have been recorded against the goal
    pub evaluation_count: usize,
}

impl ReconciledGoal {
    fn pending(goal: &Goal) -> Self {
        ReconciledGoal {
            goal_id: goal.id,
            resource: goal.resource.clone(),
            project: goal.project.clone(),
            goal: goal.goal.clone(),
            year: goal.year,
            month: goal.month,
            status: Status::Pending,
            rating: Rating::default(),
            comments: String::new(),
            recommended: false,
            completion_pct: None,
            revised_date: None,
            evaluated_at: None,
            evaluation_count: 0,
        }
    }

    fn evaluated(goal: &Goal, latest: &Evaluation, count: usize) -> Self {
        ReconciledGoal {
            status: latest.status,
            rating: latest.rating,
            comments: latest.comments.clone(),
            recommended: latest.recommended,
            completion_pct: latest.completion_pct,
            revised_date: latest.revised_date,
            evaluated_at: Some(latest.timestamp),
            evaluation_count: count,
            ..Self::pending(goal)
        }
    }
}

/// Builds the reconciled view: one row per goal, in goal order, carrying the
/// latest evaluation recorded against that goal or `Pending` if none was.
pub fn reconcile(goals: &[Goal], evaluations: &[Evaluation]) -> Vec<ReconciledGoal> {
    if evaluations.is_empty() {
        return goals.iter().map(ReconciledGoal::pending).collect();
    }

    let latest = latest_by_key(evaluations, |e| e.goal_id, |e| e.timestamp);
    let mut counts: HashMap<GoalId, usize> = HashMap::new();
    for eval in evaluations {
        *counts.entry(eval.goal_id).or_default() += 1;
    }

    goals
        .iter()
        .map(|goal| match latest.get(&goal.id) {
            Some(eval) => {
                let count = counts.get(&goal.id).copied().unwrap_or(1);
                ReconciledGoal::evaluated(goal, eval, count)
            }
            None => ReconciledGoal::pending(goal),
        })
        .collect()
}

/// Optional narrowing of the reconciled view. Unset or blank fields match
/// everything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewFilter {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub year: Option<Year>,
    #[serde(default)]
    pub month: Option<Month>,
    #[serde(default)]
    pub status: Option<Status>,
}

fn text_matches(wanted: &Option<String>, actual: &str) -> bool {
    match wanted.as_deref().map(str::trim) {
        Some(wanted) if !wanted.is_empty() => wanted == actual,
        _ => true,
    }
}

impl ViewFilter {
    pub fn matches(&self, row: &ReconciledGoal) -> bool {
        text_matches(&self.project, &row.project)
            && text_matches(&self.resource, &row.resource)
            && self.year.is_none_or(|y| y == row.year)
            && self.month.is_none_or(|m| m == row.month)
            && self.status.is_none_or(|s| s == row.status)
    }

    pub fn apply(&self, rows: Vec<ReconciledGoal>) -> Vec<ReconciledGoal> {
        rows.into_iter().filter(|row| self.matches(row)).collect()
    }
}

/// Narrowing of the evaluation history
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryFilter {
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub goal_id: Option<GoalId>,
}

impl HistoryFilter {
    pub fn matches(&self, eval: &Evaluation) -> bool {
        text_matches(&self.resource, &eval.resource) && self.goal_id.is_none_or(|id| id == eval.goal_id)
    }
}

/// Evaluations newest first. Equal timestamps list the later entry first.
pub fn history(evaluations: Vec<Evaluation>, filter: &HistoryFilter) -> Vec<Evaluation> {
    let mut rows: Vec<Evaluation> = evaluations.into_iter().filter(|e| filter.matches(e)).collect();
    rows.reverse();
    rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    rows
}
