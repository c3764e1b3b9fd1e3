//! Aggregate reports over the reconciled view. Everything here is a pure
//! function of its input and returns results in a fixed order.

use crate::model::{Month, Status, Utilisation, UtilisationKind, Year};
use crate::reconcile::{ReconciledGoal, latest_by_key};
use serde::Serialize;
use std::collections::BTreeMap;

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// `part / whole` as a percentage with one decimal place; 0 for an empty whole.
pub fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round_to(part as f64 * 100.0 / whole as f64, 1)
}

fn mean(total: u64, count: usize) -> f64 {
    if count == 0 {
        return 0.0;
    }
    round_to(total as f64 / count as f64, 2)
}

/// Share of goals whose current status is Achieved
pub fn achievement_rate(rows: &[ReconciledGoal]) -> f64 {
    let achieved = rows.iter().filter(|r| r.status == Status::Achieved).count();
    percentage(achieved, rows.len())
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Summary {
    pub goals: usize,
    pub evaluated: usize,
    pub pending: usize,
    pub achieved: usize,
    pub achievement_rate: f64,
    /// Mean over evaluated goals only
    pub mean_rating: f64,
    pub recommended: usize,
}

pub fn summary(rows: &[ReconciledGoal]) -> Summary {
    let evaluated: Vec<&ReconciledGoal> = rows.iter().filter(|r| r.status.is_evaluated()).collect();
    let stars: u64 = evaluated.iter().map(|r| u64::from(r.rating.stars())).sum();

    Summary {
        goals: rows.len(),
        evaluated: evaluated.len(),
        pending: rows.len() - evaluated.len(),
        achieved: rows.iter().filter(|r| r.status == Status::Achieved).count(),
        achievement_rate: achievement_rate(rows),
        mean_rating: mean(stars, evaluated.len()),
        recommended: evaluated.iter().filter(|r| r.recommended).count(),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub resource: String,
    pub mean_rating: f64,
    pub evaluated: usize,
    pub goals: usize,
    pub achieved: usize,
}

/// Resources ranked by mean rating of their evaluated goals.
///
/// Pending goals do not count against a resource; resources with nothing
/// evaluated yet are left off the board. Ties order by resource name.
pub fn leaderboard(rows: &[ReconciledGoal], top_n: usize) -> Vec<LeaderboardEntry> {
    #[derive(Default)]
    struct Tally {
        stars: u64,
        evaluated: usize,
        goals: usize,
        achieved: usize,
    }

    let mut tallies: BTreeMap<&str, Tally> = BTreeMap::new();
    for row in rows {
        let tally = tallies.entry(row.resource.as_str()).or_default();
        tally.goals += 1;
        if row.status.is_evaluated() {
            tally.evaluated += 1;
            tally.stars += u64::from(row.rating.stars());
        }
        if row.status == Status::Achieved {
            tally.achieved += 1;
        }
    }

    let mut board: Vec<LeaderboardEntry> = tallies
        .into_iter()
        .filter(|(_, t)| t.evaluated > 0)
        .map(|(resource, t)| LeaderboardEntry {
            resource: resource.to_string(),
            mean_rating: mean(t.stars, t.evaluated),
            evaluated: t.evaluated,
            goals: t.goals,
            achieved: t.achieved,
        })
        .collect();

    board.sort_by(|a, b| {
        b.mean_rating
            .total_cmp(&a.mean_rating)
            .then_with(|| a.resource.cmp(&b.resource))
    });
    board.truncate(top_n);
    board
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub status: Status,
    pub count: usize,
}

/// Goal count per status, in [`Status::ALL`] order, empty buckets omitted.
pub fn status_distribution(rows: &[ReconciledGoal]) -> Vec<StatusCount> {
    Status::ALL
        .iter()
        .map(|&status| StatusCount {
            status,
            count: rows.iter().filter(|r| r.status == status).count(),
        })
        .filter(|c| c.count > 0)
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrendPoint {
    pub year: Year,
    pub month: Month,
    pub label: String,
    pub goals: usize,
    pub achieved: usize,
    pub achievement_rate: f64,
}

/// Achievement per target month, in calendar order.
pub fn monthly_trend(rows: &[ReconciledGoal]) -> Vec<TrendPoint> {
    let mut buckets: BTreeMap<(Year, Month), (usize, usize)> = BTreeMap::new();
    for row in rows {
        let bucket = buckets.entry((row.year, row.month)).or_default();
        bucket.0 += 1;
        if row.status == Status::Achieved {
            bucket.1 += 1;
        }
    }

    buckets
        .into_iter()
        .map(|((year, month), (goals, achieved))| TrendPoint {
            year,
            month,
            label: format!("{} {}", month, year),
            goals,
            achieved,
            achievement_rate: percentage(achieved, goals),
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResourceUtilisation {
    pub resource: String,
    pub billable: usize,
    pub non_billable: usize,
    pub billable_rate: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UtilisationSummary {
    /// Resource months counted (one per resource, year and month)
    pub months: usize,
    pub billable: usize,
    pub non_billable: usize,
    pub billable_rate: f64,
    pub by_resource: Vec<ResourceUtilisation>,
}

/// Billable share across resource months. A month declared more than once
/// counts only its latest declaration.
pub fn utilisation_summary(entries: &[Utilisation]) -> UtilisationSummary {
    let latest = latest_by_key(
        entries,
        |e| (e.resource.clone(), e.year, e.month),
        |e| e.timestamp,
    );

    let mut per_resource: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for entry in latest.values() {
        let counts = per_resource.entry(entry.resource.as_str()).or_default();
        match entry.kind {
            UtilisationKind::Billable => counts.0 += 1,
            UtilisationKind::NonBillable => counts.1 += 1,
        }
    }

    let by_resource: Vec<ResourceUtilisation> = per_resource
        .into_iter()
        .map(|(resource, (billable, non_billable))| ResourceUtilisation {
            resource: resource.to_string(),
            billable,
            non_billable,
            billable_rate: percentage(billable, billable + non_billable),
        })
        .collect();

    let billable = by_resource.iter().map(|r| r.billable).sum();
    let non_billable = by_resource.iter().map(|r| r.non_billable).sum();
    UtilisationSummary {
        months: latest.len(),
        billable,
        non_billable,
        billable_rate: percentage(billable, billable + non_billable),
        by_resource,
    }
}
