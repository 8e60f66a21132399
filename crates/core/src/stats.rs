//! Aggregation views over owner-scoped collections.
//!
//! Every computation takes an explicit reference `now` so windowed counts stay
//! deterministic under test. Callers are responsible for scoping the input to
//! a single principal before aggregating.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::types::{ApplicationStatus, Reminder};

/// Window for "recent activity" counts.
pub const RECENT_WINDOW_DAYS: i64 = 30;
/// Window for "upcoming" reminders and stages.
pub const UPCOMING_WINDOW_DAYS: i64 = 7;
/// Number of companies reported by the top-companies grouping.
pub const TOP_COMPANIES_LIMIT: usize = 5;

/// The slice of an application the aggregator reads.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationFacts {
    pub status: ApplicationStatus,
    pub priority: i64,
    pub created_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
    pub company: String,
}

/// Counts of recently created and recently submitted applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecentActivity {
    pub new_applications: u64,
    pub applications_submitted: u64,
}

/// Priority buckets partitioning the scoped collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriorityCounts {
    pub high: u64,
    pub medium: u64,
    pub low: u64,
}

/// One entry of the top-companies grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompanyCount {
    pub company: String,
    pub count: u64,
}

/// Full stats view over a scoped application collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationStats {
    pub total: u64,
    pub status_counts: BTreeMap<ApplicationStatus, u64>,
    pub recent_activity: RecentActivity,
    pub priority_counts: PriorityCounts,
    pub top_companies: Vec<CompanyCount>,
}

/// Stats view over a scoped reminder collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReminderStats {
    pub total: u64,
    pub completed: u64,
    pub overdue: u64,
    pub upcoming: u64,
    pub pending: u64,
}

/// Status histogram restricted to statuses actually present.
///
/// Unlike [`application_stats`], absent statuses are omitted rather than
/// reported as zero.
pub fn dashboard(applications: &[ApplicationFacts]) -> BTreeMap<ApplicationStatus, u64> {
    let mut counts = BTreeMap::new();
    for app in applications {
        *counts.entry(app.status).or_insert(0) += 1;
    }
    counts
}

/// Computes the stats view relative to the supplied `now`.
pub fn application_stats(applications: &[ApplicationFacts], now: DateTime<Utc>) -> ApplicationStats {
    let mut status_counts: BTreeMap<ApplicationStatus, u64> = ApplicationStatus::ALL
        .into_iter()
        .map(|status| (status, 0))
        .collect();
    for app in applications {
        if let Some(count) = status_counts.get_mut(&app.status) {
            *count += 1;
        }
    }

    let recent_cutoff = now - Duration::days(RECENT_WINDOW_DAYS);
    let new_applications = applications
        .iter()
        .filter(|app| app.created_at >= recent_cutoff)
        .count() as u64;
    let applications_submitted = applications
        .iter()
        .filter(|app| app.applied_at.is_some_and(|at| at >= recent_cutoff))
        .count() as u64;

    // The three predicates partition the priority axis exactly.
    let high = applications.iter().filter(|app| app.priority >= 3).count() as u64;
    let medium = applications.iter().filter(|app| app.priority == 2).count() as u64;
    let low = applications.iter().filter(|app| app.priority < 2).count() as u64;

    ApplicationStats {
        total: applications.len() as u64,
        status_counts,
        recent_activity: RecentActivity {
            new_applications,
            applications_submitted,
        },
        priority_counts: PriorityCounts { high, medium, low },
        top_companies: top_companies(applications),
    }
}

/// Top companies by application count, descending.
///
/// Ties keep first-seen input order; the grouping never reports more than
/// [`TOP_COMPANIES_LIMIT`] entries.
fn top_companies(applications: &[ApplicationFacts]) -> Vec<CompanyCount> {
    let mut order: HashMap<&str, usize> = HashMap::new();
    let mut grouped: Vec<CompanyCount> = Vec::new();
    for app in applications {
        match order.get(app.company.as_str()) {
            Some(&idx) => grouped[idx].count += 1,
            None => {
                order.insert(app.company.as_str(), grouped.len());
                grouped.push(CompanyCount {
                    company: app.company.clone(),
                    count: 1,
                });
            }
        }
    }
    // Stable sort keeps first-seen order among equal counts.
    grouped.sort_by(|a, b| b.count.cmp(&a.count));
    grouped.truncate(TOP_COMPANIES_LIMIT);
    grouped
}

/// Computes reminder stats relative to the supplied `now`.
///
/// `overdue` and `upcoming` are disjoint subsets of `pending`; a pending
/// reminder due beyond the upcoming window is counted in neither.
pub fn reminder_stats(reminders: &[Reminder], now: DateTime<Utc>) -> ReminderStats {
    let total = reminders.len() as u64;
    let completed = reminders.iter().filter(|r| r.done).count() as u64;
    let overdue = reminders
        .iter()
        .filter(|r| !r.done && r.due_at < now)
        .count() as u64;
    let window_end = now + Duration::days(UPCOMING_WINDOW_DAYS);
    let upcoming = reminders
        .iter()
        .filter(|r| !r.done && r.due_at >= now && r.due_at <= window_end)
        .count() as u64;

    ReminderStats {
        total,
        completed,
        overdue,
        upcoming,
        pending: total - completed,
    }
}
