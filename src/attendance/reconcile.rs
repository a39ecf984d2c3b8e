//! Attendance reconciliation.
//!
//! Three sources feed the numbers shown for a student: the records actually
//! marked, an entered total-sessions figure, and entered present/late/absent
//! counts. Resolution runs in a fixed order:
//!
//! 1. total: entered total, else `max(actual, default)` when anything was
//!    recorded, else `default`;
//! 2. counts: entered counts, else the recorded tallies;
//! 3. with entered counts, absent is the remainder `total - present - late`
//!    (floored at zero) unless the caller is applying a direct absent edit;
//! 4. total is raised to at least `present + late + absent`;
//! 5. percentage of `present + late` over total, one decimal.

use serde::Serialize;

/// Counts derived from marked attendance records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActualTally {
    pub total: i64,
    pub present: i64,
    pub late: i64,
    pub absent: i64,
    pub excused: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomCounts {
    pub present: i64,
    pub late: i64,
    pub absent: i64,
}

impl CustomCounts {
    /// Seed used the first time counts are entered for a student.
    pub fn seeded_from(actual: &ActualTally) -> Self {
        Self {
            present: actual.present,
            late: actual.late,
            absent: actual.absent,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sources {
    pub actual: ActualTally,
    pub custom_total: Option<i64>,
    pub custom_counts: Option<CustomCounts>,
}

/// How the stored absent count is treated in step 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsentSource {
    /// Absent is recomputed from the total.
    Derived,
    /// An absent edit is being applied; the stored value stands.
    Explicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciled {
    pub total_sessions: i64,
    pub present_count: i64,
    pub late_count: i64,
    pub absent_count: i64,
    pub attendance_percentage: f64,
    pub has_custom_attendance: bool,
    pub has_custom_total: bool,
}

pub fn resolve_total(actual: &ActualTally, custom_total: Option<i64>, default_total: i64) -> i64 {
    custom_total
        .or_else(|| (actual.total > 0).then(|| actual.total.max(default_total)))
        .unwrap_or(default_total)
}

pub fn resolve_counts(actual: &ActualTally, custom: Option<CustomCounts>) -> CustomCounts {
    custom.unwrap_or_else(|| CustomCounts::seeded_from(actual))
}

pub fn derived_absent(total: i64, present: i64, late: i64) -> i64 {
    total.saturating_sub(present).saturating_sub(late).max(0)
}

/// `(present + late) / total` as a percentage with one decimal; 0 for an
/// empty total.
pub fn attendance_percentage(present: i64, late: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    round_1_decimal(present.saturating_add(late) as f64 / total as f64 * 100.0)
}

pub fn round_1_decimal(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

pub fn reconcile(sources: &Sources, default_total: i64, absent: AbsentSource) -> Reconciled {
    let total = resolve_total(&sources.actual, sources.custom_total, default_total);
    let mut counts = resolve_counts(&sources.actual, sources.custom_counts);

    if sources.custom_counts.is_some() && absent == AbsentSource::Derived {
        counts.absent = derived_absent(total, counts.present, counts.late);
    }

    let total = total.max(
        counts
            .present
            .saturating_add(counts.late)
            .saturating_add(counts.absent),
    );

    Reconciled {
        total_sessions: total,
        present_count: counts.present,
        late_count: counts.late,
        absent_count: counts.absent,
        attendance_percentage: attendance_percentage(counts.present, counts.late, total),
        has_custom_attendance: sources.custom_counts.is_some(),
        has_custom_total: sources.custom_total.is_some(),
    }
}
