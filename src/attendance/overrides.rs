//! Manually-entered totals and counts, and the operations that edit them.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::reconcile::{self, AbsentSource, ActualTally, CustomCounts, Reconciled, Sources};
use super::records::student_with_classroom;
use super::{AttendanceError, CountType, Scope};
use crate::academics;
use crate::identity::User;
use crate::policy::{self, Action, Resource};

/// Largest count or total accepted from a request.
pub const MAX_COUNT_VALUE: i64 = 100_000;

/// Accepts a JSON integer or a numeric string. Anything else, including
/// negatives and fractions, is rejected.
pub fn parse_count_value(raw: &Value) -> Result<i64, AttendanceError> {
    let parsed = match raw {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v > MAX_COUNT_VALUE => Err(AttendanceError::InvalidValue(format!(
            "Invalid value. Must not exceed {}.",
            MAX_COUNT_VALUE
        ))),
        Some(v) if v >= 0 => Ok(v),
        _ => Err(AttendanceError::InvalidValue(
            "Invalid value. Must be a non-negative integer.".to_string(),
        )),
    }
}

/// Tallies every record the student has, in any classroom, narrowed to
/// the subject's sessions when one is given. Records follow the student
/// across classroom transfers.
pub fn actual_tally(conn: &Connection, scope: &Scope) -> Result<ActualTally, AttendanceError> {
    let tally = conn.query_row(
        "SELECT
           COUNT(*),
           COALESCE(SUM(r.status = 'present'), 0),
           COALESCE(SUM(r.status = 'late'), 0),
           COALESCE(SUM(r.status = 'absent'), 0),
           COALESCE(SUM(r.status = 'excused'), 0)
         FROM attendance_records r
         JOIN attendance_sessions s ON s.id = r.session_id
         WHERE r.student_id = ?1
           AND (?2 IS NULL OR s.subject_id = ?2)",
        (&scope.student_id, scope.subject_id.as_deref()),
        |r| {
            Ok(ActualTally {
                total: r.get(0)?,
                present: r.get(1)?,
                late: r.get(2)?,
                absent: r.get(3)?,
                excused: r.get(4)?,
            })
        },
    )?;
    Ok(tally)
}

pub fn custom_total(conn: &Connection, scope: &Scope) -> Result<Option<i64>, AttendanceError> {
    let Some(classroom_id) = scope.classroom_id.as_deref() else {
        return Ok(None);
    };
    Ok(conn
        .query_row(
            "SELECT total_sessions FROM student_total_sessions
             WHERE student_id = ? AND classroom_id = ? AND subject_key = ?",
            (&scope.student_id, classroom_id, scope.subject_key()),
            |r| r.get(0),
        )
        .optional()?)
}

pub fn custom_counts(
    conn: &Connection,
    scope: &Scope,
) -> Result<Option<CustomCounts>, AttendanceError> {
    let Some(classroom_id) = scope.classroom_id.as_deref() else {
        return Ok(None);
    };
    Ok(conn
        .query_row(
            "SELECT present_count, late_count, absent_count FROM student_custom_attendance
             WHERE student_id = ? AND classroom_id = ? AND subject_key = ?",
            (&scope.student_id, classroom_id, scope.subject_key()),
            |r| {
                Ok(CustomCounts {
                    present: r.get(0)?,
                    late: r.get(1)?,
                    absent: r.get(2)?,
                })
            },
        )
        .optional()?)
}

pub fn load_sources(conn: &Connection, scope: &Scope) -> Result<Sources, AttendanceError> {
    Ok(Sources {
        actual: actual_tally(conn, scope)?,
        custom_total: custom_total(conn, scope)?,
        custom_counts: custom_counts(conn, scope)?,
    })
}

/// Scope for an edit: the student must exist and have a classroom.
pub fn resolve_scope(
    conn: &Connection,
    student_id: &str,
    subject_id: Option<&str>,
) -> Result<Scope, AttendanceError> {
    let (student, classroom_id) = student_with_classroom(conn, student_id)?;
    if let Some(sid) = subject_id {
        academics::require_subject(conn, sid)?;
    }
    Ok(Scope {
        student_id: student.id,
        classroom_id: Some(classroom_id),
        subject_id: subject_id.map(str::to_string),
    })
}

fn classroom_of(scope: &Scope) -> Result<&str, AttendanceError> {
    scope
        .classroom_id
        .as_deref()
        .ok_or_else(|| AttendanceError::ProfileIncomplete {
            student_id: scope.student_id.clone(),
        })
}

fn store_counts(
    conn: &Connection,
    scope: &Scope,
    counts: &CustomCounts,
    actor: &User,
    now: DateTime<Utc>,
) -> Result<(), AttendanceError> {
    let ts = now.to_rfc3339();
    conn.execute(
        "INSERT INTO student_custom_attendance(
            id, student_id, classroom_id, subject_key, present_count, late_count, absent_count,
            created_by, updated_by, created_at, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, ?9, ?9)
         ON CONFLICT(student_id, classroom_id, subject_key) DO UPDATE SET
           present_count = excluded.present_count,
           late_count = excluded.late_count,
           absent_count = excluded.absent_count,
           updated_by = excluded.updated_by,
           updated_at = excluded.updated_at",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            &scope.student_id,
            classroom_of(scope)?,
            scope.subject_key(),
            counts.present,
            counts.late,
            counts.absent,
            &actor.id,
            &ts,
        ],
    )?;
    Ok(())
}

/// Result of a count or total edit. `actual` is what the records say.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountUpdate {
    #[serde(flatten)]
    pub reconciled: Reconciled,
    pub actual: ActualTally,
}

fn apply_count(
    conn: &Connection,
    default_total: i64,
    actor: &User,
    scope: &Scope,
    count_type: CountType,
    value: i64,
    now: DateTime<Utc>,
) -> Result<CountUpdate, AttendanceError> {
    let tx = conn.unchecked_transaction()?;
    let sources = load_sources(&tx, scope)?;
    let total = reconcile::resolve_total(&sources.actual, sources.custom_total, default_total);
    let mut counts = sources
        .custom_counts
        .unwrap_or_else(|| CustomCounts::seeded_from(&sources.actual));

    let absent_source = match count_type {
        CountType::Present => {
            counts.present = value;
            counts.absent = reconcile::derived_absent(total, counts.present, counts.late);
            AbsentSource::Derived
        }
        CountType::Late => {
            counts.late = value;
            counts.absent = reconcile::derived_absent(total, counts.present, counts.late);
            AbsentSource::Derived
        }
        CountType::Absent => {
            counts.absent = value;
            AbsentSource::Explicit
        }
    };
    store_counts(&tx, scope, &counts, actor, now)?;
    tx.commit()?;

    let updated = Sources {
        custom_counts: Some(counts),
        ..sources
    };
    Ok(CountUpdate {
        reconciled: reconcile::reconcile(&updated, default_total, absent_source),
        actual: sources.actual,
    })
}

/// Sets one custom count for the student. The first edit seeds the row
/// from the recorded tallies. Present and late edits re-derive absent from
/// the total; an absent edit is stored as given.
#[allow(clippy::too_many_arguments)]
pub fn update_count(
    conn: &Connection,
    default_total: i64,
    actor: &User,
    student_id: &str,
    subject_id: Option<&str>,
    count_type: CountType,
    raw_value: &Value,
    now: DateTime<Utc>,
) -> Result<CountUpdate, AttendanceError> {
    policy::require(actor, Resource::AttendanceOverride, Action::Update)?;
    let value = parse_count_value(raw_value)?;
    let scope = resolve_scope(conn, student_id, subject_id)?;
    let out = apply_count(conn, default_total, actor, &scope, count_type, value, now)?;
    tracing::info!(
        student_id = %scope.student_id,
        count_type = count_type.as_str(),
        value,
        total = out.reconciled.total_sessions,
        actor_id = %actor.id,
        "attendance count updated"
    );
    Ok(out)
}

/// Sets the expected session total. Values below the number of recorded
/// sessions are rejected; custom counts are left as they are.
pub fn update_total_sessions(
    conn: &Connection,
    default_total: i64,
    actor: &User,
    student_id: &str,
    subject_id: Option<&str>,
    raw_value: &Value,
    now: DateTime<Utc>,
) -> Result<CountUpdate, AttendanceError> {
    policy::require(actor, Resource::AttendanceOverride, Action::Update)?;
    let value = parse_count_value(raw_value)?;
    let scope = resolve_scope(conn, student_id, subject_id)?;

    let tx = conn.unchecked_transaction()?;
    let actual = actual_tally(&tx, &scope)?;
    if value < actual.total {
        return Err(AttendanceError::BelowActualCount {
            actual: actual.total,
            requested: value,
        });
    }
    let ts = now.to_rfc3339();
    tx.execute(
        "INSERT INTO student_total_sessions(
            id, student_id, classroom_id, subject_key, total_sessions,
            created_by, updated_by, created_at, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7, ?7)
         ON CONFLICT(student_id, classroom_id, subject_key) DO UPDATE SET
           total_sessions = excluded.total_sessions,
           updated_by = excluded.updated_by,
           updated_at = excluded.updated_at
         WHERE student_total_sessions.total_sessions <> excluded.total_sessions",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            &scope.student_id,
            classroom_of(&scope)?,
            scope.subject_key(),
            value,
            &actor.id,
            &ts,
        ],
    )?;
    let sources = Sources {
        actual,
        custom_total: Some(value),
        custom_counts: custom_counts(&tx, &scope)?,
    };
    tx.commit()?;

    tracing::info!(
        student_id = %scope.student_id,
        total_sessions = value,
        actor_id = %actor.id,
        "total sessions updated"
    );
    Ok(CountUpdate {
        reconciled: reconcile::reconcile(&sources, default_total, AbsentSource::Derived),
        actual,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkFailure {
    pub id: String,
    pub code: &'static str,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkReport {
    pub successful: usize,
    pub failed: Vec<BulkFailure>,
}

/// Applies the same count edit to every listed student. Each student is
/// committed on its own; failures are collected rather than aborting.
#[allow(clippy::too_many_arguments)]
pub fn bulk_update_count(
    conn: &Connection,
    default_total: i64,
    actor: &User,
    student_ids: &[String],
    subject_id: Option<&str>,
    count_type: CountType,
    raw_value: &Value,
    now: DateTime<Utc>,
) -> Result<BulkReport, AttendanceError> {
    policy::require(actor, Resource::AttendanceOverride, Action::Update)?;
    let value = parse_count_value(raw_value)?;

    let mut report = BulkReport::default();
    for student_id in student_ids {
        let result = resolve_scope(conn, student_id, subject_id)
            .and_then(|scope| apply_count(conn, default_total, actor, &scope, count_type, value, now));
        match result {
            Ok(_) => report.successful += 1,
            Err(e) => {
                tracing::debug!(student_id = %student_id, error = %e, "bulk count update skipped student");
                report.failed.push(BulkFailure {
                    id: student_id.clone(),
                    code: e.code(),
                    error: e.to_string(),
                });
            }
        }
    }
    tracing::info!(
        count_type = count_type.as_str(),
        value,
        successful = report.successful,
        failed = report.failed.len(),
        "bulk attendance count update"
    );
    Ok(report)
}
