//! Read-only projections over sessions, records and overrides.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use serde::Serialize;

use super::overrides::load_sources;
use super::reconcile::{reconcile, AbsentSource, ActualTally, Reconciled};
use super::records::{records_for_session, AttendanceRecord};
use super::sessions::{
    self, is_late, session_stats, Session, SessionFilter, SessionStats,
};
use super::{AttendanceError, AttendanceStatus, Scope};
use crate::db;
use crate::identity::{self, Role, User};
use crate::policy::{self, Action, Resource};

const RECENT_RECORD_LIMIT: usize = 20;
const DASHBOARD_RECENT_SESSIONS: usize = 5;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterRow {
    pub student_id: String,
    pub display_name: String,
    pub student_code: String,
    pub classroom_id: Option<String>,
    #[serde(flatten)]
    pub reconciled: Reconciled,
    pub actual: ActualTally,
}

/// Every student (optionally one classroom's) with reconciled counts.
/// Students without a classroom show their recorded attendance only.
pub fn roster(
    conn: &Connection,
    default_total: i64,
    actor: &User,
    classroom_id: Option<&str>,
    subject_id: Option<&str>,
) -> Result<Vec<RosterRow>, AttendanceError> {
    policy::require(actor, Resource::Record, Action::Read)?;
    let students = identity::list_students(conn, classroom_id)?;
    let mut rows = Vec::with_capacity(students.len());
    for s in students {
        let scope = Scope {
            student_id: s.id.clone(),
            classroom_id: s.classroom_id.clone(),
            subject_id: subject_id.map(str::to_string),
        };
        let sources = load_sources(conn, &scope)?;
        rows.push(RosterRow {
            student_id: s.id,
            display_name: s.display_name,
            student_code: s.student_code,
            classroom_id: s.classroom_id,
            reconciled: reconcile(&sources, default_total, AbsentSource::Derived),
            actual: sources.actual,
        });
    }
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentRecord {
    pub record_id: String,
    pub session_id: String,
    pub session_title: String,
    pub session_start: DateTime<Utc>,
    pub status: AttendanceStatus,
    pub marked_at: Option<DateTime<Utc>>,
    pub is_late: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    pub student: User,
    pub classroom_id: Option<String>,
    pub summary: Reconciled,
    pub actual: ActualTally,
    pub recent_records: Vec<RecentRecord>,
}

pub fn student_profile(
    conn: &Connection,
    default_total: i64,
    actor: &User,
    student_id: &str,
) -> Result<StudentProfile, AttendanceError> {
    let student = identity::require_role(conn, student_id, Role::Student)?;
    if !policy::can_view_student(conn, actor, &student.id)? {
        tracing::warn!(actor_id = %actor.id, student_id = %student.id, "student profile access denied");
        return Err(AttendanceError::PermissionDenied);
    }
    let classroom_id = identity::student_classroom(conn, &student)?;
    let scope = Scope {
        student_id: student.id.clone(),
        classroom_id: classroom_id.clone(),
        subject_id: None,
    };
    let sources = load_sources(conn, &scope)?;

    let mut stmt = conn.prepare(
        "SELECT r.id, r.session_id, r.status, r.marked_at
         FROM attendance_records r
         JOIN attendance_sessions s ON s.id = r.session_id
         WHERE r.student_id = ?
         ORDER BY s.start_time DESC, r.rowid DESC
         LIMIT ?",
    )?;
    let raw = stmt
        .query_map((&student.id, RECENT_RECORD_LIMIT as i64), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<String>>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut recent_records = Vec::with_capacity(raw.len());
    for (record_id, session_id, status, marked_at) in raw {
        let session = sessions::require_session(conn, &session_id)?;
        let marked_at = marked_at
            .as_deref()
            .map(|s| db::parse_ts(3, s))
            .transpose()?;
        recent_records.push(RecentRecord {
            record_id,
            is_late: is_late(&session, marked_at),
            session_id,
            session_title: session.title,
            session_start: session.start_time,
            status: status.parse()?,
            marked_at,
        });
    }

    Ok(StudentProfile {
        summary: reconcile(&sources, default_total, AbsentSource::Derived),
        actual: sources.actual,
        classroom_id,
        student,
        recent_records,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRosterEntry {
    pub student_id: String,
    pub display_name: String,
    /// Record status, or `not_marked`.
    pub status: String,
    pub record: Option<AttendanceRecord>,
    pub is_late: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetail {
    pub session: Session,
    pub is_active: bool,
    pub stats: SessionStats,
    pub students: Vec<SessionRosterEntry>,
}

pub fn session_detail(
    conn: &Connection,
    actor: &User,
    session_id: &str,
    now: DateTime<Utc>,
) -> Result<SessionDetail, AttendanceError> {
    policy::require(actor, Resource::Session, Action::Read)?;
    sessions::sweep_auto_close(conn, now)?;
    let session = sessions::require_session(conn, session_id)?;
    let mut records = records_for_session(conn, &session.id)?;

    let students = identity::list_students(conn, Some(&session.classroom_id))?
        .into_iter()
        .map(|s| {
            let record = records
                .iter()
                .position(|r| r.student_id == s.id)
                .map(|i| records.swap_remove(i));
            SessionRosterEntry {
                status: record
                    .as_ref()
                    .map(|r| r.status.as_str().to_string())
                    .unwrap_or_else(|| "not_marked".to_string()),
                is_late: record
                    .as_ref()
                    .is_some_and(|r| is_late(&session, r.marked_at)),
                student_id: s.id,
                display_name: s.display_name,
                record,
            }
        })
        .collect();

    Ok(SessionDetail {
        is_active: session.is_active_at(now),
        stats: session_stats(conn, &session)?,
        session,
        students,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub recent_sessions: Vec<Session>,
    pub active_sessions: Vec<Session>,
    pub total_sessions: usize,
    pub today_sessions: usize,
}

/// Overview for a teacher (their own sessions) or an admin (all sessions).
pub fn dashboard(
    conn: &Connection,
    actor: &User,
    now: DateTime<Utc>,
) -> Result<Dashboard, AttendanceError> {
    policy::require(actor, Resource::Session, Action::Read)?;
    sessions::sweep_auto_close(conn, now)?;
    let teacher_id = (actor.role == Role::Teacher).then(|| actor.id.clone());
    let all = sessions::list_sessions(
        conn,
        &SessionFilter {
            teacher_id,
            ..SessionFilter::default()
        },
    )?;
    let today = now.date_naive();
    Ok(Dashboard {
        total_sessions: all.len(),
        today_sessions: all
            .iter()
            .filter(|s| s.start_time.date_naive() == today)
            .count(),
        active_sessions: all.iter().filter(|s| s.is_active_at(now)).cloned().collect(),
        recent_sessions: all.into_iter().take(DASHBOARD_RECENT_SESSIONS).collect(),
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub session: Session,
    pub stats: SessionStats,
}

pub fn report(
    conn: &Connection,
    actor: &User,
    classroom_id: Option<&str>,
    subject_id: Option<&str>,
    date_from: Option<NaiveDate>,
    date_to: Option<NaiveDate>,
    now: DateTime<Utc>,
) -> Result<Vec<ReportRow>, AttendanceError> {
    policy::require(actor, Resource::Session, Action::Read)?;
    sessions::sweep_auto_close(conn, now)?;
    let filter = SessionFilter {
        classroom_id: classroom_id.map(str::to_string),
        subject_id: subject_id.map(str::to_string),
        date_from,
        date_to,
        ..SessionFilter::default()
    };
    sessions::list_sessions(conn, &filter)?
        .into_iter()
        .map(|session| {
            let stats = session_stats(conn, &session)?;
            Ok(ReportRow { session, stats })
        })
        .collect()
}
