use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

use super::sessions::{self, Session};
use super::{AttendanceError, AttendanceStatus};
use crate::config::Config;
use crate::db::parse_ts;
use crate::identity::{self, Role, User};
use crate::policy::{self, Action, Resource};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub session_id: String,
    pub student_id: String,
    pub status: AttendanceStatus,
    pub marked_at: Option<DateTime<Utc>>,
    pub marked_by: Option<String>,
    pub notes: String,
}

/// Outcome of a mark: the stored record plus the session it landed in.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkOutcome {
    pub record: AttendanceRecord,
    pub session_id: String,
    pub session_created: bool,
    pub is_late: bool,
}

const RECORD_COLUMNS: &str = "id, session_id, student_id, status, marked_at, marked_by, notes";

fn record_from_row(r: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let status_raw: String = r.get(3)?;
    let status = status_raw.parse::<AttendanceStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let marked_at: Option<String> = r.get(4)?;
    Ok(AttendanceRecord {
        id: r.get(0)?,
        session_id: r.get(1)?,
        student_id: r.get(2)?,
        status,
        marked_at: marked_at.as_deref().map(|s| parse_ts(4, s)).transpose()?,
        marked_by: r.get(5)?,
        notes: r.get(6)?,
    })
}

pub fn get_record(conn: &Connection, id: &str) -> Result<Option<AttendanceRecord>, AttendanceError> {
    let sql = format!("SELECT {} FROM attendance_records WHERE id = ?", RECORD_COLUMNS);
    Ok(conn.query_row(&sql, [id], record_from_row).optional()?)
}

pub fn records_for_session(
    conn: &Connection,
    session_id: &str,
) -> Result<Vec<AttendanceRecord>, AttendanceError> {
    let sql = format!(
        "SELECT {} FROM attendance_records WHERE session_id = ? ORDER BY created_at, rowid",
        RECORD_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([session_id], record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Resolves the student and the classroom the engine should act on.
/// Students without a classroom cannot be marked or edited.
pub(crate) fn student_with_classroom(
    conn: &Connection,
    student_id: &str,
) -> Result<(User, String), AttendanceError> {
    let student = identity::require_role(conn, student_id, Role::Student)?;
    match identity::student_classroom(conn, &student)? {
        Some(classroom_id) => Ok((student, classroom_id)),
        None => Err(AttendanceError::ProfileIncomplete {
            student_id: student.id,
        }),
    }
}

fn upsert_record(
    conn: &Connection,
    session_id: &str,
    student_id: &str,
    status: AttendanceStatus,
    notes: Option<&str>,
    actor: &User,
    now: DateTime<Utc>,
) -> Result<AttendanceRecord, AttendanceError> {
    let ts = now.to_rfc3339();
    conn.execute(
        "INSERT INTO attendance_records(
            id, session_id, student_id, status, marked_at, marked_by, notes, created_at, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, COALESCE(?7, ''), ?5, ?5)
         ON CONFLICT(session_id, student_id) DO UPDATE SET
           status = excluded.status,
           marked_at = excluded.marked_at,
           marked_by = excluded.marked_by,
           notes = COALESCE(?7, attendance_records.notes),
           updated_at = excluded.updated_at",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            session_id,
            student_id,
            status.as_str(),
            &ts,
            &actor.id,
            notes,
        ],
    )?;
    let sql = format!(
        "SELECT {} FROM attendance_records WHERE session_id = ? AND student_id = ?",
        RECORD_COLUMNS
    );
    Ok(conn.query_row(&sql, (session_id, student_id), record_from_row)?)
}

fn outcome(session: &Session, record: AttendanceRecord, session_created: bool) -> MarkOutcome {
    MarkOutcome {
        is_late: sessions::is_late(session, record.marked_at),
        session_id: session.id.clone(),
        session_created,
        record,
    }
}

/// Creates or overwrites the student's record in `session_id`. Inactive
/// sessions accept marks so attendance can be backfilled.
pub fn mark(
    conn: &Connection,
    actor: &User,
    session_id: &str,
    student_id: &str,
    status: AttendanceStatus,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<MarkOutcome, AttendanceError> {
    policy::require(actor, Resource::Record, Action::Create)?;
    let (student, _) = student_with_classroom(conn, student_id)?;
    let session = sessions::require_session(conn, session_id)?;
    let record = upsert_record(conn, &session.id, &student.id, status, notes, actor, now)?;
    tracing::info!(
        record_id = %record.id,
        session_id = %session.id,
        student_id = %student.id,
        status = %status,
        actor_id = %actor.id,
        "attendance marked"
    );
    Ok(outcome(&session, record, false))
}

/// Re-marks an existing record by id.
pub fn remark(
    conn: &Connection,
    actor: &User,
    record_id: &str,
    status: AttendanceStatus,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<MarkOutcome, AttendanceError> {
    policy::require(actor, Resource::Record, Action::Update)?;
    let existing = get_record(conn, record_id)?.ok_or(AttendanceError::NotFound("record"))?;
    let session = sessions::require_session(conn, &existing.session_id)?;
    let record = upsert_record(
        conn,
        &existing.session_id,
        &existing.student_id,
        status,
        notes,
        actor,
        now,
    )?;
    tracing::info!(record_id = %record.id, status = %status, actor_id = %actor.id, "attendance re-marked");
    Ok(outcome(&session, record, false))
}

/// Marks the student in today's session for their classroom, opening a
/// quick session when none is active. Lookup, creation and the mark share
/// one transaction.
pub fn quick_mark(
    conn: &Connection,
    cfg: &Config,
    actor: &User,
    student_id: &str,
    status: AttendanceStatus,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<MarkOutcome, AttendanceError> {
    policy::require(actor, Resource::Record, Action::Create)?;
    let tx = conn.unchecked_transaction()?;
    let (student, classroom_id) = student_with_classroom(&tx, student_id)?;
    let (session, created) =
        sessions::get_or_create_quick_session(&tx, cfg, actor, &classroom_id, now)?;
    let record = upsert_record(&tx, &session.id, &student.id, status, notes, actor, now)?;
    tx.commit()?;
    tracing::info!(
        record_id = %record.id,
        session_id = %session.id,
        student_id = %student.id,
        status = %status,
        session_created = created,
        "quick attendance marked"
    );
    Ok(outcome(&session, record, created))
}
