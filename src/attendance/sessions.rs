use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::AttendanceError;
use crate::academics;
use crate::config::Config;
use crate::db::parse_ts;
use crate::identity::{Role, User};
use crate::policy::{self, Action, Resource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = AttendanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            "cancelled" => Ok(SessionStatus::Cancelled),
            other => Err(AttendanceError::InvalidValue(format!(
                "unknown session status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceType {
    Daily,
    Subject,
    Event,
}

impl AttendanceType {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceType::Daily => "daily",
            AttendanceType::Subject => "subject",
            AttendanceType::Event => "event",
        }
    }
}

impl FromStr for AttendanceType {
    type Err = AttendanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(AttendanceType::Daily),
            "subject" => Ok(AttendanceType::Subject),
            "event" => Ok(AttendanceType::Event),
            other => Err(AttendanceError::InvalidValue(format!(
                "unknown attendance type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Geofence {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_meters: i64,
    pub required: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub title: String,
    pub description: String,
    pub classroom_id: String,
    pub subject_id: Option<String>,
    pub teacher_id: String,
    pub attendance_type: AttendanceType,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_minutes: i64,
    pub auto_close: bool,
    pub late_threshold_minutes: i64,
    pub geofence: Option<Geofence>,
    pub created_at: DateTime<Utc>,
}

/// Longest session window accepted on create (one week).
pub const MAX_SESSION_MINUTES: i64 = 7 * 24 * 60;
/// Late thresholds past this are rejected.
pub const MAX_LATE_THRESHOLD_MINUTES: i64 = 24 * 60;

/// `t + minutes`, or `None` when the result is not representable.
fn offset_minutes(t: DateTime<Utc>, minutes: i64) -> Option<DateTime<Utc>> {
    Duration::try_minutes(minutes).and_then(|d| t.checked_add_signed(d))
}

impl Session {
    pub fn window_end(&self) -> DateTime<Utc> {
        self.end_time.unwrap_or_else(|| {
            offset_minutes(self.start_time, self.duration_minutes).unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Active && self.start_time <= now && now <= self.window_end()
    }

    pub fn late_after(&self) -> DateTime<Utc> {
        offset_minutes(self.start_time, self.late_threshold_minutes).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// A record marked after the session's late threshold counts as late.
pub fn is_late(session: &Session, marked_at: Option<DateTime<Utc>>) -> bool {
    marked_at.is_some_and(|t| t > session.late_after())
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub title: String,
    pub description: String,
    pub classroom_id: String,
    pub subject_id: Option<String>,
    pub attendance_type: AttendanceType,
    pub duration_minutes: i64,
    pub late_threshold_minutes: Option<i64>,
    pub auto_close: bool,
    pub geofence: Option<Geofence>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub status: Option<SessionStatus>,
    pub classroom_id: Option<String>,
    pub subject_id: Option<String>,
    pub teacher_id: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total_students: i64,
    pub present_count: i64,
    pub late_count: i64,
    pub absent_count: i64,
    pub excused_count: i64,
    pub attendance_percentage: f64,
}

const SESSION_COLUMNS: &str = "id, title, description, classroom_id, subject_id, teacher_id,
    attendance_type, status, start_time, end_time, duration_minutes, auto_close,
    late_threshold_minutes, location_required, latitude, longitude, location_radius_meters,
    created_at";

fn parse_enum<T: FromStr<Err = AttendanceError>>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn session_from_row(r: &Row<'_>) -> rusqlite::Result<Session> {
    let latitude: Option<f64> = r.get(14)?;
    let longitude: Option<f64> = r.get(15)?;
    let geofence = match (latitude, longitude) {
        (Some(latitude), Some(longitude)) => Some(Geofence {
            latitude,
            longitude,
            radius_meters: r.get(16)?,
            required: r.get::<_, i64>(13)? != 0,
        }),
        _ => None,
    };
    let end_time: Option<String> = r.get(9)?;
    Ok(Session {
        id: r.get(0)?,
        title: r.get(1)?,
        description: r.get(2)?,
        classroom_id: r.get(3)?,
        subject_id: r.get(4)?,
        teacher_id: r.get(5)?,
        attendance_type: parse_enum(6, &r.get::<_, String>(6)?)?,
        status: parse_enum(7, &r.get::<_, String>(7)?)?,
        start_time: parse_ts(8, &r.get::<_, String>(8)?)?,
        end_time: end_time.as_deref().map(|s| parse_ts(9, s)).transpose()?,
        duration_minutes: r.get(10)?,
        auto_close: r.get::<_, i64>(11)? != 0,
        late_threshold_minutes: r.get(12)?,
        geofence,
        created_at: parse_ts(17, &r.get::<_, String>(17)?)?,
    })
}

fn insert_session(
    conn: &Connection,
    teacher_id: &str,
    new: &NewSession,
    late_threshold_minutes: i64,
    now: DateTime<Utc>,
) -> Result<Session, AttendanceError> {
    let end_time = offset_minutes(now, new.duration_minutes).ok_or_else(|| {
        AttendanceError::InvalidValue("session window ends out of range".to_string())
    })?;
    let session = Session {
        id: Uuid::new_v4().to_string(),
        title: new.title.clone(),
        description: new.description.clone(),
        classroom_id: new.classroom_id.clone(),
        subject_id: new.subject_id.clone(),
        teacher_id: teacher_id.to_string(),
        attendance_type: new.attendance_type,
        status: SessionStatus::Active,
        start_time: now,
        end_time: Some(end_time),
        duration_minutes: new.duration_minutes,
        auto_close: new.auto_close,
        late_threshold_minutes,
        geofence: new.geofence,
        created_at: now,
    };
    let ts = now.to_rfc3339();
    let fence = session.geofence;
    conn.execute(
        "INSERT INTO attendance_sessions(
            id, title, description, classroom_id, subject_id, teacher_id, attendance_type,
            status, start_time, session_date, end_time, duration_minutes, auto_close,
            late_threshold_minutes, location_required, latitude, longitude,
            location_radius_meters, created_at, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?19)",
        rusqlite::params![
            &session.id,
            &session.title,
            &session.description,
            &session.classroom_id,
            &session.subject_id,
            &session.teacher_id,
            session.attendance_type.as_str(),
            session.status.as_str(),
            &ts,
            now.date_naive().to_string(),
            session.end_time.map(|t| t.to_rfc3339()),
            session.duration_minutes,
            session.auto_close as i64,
            session.late_threshold_minutes,
            fence.map(|g| g.required as i64).unwrap_or(0),
            fence.map(|g| g.latitude),
            fence.map(|g| g.longitude),
            fence.map(|g| g.radius_meters).unwrap_or(100),
            &ts,
        ],
    )?;
    Ok(session)
}

pub fn create_session(
    conn: &Connection,
    cfg: &Config,
    actor: &User,
    new: &NewSession,
    now: DateTime<Utc>,
) -> Result<Session, AttendanceError> {
    policy::require(actor, Resource::Session, Action::Create)?;
    if new.title.trim().is_empty() {
        return Err(AttendanceError::InvalidValue(
            "title must not be empty".to_string(),
        ));
    }
    if !(1..=MAX_SESSION_MINUTES).contains(&new.duration_minutes) {
        return Err(AttendanceError::InvalidValue(format!(
            "duration_minutes must be between 1 and {}",
            MAX_SESSION_MINUTES
        )));
    }
    let late = new
        .late_threshold_minutes
        .unwrap_or(cfg.late_threshold_minutes);
    if !(0..=MAX_LATE_THRESHOLD_MINUTES).contains(&late) {
        return Err(AttendanceError::InvalidValue(format!(
            "late_threshold_minutes must be between 0 and {}",
            MAX_LATE_THRESHOLD_MINUTES
        )));
    }
    if let Some(g) = new.geofence {
        if !(-90.0..=90.0).contains(&g.latitude) || !(-180.0..=180.0).contains(&g.longitude) {
            return Err(AttendanceError::InvalidValue(
                "geofence coordinates out of range".to_string(),
            ));
        }
        if g.radius_meters <= 0 {
            return Err(AttendanceError::InvalidValue(
                "geofence radius must be positive".to_string(),
            ));
        }
    }
    academics::require_classroom(conn, &new.classroom_id)?;
    if let Some(sid) = new.subject_id.as_deref() {
        academics::require_subject(conn, sid)?;
    }

    let session = insert_session(conn, &actor.id, new, late, now)?;
    tracing::info!(
        session_id = %session.id,
        classroom_id = %session.classroom_id,
        actor_id = %actor.id,
        "attendance session created"
    );
    Ok(session)
}

pub fn get_session(conn: &Connection, id: &str) -> Result<Option<Session>, AttendanceError> {
    let sql = format!(
        "SELECT {} FROM attendance_sessions WHERE id = ?",
        SESSION_COLUMNS
    );
    Ok(conn.query_row(&sql, [id], session_from_row).optional()?)
}

pub fn require_session(conn: &Connection, id: &str) -> Result<Session, AttendanceError> {
    get_session(conn, id)?.ok_or(AttendanceError::NotFound("session"))
}

/// Newest first.
pub fn list_sessions(
    conn: &Connection,
    filter: &SessionFilter,
) -> Result<Vec<Session>, AttendanceError> {
    let sql = format!(
        "SELECT {} FROM attendance_sessions
         WHERE (?1 IS NULL OR status = ?1)
           AND (?2 IS NULL OR classroom_id = ?2)
           AND (?3 IS NULL OR subject_id = ?3)
           AND (?4 IS NULL OR teacher_id = ?4)
           AND (?5 IS NULL OR session_date >= ?5)
           AND (?6 IS NULL OR session_date <= ?6)
         ORDER BY created_at DESC, rowid DESC",
        SESSION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            rusqlite::params![
                filter.status.map(SessionStatus::as_str),
                filter.classroom_id.as_deref(),
                filter.subject_id.as_deref(),
                filter.teacher_id.as_deref(),
                filter.date_from.map(|d| d.to_string()),
                filter.date_to.map(|d| d.to_string()),
            ],
            session_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// The first active session opened in `classroom_id` on `date`.
pub fn find_active_session_on(
    conn: &Connection,
    classroom_id: &str,
    date: NaiveDate,
) -> Result<Option<Session>, AttendanceError> {
    let sql = format!(
        "SELECT {} FROM attendance_sessions
         WHERE classroom_id = ? AND session_date = ? AND status = 'active'
         ORDER BY start_time, rowid
         LIMIT 1",
        SESSION_COLUMNS
    );
    Ok(conn
        .query_row(&sql, (classroom_id, date.to_string()), session_from_row)
        .optional()?)
}

/// Session used by quick-mark: today's active session for the classroom,
/// opened on demand. Callers run this inside their transaction so two
/// quick-marks on the same day share one session. Quick sessions are not
/// auto-closed, otherwise the sweep would split a day across sessions.
pub fn get_or_create_quick_session(
    conn: &Connection,
    cfg: &Config,
    actor: &User,
    classroom_id: &str,
    now: DateTime<Utc>,
) -> Result<(Session, bool), AttendanceError> {
    let today = now.date_naive();
    if let Some(existing) = find_active_session_on(conn, classroom_id, today)? {
        return Ok((existing, false));
    }
    let new = NewSession {
        title: format!("Quick Attendance - {}", today),
        description: String::new(),
        classroom_id: classroom_id.to_string(),
        subject_id: None,
        attendance_type: AttendanceType::Daily,
        duration_minutes: cfg.quick_session_minutes,
        late_threshold_minutes: None,
        auto_close: false,
        geofence: None,
    };
    let session = insert_session(conn, &actor.id, &new, cfg.late_threshold_minutes, now)?;
    tracing::info!(
        session_id = %session.id,
        classroom_id = %classroom_id,
        actor_id = %actor.id,
        "quick attendance session opened"
    );
    Ok((session, true))
}

fn transition(
    conn: &Connection,
    actor: &User,
    session_id: &str,
    to: SessionStatus,
    now: DateTime<Utc>,
) -> Result<Session, AttendanceError> {
    policy::require(actor, Resource::Session, Action::Update)?;
    let mut session = require_session(conn, session_id)?;
    if actor.role != Role::Admin && session.teacher_id != actor.id {
        return Err(AttendanceError::PermissionDenied);
    }
    if session.status != SessionStatus::Active {
        return Err(AttendanceError::InvalidTransition {
            from: session.status,
            to,
        });
    }
    conn.execute(
        "UPDATE attendance_sessions SET status = ?, updated_at = ? WHERE id = ?",
        (to.as_str(), now.to_rfc3339(), &session.id),
    )?;
    session.status = to;
    tracing::info!(session_id = %session.id, status = %to, actor_id = %actor.id, "session status changed");
    Ok(session)
}

pub fn close_session(
    conn: &Connection,
    actor: &User,
    session_id: &str,
    now: DateTime<Utc>,
) -> Result<Session, AttendanceError> {
    transition(conn, actor, session_id, SessionStatus::Completed, now)
}

pub fn cancel_session(
    conn: &Connection,
    actor: &User,
    session_id: &str,
    now: DateTime<Utc>,
) -> Result<Session, AttendanceError> {
    transition(conn, actor, session_id, SessionStatus::Cancelled, now)
}

/// Completes active auto-close sessions whose window has passed. Returns
/// how many were closed.
pub fn sweep_auto_close(conn: &Connection, now: DateTime<Utc>) -> Result<usize, AttendanceError> {
    let expired: Vec<String> = list_sessions(
        conn,
        &SessionFilter {
            status: Some(SessionStatus::Active),
            ..SessionFilter::default()
        },
    )?
    .into_iter()
    .filter(|s| s.auto_close && s.window_end() < now)
    .map(|s| s.id)
    .collect();

    if expired.is_empty() {
        return Ok(0);
    }
    let tx = conn.unchecked_transaction()?;
    let ts = now.to_rfc3339();
    for id in &expired {
        tx.execute(
            "UPDATE attendance_sessions SET status = 'completed', updated_at = ? WHERE id = ? AND status = 'active'",
            (&ts, id),
        )?;
    }
    tx.commit()?;
    tracing::debug!(closed = expired.len(), "auto-closed elapsed sessions");
    Ok(expired.len())
}

/// Per-session counts. The percentage is over the classroom's current
/// roster, two decimals.
pub fn session_stats(conn: &Connection, session: &Session) -> Result<SessionStats, AttendanceError> {
    let total_students: i64 = conn.query_row(
        "SELECT COUNT(*) FROM student_profiles WHERE classroom_id = ?",
        [&session.classroom_id],
        |r| r.get(0),
    )?;
    let (present, late, absent, excused): (i64, i64, i64, i64) = conn.query_row(
        "SELECT
           COALESCE(SUM(status = 'present'), 0),
           COALESCE(SUM(status = 'late'), 0),
           COALESCE(SUM(status = 'absent'), 0),
           COALESCE(SUM(status = 'excused'), 0)
         FROM attendance_records WHERE session_id = ?",
        [&session.id],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
    )?;
    let attendance_percentage = if total_students == 0 {
        0.0
    } else {
        ((present + late) as f64 / total_students as f64 * 10000.0).round() / 100.0
    };
    Ok(SessionStats {
        total_students,
        present_count: present,
        late_count: late,
        absent_count: absent,
        excused_count: excused,
        attendance_percentage,
    })
}
