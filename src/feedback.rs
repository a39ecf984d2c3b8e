//! Feedback sessions: a question round sent to a set of target users, open
//! between a start and an optional end date, and the responses it collects.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::academics::{self, AcademicsError};
use crate::db::parse_ts;
use crate::identity::{self, IdentityError, Role, User};
use crate::policy::{self, Action, PermissionDenied, Resource};

#[derive(thiserror::Error, Debug)]
pub enum FeedbackError {
    #[error("Permission denied")]
    PermissionDenied,
    #[error("{0}")]
    InvalidField(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("cannot move a {from} feedback session to {to}")]
    InvalidTransition {
        from: FeedbackStatus,
        to: FeedbackStatus,
    },
    #[error("This feedback session is no longer active.")]
    NotActive,
    #[error("You have already responded to this session.")]
    AlreadyResponded,
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Academics(#[from] AcademicsError),
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

impl From<PermissionDenied> for FeedbackError {
    fn from(_: PermissionDenied) -> Self {
        FeedbackError::PermissionDenied
    }
}

impl FeedbackError {
    pub fn code(&self) -> &'static str {
        match self {
            FeedbackError::PermissionDenied => "permission_denied",
            FeedbackError::InvalidField(_) => "bad_params",
            FeedbackError::NotFound(_) => "not_found",
            FeedbackError::InvalidTransition { .. } => "invalid_transition",
            FeedbackError::NotActive => "not_active",
            FeedbackError::AlreadyResponded => "already_responded",
            FeedbackError::Identity(e) => e.code(),
            FeedbackError::Academics(e) => e.code(),
            FeedbackError::Storage(_) => "db_query_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackStatus {
    Draft,
    Active,
    Completed,
    Archived,
}

impl FeedbackStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedbackStatus::Draft => "draft",
            FeedbackStatus::Active => "active",
            FeedbackStatus::Completed => "completed",
            FeedbackStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for FeedbackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedbackStatus {
    type Err = FeedbackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(FeedbackStatus::Draft),
            "active" => Ok(FeedbackStatus::Active),
            "completed" => Ok(FeedbackStatus::Completed),
            "archived" => Ok(FeedbackStatus::Archived),
            other => Err(FeedbackError::InvalidField(format!(
                "unknown feedback status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
    Anonymous,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
            Visibility::Anonymous => "anonymous",
        }
    }
}

impl FromStr for Visibility {
    type Err = FeedbackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            "anonymous" => Ok(Visibility::Anonymous),
            other => Err(FeedbackError::InvalidField(format!(
                "unknown visibility: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackSession {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub classroom_id: Option<String>,
    pub subject_id: Option<String>,
    pub created_by: String,
    pub status: FeedbackStatus,
    pub visibility: Visibility,
    pub allow_anonymous: bool,
    pub allow_multiple_responses: bool,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
    pub response_count: i64,
    pub target_count: i64,
    pub completion_rate: f64,
}

#[derive(Debug, Clone)]
pub struct NewFeedbackSession {
    pub title: String,
    pub description: String,
    pub category: String,
    pub classroom_id: Option<String>,
    pub subject_id: Option<String>,
    pub status: FeedbackStatus,
    pub visibility: Visibility,
    pub allow_anonymous: bool,
    pub allow_multiple_responses: bool,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// Empty means every student of `classroom_id`.
    pub target_ids: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FeedbackFilter {
    pub status: Option<FeedbackStatus>,
    pub classroom_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetail {
    pub session: FeedbackSession,
    pub has_responded: bool,
    pub can_respond: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackResponse {
    pub id: String,
    pub session_id: String,
    /// `None` for sessions that accept anonymous answers.
    pub respondent_id: Option<String>,
    pub response_data: serde_json::Value,
    pub is_complete: bool,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn is_active(
    status: FeedbackStatus,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    status == FeedbackStatus::Active && start <= now && end.map_or(true, |e| now <= e)
}

/// Responses per target as a percentage, two decimals. Zero without targets.
pub fn completion_rate(responses: i64, targets: i64) -> f64 {
    if targets <= 0 {
        return 0.0;
    }
    (responses as f64 / targets as f64 * 100.0 * 100.0).round() / 100.0
}

fn parse_enum<T: FromStr<Err = FeedbackError>>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

const SESSION_SELECT: &str = "SELECT
       f.id, f.title, f.description, f.category, f.classroom_id, f.subject_id, f.created_by,
       f.status, f.visibility, f.allow_anonymous, f.allow_multiple_responses,
       f.start_date, f.end_date, f.created_at, f.updated_at,
       (SELECT COUNT(*) FROM feedback_responses r WHERE r.session_id = f.id),
       (SELECT COUNT(*) FROM feedback_targets t WHERE t.session_id = f.id)
     FROM feedback_sessions f";

fn session_from_row(r: &Row<'_>, now: DateTime<Utc>) -> rusqlite::Result<FeedbackSession> {
    let status: FeedbackStatus = parse_enum(7, &r.get::<_, String>(7)?)?;
    let start_date = parse_ts(11, &r.get::<_, String>(11)?)?;
    let end_raw: Option<String> = r.get(12)?;
    let end_date = end_raw.as_deref().map(|s| parse_ts(12, s)).transpose()?;
    let response_count: i64 = r.get(15)?;
    let target_count: i64 = r.get(16)?;
    Ok(FeedbackSession {
        id: r.get(0)?,
        title: r.get(1)?,
        description: r.get(2)?,
        category: r.get(3)?,
        classroom_id: r.get(4)?,
        subject_id: r.get(5)?,
        created_by: r.get(6)?,
        status,
        visibility: parse_enum(8, &r.get::<_, String>(8)?)?,
        allow_anonymous: r.get::<_, i64>(9)? != 0,
        allow_multiple_responses: r.get::<_, i64>(10)? != 0,
        start_date,
        end_date,
        created_at: parse_ts(13, &r.get::<_, String>(13)?)?,
        updated_at: parse_ts(14, &r.get::<_, String>(14)?)?,
        is_active: is_active(status, start_date, end_date, now),
        response_count,
        target_count,
        completion_rate: completion_rate(response_count, target_count),
    })
}

fn response_from_row(r: &Row<'_>) -> rusqlite::Result<FeedbackResponse> {
    let raw: String = r.get(3)?;
    let response_data = serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(FeedbackResponse {
        id: r.get(0)?,
        session_id: r.get(1)?,
        respondent_id: r.get(2)?,
        response_data,
        is_complete: r.get::<_, i64>(4)? != 0,
        submitted_at: parse_ts(5, &r.get::<_, String>(5)?)?,
        updated_at: parse_ts(6, &r.get::<_, String>(6)?)?,
    })
}

pub fn create_session(
    conn: &Connection,
    actor: &User,
    new: &NewFeedbackSession,
    now: DateTime<Utc>,
) -> Result<FeedbackSession, FeedbackError> {
    policy::require(actor, Resource::Feedback, Action::Create)?;
    if new.title.trim().is_empty() {
        return Err(FeedbackError::InvalidField(
            "title must not be empty".to_string(),
        ));
    }
    if !matches!(new.status, FeedbackStatus::Draft | FeedbackStatus::Active) {
        return Err(FeedbackError::InvalidField(
            "a new feedback session must be draft or active".to_string(),
        ));
    }
    let start = new.start_date.unwrap_or(now);
    if let Some(end) = new.end_date {
        if end <= start {
            return Err(FeedbackError::InvalidField(
                "endDate must be after startDate".to_string(),
            ));
        }
    }
    if let Some(cid) = new.classroom_id.as_deref() {
        academics::require_classroom(conn, cid)?;
    }
    if let Some(sid) = new.subject_id.as_deref() {
        academics::require_subject(conn, sid)?;
    }

    let mut targets: Vec<String> = Vec::new();
    if new.target_ids.is_empty() {
        if let Some(cid) = new.classroom_id.as_deref() {
            targets = identity::list_students(conn, Some(cid))?
                .into_iter()
                .map(|s| s.id)
                .collect();
        }
    } else {
        for id in &new.target_ids {
            let user = identity::require_user(conn, id)?;
            if !targets.contains(&user.id) {
                targets.push(user.id);
            }
        }
    }

    let id = Uuid::new_v4().to_string();
    let ts = now.to_rfc3339();
    let category = match new.category.trim() {
        "" => "general",
        c => c,
    };
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO feedback_sessions(
            id, title, description, category, classroom_id, subject_id, created_by, status,
            visibility, allow_anonymous, allow_multiple_responses, start_date, end_date,
            created_at, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
        rusqlite::params![
            &id,
            new.title.trim(),
            &new.description,
            category,
            &new.classroom_id,
            &new.subject_id,
            &actor.id,
            new.status.as_str(),
            new.visibility.as_str(),
            new.allow_anonymous as i64,
            new.allow_multiple_responses as i64,
            start.to_rfc3339(),
            new.end_date.map(|e| e.to_rfc3339()),
            &ts,
        ],
    )?;
    {
        let mut stmt =
            tx.prepare("INSERT INTO feedback_targets(session_id, user_id) VALUES(?, ?)")?;
        for user_id in &targets {
            stmt.execute((&id, user_id))?;
        }
    }
    let session = load_session(&tx, &id, now)?;
    tx.commit()?;
    tracing::info!(
        feedback_id = %session.id,
        targets = session.target_count,
        actor_id = %actor.id,
        "feedback session created"
    );
    Ok(session)
}

fn load_session(conn: &Connection, id: &str, now: DateTime<Utc>) -> Result<FeedbackSession, FeedbackError> {
    let sql = format!("{} WHERE f.id = ?", SESSION_SELECT);
    conn.query_row(&sql, [id], |r| session_from_row(r, now))
        .optional()?
        .ok_or(FeedbackError::NotFound("feedback session"))
}

fn is_target(conn: &Connection, session_id: &str, user_id: &str) -> Result<bool, FeedbackError> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM feedback_targets WHERE session_id = ? AND user_id = ?",
            (session_id, user_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

fn participant_response(
    conn: &Connection,
    session_id: &str,
    user_id: &str,
) -> Result<Option<String>, FeedbackError> {
    Ok(conn
        .query_row(
            "SELECT response_id FROM feedback_participants WHERE session_id = ? AND user_id = ?",
            (session_id, user_id),
            |r| r.get(0),
        )
        .optional()?)
}

fn require_manager(actor: &User, session: &FeedbackSession) -> Result<(), FeedbackError> {
    if actor.role != Role::Admin && session.created_by != actor.id {
        return Err(FeedbackError::PermissionDenied);
    }
    Ok(())
}

/// Staff see every session. Everyone else sees the active sessions they
/// are a target of.
pub fn list_sessions(
    conn: &Connection,
    actor: &User,
    filter: &FeedbackFilter,
    now: DateTime<Utc>,
) -> Result<Vec<FeedbackSession>, FeedbackError> {
    policy::require(actor, Resource::Feedback, Action::Read)?;
    let staff = matches!(actor.role, Role::Admin | Role::Teacher);
    let sql = format!(
        "{} WHERE (?1 IS NULL OR f.status = ?1)
           AND (?2 IS NULL OR f.classroom_id = ?2)
           AND (?3 IS NULL OR EXISTS (
                 SELECT 1 FROM feedback_targets t WHERE t.session_id = f.id AND t.user_id = ?3))
         ORDER BY f.created_at DESC, f.rowid DESC",
        SESSION_SELECT
    );
    let target = (!staff).then_some(actor.id.as_str());
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            rusqlite::params![
                filter.status.map(FeedbackStatus::as_str),
                filter.classroom_id.as_deref(),
                target,
            ],
            |r| session_from_row(r, now),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .filter(|s| staff || s.is_active)
        .collect())
}

/// Visible to the creator, the targets and admins.
pub fn get_session(
    conn: &Connection,
    actor: &User,
    session_id: &str,
    now: DateTime<Utc>,
) -> Result<SessionDetail, FeedbackError> {
    policy::require(actor, Resource::Feedback, Action::Read)?;
    let session = load_session(conn, session_id, now)?;
    let targeted = is_target(conn, &session.id, &actor.id)?;
    if actor.role != Role::Admin && session.created_by != actor.id && !targeted {
        return Err(FeedbackError::PermissionDenied);
    }
    let has_responded = participant_response(conn, &session.id, &actor.id)?.is_some();
    Ok(SessionDetail {
        can_respond: targeted
            && session.is_active
            && (!has_responded || session.allow_multiple_responses),
        has_responded,
        session,
    })
}

/// `draft -> active -> completed`, and anything not yet archived to
/// `archived`.
pub fn set_status(
    conn: &Connection,
    actor: &User,
    session_id: &str,
    to: FeedbackStatus,
    now: DateTime<Utc>,
) -> Result<FeedbackSession, FeedbackError> {
    policy::require(actor, Resource::Feedback, Action::Update)?;
    let session = load_session(conn, session_id, now)?;
    require_manager(actor, &session)?;
    let allowed = match (session.status, to) {
        (FeedbackStatus::Draft, FeedbackStatus::Active)
        | (FeedbackStatus::Active, FeedbackStatus::Completed) => true,
        (from, FeedbackStatus::Archived) => from != FeedbackStatus::Archived,
        _ => false,
    };
    if !allowed {
        return Err(FeedbackError::InvalidTransition {
            from: session.status,
            to,
        });
    }
    conn.execute(
        "UPDATE feedback_sessions SET status = ?, updated_at = ? WHERE id = ?",
        (to.as_str(), now.to_rfc3339(), &session.id),
    )?;
    tracing::info!(feedback_id = %session.id, status = %to, actor_id = %actor.id, "feedback status changed");
    load_session(conn, &session.id, now)
}

/// Records the actor's answer. A repeat answer replaces the first one when
/// the session allows multiple responses, and is refused otherwise.
pub fn respond(
    conn: &Connection,
    actor: &User,
    session_id: &str,
    data: &serde_json::Value,
    now: DateTime<Utc>,
) -> Result<FeedbackResponse, FeedbackError> {
    policy::require(actor, Resource::FeedbackResponse, Action::Create)?;
    let session = load_session(conn, session_id, now)?;
    if !session.is_active {
        return Err(FeedbackError::NotActive);
    }
    if !is_target(conn, &session.id, &actor.id)? {
        tracing::warn!(actor_id = %actor.id, feedback_id = %session.id, "response from non-target");
        return Err(FeedbackError::PermissionDenied);
    }
    if !data.is_object() {
        return Err(FeedbackError::InvalidField(
            "responseData must be an object".to_string(),
        ));
    }
    let json = data.to_string();
    let ts = now.to_rfc3339();

    let tx = conn.unchecked_transaction()?;
    let response_id = match participant_response(&tx, &session.id, &actor.id)? {
        Some(_) if !session.allow_multiple_responses => {
            return Err(FeedbackError::AlreadyResponded);
        }
        Some(existing) => {
            tx.execute(
                "UPDATE feedback_responses
                 SET response_json = ?, is_complete = 1, updated_at = ?
                 WHERE id = ?",
                (&json, &ts, &existing),
            )?;
            existing
        }
        None => {
            let id = Uuid::new_v4().to_string();
            let respondent = (!session.allow_anonymous).then_some(actor.id.as_str());
            tx.execute(
                "INSERT INTO feedback_responses(
                    id, session_id, respondent_id, response_json, is_complete, submitted_at, updated_at)
                 VALUES(?1, ?2, ?3, ?4, 1, ?5, ?5)",
                rusqlite::params![&id, &session.id, respondent, &json, &ts],
            )?;
            tx.execute(
                "INSERT INTO feedback_participants(session_id, user_id, response_id) VALUES(?, ?, ?)",
                (&session.id, &actor.id, &id),
            )?;
            id
        }
    };
    let response = tx.query_row(
        "SELECT id, session_id, respondent_id, response_json, is_complete, submitted_at, updated_at
         FROM feedback_responses WHERE id = ?",
        [&response_id],
        response_from_row,
    )?;
    tx.commit()?;
    tracing::info!(feedback_id = %session.id, response_id = %response.id, "feedback response recorded");
    Ok(response)
}

/// Newest first. Only the creator and admins read responses.
pub fn list_responses(
    conn: &Connection,
    actor: &User,
    session_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<FeedbackResponse>, FeedbackError> {
    policy::require(actor, Resource::Feedback, Action::Update)?;
    let session = load_session(conn, session_id, now)?;
    require_manager(actor, &session)?;
    let mut stmt = conn.prepare(
        "SELECT id, session_id, respondent_id, response_json, is_complete, submitted_at, updated_at
         FROM feedback_responses
         WHERE session_id = ?
         ORDER BY submitted_at DESC, rowid DESC",
    )?;
    let rows = stmt
        .query_map([&session.id], response_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
