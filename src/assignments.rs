//! Assignments published to a classroom and the work students hand in.

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

pub const MAX_ASSIGNMENT_POINTS: i64 = 10_000;

#[derive(thiserror::Error, Debug)]
pub enum AssignmentError {
    #[error("Permission denied")]
    PermissionDenied,
    #[error("{0}")]
    InvalidField(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("cannot move a {from} assignment to {to}")]
    InvalidTransition {
        from: AssignmentStatus,
        to: AssignmentStatus,
    },
    #[error("Assignment is not open for submissions.")]
    NotOpen,
    #[error("The due date has passed and late submissions are not accepted.")]
    PastDue,
    #[error("Submission is already {0}.")]
    AlreadyGraded(SubmissionStatus),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Academics(#[from] AcademicsError),
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

impl From<PermissionDenied> for AssignmentError {
    fn from(_: PermissionDenied) -> Self {
        AssignmentError::PermissionDenied
    }
}

impl AssignmentError {
    pub fn code(&self) -> &'static str {
        match self {
            AssignmentError::PermissionDenied => "permission_denied",
            AssignmentError::InvalidField(_) => "bad_params",
            AssignmentError::NotFound(_) => "not_found",
            AssignmentError::InvalidTransition { .. } => "invalid_transition",
            AssignmentError::NotOpen => "not_open",
            AssignmentError::PastDue => "past_due",
            AssignmentError::AlreadyGraded(_) => "already_graded",
            AssignmentError::Identity(e) => e.code(),
            AssignmentError::Academics(e) => e.code(),
            AssignmentError::Storage(_) => "db_query_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl FromStr for Priority {
    type Err = AssignmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(AssignmentError::InvalidField(format!(
                "unknown priority: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStatus {
    Draft,
    Published,
    Closed,
}

impl AssignmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentStatus::Draft => "draft",
            AssignmentStatus::Published => "published",
            AssignmentStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssignmentStatus {
    type Err = AssignmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(AssignmentStatus::Draft),
            "published" => Ok(AssignmentStatus::Published),
            "closed" => Ok(AssignmentStatus::Closed),
            other => Err(AssignmentError::InvalidField(format!(
                "unknown assignment status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Submitted,
    Graded,
    Returned,
}

impl SubmissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::Graded => "graded",
            SubmissionStatus::Returned => "returned",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = AssignmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "submitted" => Ok(SubmissionStatus::Submitted),
            "graded" => Ok(SubmissionStatus::Graded),
            "returned" => Ok(SubmissionStatus::Returned),
            other => Err(AssignmentError::InvalidField(format!(
                "unknown submission status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: String,
    pub title: String,
    pub description: String,
    pub classroom_id: String,
    pub subject_id: Option<String>,
    pub teacher_id: String,
    pub due_date: DateTime<Utc>,
    pub priority: Priority,
    pub status: AssignmentStatus,
    pub max_points: i64,
    pub allow_late_submission: bool,
    pub late_penalty_percent: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAssignment {
    pub title: String,
    pub description: String,
    pub classroom_id: String,
    pub subject_id: Option<String>,
    pub due_date: DateTime<Utc>,
    pub priority: Priority,
    pub status: AssignmentStatus,
    pub max_points: i64,
    pub allow_late_submission: bool,
    pub late_penalty_percent: i64,
}

#[derive(Debug, Clone, Default)]
pub struct AssignmentFilter {
    pub classroom_id: Option<String>,
    pub subject_id: Option<String>,
    pub teacher_id: Option<String>,
    pub status: Option<AssignmentStatus>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    pub assignment_id: String,
    pub student_id: String,
    pub submission_text: String,
    pub submitted_at: DateTime<Utc>,
    pub status: SubmissionStatus,
    pub is_late: bool,
    pub points: Option<f64>,
    /// Points after the late penalty.
    pub final_points: Option<f64>,
    pub feedback: String,
    pub graded_at: Option<DateTime<Utc>>,
    pub graded_by: Option<String>,
}

/// One row of a student's assignment list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAssignment {
    pub assignment: Assignment,
    pub submission: Option<Submission>,
    /// The submission status, or `not_submitted`.
    pub status: String,
    pub is_overdue: bool,
}

/// Points remaining after the late penalty, two decimals.
pub fn penalized_points(points: f64, late_penalty_percent: i64, is_late: bool) -> f64 {
    if !is_late {
        return points;
    }
    let kept = (100 - late_penalty_percent.clamp(0, 100)) as f64 / 100.0;
    (points * kept * 100.0).round() / 100.0
}

fn parse_enum<T: FromStr<Err = AssignmentError>>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

const ASSIGNMENT_COLUMNS: &str = "id, title, description, classroom_id, subject_id, teacher_id,
    due_date, priority, status, max_points, allow_late_submission, late_penalty_percent,
    created_at, updated_at";

fn assignment_from_row(r: &Row<'_>) -> rusqlite::Result<Assignment> {
    Ok(Assignment {
        id: r.get(0)?,
        title: r.get(1)?,
        description: r.get(2)?,
        classroom_id: r.get(3)?,
        subject_id: r.get(4)?,
        teacher_id: r.get(5)?,
        due_date: parse_ts(6, &r.get::<_, String>(6)?)?,
        priority: parse_enum(7, &r.get::<_, String>(7)?)?,
        status: parse_enum(8, &r.get::<_, String>(8)?)?,
        max_points: r.get(9)?,
        allow_late_submission: r.get::<_, i64>(10)? != 0,
        late_penalty_percent: r.get(11)?,
        created_at: parse_ts(12, &r.get::<_, String>(12)?)?,
        updated_at: parse_ts(13, &r.get::<_, String>(13)?)?,
    })
}

const SUBMISSION_SELECT: &str = "SELECT
       s.id, s.assignment_id, s.student_id, s.submission_text, s.submitted_at, s.status,
       s.points, s.feedback, s.graded_at, s.graded_by, a.due_date, a.late_penalty_percent
     FROM assignment_submissions s
     JOIN assignments a ON a.id = s.assignment_id";

fn submission_from_row(r: &Row<'_>) -> rusqlite::Result<Submission> {
    let submitted_at = parse_ts(4, &r.get::<_, String>(4)?)?;
    let due_date = parse_ts(10, &r.get::<_, String>(10)?)?;
    let penalty: i64 = r.get(11)?;
    let points: Option<f64> = r.get(6)?;
    let graded_at: Option<String> = r.get(8)?;
    let is_late = submitted_at > due_date;
    Ok(Submission {
        id: r.get(0)?,
        assignment_id: r.get(1)?,
        student_id: r.get(2)?,
        submission_text: r.get(3)?,
        submitted_at,
        status: parse_enum(5, &r.get::<_, String>(5)?)?,
        is_late,
        points,
        final_points: points.map(|p| penalized_points(p, penalty, is_late)),
        feedback: r.get(7)?,
        graded_at: graded_at.as_deref().map(|s| parse_ts(8, s)).transpose()?,
        graded_by: r.get(9)?,
    })
}

pub fn create_assignment(
    conn: &Connection,
    actor: &User,
    new: &NewAssignment,
    now: DateTime<Utc>,
) -> Result<Assignment, AssignmentError> {
    policy::require(actor, Resource::Assignment, Action::Create)?;
    if new.title.trim().is_empty() {
        return Err(AssignmentError::InvalidField(
            "title must not be empty".to_string(),
        ));
    }
    if !(1..=MAX_ASSIGNMENT_POINTS).contains(&new.max_points) {
        return Err(AssignmentError::InvalidField(format!(
            "maxPoints must be between 1 and {}",
            MAX_ASSIGNMENT_POINTS
        )));
    }
    if !(0..=100).contains(&new.late_penalty_percent) {
        return Err(AssignmentError::InvalidField(
            "latePenaltyPercent must be between 0 and 100".to_string(),
        ));
    }
    if new.status == AssignmentStatus::Closed {
        return Err(AssignmentError::InvalidField(
            "a new assignment must be draft or published".to_string(),
        ));
    }
    academics::require_classroom(conn, &new.classroom_id)?;
    if let Some(sid) = new.subject_id.as_deref() {
        academics::require_subject(conn, sid)?;
    }

    let assignment = Assignment {
        id: Uuid::new_v4().to_string(),
        title: new.title.trim().to_string(),
        description: new.description.clone(),
        classroom_id: new.classroom_id.clone(),
        subject_id: new.subject_id.clone(),
        teacher_id: actor.id.clone(),
        due_date: new.due_date,
        priority: new.priority,
        status: new.status,
        max_points: new.max_points,
        allow_late_submission: new.allow_late_submission,
        late_penalty_percent: new.late_penalty_percent,
        created_at: now,
        updated_at: now,
    };
    let ts = now.to_rfc3339();
    conn.execute(
        "INSERT INTO assignments(
            id, title, description, classroom_id, subject_id, teacher_id, due_date, priority,
            status, max_points, allow_late_submission, late_penalty_percent, created_at, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
        rusqlite::params![
            &assignment.id,
            &assignment.title,
            &assignment.description,
            &assignment.classroom_id,
            &assignment.subject_id,
            &assignment.teacher_id,
            assignment.due_date.to_rfc3339(),
            assignment.priority.as_str(),
            assignment.status.as_str(),
            assignment.max_points,
            assignment.allow_late_submission as i64,
            assignment.late_penalty_percent,
            &ts,
        ],
    )?;
    tracing::info!(
        assignment_id = %assignment.id,
        classroom_id = %assignment.classroom_id,
        actor_id = %actor.id,
        "assignment created"
    );
    Ok(assignment)
}

pub fn get_assignment(conn: &Connection, id: &str) -> Result<Option<Assignment>, AssignmentError> {
    let sql = format!("SELECT {} FROM assignments WHERE id = ?", ASSIGNMENT_COLUMNS);
    Ok(conn.query_row(&sql, [id], assignment_from_row).optional()?)
}

pub fn require_assignment(conn: &Connection, id: &str) -> Result<Assignment, AssignmentError> {
    get_assignment(conn, id)?.ok_or(AssignmentError::NotFound("assignment"))
}

/// Newest first. Students only ever see published work for their own
/// classroom, whatever the filter says.
pub fn list_assignments(
    conn: &Connection,
    actor: &User,
    filter: &AssignmentFilter,
) -> Result<Vec<Assignment>, AssignmentError> {
    policy::require(actor, Resource::Assignment, Action::Read)?;
    let mut filter = filter.clone();
    if actor.role == Role::Student {
        let Some(classroom_id) = identity::student_classroom(conn, actor)? else {
            return Ok(Vec::new());
        };
        filter.classroom_id = Some(classroom_id);
        filter.status = Some(AssignmentStatus::Published);
    }
    let sql = format!(
        "SELECT {} FROM assignments
         WHERE (?1 IS NULL OR classroom_id = ?1)
           AND (?2 IS NULL OR subject_id = ?2)
           AND (?3 IS NULL OR teacher_id = ?3)
           AND (?4 IS NULL OR status = ?4)
         ORDER BY created_at DESC, rowid DESC",
        ASSIGNMENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            rusqlite::params![
                filter.classroom_id.as_deref(),
                filter.subject_id.as_deref(),
                filter.teacher_id.as_deref(),
                filter.status.map(AssignmentStatus::as_str),
            ],
            assignment_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Published assignments of the student's classroom with their submission
/// state, latest due date first.
pub fn student_assignments(
    conn: &Connection,
    actor: &User,
    student_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<StudentAssignment>, AssignmentError> {
    let student = identity::require_role(conn, student_id, Role::Student)?;
    if !policy::can_view_student(conn, actor, &student.id)? {
        return Err(AssignmentError::PermissionDenied);
    }
    let Some(classroom_id) = identity::student_classroom(conn, &student)? else {
        return Ok(Vec::new());
    };
    let sql = format!(
        "SELECT {} FROM assignments
         WHERE classroom_id = ? AND status = 'published'
         ORDER BY due_date DESC, rowid DESC",
        ASSIGNMENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let assignments = stmt
        .query_map([&classroom_id], assignment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut rows = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let submission = find_submission(conn, &assignment.id, &student.id)?;
        rows.push(StudentAssignment {
            status: submission
                .as_ref()
                .map(|s| s.status.as_str())
                .unwrap_or("not_submitted")
                .to_string(),
            is_overdue: submission.is_none() && assignment.due_date < now,
            assignment,
            submission,
        });
    }
    Ok(rows)
}

fn require_owner(actor: &User, assignment: &Assignment) -> Result<(), AssignmentError> {
    if actor.role != Role::Admin && assignment.teacher_id != actor.id {
        return Err(AssignmentError::PermissionDenied);
    }
    Ok(())
}

/// `draft -> published -> closed`, or `draft -> closed`.
pub fn set_assignment_status(
    conn: &Connection,
    actor: &User,
    assignment_id: &str,
    to: AssignmentStatus,
    now: DateTime<Utc>,
) -> Result<Assignment, AssignmentError> {
    policy::require(actor, Resource::Assignment, Action::Update)?;
    let mut assignment = require_assignment(conn, assignment_id)?;
    require_owner(actor, &assignment)?;
    let allowed = matches!(
        (assignment.status, to),
        (AssignmentStatus::Draft, AssignmentStatus::Published)
            | (AssignmentStatus::Draft, AssignmentStatus::Closed)
            | (AssignmentStatus::Published, AssignmentStatus::Closed)
    );
    if !allowed {
        return Err(AssignmentError::InvalidTransition {
            from: assignment.status,
            to,
        });
    }
    conn.execute(
        "UPDATE assignments SET status = ?, updated_at = ? WHERE id = ?",
        (to.as_str(), now.to_rfc3339(), &assignment.id),
    )?;
    assignment.status = to;
    assignment.updated_at = now;
    tracing::info!(assignment_id = %assignment.id, status = %to, actor_id = %actor.id, "assignment status changed");
    Ok(assignment)
}

fn find_submission(
    conn: &Connection,
    assignment_id: &str,
    student_id: &str,
) -> Result<Option<Submission>, AssignmentError> {
    let sql = format!(
        "{} WHERE s.assignment_id = ? AND s.student_id = ?",
        SUBMISSION_SELECT
    );
    Ok(conn
        .query_row(&sql, (assignment_id, student_id), submission_from_row)
        .optional()?)
}

pub fn require_submission(conn: &Connection, id: &str) -> Result<Submission, AssignmentError> {
    let sql = format!("{} WHERE s.id = ?", SUBMISSION_SELECT);
    conn.query_row(&sql, [id], submission_from_row)
        .optional()?
        .ok_or(AssignmentError::NotFound("submission"))
}

/// Hands in (or replaces) the acting student's work. Replacing is only
/// possible until the submission is graded.
pub fn submit(
    conn: &Connection,
    actor: &User,
    assignment_id: &str,
    text: &str,
    now: DateTime<Utc>,
) -> Result<Submission, AssignmentError> {
    policy::require(actor, Resource::Submission, Action::Create)?;
    if actor.role != Role::Student {
        return Err(AssignmentError::PermissionDenied);
    }
    let assignment = require_assignment(conn, assignment_id)?;
    if identity::student_classroom(conn, actor)?.as_deref() != Some(assignment.classroom_id.as_str()) {
        tracing::warn!(actor_id = %actor.id, assignment_id = %assignment.id, "submission outside own classroom");
        return Err(AssignmentError::PermissionDenied);
    }
    if assignment.status != AssignmentStatus::Published {
        return Err(AssignmentError::NotOpen);
    }
    if now > assignment.due_date && !assignment.allow_late_submission {
        return Err(AssignmentError::PastDue);
    }

    let tx = conn.unchecked_transaction()?;
    if let Some(existing) = find_submission(&tx, &assignment.id, &actor.id)? {
        if existing.status != SubmissionStatus::Submitted {
            return Err(AssignmentError::AlreadyGraded(existing.status));
        }
    }
    tx.execute(
        "INSERT INTO assignment_submissions(id, assignment_id, student_id, submission_text, submitted_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(assignment_id, student_id) DO UPDATE SET
           submission_text = excluded.submission_text,
           submitted_at = excluded.submitted_at",
        (
            Uuid::new_v4().to_string(),
            &assignment.id,
            &actor.id,
            text,
            now.to_rfc3339(),
        ),
    )?;
    let submission = find_submission(&tx, &assignment.id, &actor.id)?
        .ok_or(AssignmentError::NotFound("submission"))?;
    tx.commit()?;
    tracing::info!(
        assignment_id = %assignment.id,
        student_id = %actor.id,
        late = submission.is_late,
        "assignment submitted"
    );
    Ok(submission)
}

pub fn grade_submission(
    conn: &Connection,
    actor: &User,
    submission_id: &str,
    points: f64,
    feedback: &str,
    now: DateTime<Utc>,
) -> Result<Submission, AssignmentError> {
    policy::require(actor, Resource::Submission, Action::Update)?;
    let submission = require_submission(conn, submission_id)?;
    let assignment = require_assignment(conn, &submission.assignment_id)?;
    require_owner(actor, &assignment)?;
    if !points.is_finite() || points < 0.0 || points > assignment.max_points as f64 {
        return Err(AssignmentError::InvalidField(format!(
            "points must be between 0 and {}",
            assignment.max_points
        )));
    }
    conn.execute(
        "UPDATE assignment_submissions
         SET status = 'graded', points = ?, feedback = ?, graded_at = ?, graded_by = ?
         WHERE id = ?",
        rusqlite::params![points, feedback, now.to_rfc3339(), &actor.id, &submission.id],
    )?;
    tracing::info!(submission_id = %submission.id, actor_id = %actor.id, points, "submission graded");
    require_submission(conn, &submission.id)
}

/// Marks a graded submission as handed back to the student.
pub fn return_submission(
    conn: &Connection,
    actor: &User,
    submission_id: &str,
) -> Result<Submission, AssignmentError> {
    policy::require(actor, Resource::Submission, Action::Update)?;
    let submission = require_submission(conn, submission_id)?;
    let assignment = require_assignment(conn, &submission.assignment_id)?;
    require_owner(actor, &assignment)?;
    if submission.status != SubmissionStatus::Graded {
        return Err(AssignmentError::InvalidField(format!(
            "only graded submissions can be returned (is {})",
            submission.status
        )));
    }
    conn.execute(
        "UPDATE assignment_submissions SET status = 'returned' WHERE id = ?",
        [&submission.id],
    )?;
    require_submission(conn, &submission.id)
}

/// All submissions for an assignment, most recent first. Teachers see only
/// their own assignments.
pub fn list_submissions(
    conn: &Connection,
    actor: &User,
    assignment_id: &str,
) -> Result<Vec<Submission>, AssignmentError> {
    policy::require(actor, Resource::Submission, Action::Update)?;
    let assignment = require_assignment(conn, assignment_id)?;
    require_owner(actor, &assignment)?;
    let sql = format!(
        "{} WHERE s.assignment_id = ? ORDER BY s.submitted_at DESC, s.rowid DESC",
        SUBMISSION_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([&assignment.id], submission_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::identity::testing::user;
    use chrono::{Duration, TimeZone};

    struct Fixture {
        conn: Connection,
        teacher: User,
        student: User,
        classroom_id: String,
    }

    fn fixture() -> Fixture {
        let conn = db::open_in_memory().expect("open");
        let teacher = user(&conn, "teach", Role::Teacher);
        let student = user(&conn, "stud", Role::Student);
        let c = academics::create_classroom(&conn, "9A", "9th", &teacher.id).expect("classroom");
        identity::assign_classroom(&conn, &student, Some(&c.id)).expect("assign");
        Fixture {
            conn,
            teacher,
            student,
            classroom_id: c.id,
        }
    }

    fn due() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 10, 23, 59, 0).unwrap()
    }

    fn new_assignment(classroom_id: &str) -> NewAssignment {
        NewAssignment {
            title: "Essay".into(),
            description: "Two pages".into(),
            classroom_id: classroom_id.to_string(),
            subject_id: None,
            due_date: due(),
            priority: Priority::Medium,
            status: AssignmentStatus::Published,
            max_points: 50,
            allow_late_submission: true,
            late_penalty_percent: 10,
        }
    }

    #[test]
    fn late_penalty_applies_only_to_late_work() {
        assert_eq!(penalized_points(40.0, 10, false), 40.0);
        assert_eq!(penalized_points(40.0, 10, true), 36.0);
        assert_eq!(penalized_points(33.0, 15, true), 28.05);
        assert_eq!(penalized_points(10.0, 250, true), 0.0);
    }

    #[test]
    fn submit_grade_and_return() {
        let f = fixture();
        let a = create_assignment(&f.conn, &f.teacher, &new_assignment(&f.classroom_id), due())
            .expect("create");

        let before = due() - Duration::days(1);
        let first = submit(&f.conn, &f.student, &a.id, "draft one", before).expect("submit");
        let second = submit(&f.conn, &f.student, &a.id, "final", before).expect("resubmit");
        assert_eq!(first.id, second.id);
        assert_eq!(second.submission_text, "final");
        assert!(!second.is_late);

        let graded = grade_submission(&f.conn, &f.teacher, &second.id, 45.0, "Good", before)
            .expect("grade");
        assert_eq!(graded.status, SubmissionStatus::Graded);
        assert_eq!(graded.final_points, Some(45.0));
        assert_eq!(
            submit(&f.conn, &f.student, &a.id, "again", before).unwrap_err().code(),
            "already_graded"
        );

        let returned = return_submission(&f.conn, &f.teacher, &graded.id).expect("return");
        assert_eq!(returned.status, SubmissionStatus::Returned);
    }

    #[test]
    fn late_work_is_penalised_or_refused() {
        let f = fixture();
        let a = create_assignment(&f.conn, &f.teacher, &new_assignment(&f.classroom_id), due())
            .expect("create");
        let after = due() + Duration::hours(2);
        let late = submit(&f.conn, &f.student, &a.id, "sorry", after).expect("late submit");
        assert!(late.is_late);
        let graded = grade_submission(&f.conn, &f.teacher, &late.id, 40.0, "", after).expect("grade");
        assert_eq!(graded.points, Some(40.0));
        assert_eq!(graded.final_points, Some(36.0));

        let mut strict = new_assignment(&f.classroom_id);
        strict.allow_late_submission = false;
        let b = create_assignment(&f.conn, &f.teacher, &strict, due()).expect("create");
        assert_eq!(
            submit(&f.conn, &f.student, &b.id, "sorry", after).unwrap_err().code(),
            "past_due"
        );
    }

    #[test]
    fn only_classroom_students_submit_to_published_work() {
        let f = fixture();
        let mut draft = new_assignment(&f.classroom_id);
        draft.status = AssignmentStatus::Draft;
        let a = create_assignment(&f.conn, &f.teacher, &draft, due()).expect("create");
        let now = due() - Duration::days(2);
        assert_eq!(submit(&f.conn, &f.student, &a.id, "x", now).unwrap_err().code(), "not_open");

        let outsider = user(&f.conn, "outsider", Role::Student);
        set_assignment_status(&f.conn, &f.teacher, &a.id, AssignmentStatus::Published, now)
            .expect("publish");
        assert_eq!(
            submit(&f.conn, &outsider, &a.id, "x", now).unwrap_err().code(),
            "permission_denied"
        );
        assert_eq!(
            submit(&f.conn, &f.teacher, &a.id, "x", now).unwrap_err().code(),
            "permission_denied"
        );

        set_assignment_status(&f.conn, &f.teacher, &a.id, AssignmentStatus::Closed, now)
            .expect("close");
        assert_eq!(
            set_assignment_status(&f.conn, &f.teacher, &a.id, AssignmentStatus::Published, now)
                .unwrap_err()
                .code(),
            "invalid_transition"
        );
    }

    #[test]
    fn students_see_only_published_work_with_status() {
        let f = fixture();
        let now = due() + Duration::days(1);
        let a = create_assignment(&f.conn, &f.teacher, &new_assignment(&f.classroom_id), now)
            .expect("published");
        let mut hidden = new_assignment(&f.classroom_id);
        hidden.status = AssignmentStatus::Draft;
        create_assignment(&f.conn, &f.teacher, &hidden, now).expect("draft");

        let listed = list_assignments(&f.conn, &f.student, &AssignmentFilter::default()).expect("list");
        assert_eq!(listed.len(), 1);
        let all = list_assignments(&f.conn, &f.teacher, &AssignmentFilter::default()).expect("list");
        assert_eq!(all.len(), 2);

        let rows = student_assignments(&f.conn, &f.student, &f.student.id, now).expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].assignment.id, a.id);
        assert_eq!(rows[0].status, "not_submitted");
        assert!(rows[0].is_overdue);

        let other = user(&f.conn, "other", Role::Student);
        assert_eq!(
            student_assignments(&f.conn, &other, &f.student.id, now).unwrap_err().code(),
            "permission_denied"
        );
    }

    #[test]
    fn teachers_manage_only_their_own_assignments() {
        let f = fixture();
        let other = user(&f.conn, "other", Role::Teacher);
        let a = create_assignment(&f.conn, &f.teacher, &new_assignment(&f.classroom_id), due())
            .expect("create");
        let s = submit(&f.conn, &f.student, &a.id, "work", due() - Duration::days(1)).expect("submit");

        assert_eq!(
            list_submissions(&f.conn, &other, &a.id).unwrap_err().code(),
            "permission_denied"
        );
        assert_eq!(
            grade_submission(&f.conn, &f.teacher, &s.id, 51.0, "", due()).unwrap_err().code(),
            "bad_params"
        );
        assert_eq!(list_submissions(&f.conn, &f.teacher, &a.id).expect("list").len(), 1);
        assert_eq!(
            create_assignment(&f.conn, &f.student, &new_assignment(&f.classroom_id), due())
                .unwrap_err()
                .code(),
            "permission_denied"
        );
    }
}
