use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::str::FromStr;
use uuid::Uuid;

use crate::academics::{self, AcademicsError};
use crate::identity::{self, IdentityError, Role, User};
use crate::policy::{self, Action, PermissionDenied, Resource};

#[derive(thiserror::Error, Debug)]
pub enum GradeError {
    #[error("Permission denied")]
    PermissionDenied,
    #[error("{0}")]
    InvalidField(String),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Academics(#[from] AcademicsError),
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

impl From<PermissionDenied> for GradeError {
    fn from(_: PermissionDenied) -> Self {
        GradeError::PermissionDenied
    }
}

impl GradeError {
    pub fn code(&self) -> &'static str {
        match self {
            GradeError::PermissionDenied => "permission_denied",
            GradeError::InvalidField(_) => "bad_params",
            GradeError::Identity(e) => e.code(),
            GradeError::Academics(e) => e.code(),
            GradeError::Storage(_) => "db_query_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GradeType {
    Assignment,
    Quiz,
    Exam,
    Project,
    Participation,
}

impl GradeType {
    pub fn as_str(self) -> &'static str {
        match self {
            GradeType::Assignment => "assignment",
            GradeType::Quiz => "quiz",
            GradeType::Exam => "exam",
            GradeType::Project => "project",
            GradeType::Participation => "participation",
        }
    }
}

impl FromStr for GradeType {
    type Err = GradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "assignment" => Ok(GradeType::Assignment),
            "quiz" => Ok(GradeType::Quiz),
            "exam" => Ok(GradeType::Exam),
            "project" => Ok(GradeType::Project),
            "participation" => Ok(GradeType::Participation),
            other => Err(GradeError::InvalidField(format!(
                "unknown grade type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    pub id: String,
    pub student_id: String,
    pub subject_id: String,
    pub teacher_id: String,
    pub title: String,
    pub grade_type: String,
    pub points_earned: f64,
    pub points_possible: f64,
    pub percentage: Option<f64>,
    pub date_assigned: String,
    pub date_due: Option<String>,
    pub date_graded: String,
    pub comments: String,
}

#[derive(Debug, Clone)]
pub struct NewGrade {
    pub student_id: String,
    pub subject_id: String,
    pub title: String,
    pub grade_type: GradeType,
    pub points_earned: f64,
    pub points_possible: f64,
    pub date_assigned: NaiveDate,
    pub date_due: Option<NaiveDate>,
    pub comments: String,
}

/// `earned / possible * 100`; nothing when possible is zero.
pub fn grade_percentage(points_earned: f64, points_possible: f64) -> Option<f64> {
    (points_possible > 0.0).then(|| points_earned / points_possible * 100.0)
}

pub fn create_grade(
    conn: &Connection,
    actor: &User,
    new: &NewGrade,
    now: DateTime<Utc>,
) -> Result<Grade, GradeError> {
    policy::require(actor, Resource::Grade, Action::Create)?;
    if new.title.trim().is_empty() {
        return Err(GradeError::InvalidField("title must not be empty".to_string()));
    }
    if !new.points_earned.is_finite()
        || !new.points_possible.is_finite()
        || new.points_earned < 0.0
        || new.points_possible < 0.0
    {
        return Err(GradeError::InvalidField(
            "points must be non-negative numbers".to_string(),
        ));
    }
    identity::require_role(conn, &new.student_id, Role::Student)?;
    academics::require_subject(conn, &new.subject_id)?;

    let grade = Grade {
        id: Uuid::new_v4().to_string(),
        student_id: new.student_id.clone(),
        subject_id: new.subject_id.clone(),
        teacher_id: actor.id.clone(),
        title: new.title.trim().to_string(),
        grade_type: new.grade_type.as_str().to_string(),
        points_earned: new.points_earned,
        points_possible: new.points_possible,
        percentage: grade_percentage(new.points_earned, new.points_possible),
        date_assigned: new.date_assigned.to_string(),
        date_due: new.date_due.map(|d| d.to_string()),
        date_graded: now.to_rfc3339(),
        comments: new.comments.clone(),
    };
    conn.execute(
        "INSERT INTO grades(
            id, student_id, subject_id, teacher_id, title, grade_type, points_earned,
            points_possible, percentage, date_assigned, date_due, date_graded, comments)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &grade.id,
            &grade.student_id,
            &grade.subject_id,
            &grade.teacher_id,
            &grade.title,
            &grade.grade_type,
            grade.points_earned,
            grade.points_possible,
            grade.percentage,
            &grade.date_assigned,
            &grade.date_due,
            &grade.date_graded,
            &grade.comments,
        ],
    )?;
    tracing::info!(grade_id = %grade.id, student_id = %grade.student_id, actor_id = %actor.id, "grade recorded");
    Ok(grade)
}

/// Grades for one student, most recently graded first.
pub fn list_grades(
    conn: &Connection,
    actor: &User,
    student_id: &str,
    subject_id: Option<&str>,
) -> Result<Vec<Grade>, GradeError> {
    let student = identity::require_role(conn, student_id, Role::Student)?;
    if !policy::can_view_student(conn, actor, &student.id)? {
        return Err(GradeError::PermissionDenied);
    }
    let mut stmt = conn.prepare(
        "SELECT id, student_id, subject_id, teacher_id, title, grade_type, points_earned,
                points_possible, percentage, date_assigned, date_due, date_graded, comments
         FROM grades
         WHERE student_id = ?1 AND (?2 IS NULL OR subject_id = ?2)
         ORDER BY date_graded DESC, rowid DESC",
    )?;
    let rows = stmt
        .query_map((&student.id, subject_id), |r| {
            Ok(Grade {
                id: r.get(0)?,
                student_id: r.get(1)?,
                subject_id: r.get(2)?,
                teacher_id: r.get(3)?,
                title: r.get(4)?,
                grade_type: r.get(5)?,
                points_earned: r.get(6)?,
                points_possible: r.get(7)?,
                percentage: r.get(8)?,
                date_assigned: r.get(9)?,
                date_due: r.get(10)?,
                date_graded: r.get(11)?,
                comments: r.get(12)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
