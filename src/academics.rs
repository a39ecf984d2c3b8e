use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

use crate::identity::{self, IdentityError, Role};

#[derive(thiserror::Error, Debug)]
pub enum AcademicsError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    InvalidField(String),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

impl AcademicsError {
    pub fn code(&self) -> &'static str {
        match self {
            AcademicsError::NotFound(_) => "not_found",
            AcademicsError::InvalidField(_) => "bad_params",
            AcademicsError::Identity(e) => e.code(),
            AcademicsError::Storage(_) => "db_query_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classroom {
    pub id: String,
    pub code: String,
    pub name: String,
    pub grade: String,
    pub teacher_id: String,
    pub student_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub code: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAssignment {
    pub id: String,
    pub subject_id: String,
    pub subject_name: String,
    pub teacher_id: String,
    pub classroom_id: String,
}

fn eight_digit_code(prefix: &str) -> String {
    format!(
        "{}{}",
        prefix,
        10_000_000 + Uuid::new_v4().as_u128() % 90_000_000
    )
}

fn required_text(value: &str, field: &str) -> Result<String, AcademicsError> {
    let t = value.trim();
    if t.is_empty() {
        return Err(AcademicsError::InvalidField(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(t.to_string())
}

const CLASSROOM_SELECT: &str = "SELECT
       c.id, c.code, c.name, c.grade, c.teacher_id,
       (SELECT COUNT(*) FROM student_profiles p WHERE p.classroom_id = c.id) AS student_count
     FROM classrooms c";

fn classroom_from_row(r: &Row<'_>) -> rusqlite::Result<Classroom> {
    Ok(Classroom {
        id: r.get(0)?,
        code: r.get(1)?,
        name: r.get(2)?,
        grade: r.get(3)?,
        teacher_id: r.get(4)?,
        student_count: r.get(5)?,
    })
}

pub fn create_classroom(
    conn: &Connection,
    name: &str,
    grade: &str,
    teacher_id: &str,
) -> Result<Classroom, AcademicsError> {
    let name = required_text(name, "name")?;
    identity::require_role(conn, teacher_id, Role::Teacher)?;

    let id = Uuid::new_v4().to_string();
    let code = eight_digit_code("CLS");
    conn.execute(
        "INSERT INTO classrooms(id, code, name, grade, teacher_id) VALUES(?, ?, ?, ?, ?)",
        (&id, &code, &name, grade.trim(), teacher_id),
    )?;
    Ok(Classroom {
        id,
        code,
        name,
        grade: grade.trim().to_string(),
        teacher_id: teacher_id.to_string(),
        student_count: 0,
    })
}

pub fn list_classrooms(conn: &Connection) -> Result<Vec<Classroom>, AcademicsError> {
    let sql = format!("{} ORDER BY c.name", CLASSROOM_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], classroom_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_classroom(conn: &Connection, id: &str) -> Result<Option<Classroom>, AcademicsError> {
    let sql = format!("{} WHERE c.id = ?", CLASSROOM_SELECT);
    Ok(conn.query_row(&sql, [id], classroom_from_row).optional()?)
}

pub fn require_classroom(conn: &Connection, id: &str) -> Result<Classroom, AcademicsError> {
    get_classroom(conn, id)?.ok_or(AcademicsError::NotFound("classroom"))
}

pub fn create_subject(
    conn: &Connection,
    name: &str,
    description: &str,
) -> Result<Subject, AcademicsError> {
    let name = required_text(name, "name")?;
    let id = Uuid::new_v4().to_string();
    let code = eight_digit_code("SUB");
    conn.execute(
        "INSERT INTO subjects(id, code, name, description) VALUES(?, ?, ?, ?)",
        (&id, &code, &name, description.trim()),
    )?;
    Ok(Subject {
        id,
        code,
        name,
        description: description.trim().to_string(),
    })
}

pub fn list_subjects(conn: &Connection) -> Result<Vec<Subject>, AcademicsError> {
    let mut stmt = conn.prepare("SELECT id, code, name, description FROM subjects ORDER BY name")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Subject {
                id: r.get(0)?,
                code: r.get(1)?,
                name: r.get(2)?,
                description: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn require_subject(conn: &Connection, id: &str) -> Result<Subject, AcademicsError> {
    conn.query_row(
        "SELECT id, code, name, description FROM subjects WHERE id = ?",
        [id],
        |r| {
            Ok(Subject {
                id: r.get(0)?,
                code: r.get(1)?,
                name: r.get(2)?,
                description: r.get(3)?,
            })
        },
    )
    .optional()?
    .ok_or(AcademicsError::NotFound("subject"))
}

/// Links a teacher to a subject in a classroom. Repeating the same
/// assignment returns the existing row.
pub fn assign_subject_teacher(
    conn: &Connection,
    subject_id: &str,
    teacher_id: &str,
    classroom_id: &str,
) -> Result<SubjectAssignment, AcademicsError> {
    let subject = require_subject(conn, subject_id)?;
    identity::require_role(conn, teacher_id, Role::Teacher)?;
    require_classroom(conn, classroom_id)?;

    conn.execute(
        "INSERT OR IGNORE INTO subject_teachers(id, subject_id, teacher_id, classroom_id)
         VALUES(?, ?, ?, ?)",
        (Uuid::new_v4().to_string(), subject_id, teacher_id, classroom_id),
    )?;
    let id: String = conn.query_row(
        "SELECT id FROM subject_teachers WHERE subject_id = ? AND teacher_id = ? AND classroom_id = ?",
        (subject_id, teacher_id, classroom_id),
        |r| r.get(0),
    )?;
    Ok(SubjectAssignment {
        id,
        subject_id: subject.id,
        subject_name: subject.name,
        teacher_id: teacher_id.to_string(),
        classroom_id: classroom_id.to_string(),
    })
}

pub fn list_subject_assignments(
    conn: &Connection,
    classroom_id: Option<&str>,
) -> Result<Vec<SubjectAssignment>, AcademicsError> {
    let mut stmt = conn.prepare(
        "SELECT st.id, st.subject_id, s.name, st.teacher_id, st.classroom_id
         FROM subject_teachers st
         JOIN subjects s ON s.id = st.subject_id
         WHERE (?1 IS NULL OR st.classroom_id = ?1)
         ORDER BY s.name",
    )?;
    let rows = stmt
        .query_map([classroom_id], |r| {
            Ok(SubjectAssignment {
                id: r.get(0)?,
                subject_id: r.get(1)?,
                subject_name: r.get(2)?,
                teacher_id: r.get(3)?,
                classroom_id: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
