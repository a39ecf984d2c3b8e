use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
    Parent,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
            Role::Parent => "parent",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            "parent" => Ok(Role::Parent),
            other => Err(IdentityError::InvalidRole(other.to_string())),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum IdentityError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("unknown role: {0}")]
    InvalidRole(String),
    #[error("user {id} is a {actual}, expected a {expected}")]
    WrongRole {
        id: String,
        expected: Role,
        actual: Role,
    },
    #[error("username already taken: {0}")]
    DuplicateUsername(String),
    #[error("{0}")]
    InvalidField(String),
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

impl IdentityError {
    pub fn code(&self) -> &'static str {
        match self {
            IdentityError::NotFound(_) => "not_found",
            IdentityError::InvalidRole(_) | IdentityError::InvalidField(_) => "bad_params",
            IdentityError::WrongRole { .. } => "wrong_role",
            IdentityError::DuplicateUsername(_) => "duplicate",
            IdentityError::Storage(_) => "db_query_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub role: Role,
    pub active: bool,
    pub created_at: String,
}

impl User {
    pub fn full_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        let name = name.trim();
        if name.is_empty() {
            self.username.clone()
        } else {
            name.to_string()
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub role: Role,
}

/// A student together with the classroom from their profile.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub id: String,
    pub display_name: String,
    pub student_code: String,
    pub classroom_id: Option<String>,
}

const USER_COLUMNS: &str = "id, username, first_name, last_name, email, role, active, created_at";

fn user_from_row(r: &Row<'_>) -> rusqlite::Result<User> {
    let role_raw: String = r.get(5)?;
    let role = role_raw.parse::<Role>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(User {
        id: r.get(0)?,
        username: r.get(1)?,
        first_name: r.get(2)?,
        last_name: r.get(3)?,
        email: r.get(4)?,
        role,
        active: r.get::<_, i64>(6)? != 0,
        created_at: r.get(7)?,
    })
}

fn random_two_digits() -> u128 {
    Uuid::new_v4().as_u128() % 90 + 10
}

fn name_prefix(first_name: &str, fallback: &str) -> String {
    let p: String = first_name.chars().take(2).collect::<String>().to_uppercase();
    if p.is_empty() {
        fallback.to_string()
    } else {
        p
    }
}

/// Creates the user and the profile row for its role in one transaction.
pub fn create_user(
    conn: &Connection,
    new_user: &NewUser,
    now: DateTime<Utc>,
) -> Result<User, IdentityError> {
    let username = new_user.username.trim();
    if username.is_empty() {
        return Err(IdentityError::InvalidField(
            "username must not be empty".to_string(),
        ));
    }

    let tx = conn.unchecked_transaction()?;
    let taken = tx
        .query_row("SELECT 1 FROM users WHERE username = ?", [username], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if taken {
        return Err(IdentityError::DuplicateUsername(username.to_string()));
    }

    let id = Uuid::new_v4().to_string();
    let ts = now.to_rfc3339();
    tx.execute(
        "INSERT INTO users(id, username, first_name, last_name, email, role, active, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, 1, ?, ?)",
        (
            &id,
            username,
            new_user.first_name.trim(),
            new_user.last_name.trim(),
            &new_user.email,
            new_user.role.as_str(),
            &ts,
            &ts,
        ),
    )?;
    let user = User {
        id,
        username: username.to_string(),
        first_name: new_user.first_name.trim().to_string(),
        last_name: new_user.last_name.trim().to_string(),
        email: new_user.email.clone(),
        role: new_user.role,
        active: true,
        created_at: ts,
    };
    ensure_profile(&tx, &user)?;
    tx.commit()?;
    Ok(user)
}

/// Creates the role-specific profile if it is missing. Returns whether a
/// row was inserted.
pub fn ensure_profile(conn: &Connection, user: &User) -> Result<bool, IdentityError> {
    let inserted = match user.role {
        Role::Admin => conn.execute(
            "INSERT OR IGNORE INTO admin_profiles(user_id, employee_id) VALUES(?, ?)",
            (
                &user.id,
                format!("ADM{:08}", Uuid::new_v4().as_u128() % 100_000_000),
            ),
        )?,
        Role::Teacher => conn.execute(
            "INSERT OR IGNORE INTO teacher_profiles(user_id, teacher_code) VALUES(?, ?)",
            (
                &user.id,
                format!("{}{}", name_prefix(&user.first_name, "TC"), random_two_digits()),
            ),
        )?,
        Role::Student => conn.execute(
            "INSERT OR IGNORE INTO student_profiles(user_id, student_code) VALUES(?, ?)",
            (
                &user.id,
                format!("{}{}", name_prefix(&user.first_name, "ST"), random_two_digits()),
            ),
        )?,
        Role::Parent => conn.execute(
            "INSERT OR IGNORE INTO parent_profiles(user_id) VALUES(?)",
            [&user.id],
        )?,
    };
    if inserted > 0 {
        tracing::debug!(user_id = %user.id, role = %user.role, "created missing profile");
    }
    Ok(inserted > 0)
}

pub fn get_user(conn: &Connection, id: &str) -> Result<Option<User>, IdentityError> {
    let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
    Ok(conn.query_row(&sql, [id], user_from_row).optional()?)
}

pub fn require_user(conn: &Connection, id: &str) -> Result<User, IdentityError> {
    get_user(conn, id)?.ok_or(IdentityError::NotFound("user"))
}

pub fn require_role(conn: &Connection, id: &str, expected: Role) -> Result<User, IdentityError> {
    let user = get_user(conn, id)?.ok_or(match expected {
        Role::Student => IdentityError::NotFound("student"),
        Role::Teacher => IdentityError::NotFound("teacher"),
        Role::Parent => IdentityError::NotFound("parent"),
        Role::Admin => IdentityError::NotFound("admin"),
    })?;
    if user.role != expected {
        return Err(IdentityError::WrongRole {
            id: user.id,
            expected,
            actual: user.role,
        });
    }
    Ok(user)
}

pub fn list_users(conn: &Connection, role: Option<Role>) -> Result<Vec<User>, IdentityError> {
    let sql = format!(
        "SELECT {} FROM users WHERE (?1 IS NULL OR role = ?1) ORDER BY first_name, last_name, username",
        USER_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let users = stmt
        .query_map([role.map(Role::as_str)], user_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}

pub fn set_active(
    conn: &Connection,
    id: &str,
    active: bool,
    now: DateTime<Utc>,
) -> Result<(), IdentityError> {
    let changed = conn.execute(
        "UPDATE users SET active = ?, updated_at = ? WHERE id = ?",
        (active as i64, now.to_rfc3339(), id),
    )?;
    if changed == 0 {
        return Err(IdentityError::NotFound("user"));
    }
    Ok(())
}

/// Classroom from the student's profile. A missing profile is created on
/// the way through.
pub fn student_classroom(conn: &Connection, student: &User) -> Result<Option<String>, IdentityError> {
    ensure_profile(conn, student)?;
    let classroom: Option<String> = conn.query_row(
        "SELECT classroom_id FROM student_profiles WHERE user_id = ?",
        [&student.id],
        |r| r.get(0),
    )?;
    Ok(classroom)
}

pub fn assign_classroom(
    conn: &Connection,
    student: &User,
    classroom_id: Option<&str>,
) -> Result<(), IdentityError> {
    ensure_profile(conn, student)?;
    if let Some(cid) = classroom_id {
        let exists = conn
            .query_row("SELECT 1 FROM classrooms WHERE id = ?", [cid], |r| {
                r.get::<_, i64>(0)
            })
            .optional()?
            .is_some();
        if !exists {
            return Err(IdentityError::NotFound("classroom"));
        }
    }
    conn.execute(
        "UPDATE student_profiles SET classroom_id = ? WHERE user_id = ?",
        (classroom_id, &student.id),
    )?;
    Ok(())
}

pub fn link_parent(conn: &Connection, parent: &User, student: &User) -> Result<(), IdentityError> {
    ensure_profile(conn, parent)?;
    conn.execute(
        "INSERT OR IGNORE INTO parent_students(parent_id, student_id) VALUES(?, ?)",
        (&parent.id, &student.id),
    )?;
    Ok(())
}

pub fn parent_has_student(
    conn: &Connection,
    parent_id: &str,
    student_id: &str,
) -> Result<bool, IdentityError> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM parent_students WHERE parent_id = ? AND student_id = ?",
            (parent_id, student_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

/// Students ordered by name, optionally restricted to one classroom.
pub fn list_students(
    conn: &Connection,
    classroom_id: Option<&str>,
) -> Result<Vec<StudentSummary>, IdentityError> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.first_name, u.last_name, u.username, COALESCE(p.student_code, ''), p.classroom_id
         FROM users u
         LEFT JOIN student_profiles p ON p.user_id = u.id
         WHERE u.role = 'student' AND (?1 IS NULL OR p.classroom_id = ?1)
         ORDER BY u.first_name, u.last_name, u.username",
    )?;
    let rows = stmt
        .query_map([classroom_id], |r| {
            let first: String = r.get(1)?;
            let last: String = r.get(2)?;
            let username: String = r.get(3)?;
            let name = format!("{} {}", first, last).trim().to_string();
            Ok(StudentSummary {
                id: r.get(0)?,
                display_name: if name.is_empty() { username } else { name },
                student_code: r.get(4)?,
                classroom_id: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub fn user(conn: &Connection, username: &str, role: Role) -> User {
        create_user(
            conn,
            &NewUser {
                username: username.to_string(),
                first_name: username.to_string(),
                last_name: "Test".to_string(),
                email: None,
                role,
            },
            Utc::now(),
        )
        .expect("create user")
    }
}
