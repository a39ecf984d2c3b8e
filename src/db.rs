use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "school.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.to_string_lossy()))?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    init_schema(&conn)?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT,
            role TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classrooms(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            grade TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classrooms_teacher ON classrooms(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS admin_profiles(
            user_id TEXT PRIMARY KEY,
            employee_id TEXT NOT NULL UNIQUE,
            department TEXT NOT NULL DEFAULT '',
            permissions_level TEXT NOT NULL DEFAULT 'admin',
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_profiles(
            user_id TEXT PRIMARY KEY,
            teacher_code TEXT NOT NULL,
            department TEXT NOT NULL DEFAULT '',
            qualification TEXT NOT NULL DEFAULT '',
            hire_date TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_profiles(
            user_id TEXT PRIMARY KEY,
            student_code TEXT NOT NULL,
            roll_number TEXT NOT NULL DEFAULT '',
            grade_level TEXT NOT NULL DEFAULT '',
            classroom_id TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_profiles_classroom ON student_profiles(classroom_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS parent_profiles(
            user_id TEXT PRIMARY KEY,
            relationship TEXT NOT NULL DEFAULT 'guardian',
            occupation TEXT NOT NULL DEFAULT '',
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS parent_students(
            parent_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            PRIMARY KEY(parent_id, student_id),
            FOREIGN KEY(parent_id) REFERENCES users(id),
            FOREIGN KEY(student_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_teachers(
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            classroom_id TEXT NOT NULL,
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(teacher_id) REFERENCES users(id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            UNIQUE(subject_id, teacher_id, classroom_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_teachers_classroom ON subject_teachers(classroom_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_sessions(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            classroom_id TEXT NOT NULL,
            subject_id TEXT,
            teacher_id TEXT NOT NULL,
            attendance_type TEXT NOT NULL DEFAULT 'daily',
            status TEXT NOT NULL DEFAULT 'active',
            start_time TEXT NOT NULL,
            session_date TEXT NOT NULL DEFAULT '',
            end_time TEXT,
            duration_minutes INTEGER NOT NULL DEFAULT 60,
            auto_close INTEGER NOT NULL DEFAULT 1,
            late_threshold_minutes INTEGER NOT NULL DEFAULT 15,
            location_required INTEGER NOT NULL DEFAULT 0,
            latitude REAL,
            longitude REAL,
            location_radius_meters INTEGER NOT NULL DEFAULT 100,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        )",
        [],
    )?;
    // Sessions are looked up by calendar day for quick-mark. Older workspaces
    // lack the column; add and backfill from start_time.
    ensure_sessions_session_date(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_sessions_classroom_date
         ON attendance_sessions(classroom_id, session_date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_sessions_teacher ON attendance_sessions(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'absent',
            marked_at TEXT,
            marked_by TEXT,
            latitude REAL,
            longitude REAL,
            notes TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(session_id) REFERENCES attendance_sessions(id),
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(marked_by) REFERENCES users(id),
            UNIQUE(session_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_student ON attendance_records(student_id)",
        [],
    )?;

    // subject_key is '' for classroom-wide rows so the UNIQUE constraint
    // holds (NULLs never collide in SQLite).
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_total_sessions(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            classroom_id TEXT NOT NULL,
            subject_key TEXT NOT NULL DEFAULT '',
            total_sessions INTEGER NOT NULL DEFAULT 0,
            created_by TEXT NOT NULL,
            updated_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            UNIQUE(student_id, classroom_id, subject_key)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_custom_attendance(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            classroom_id TEXT NOT NULL,
            subject_key TEXT NOT NULL DEFAULT '',
            present_count INTEGER NOT NULL DEFAULT 0,
            late_count INTEGER NOT NULL DEFAULT 0,
            absent_count INTEGER NOT NULL DEFAULT 0,
            created_by TEXT NOT NULL,
            updated_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            UNIQUE(student_id, classroom_id, subject_key)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            title TEXT NOT NULL,
            grade_type TEXT NOT NULL,
            points_earned REAL NOT NULL,
            points_possible REAL NOT NULL,
            percentage REAL,
            date_assigned TEXT NOT NULL,
            date_due TEXT,
            date_graded TEXT NOT NULL,
            comments TEXT NOT NULL DEFAULT '',
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student ON grades(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignments(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            classroom_id TEXT NOT NULL,
            subject_id TEXT,
            teacher_id TEXT NOT NULL,
            due_date TEXT NOT NULL,
            priority TEXT NOT NULL DEFAULT 'medium',
            status TEXT NOT NULL DEFAULT 'draft',
            max_points INTEGER NOT NULL DEFAULT 100,
            allow_late_submission INTEGER NOT NULL DEFAULT 1,
            late_penalty_percent INTEGER NOT NULL DEFAULT 10,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_classroom ON assignments(classroom_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignment_submissions(
            id TEXT PRIMARY KEY,
            assignment_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            submission_text TEXT NOT NULL DEFAULT '',
            submitted_at TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'submitted',
            points REAL,
            feedback TEXT NOT NULL DEFAULT '',
            graded_at TEXT,
            graded_by TEXT,
            UNIQUE(assignment_id, student_id),
            FOREIGN KEY(assignment_id) REFERENCES assignments(id) ON DELETE CASCADE,
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(graded_by) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS feedback_sessions(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            category TEXT NOT NULL DEFAULT 'general',
            classroom_id TEXT,
            subject_id TEXT,
            created_by TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            visibility TEXT NOT NULL DEFAULT 'private',
            allow_anonymous INTEGER NOT NULL DEFAULT 0,
            allow_multiple_responses INTEGER NOT NULL DEFAULT 0,
            start_date TEXT NOT NULL,
            end_date TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(created_by) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS feedback_targets(
            session_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            PRIMARY KEY(session_id, user_id),
            FOREIGN KEY(session_id) REFERENCES feedback_sessions(id) ON DELETE CASCADE,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS feedback_responses(
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            respondent_id TEXT,
            response_json TEXT NOT NULL,
            is_complete INTEGER NOT NULL DEFAULT 1,
            submitted_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(session_id) REFERENCES feedback_sessions(id) ON DELETE CASCADE,
            FOREIGN KEY(respondent_id) REFERENCES users(id)
        )",
        [],
    )?;
    // Who has answered, kept apart from the response so anonymous answers
    // carry no respondent.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS feedback_participants(
            session_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            response_id TEXT NOT NULL,
            PRIMARY KEY(session_id, user_id),
            FOREIGN KEY(session_id) REFERENCES feedback_sessions(id) ON DELETE CASCADE,
            FOREIGN KEY(response_id) REFERENCES feedback_responses(id) ON DELETE CASCADE
        )",
        [],
    )?;

    Ok(())
}

fn ensure_sessions_session_date(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "attendance_sessions", "session_date")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE attendance_sessions ADD COLUMN session_date TEXT NOT NULL DEFAULT ''",
        [],
    )?;
    conn.execute(
        "UPDATE attendance_sessions SET session_date = substr(start_time, 1, 10)",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Reads an RFC 3339 column written by this crate.
pub fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("setting {} is not valid json", key))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, value.to_string()),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let conn = open_in_memory().expect("open");
        init_schema(&conn).expect("second init");
        assert!(table_has_column(&conn, "attendance_sessions", "session_date").expect("pragma"));
        assert!(!table_has_column(&conn, "attendance_sessions", "nope").expect("pragma"));
    }

    #[test]
    fn settings_round_trip_and_overwrite() {
        let conn = open_in_memory().expect("open");
        assert_eq!(settings_get_json(&conn, "a").expect("get"), None);
        settings_set_json(&conn, "a", &serde_json::json!({ "x": 1 })).expect("set");
        settings_set_json(&conn, "a", &serde_json::json!(7)).expect("set");
        assert_eq!(
            settings_get_json(&conn, "a").expect("get"),
            Some(serde_json::json!(7))
        );
    }
}
