use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;

use crate::grades::{self, GradeType, NewGrade};
use crate::ipc::helpers::{
    get_optional_date, get_optional_str, get_required_f64, get_required_str, resolve_actor,
    to_json, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};

fn grades_create(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let now = Utc::now();
    let new = NewGrade {
        student_id: get_required_str(params, "studentId")?,
        subject_id: get_required_str(params, "subjectId")?,
        title: get_required_str(params, "title")?,
        grade_type: get_required_str(params, "gradeType")?.parse::<GradeType>()?,
        points_earned: get_required_f64(params, "pointsEarned")?,
        points_possible: get_required_f64(params, "pointsPossible")?,
        date_assigned: get_optional_date(params, "dateAssigned")?.unwrap_or(now.date_naive()),
        date_due: get_optional_date(params, "dateDue")?,
        comments: get_optional_str(params, "comments").unwrap_or_default(),
    };
    let grade = grades::create_grade(conn, &actor, &new, now)?;
    Ok(json!({ "grade": to_json(&grade)? }))
}

fn grades_list(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let student_id = get_required_str(params, "studentId")?;
    let subject_id = get_optional_str(params, "subjectId");
    let rows = grades::list_grades(conn, &actor, &student_id, subject_id.as_deref())?;
    Ok(json!({ "grades": to_json(&rows)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.create" => Some(with_db(state, req, grades_create)),
        "grades.list" => Some(with_db(state, req, grades_list)),
        _ => None,
    }
}
