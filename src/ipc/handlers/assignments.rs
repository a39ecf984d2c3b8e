use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;

use crate::assignments::{self, AssignmentFilter, AssignmentStatus, NewAssignment, Priority};
use crate::ipc::helpers::{
    get_optional_bool, get_optional_datetime, get_optional_i64, get_optional_str,
    get_required_f64, get_required_str, resolve_actor, to_json, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};

fn assignments_create(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let new = NewAssignment {
        title: get_required_str(params, "title")?,
        description: get_optional_str(params, "description").unwrap_or_default(),
        classroom_id: get_required_str(params, "classroomId")?,
        subject_id: get_optional_str(params, "subjectId"),
        due_date: get_optional_datetime(params, "dueDate")?
            .ok_or_else(|| HandlerErr::bad_params("missing dueDate"))?,
        priority: match get_optional_str(params, "priority") {
            Some(raw) => raw.parse::<Priority>()?,
            None => Priority::Medium,
        },
        status: match get_optional_str(params, "status") {
            Some(raw) => raw.parse::<AssignmentStatus>()?,
            None => AssignmentStatus::Published,
        },
        max_points: get_optional_i64(params, "maxPoints")?.unwrap_or(100),
        allow_late_submission: get_optional_bool(params, "allowLateSubmission")?.unwrap_or(true),
        late_penalty_percent: get_optional_i64(params, "latePenaltyPercent")?.unwrap_or(10),
    };
    let assignment = assignments::create_assignment(conn, &actor, &new, Utc::now())?;
    Ok(json!({ "assignment": to_json(&assignment)? }))
}

fn assignments_list(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let filter = AssignmentFilter {
        classroom_id: get_optional_str(params, "classroomId"),
        subject_id: get_optional_str(params, "subjectId"),
        teacher_id: get_optional_str(params, "teacherId"),
        status: get_optional_str(params, "status")
            .map(|raw| raw.parse::<AssignmentStatus>())
            .transpose()?,
    };
    let rows = assignments::list_assignments(conn, &actor, &filter)?;
    Ok(json!({ "assignments": to_json(&rows)? }))
}

fn assignments_for_student(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let student_id = get_required_str(params, "studentId")?;
    let rows = assignments::student_assignments(conn, &actor, &student_id, Utc::now())?;
    Ok(json!({ "assignments": to_json(&rows)? }))
}

fn assignments_set_status(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let assignment_id = get_required_str(params, "assignmentId")?;
    let to = get_required_str(params, "status")?.parse::<AssignmentStatus>()?;
    let assignment =
        assignments::set_assignment_status(conn, &actor, &assignment_id, to, Utc::now())?;
    Ok(json!({ "assignment": to_json(&assignment)? }))
}

fn assignments_submit(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let assignment_id = get_required_str(params, "assignmentId")?;
    let text = get_optional_str(params, "submissionText").unwrap_or_default();
    let submission = assignments::submit(conn, &actor, &assignment_id, &text, Utc::now())?;
    Ok(json!({ "submission": to_json(&submission)? }))
}

fn assignments_grade(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let submission_id = get_required_str(params, "submissionId")?;
    let points = get_required_f64(params, "points")?;
    let feedback = get_optional_str(params, "feedback").unwrap_or_default();
    let submission = assignments::grade_submission(
        conn,
        &actor,
        &submission_id,
        points,
        &feedback,
        Utc::now(),
    )?;
    Ok(json!({ "submission": to_json(&submission)? }))
}

fn assignments_return(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let submission_id = get_required_str(params, "submissionId")?;
    let submission = assignments::return_submission(conn, &actor, &submission_id)?;
    Ok(json!({ "submission": to_json(&submission)? }))
}

fn assignments_submissions(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let assignment_id = get_required_str(params, "assignmentId")?;
    let rows = assignments::list_submissions(conn, &actor, &assignment_id)?;
    Ok(json!({ "submissions": to_json(&rows)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assignments.create" => Some(with_db(state, req, assignments_create)),
        "assignments.list" => Some(with_db(state, req, assignments_list)),
        "assignments.forStudent" => Some(with_db(state, req, assignments_for_student)),
        "assignments.setStatus" => Some(with_db(state, req, assignments_set_status)),
        "assignments.submit" => Some(with_db(state, req, assignments_submit)),
        "assignments.grade" => Some(with_db(state, req, assignments_grade)),
        "assignments.return" => Some(with_db(state, req, assignments_return)),
        "assignments.submissions" => Some(with_db(state, req, assignments_submissions)),
        _ => None,
    }
}
