use rusqlite::Connection;
use serde_json::json;

use crate::academics;
use crate::ipc::helpers::{
    get_optional_str, get_required_str, resolve_actor, to_json, with_db,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::policy::{self, Action, Resource};

fn subjects_create(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    policy::require(&actor, Resource::Subject, Action::Create)?;
    let name = get_required_str(params, "name")?;
    let description = get_optional_str(params, "description").unwrap_or_default();
    let subject = academics::create_subject(conn, &name, &description)?;
    Ok(json!({ "subject": to_json(&subject)? }))
}

fn subjects_list(
    _state: &AppState,
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subjects = academics::list_subjects(conn)?;
    Ok(json!({ "subjects": to_json(&subjects)? }))
}

fn subjects_assign_teacher(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    policy::require(&actor, Resource::Subject, Action::Update)?;
    let assignment = academics::assign_subject_teacher(
        conn,
        &get_required_str(params, "subjectId")?,
        &get_required_str(params, "teacherId")?,
        &get_required_str(params, "classroomId")?,
    )?;
    Ok(json!({ "assignment": to_json(&assignment)? }))
}

fn subjects_assignments(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let classroom_id = get_optional_str(params, "classroomId");
    let assignments = academics::list_subject_assignments(conn, classroom_id.as_deref())?;
    Ok(json!({ "assignments": to_json(&assignments)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.create" => Some(with_db(state, req, subjects_create)),
        "subjects.list" => Some(with_db(state, req, subjects_list)),
        "subjects.assignTeacher" => Some(with_db(state, req, subjects_assign_teacher)),
        "subjects.assignments" => Some(with_db(state, req, subjects_assignments)),
        _ => None,
    }
}
