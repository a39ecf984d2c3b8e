use rusqlite::Connection;
use serde_json::json;

use crate::academics;
use crate::identity::{self, Role};
use crate::ipc::helpers::{
    get_optional_str, get_required_str, resolve_actor, to_json, with_db,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::policy::{self, Action, Resource};

fn classes_create(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    policy::require(&actor, Resource::Classroom, Action::Create)?;
    let name = get_required_str(params, "name")?;
    let grade = get_optional_str(params, "grade").unwrap_or_default();
    let teacher_id = get_required_str(params, "teacherId")?;
    let classroom = academics::create_classroom(conn, &name, &grade, &teacher_id)?;
    tracing::info!(classroom_id = %classroom.id, actor_id = %actor.id, "classroom created");
    Ok(json!({ "classroom": to_json(&classroom)? }))
}

fn classes_list(
    _state: &AppState,
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let classrooms = academics::list_classrooms(conn)?;
    Ok(json!({ "classrooms": to_json(&classrooms)? }))
}

fn classes_get(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let classroom_id = get_required_str(params, "classroomId")?;
    let classroom = academics::require_classroom(conn, &classroom_id)?;
    let students = identity::list_students(conn, Some(&classroom.id))?;
    Ok(json!({
        "classroom": to_json(&classroom)?,
        "students": to_json(&students)?,
    }))
}

/// `classroomId: null` removes the student from their classroom.
fn classes_assign_student(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    policy::require(&actor, Resource::Classroom, Action::Update)?;
    let student =
        identity::require_role(conn, &get_required_str(params, "studentId")?, Role::Student)?;
    let classroom_id = get_optional_str(params, "classroomId");
    identity::assign_classroom(conn, &student, classroom_id.as_deref())?;
    tracing::info!(student_id = %student.id, classroom_id = ?classroom_id, "student classroom changed");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.create" => Some(with_db(state, req, classes_create)),
        "classes.list" => Some(with_db(state, req, classes_list)),
        "classes.get" => Some(with_db(state, req, classes_get)),
        "classes.assignStudent" => Some(with_db(state, req, classes_assign_student)),
        _ => None,
    }
}
