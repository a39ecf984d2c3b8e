use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;

use crate::academics;
use crate::identity::{self, NewUser, Role};
use crate::ipc::helpers::{
    get_optional_str, get_required_str, resolve_actor, to_json, with_db,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::policy::{self, Action, Resource};

fn parse_role(raw: &str) -> Result<Role, HandlerErr> {
    raw.parse::<Role>().map_err(HandlerErr::from)
}

/// Creating the first admin of an empty workspace needs no actor.
fn users_create(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let role = parse_role(&get_required_str(params, "role")?)?;
    let bootstrap = role == Role::Admin && identity::list_users(conn, Some(Role::Admin))?.is_empty();
    if !bootstrap {
        let actor = resolve_actor(conn, params)?;
        policy::require(&actor, Resource::User, Action::Create)?;
    }
    let new_user = NewUser {
        username: get_required_str(params, "username")?,
        first_name: get_optional_str(params, "firstName").unwrap_or_default(),
        last_name: get_optional_str(params, "lastName").unwrap_or_default(),
        email: get_optional_str(params, "email"),
        role,
    };
    let classroom_id = match get_optional_str(params, "classroomId") {
        Some(cid) if role == Role::Student => Some(academics::require_classroom(conn, &cid)?.id),
        _ => None,
    };
    let user = identity::create_user(conn, &new_user, Utc::now())?;
    if let Some(cid) = classroom_id.as_deref() {
        identity::assign_classroom(conn, &user, Some(cid))?;
    }
    tracing::info!(user_id = %user.id, role = %role, "user created");
    Ok(json!({ "user": to_json(&user)? }))
}

fn users_list(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    policy::require(&actor, Resource::User, Action::Read)?;
    let role = get_optional_str(params, "role")
        .map(|r| parse_role(&r))
        .transpose()?;
    let users = identity::list_users(conn, role)?;
    Ok(json!({ "users": to_json(&users)? }))
}

fn users_get(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let user_id = get_required_str(params, "userId")?;
    if actor.id != user_id {
        policy::require(&actor, Resource::User, Action::Read)?;
    }
    let user = identity::require_user(conn, &user_id)?;
    let classroom_id = match user.role {
        Role::Student => identity::student_classroom(conn, &user)?,
        _ => None,
    };
    Ok(json!({ "user": to_json(&user)?, "classroomId": classroom_id }))
}

fn users_set_active(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    policy::require(&actor, Resource::User, Action::Update)?;
    let user_id = get_required_str(params, "userId")?;
    let Some(active) = params.get("active").and_then(|v| v.as_bool()) else {
        return Err(HandlerErr::bad_params("missing active"));
    };
    identity::set_active(conn, &user_id, active, Utc::now())?;
    tracing::info!(user_id = %user_id, active, actor_id = %actor.id, "user activation changed");
    Ok(json!({ "ok": true }))
}

fn parents_link_student(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    policy::require(&actor, Resource::User, Action::Update)?;
    let parent = identity::require_role(conn, &get_required_str(params, "parentId")?, Role::Parent)?;
    let student =
        identity::require_role(conn, &get_required_str(params, "studentId")?, Role::Student)?;
    identity::link_parent(conn, &parent, &student)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.create" => Some(with_db(state, req, users_create)),
        "users.list" => Some(with_db(state, req, users_list)),
        "users.get" => Some(with_db(state, req, users_get)),
        "users.setActive" => Some(with_db(state, req, users_set_active)),
        "parents.linkStudent" => Some(with_db(state, req, parents_link_student)),
        _ => None,
    }
}
