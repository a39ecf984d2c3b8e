use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;

use crate::feedback::{self, FeedbackFilter, FeedbackStatus, NewFeedbackSession, Visibility};
use crate::ipc::helpers::{
    get_optional_bool, get_optional_datetime, get_optional_str, get_required_str, resolve_actor,
    to_json, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};

fn get_optional_str_list(params: &serde_json::Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| HandlerErr::bad_params(format!("{} must be strings", key)))
            })
            .collect(),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be an array", key))),
    }
}

fn feedback_create(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let new = NewFeedbackSession {
        title: get_required_str(params, "title")?,
        description: get_optional_str(params, "description").unwrap_or_default(),
        category: get_optional_str(params, "category").unwrap_or_default(),
        classroom_id: get_optional_str(params, "classroomId"),
        subject_id: get_optional_str(params, "subjectId"),
        status: match get_optional_str(params, "status") {
            Some(raw) => raw.parse::<FeedbackStatus>()?,
            None => FeedbackStatus::Active,
        },
        visibility: match get_optional_str(params, "visibility") {
            Some(raw) => raw.parse::<Visibility>()?,
            None => Visibility::Private,
        },
        allow_anonymous: get_optional_bool(params, "allowAnonymous")?.unwrap_or(false),
        allow_multiple_responses: get_optional_bool(params, "allowMultipleResponses")?
            .unwrap_or(false),
        start_date: get_optional_datetime(params, "startDate")?,
        end_date: get_optional_datetime(params, "endDate")?,
        target_ids: get_optional_str_list(params, "targetUserIds")?,
    };
    let session = feedback::create_session(conn, &actor, &new, Utc::now())?;
    Ok(json!({ "session": to_json(&session)? }))
}

fn feedback_list(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let filter = FeedbackFilter {
        status: get_optional_str(params, "status")
            .map(|raw| raw.parse::<FeedbackStatus>())
            .transpose()?,
        classroom_id: get_optional_str(params, "classroomId"),
    };
    let rows = feedback::list_sessions(conn, &actor, &filter, Utc::now())?;
    Ok(json!({ "sessions": to_json(&rows)? }))
}

fn feedback_get(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let session_id = get_required_str(params, "sessionId")?;
    let detail = feedback::get_session(conn, &actor, &session_id, Utc::now())?;
    to_json(&detail)
}

fn feedback_set_status(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let session_id = get_required_str(params, "sessionId")?;
    let to = get_required_str(params, "status")?.parse::<FeedbackStatus>()?;
    let session = feedback::set_status(conn, &actor, &session_id, to, Utc::now())?;
    Ok(json!({ "session": to_json(&session)? }))
}

fn feedback_respond(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let session_id = get_required_str(params, "sessionId")?;
    let data = params
        .get("responseData")
        .ok_or_else(|| HandlerErr::bad_params("missing responseData"))?;
    let response = feedback::respond(conn, &actor, &session_id, data, Utc::now())?;
    Ok(json!({ "response": to_json(&response)? }))
}

fn feedback_responses(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let session_id = get_required_str(params, "sessionId")?;
    let rows = feedback::list_responses(conn, &actor, &session_id, Utc::now())?;
    Ok(json!({ "responses": to_json(&rows)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "feedback.create" => Some(with_db(state, req, feedback_create)),
        "feedback.list" => Some(with_db(state, req, feedback_list)),
        "feedback.get" => Some(with_db(state, req, feedback_get)),
        "feedback.setStatus" => Some(with_db(state, req, feedback_set_status)),
        "feedback.respond" => Some(with_db(state, req, feedback_respond)),
        "feedback.responses" => Some(with_db(state, req, feedback_responses)),
        _ => None,
    }
}
