use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;

use crate::attendance::sessions::{
    self, AttendanceType, Geofence, NewSession, SessionFilter, SessionStatus,
};
use crate::attendance::views;
use crate::ipc::helpers::{
    get_optional_date, get_optional_i64, get_optional_str, get_required_str, resolve_actor,
    to_json, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::policy::{self, Action, Resource};

fn parse_geofence(params: &serde_json::Value) -> Result<Option<Geofence>, HandlerErr> {
    let Some(g) = params.get("geofence").filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    let coord = |key: &str| {
        g.get(key)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| HandlerErr::bad_params(format!("geofence.{} must be a number", key)))
    };
    Ok(Some(Geofence {
        latitude: coord("latitude")?,
        longitude: coord("longitude")?,
        radius_meters: get_optional_i64(g, "radiusMeters")?.unwrap_or(100),
        required: g.get("required").and_then(|v| v.as_bool()).unwrap_or(false),
    }))
}

fn sessions_create(
    state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let attendance_type = match get_optional_str(params, "attendanceType") {
        Some(raw) => raw.parse::<AttendanceType>()?,
        None => AttendanceType::Daily,
    };
    let new = NewSession {
        title: get_required_str(params, "title")?,
        description: get_optional_str(params, "description").unwrap_or_default(),
        classroom_id: get_required_str(params, "classroomId")?,
        subject_id: get_optional_str(params, "subjectId"),
        attendance_type,
        duration_minutes: get_optional_i64(params, "durationMinutes")?.unwrap_or(60),
        late_threshold_minutes: get_optional_i64(params, "lateThresholdMinutes")?,
        auto_close: params
            .get("autoClose")
            .and_then(|v| v.as_bool())
            .unwrap_or(true),
        geofence: parse_geofence(params)?,
    };
    let session = sessions::create_session(conn, &state.config, &actor, &new, Utc::now())?;
    Ok(json!({ "session": to_json(&session)? }))
}

fn sessions_list(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    policy::require(&actor, Resource::Session, Action::Read)?;
    let now = Utc::now();
    sessions::sweep_auto_close(conn, now)?;

    let date = get_optional_date(params, "date")?;
    let filter = SessionFilter {
        status: get_optional_str(params, "status")
            .map(|s| s.parse::<SessionStatus>())
            .transpose()?,
        classroom_id: get_optional_str(params, "classroomId"),
        subject_id: get_optional_str(params, "subjectId"),
        teacher_id: get_optional_str(params, "teacherId"),
        date_from: get_optional_date(params, "dateFrom")?.or(date),
        date_to: get_optional_date(params, "dateTo")?.or(date),
    };
    let rows = sessions::list_sessions(conn, &filter)?
        .into_iter()
        .map(|s| -> Result<serde_json::Value, HandlerErr> {
            let stats = sessions::session_stats(conn, &s)?;
            Ok(json!({
                "session": to_json(&s)?,
                "isActive": s.is_active_at(now),
                "stats": to_json(&stats)?,
            }))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "sessions": rows }))
}

fn sessions_get(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let session_id = get_required_str(params, "sessionId")?;
    let detail = views::session_detail(conn, &actor, &session_id, Utc::now())?;
    to_json(&detail)
}

fn sessions_close(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let session_id = get_required_str(params, "sessionId")?;
    let session = sessions::close_session(conn, &actor, &session_id, Utc::now())?;
    Ok(json!({ "session": to_json(&session)? }))
}

fn sessions_cancel(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let session_id = get_required_str(params, "sessionId")?;
    let session = sessions::cancel_session(conn, &actor, &session_id, Utc::now())?;
    Ok(json!({ "session": to_json(&session)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sessions.create" => Some(with_db(state, req, sessions_create)),
        "sessions.list" => Some(with_db(state, req, sessions_list)),
        "sessions.get" => Some(with_db(state, req, sessions_get)),
        "sessions.close" => Some(with_db(state, req, sessions_close)),
        "sessions.cancel" => Some(with_db(state, req, sessions_cancel)),
        _ => None,
    }
}
