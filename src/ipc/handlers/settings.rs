use rusqlite::Connection;
use serde_json::json;

use crate::db;
use crate::ipc::helpers::{get_required_str, resolve_actor, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::policy::{self, Action, Resource};

fn settings_error(e: anyhow::Error) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: format!("{e:#}"),
        details: None,
    }
}

fn settings_get(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let key = get_required_str(params, "key")?;
    let value = db::settings_get_json(conn, &key).map_err(settings_error)?;
    Ok(json!({ "key": key, "value": value }))
}

fn settings_set(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    policy::require(&actor, Resource::Settings, Action::Update)?;
    let key = get_required_str(params, "key")?;
    let Some(value) = params.get("value") else {
        return Err(HandlerErr::bad_params("missing value"));
    };
    db::settings_set_json(conn, &key, value).map_err(settings_error)?;
    tracing::info!(key = %key, actor_id = %actor.id, "setting updated");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(with_db(state, req, settings_get)),
        "settings.set" => Some(with_db(state, req, settings_set)),
        _ => None,
    }
}
