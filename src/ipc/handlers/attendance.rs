use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;

use crate::attendance::overrides::{self, CountUpdate};
use crate::attendance::{records, views, AttendanceStatus, CountType};
use crate::ipc::helpers::{
    get_optional_date, get_optional_str, get_required_str, resolve_actor, to_json, with_db,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};

const BULK_UPDATE_MAX_STUDENTS: usize = 1000;

fn get_required_value<'a>(
    params: &'a serde_json::Value,
    key: &str,
) -> Result<&'a serde_json::Value, HandlerErr> {
    params
        .get(key)
        .filter(|v| !v.is_null())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

fn parse_count_type(params: &serde_json::Value) -> Result<CountType, HandlerErr> {
    Ok(get_required_str(params, "countType")?.parse::<CountType>()?)
}

fn count_update_json(message: String, out: &CountUpdate) -> serde_json::Value {
    let r = &out.reconciled;
    json!({
        "success": true,
        "message": message,
        "presentCount": r.present_count,
        "lateCount": r.late_count,
        "absentCount": r.absent_count,
        "totalSessions": r.total_sessions,
        "attendancePercentage": r.attendance_percentage,
        "hasCustomAttendance": r.has_custom_attendance,
        "hasCustomTotal": r.has_custom_total,
        "actualPresent": out.actual.present,
        "actualLate": out.actual.late,
        "actualAbsent": out.actual.absent,
        "actualTotal": out.actual.total,
    })
}

/// Marks by `recordId`, by `sessionId`, or (neither given) into today's
/// quick session for the student's classroom.
fn attendance_mark(
    state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let status = get_required_str(params, "status")?.parse::<AttendanceStatus>()?;
    let notes = get_optional_str(params, "notes");
    let now = Utc::now();

    let out = if let Some(record_id) = get_optional_str(params, "recordId") {
        records::remark(conn, &actor, &record_id, status, notes.as_deref(), now)?
    } else {
        let student_id = get_required_str(params, "studentId")?;
        match get_optional_str(params, "sessionId") {
            Some(session_id) => {
                records::mark(conn, &actor, &session_id, &student_id, status, notes.as_deref(), now)?
            }
            None => records::quick_mark(
                conn,
                &state.config,
                &actor,
                &student_id,
                status,
                notes.as_deref(),
                now,
            )?,
        }
    };
    Ok(json!({
        "success": true,
        "message": format!("Attendance marked as {}", status),
        "recordId": out.record.id,
        "sessionId": out.session_id,
        "sessionCreated": out.session_created,
        "isLate": out.is_late,
        "record": to_json(&out.record)?,
    }))
}

fn attendance_roster(
    state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let classroom_id = get_optional_str(params, "classroomId");
    let subject_id = get_optional_str(params, "subjectId");
    let rows = views::roster(
        conn,
        state.default_total_sessions(conn),
        &actor,
        classroom_id.as_deref(),
        subject_id.as_deref(),
    )?;
    Ok(json!({ "students": to_json(&rows)? }))
}

fn attendance_student_profile(
    state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let student_id = get_required_str(params, "studentId")?;
    let profile = views::student_profile(
        conn,
        state.default_total_sessions(conn),
        &actor,
        &student_id,
    )?;
    to_json(&profile)
}

fn attendance_update_count(
    state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let student_id = get_required_str(params, "studentId")?;
    let count_type = parse_count_type(params)?;
    let value = get_required_value(params, "value")?;
    let subject_id = get_optional_str(params, "subjectId");
    let out = overrides::update_count(
        conn,
        state.default_total_sessions(conn),
        &actor,
        &student_id,
        subject_id.as_deref(),
        count_type,
        value,
        Utc::now(),
    )?;
    Ok(count_update_json(
        format!("{} count updated successfully", count_type.title()),
        &out,
    ))
}

fn attendance_update_total_sessions(
    state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let student_id = get_required_str(params, "studentId")?;
    let value = get_required_value(params, "totalSessions")?;
    let subject_id = get_optional_str(params, "subjectId");
    let out = overrides::update_total_sessions(
        conn,
        state.default_total_sessions(conn),
        &actor,
        &student_id,
        subject_id.as_deref(),
        value,
        Utc::now(),
    )?;
    Ok(count_update_json(
        "Total sessions updated successfully".to_string(),
        &out,
    ))
}

fn attendance_bulk_update_count(
    state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let count_type = parse_count_type(params)?;
    let value = get_required_value(params, "value")?;
    let Some(ids_json) = params.get("studentIds").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing studentIds"));
    };
    let student_ids: Vec<String> = ids_json
        .iter()
        .filter_map(|v| v.as_str().map(|s| s.to_string()))
        .collect();
    if student_ids.is_empty() {
        return Err(HandlerErr::bad_params("studentIds must not be empty"));
    }
    if student_ids.len() > BULK_UPDATE_MAX_STUDENTS {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!(
                "too many students: {} (max {})",
                student_ids.len(),
                BULK_UPDATE_MAX_STUDENTS
            ),
            details: Some(json!({
                "limit": BULK_UPDATE_MAX_STUDENTS,
                "received": student_ids.len(),
            })),
        });
    }
    let subject_id = get_optional_str(params, "subjectId");
    let report = overrides::bulk_update_count(
        conn,
        state.default_total_sessions(conn),
        &actor,
        &student_ids,
        subject_id.as_deref(),
        count_type,
        value,
        Utc::now(),
    )?;
    Ok(json!({
        "success": true,
        "message": format!(
            "Successfully updated {} count for {} students",
            count_type.as_str(),
            report.successful
        ),
        "countType": count_type.as_str(),
        "successful": report.successful,
        "failed": to_json(&report.failed)?,
    }))
}

fn attendance_dashboard(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let dashboard = views::dashboard(conn, &actor, Utc::now())?;
    to_json(&dashboard)
}

fn attendance_report(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = resolve_actor(conn, params)?;
    let classroom_id = get_optional_str(params, "classroomId");
    let subject_id = get_optional_str(params, "subjectId");
    let rows = views::report(
        conn,
        &actor,
        classroom_id.as_deref(),
        subject_id.as_deref(),
        get_optional_date(params, "dateFrom")?,
        get_optional_date(params, "dateTo")?,
        Utc::now(),
    )?;
    Ok(json!({ "sessions": to_json(&rows)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(with_db(state, req, attendance_mark)),
        "attendance.roster" => Some(with_db(state, req, attendance_roster)),
        "attendance.studentProfile" => Some(with_db(state, req, attendance_student_profile)),
        "attendance.updateCount" => Some(with_db(state, req, attendance_update_count)),
        "attendance.updateTotalSessions" => {
            Some(with_db(state, req, attendance_update_total_sessions))
        }
        "attendance.bulkUpdateCount" => Some(with_db(state, req, attendance_bulk_update_count)),
        "attendance.dashboard" => Some(with_db(state, req, attendance_dashboard)),
        "attendance.report" => Some(with_db(state, req, attendance_report)),
        _ => None,
    }
}
