mod support;

use serde_json::json;
use support::{school, Sidecar};

#[test]
fn sessions_move_from_active_to_one_terminal_state() {
    let mut s = Sidecar::with_workspace("schoold-session-lifecycle");
    let sc = school(&mut s, 3);
    let t = sc.teacher_id.clone();

    let created = s.ok(
        "sessions.create",
        json!({
            "actorId": t,
            "title": "Chemistry lab",
            "classroomId": sc.classroom_id,
            "durationMinutes": 90,
            "lateThresholdMinutes": 10,
            "geofence": { "latitude": 51.5, "longitude": -0.12, "radiusMeters": 50 },
        }),
    );
    let session = &created["session"];
    assert_eq!(session["status"], "active");
    assert_eq!(session["durationMinutes"], 90);
    assert_eq!(session["lateThresholdMinutes"], 10);
    assert_eq!(session["geofence"]["radiusMeters"], 50);
    let id = session["id"].as_str().expect("id").to_string();

    s.ok(
        "attendance.mark",
        json!({ "actorId": t, "sessionId": id, "studentId": sc.student_ids[2], "status": "present" }),
    );
    let detail = s.ok("sessions.get", json!({ "actorId": t, "sessionId": id }));
    assert_eq!(detail["isActive"], true);
    let statuses: Vec<&str> = detail["students"]
        .as_array()
        .expect("students")
        .iter()
        .map(|e| e["status"].as_str().expect("status"))
        .collect();
    assert_eq!(statuses, vec!["not_marked", "not_marked", "present"]);
    assert_eq!(detail["stats"]["attendancePercentage"], 33.33);

    let closed = s.ok("sessions.close", json!({ "actorId": t, "sessionId": id }));
    assert_eq!(closed["session"]["status"], "completed");

    let e = s.err("sessions.cancel", json!({ "actorId": t, "sessionId": id }));
    assert_eq!(e["code"], "invalid_transition");
    let e = s.err("sessions.close", json!({ "actorId": t, "sessionId": id }));
    assert_eq!(e["code"], "invalid_transition");

    // Completed sessions still accept backfilled marks.
    s.ok(
        "attendance.mark",
        json!({ "actorId": t, "sessionId": id, "studentId": sc.student_ids[0], "status": "late" }),
    );
    let detail = s.ok("sessions.get", json!({ "actorId": t, "sessionId": id }));
    assert_eq!(detail["isActive"], false);
    assert_eq!(detail["stats"]["lateCount"], 1);
}

#[test]
fn session_list_filters_and_ownership() {
    let mut s = Sidecar::with_workspace("schoold-session-list");
    let sc = school(&mut s, 1);
    let other = support::create_user(&mut s, Some(&sc.admin_id), "other", "teacher");

    let a = s.ok(
        "sessions.create",
        json!({ "actorId": sc.teacher_id, "title": "A", "classroomId": sc.classroom_id }),
    );
    s.ok(
        "sessions.create",
        json!({ "actorId": other, "title": "B", "classroomId": sc.classroom_id }),
    );

    let mine = s.ok(
        "sessions.list",
        json!({ "actorId": sc.teacher_id, "teacherId": sc.teacher_id }),
    );
    assert_eq!(mine["sessions"].as_array().expect("sessions").len(), 1);

    let all = s.ok("sessions.list", json!({ "actorId": sc.admin_id }));
    let titles: Vec<&str> = all["sessions"]
        .as_array()
        .expect("sessions")
        .iter()
        .map(|r| r["session"]["title"].as_str().expect("title"))
        .collect();
    assert_eq!(titles, vec!["B", "A"]);

    let e = s.err(
        "sessions.close",
        json!({ "actorId": other, "sessionId": a["session"]["id"] }),
    );
    assert_eq!(e["code"], "permission_denied");
    s.ok(
        "sessions.close",
        json!({ "actorId": sc.admin_id, "sessionId": a["session"]["id"] }),
    );

    let active = s.ok(
        "sessions.list",
        json!({ "actorId": sc.admin_id, "status": "active" }),
    );
    assert_eq!(active["sessions"].as_array().expect("sessions").len(), 1);

    let e = s.err(
        "sessions.create",
        json!({ "actorId": sc.teacher_id, "title": "Bad", "classroomId": sc.classroom_id, "durationMinutes": 0 }),
    );
    assert_eq!(e["code"], "invalid_value");
    let e = s.err(
        "sessions.create",
        json!({ "actorId": sc.teacher_id, "title": "Nowhere", "classroomId": "missing" }),
    );
    assert_eq!(e["code"], "not_found");
}

#[test]
fn oversized_inputs_are_rejected_and_the_sidecar_keeps_serving() {
    let mut s = Sidecar::with_workspace("schoold-oversized-inputs");
    let sc = school(&mut s, 1);
    let t = sc.teacher_id.clone();

    let e = s.err(
        "sessions.create",
        json!({
            "actorId": t,
            "title": "Forever",
            "classroomId": sc.classroom_id,
            "durationMinutes": 10_000_000_000_000i64,
        }),
    );
    assert_eq!(e["code"], "invalid_value");
    let e = s.err(
        "sessions.create",
        json!({
            "actorId": t,
            "title": "Never late",
            "classroomId": sc.classroom_id,
            "lateThresholdMinutes": i64::MAX,
        }),
    );
    assert_eq!(e["code"], "invalid_value");

    let student = sc.student_ids[0].clone();
    for count_type in ["present", "late", "absent"] {
        let e = s.err(
            "attendance.updateCount",
            json!({ "actorId": t, "studentId": student, "countType": count_type, "value": i64::MAX }),
        );
        assert_eq!(e["code"], "invalid_value");
    }

    let health = s.ok("health", json!({}));
    assert_eq!(health["defaultTotalSessions"], 30);
}
