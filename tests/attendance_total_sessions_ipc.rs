mod support;

use serde_json::json;
use support::{school, Sidecar};

#[test]
fn total_sessions_cannot_drop_below_recorded_sessions() {
    let mut s = Sidecar::with_workspace("schoold-total-below");
    let sc = school(&mut s, 1);
    let student = sc.student_ids[0].clone();
    let t = sc.teacher_id.clone();

    for i in 0..5 {
        let session = s.ok(
            "sessions.create",
            json!({ "actorId": t, "title": format!("Lesson {}", i), "classroomId": sc.classroom_id }),
        );
        s.ok(
            "attendance.mark",
            json!({
                "actorId": t,
                "sessionId": session["session"]["id"],
                "studentId": student,
                "status": if i == 0 { "absent" } else { "present" },
            }),
        );
    }

    let e = s.err(
        "attendance.updateTotalSessions",
        json!({ "actorId": t, "studentId": student, "totalSessions": 4 }),
    );
    assert_eq!(e["code"], "below_actual_count");
    assert_eq!(e["details"]["actualCount"], 5);
    assert_eq!(
        e["message"],
        "Total sessions cannot be less than actual attendance records (5)"
    );

    let out = s.ok(
        "attendance.updateTotalSessions",
        json!({ "actorId": t, "studentId": student, "totalSessions": 10 }),
    );
    assert_eq!(out["message"], "Total sessions updated successfully");
    assert_eq!(out["totalSessions"], 10);
    assert_eq!(out["presentCount"], 4);
    assert_eq!(out["attendancePercentage"], 40.0);
    assert_eq!(out["hasCustomTotal"], true);
}

#[test]
fn repeated_total_update_is_stable_and_keeps_counts() {
    let mut s = Sidecar::with_workspace("schoold-total-idempotent");
    let sc = school(&mut s, 1);
    let student = sc.student_ids[0].clone();
    let t = sc.teacher_id.clone();

    s.ok(
        "attendance.updateCount",
        json!({ "actorId": t, "studentId": student, "countType": "present", "value": 12 }),
    );
    let first = s.ok(
        "attendance.updateTotalSessions",
        json!({ "actorId": t, "studentId": student, "totalSessions": 24 }),
    );
    let second = s.ok(
        "attendance.updateTotalSessions",
        json!({ "actorId": t, "studentId": student, "totalSessions": "24" }),
    );
    assert_eq!(first, second);
    assert_eq!(second["presentCount"], 12);
    assert_eq!(second["absentCount"], 12);
    assert_eq!(second["attendancePercentage"], 50.0);
}

#[test]
fn workspace_setting_changes_the_default_total() {
    let mut s = Sidecar::with_workspace("schoold-total-setting");
    let sc = school(&mut s, 1);
    s.ok(
        "settings.set",
        json!({ "actorId": sc.admin_id, "key": "attendance.defaultTotalSessions", "value": 40 }),
    );
    let roster = s.ok("attendance.roster", json!({ "actorId": sc.teacher_id }));
    assert_eq!(roster["students"][0]["totalSessions"], 40);

    let e = s.err(
        "settings.set",
        json!({ "actorId": sc.teacher_id, "key": "attendance.defaultTotalSessions", "value": 10 }),
    );
    assert_eq!(e["code"], "permission_denied");
}

#[test]
fn recorded_sessions_still_count_after_a_classroom_transfer() {
    let mut s = Sidecar::with_workspace("schoold-total-transfer");
    let sc = school(&mut s, 1);
    let student = sc.student_ids[0].clone();
    let t = sc.teacher_id.clone();

    for i in 0..5 {
        let session = s.ok(
            "sessions.create",
            json!({ "actorId": t, "title": format!("Lesson {}", i), "classroomId": sc.classroom_id }),
        );
        s.ok(
            "attendance.mark",
            json!({
                "actorId": t,
                "sessionId": session["session"]["id"],
                "studentId": student,
                "status": "present",
            }),
        );
    }

    let other = s.ok(
        "classes.create",
        json!({ "actorId": sc.admin_id, "name": "Grade 7 Green", "grade": "7", "teacherId": t }),
    );
    s.ok(
        "classes.assignStudent",
        json!({ "actorId": sc.admin_id, "studentId": student, "classroomId": other["classroom"]["id"] }),
    );

    let e = s.err(
        "attendance.updateTotalSessions",
        json!({ "actorId": t, "studentId": student, "totalSessions": 3 }),
    );
    assert_eq!(e["code"], "below_actual_count");
    assert_eq!(e["details"]["actualCount"], 5);
}
