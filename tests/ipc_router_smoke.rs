mod support;

use serde_json::json;
use support::{school, Sidecar};

#[test]
fn requests_before_workspace_select_are_rejected() {
    let mut s = Sidecar::spawn("schoold-no-ws");
    let health = s.ok("health", json!({}));
    assert!(health["workspacePath"].is_null());
    assert_eq!(health["defaultTotalSessions"], 30);

    let e = s.err("attendance.roster", json!({ "actorId": "x" }));
    assert_eq!(e["code"], "no_workspace");

    let e = s.err("nope.method", json!({}));
    assert_eq!(e["code"], "not_implemented");
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let mut s = Sidecar::with_workspace("schoold-router-smoke");
    let sc = school(&mut s, 2);
    let admin = sc.admin_id.as_str();
    let teacher = sc.teacher_id.as_str();
    let student = sc.student_ids[0].as_str();

    let subject = s.ok(
        "subjects.create",
        json!({ "actorId": admin, "name": "Science", "description": "General science" }),
    );
    let subject_id = subject["subject"]["id"].as_str().expect("subject id").to_string();
    let parent = support::create_user(&mut s, Some(admin), "parent", "parent");

    let session = s.ok(
        "sessions.create",
        json!({
            "actorId": teacher,
            "title": "Morning register",
            "classroomId": sc.classroom_id,
            "durationMinutes": 45,
        }),
    );
    let session_id = session["session"]["id"].as_str().expect("session id").to_string();

    let calls = vec![
        ("settings.get", json!({ "key": "attendance.defaultTotalSessions" })),
        ("settings.set", json!({ "actorId": admin, "key": "ui.theme", "value": "dark" })),
        ("users.list", json!({ "actorId": admin })),
        ("users.get", json!({ "actorId": admin, "userId": student })),
        ("users.setActive", json!({ "actorId": admin, "userId": parent, "active": true })),
        ("parents.linkStudent", json!({ "actorId": admin, "parentId": parent, "studentId": student })),
        ("classes.list", json!({})),
        ("classes.get", json!({ "classroomId": sc.classroom_id })),
        ("subjects.list", json!({})),
        (
            "subjects.assignTeacher",
            json!({ "actorId": admin, "subjectId": subject_id, "teacherId": teacher, "classroomId": sc.classroom_id }),
        ),
        ("subjects.assignments", json!({ "classroomId": sc.classroom_id })),
        ("sessions.list", json!({ "actorId": teacher })),
        ("sessions.get", json!({ "actorId": teacher, "sessionId": session_id })),
        (
            "attendance.mark",
            json!({ "actorId": teacher, "sessionId": session_id, "studentId": student, "status": "present" }),
        ),
        ("attendance.roster", json!({ "actorId": teacher, "classroomId": sc.classroom_id })),
        ("attendance.studentProfile", json!({ "actorId": teacher, "studentId": student })),
        (
            "attendance.updateCount",
            json!({ "actorId": teacher, "studentId": student, "countType": "late", "value": 1 }),
        ),
        (
            "attendance.updateTotalSessions",
            json!({ "actorId": teacher, "studentId": student, "totalSessions": 40 }),
        ),
        (
            "attendance.bulkUpdateCount",
            json!({ "actorId": teacher, "studentIds": sc.student_ids, "countType": "present", "value": 3 }),
        ),
        ("attendance.dashboard", json!({ "actorId": teacher })),
        ("attendance.report", json!({ "actorId": teacher, "classroomId": sc.classroom_id })),
        (
            "grades.create",
            json!({
                "actorId": teacher,
                "studentId": student,
                "subjectId": subject_id,
                "title": "Lab 1",
                "gradeType": "project",
                "pointsEarned": 8,
                "pointsPossible": 10,
            }),
        ),
        ("grades.list", json!({ "actorId": teacher, "studentId": student })),
        ("sessions.close", json!({ "actorId": teacher, "sessionId": session_id })),
    ];
    for (method, params) in calls {
        s.ok(method, params);
    }

    let session = s.ok(
        "sessions.create",
        json!({ "actorId": teacher, "title": "Assembly", "classroomId": sc.classroom_id, "attendanceType": "event" }),
    );
    s.ok(
        "sessions.cancel",
        json!({ "actorId": teacher, "sessionId": session["session"]["id"] }),
    );
}
