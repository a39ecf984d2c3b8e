mod support;

use serde_json::json;
use support::{create_user, school, Sidecar};

const FUTURE: &str = "2099-06-30T23:59:00Z";
const PAST: &str = "2000-01-15T12:00:00Z";

#[test]
fn students_submit_and_teachers_grade_with_late_penalty() {
    let mut s = Sidecar::with_workspace("schoold-assignments");
    let sc = school(&mut s, 2);
    let student = sc.student_ids[0].clone();

    let open = s.ok(
        "assignments.create",
        json!({
            "actorId": sc.teacher_id,
            "title": "Fractions worksheet",
            "classroomId": sc.classroom_id,
            "dueDate": FUTURE,
            "priority": "high",
            "maxPoints": 20,
        }),
    );
    let open_id = open["assignment"]["id"].as_str().expect("assignment id").to_string();
    assert_eq!(open["assignment"]["status"], "published");
    assert_eq!(open["assignment"]["priority"], "high");

    let late = s.ok(
        "assignments.create",
        json!({
            "actorId": sc.teacher_id,
            "title": "Reading log",
            "classroomId": sc.classroom_id,
            "dueDate": PAST,
            "maxPoints": 10,
            "latePenaltyPercent": 20,
        }),
    );
    let late_id = late["assignment"]["id"].as_str().expect("assignment id").to_string();

    let before = s.ok(
        "assignments.forStudent",
        json!({ "actorId": student, "studentId": student }),
    );
    let rows = before["assignments"].as_array().expect("rows");
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r["status"] == "not_submitted"));
    let overdue: Vec<_> = rows.iter().filter(|r| r["isOverdue"] == true).collect();
    assert_eq!(overdue.len(), 1);
    assert_eq!(overdue[0]["assignment"]["id"], late_id.as_str());

    let on_time = s.ok(
        "assignments.submit",
        json!({ "actorId": student, "assignmentId": open_id, "submissionText": "1/2 + 1/4 = 3/4" }),
    );
    assert_eq!(on_time["submission"]["isLate"], false);

    let tardy = s.ok(
        "assignments.submit",
        json!({ "actorId": student, "assignmentId": late_id, "submissionText": "pages 1-40" }),
    );
    assert_eq!(tardy["submission"]["isLate"], true);
    let tardy_id = tardy["submission"]["id"].as_str().expect("submission id").to_string();

    let graded = s.ok(
        "assignments.grade",
        json!({ "actorId": sc.teacher_id, "submissionId": tardy_id, "points": 10, "feedback": "Well read" }),
    );
    assert_eq!(graded["submission"]["status"], "graded");
    assert_eq!(graded["submission"]["points"], 10.0);
    assert_eq!(graded["submission"]["finalPoints"], 8.0);

    let e = s.err(
        "assignments.submit",
        json!({ "actorId": student, "assignmentId": late_id, "submissionText": "more" }),
    );
    assert_eq!(e["code"], "already_graded");

    let subs = s.ok(
        "assignments.submissions",
        json!({ "actorId": sc.teacher_id, "assignmentId": open_id }),
    );
    assert_eq!(subs["submissions"].as_array().expect("submissions").len(), 1);

    let after = s.ok(
        "assignments.forStudent",
        json!({ "actorId": student, "studentId": student }),
    );
    let statuses: Vec<_> = after["assignments"]
        .as_array()
        .expect("rows")
        .iter()
        .map(|r| r["status"].as_str().expect("status").to_string())
        .collect();
    assert!(statuses.contains(&"submitted".to_string()));
    assert!(statuses.contains(&"graded".to_string()));
}

#[test]
fn assignment_access_follows_role_and_classroom() {
    let mut s = Sidecar::with_workspace("schoold-assignments-access");
    let sc = school(&mut s, 1);
    let outsider = create_user(&mut s, Some(&sc.admin_id), "outsider", "student");
    let other_teacher = create_user(&mut s, Some(&sc.admin_id), "teacher2", "teacher");

    let e = s.err(
        "assignments.create",
        json!({
            "actorId": sc.student_ids[0],
            "title": "Self-assigned",
            "classroomId": sc.classroom_id,
            "dueDate": FUTURE,
        }),
    );
    assert_eq!(e["code"], "permission_denied");

    let strict = s.ok(
        "assignments.create",
        json!({
            "actorId": sc.teacher_id,
            "title": "Closed book",
            "classroomId": sc.classroom_id,
            "dueDate": PAST,
            "allowLateSubmission": false,
        }),
    );
    let strict_id = strict["assignment"]["id"].as_str().expect("id").to_string();
    let e = s.err(
        "assignments.submit",
        json!({ "actorId": sc.student_ids[0], "assignmentId": strict_id }),
    );
    assert_eq!(e["code"], "past_due");

    let draft = s.ok(
        "assignments.create",
        json!({
            "actorId": sc.teacher_id,
            "title": "Draft",
            "classroomId": sc.classroom_id,
            "dueDate": FUTURE,
            "status": "draft",
        }),
    );
    let draft_id = draft["assignment"]["id"].as_str().expect("id").to_string();
    let e = s.err(
        "assignments.submit",
        json!({ "actorId": sc.student_ids[0], "assignmentId": draft_id }),
    );
    assert_eq!(e["code"], "not_open");
    let listed = s.ok("assignments.list", json!({ "actorId": sc.student_ids[0] }));
    assert_eq!(listed["assignments"].as_array().expect("list").len(), 1);

    let e = s.err(
        "assignments.setStatus",
        json!({ "actorId": other_teacher, "assignmentId": draft_id, "status": "published" }),
    );
    assert_eq!(e["code"], "permission_denied");
    s.ok(
        "assignments.setStatus",
        json!({ "actorId": sc.teacher_id, "assignmentId": draft_id, "status": "published" }),
    );
    let e = s.err(
        "assignments.submit",
        json!({ "actorId": outsider, "assignmentId": draft_id }),
    );
    assert_eq!(e["code"], "permission_denied");

    let e = s.err(
        "assignments.submissions",
        json!({ "actorId": other_teacher, "assignmentId": draft_id }),
    );
    assert_eq!(e["code"], "permission_denied");
    let all = s.ok(
        "assignments.submissions",
        json!({ "actorId": sc.admin_id, "assignmentId": draft_id }),
    );
    assert!(all["submissions"].as_array().expect("submissions").is_empty());
}
