mod support;

use serde_json::json;
use support::{create_user, school, Sidecar};

#[test]
fn classroom_feedback_tracks_completion_rate() {
    let mut s = Sidecar::with_workspace("schoold-feedback");
    let sc = school(&mut s, 4);

    let created = s.ok(
        "feedback.create",
        json!({
            "actorId": sc.teacher_id,
            "title": "How is the term going?",
            "category": "course",
            "classroomId": sc.classroom_id,
        }),
    );
    let session = &created["session"];
    let session_id = session["id"].as_str().expect("session id").to_string();
    assert_eq!(session["targetCount"], 4);
    assert_eq!(session["isActive"], true);
    assert_eq!(session["completionRate"], 0.0);

    for student in &sc.student_ids[..3] {
        let r = s.ok(
            "feedback.respond",
            json!({
                "actorId": student,
                "sessionId": session_id,
                "responseData": { "question_1": "4", "question_2": "more labs" },
            }),
        );
        assert_eq!(r["response"]["respondentId"], student.as_str());
    }

    let e = s.err(
        "feedback.respond",
        json!({ "actorId": sc.student_ids[0], "sessionId": session_id, "responseData": {} }),
    );
    assert_eq!(e["code"], "already_responded");

    let detail = s.ok(
        "feedback.get",
        json!({ "actorId": sc.teacher_id, "sessionId": session_id }),
    );
    assert_eq!(detail["session"]["responseCount"], 3);
    assert_eq!(detail["session"]["completionRate"], 75.0);

    let last = s.ok(
        "feedback.get",
        json!({ "actorId": sc.student_ids[3], "sessionId": session_id }),
    );
    assert_eq!(last["hasResponded"], false);
    assert_eq!(last["canRespond"], true);

    let e = s.err(
        "feedback.responses",
        json!({ "actorId": sc.student_ids[0], "sessionId": session_id }),
    );
    assert_eq!(e["code"], "permission_denied");
    let responses = s.ok(
        "feedback.responses",
        json!({ "actorId": sc.teacher_id, "sessionId": session_id }),
    );
    assert_eq!(responses["responses"].as_array().expect("responses").len(), 3);

    s.ok(
        "feedback.setStatus",
        json!({ "actorId": sc.teacher_id, "sessionId": session_id, "status": "completed" }),
    );
    let e = s.err(
        "feedback.respond",
        json!({ "actorId": sc.student_ids[3], "sessionId": session_id, "responseData": {} }),
    );
    assert_eq!(e["code"], "not_active");
    let visible = s.ok("feedback.list", json!({ "actorId": sc.student_ids[3] }));
    assert!(visible["sessions"].as_array().expect("sessions").is_empty());
}

#[test]
fn anonymous_parent_feedback_hides_the_respondent() {
    let mut s = Sidecar::with_workspace("schoold-feedback-anon");
    let sc = school(&mut s, 1);
    let parent = create_user(&mut s, Some(&sc.admin_id), "parent", "parent");
    let stranger = create_user(&mut s, Some(&sc.admin_id), "stranger", "parent");

    let created = s.ok(
        "feedback.create",
        json!({
            "actorId": sc.admin_id,
            "title": "Parent evening",
            "targetUserIds": [parent],
            "allowAnonymous": true,
            "allowMultipleResponses": true,
            "endDate": "2099-01-01T00:00:00Z",
        }),
    );
    let session_id = created["session"]["id"].as_str().expect("session id").to_string();
    assert_eq!(created["session"]["category"], "general");

    let first = s.ok(
        "feedback.respond",
        json!({ "actorId": parent, "sessionId": session_id, "responseData": { "rating": 3 } }),
    );
    assert!(first["response"]["respondentId"].is_null());
    let second = s.ok(
        "feedback.respond",
        json!({ "actorId": parent, "sessionId": session_id, "responseData": { "rating": 5 } }),
    );
    assert_eq!(second["response"]["id"], first["response"]["id"]);
    assert_eq!(second["response"]["responseData"]["rating"], 5);

    let listed = s.ok("feedback.list", json!({ "actorId": parent }));
    let sessions = listed["sessions"].as_array().expect("sessions");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["completionRate"], 100.0);

    let e = s.err(
        "feedback.get",
        json!({ "actorId": stranger, "sessionId": session_id }),
    );
    assert_eq!(e["code"], "permission_denied");
    let e = s.err(
        "feedback.respond",
        json!({ "actorId": stranger, "sessionId": session_id, "responseData": {} }),
    );
    assert_eq!(e["code"], "permission_denied");

    let e = s.err(
        "feedback.create",
        json!({
            "actorId": sc.teacher_id,
            "title": "Backwards",
            "startDate": "2030-01-02T00:00:00Z",
            "endDate": "2030-01-01T00:00:00Z",
        }),
    );
    assert_eq!(e["code"], "bad_params");
}
