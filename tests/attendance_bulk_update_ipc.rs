mod support;

use serde_json::json;
use support::{school, Sidecar};

#[test]
fn bulk_update_reports_partial_failures() {
    let mut s = Sidecar::with_workspace("schoold-bulk-partial");
    let sc = school(&mut s, 4);
    let mut ids = sc.student_ids.clone();
    ids.insert(1, "missing-student".to_string());

    let out = s.ok(
        "attendance.bulkUpdateCount",
        json!({ "actorId": sc.teacher_id, "studentIds": ids, "countType": "late", "value": 4 }),
    );
    assert_eq!(out["successful"], 4);
    let failed = out["failed"].as_array().expect("failed list");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["id"], "missing-student");
    assert_eq!(failed[0]["code"], "not_found");
    assert_eq!(out["message"], "Successfully updated late count for 4 students");

    let roster = s.ok("attendance.roster", json!({ "actorId": sc.teacher_id }));
    for row in roster["students"].as_array().expect("students") {
        assert_eq!(row["lateCount"], 4);
        assert_eq!(row["absentCount"], 26);
    }
}

#[test]
fn students_without_classroom_fail_individually() {
    let mut s = Sidecar::with_workspace("schoold-bulk-profile");
    let sc = school(&mut s, 2);
    let loose = support::create_user(&mut s, Some(&sc.admin_id), "loose", "student");
    let mut ids = sc.student_ids.clone();
    ids.push(loose.clone());

    let out = s.ok(
        "attendance.bulkUpdateCount",
        json!({ "actorId": sc.admin_id, "studentIds": ids, "countType": "absent", "value": 2 }),
    );
    assert_eq!(out["successful"], 2);
    assert_eq!(out["failed"][0]["id"], loose.as_str());
    assert_eq!(out["failed"][0]["code"], "profile_incomplete");
}

#[test]
fn bulk_update_checks_value_and_role_before_touching_students() {
    let mut s = Sidecar::with_workspace("schoold-bulk-reject");
    let sc = school(&mut s, 2);

    let e = s.err(
        "attendance.bulkUpdateCount",
        json!({ "actorId": sc.teacher_id, "studentIds": sc.student_ids, "countType": "present", "value": -3 }),
    );
    assert_eq!(e["code"], "invalid_value");

    let e = s.err(
        "attendance.bulkUpdateCount",
        json!({ "actorId": sc.student_ids[0], "studentIds": sc.student_ids, "countType": "present", "value": 3 }),
    );
    assert_eq!(e["code"], "permission_denied");

    let roster = s.ok("attendance.roster", json!({ "actorId": sc.teacher_id }));
    for row in roster["students"].as_array().expect("students") {
        assert_eq!(row["hasCustomAttendance"], false);
    }
}

#[test]
fn bulk_update_rejects_oversized_student_lists() {
    let mut s = Sidecar::with_workspace("schoold-bulk-limit");
    let sc = school(&mut s, 1);

    let mut ids: Vec<String> = (0..1000).map(|i| format!("missing-{}", i)).collect();
    ids.push(sc.student_ids[0].clone());
    let e = s.err(
        "attendance.bulkUpdateCount",
        json!({ "actorId": sc.teacher_id, "studentIds": ids, "countType": "late", "value": 1 }),
    );
    assert_eq!(e["code"], "bad_params");
    assert_eq!(e["details"]["limit"], 1000);
    assert_eq!(e["details"]["received"], 1001);

    let roster = s.ok("attendance.roster", json!({ "actorId": sc.teacher_id }));
    assert_eq!(roster["students"][0]["hasCustomAttendance"], false);
}
