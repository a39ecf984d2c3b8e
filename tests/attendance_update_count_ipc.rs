mod support;

use serde_json::json;
use support::{school, Sidecar};

fn open_session(s: &mut Sidecar, teacher: &str, classroom_id: &str, title: &str) -> String {
    let result = s.ok(
        "sessions.create",
        json!({ "actorId": teacher, "title": title, "classroomId": classroom_id }),
    );
    result["session"]["id"].as_str().expect("session id").to_string()
}

fn roster_row(s: &mut Sidecar, actor: &str, student_id: &str) -> serde_json::Value {
    let roster = s.ok("attendance.roster", json!({ "actorId": actor }));
    roster["students"]
        .as_array()
        .expect("students")
        .iter()
        .find(|r| r["studentId"] == student_id)
        .cloned()
        .expect("student in roster")
}

#[test]
fn roster_uses_default_total_for_actual_records() {
    let mut s = Sidecar::with_workspace("schoold-count-actual");
    let sc = school(&mut s, 1);
    let student = sc.student_ids[0].clone();

    let statuses = std::iter::repeat("present")
        .take(15)
        .chain(std::iter::repeat("late").take(2))
        .chain(std::iter::repeat("absent").take(3));
    for (i, status) in statuses.enumerate() {
        let session_id = open_session(&mut s, &sc.teacher_id, &sc.classroom_id, &format!("P{}", i));
        s.ok(
            "attendance.mark",
            json!({ "actorId": sc.teacher_id, "sessionId": session_id, "studentId": student, "status": status }),
        );
    }

    let row = roster_row(&mut s, &sc.teacher_id, &student);
    assert_eq!(row["totalSessions"], 30);
    assert_eq!(row["presentCount"], 15);
    assert_eq!(row["lateCount"], 2);
    assert_eq!(row["absentCount"], 3);
    assert_eq!(row["attendancePercentage"], 56.7);
    assert_eq!(row["hasCustomAttendance"], false);

    // First edit seeds from the records.
    let out = s.ok(
        "attendance.updateCount",
        json!({ "actorId": sc.teacher_id, "studentId": student, "countType": "present", "value": 20 }),
    );
    assert_eq!(out["success"], true);
    assert_eq!(out["message"], "Present count updated successfully");
    assert_eq!(out["presentCount"], 20);
    assert_eq!(out["lateCount"], 2);
    assert_eq!(out["absentCount"], 8);
    assert_eq!(out["totalSessions"], 30);
    assert_eq!(out["actualPresent"], 15);
    assert_eq!(out["actualLate"], 2);
    assert_eq!(out["actualAbsent"], 3);
}

#[test]
fn custom_counts_derive_absent_from_total() {
    let mut s = Sidecar::with_workspace("schoold-count-derived");
    let sc = school(&mut s, 1);
    let student = sc.student_ids[0].clone();
    let t = sc.teacher_id.clone();

    s.ok(
        "attendance.updateTotalSessions",
        json!({ "actorId": t, "studentId": student, "totalSessions": 50 }),
    );
    s.ok(
        "attendance.updateCount",
        json!({ "actorId": t, "studentId": student, "countType": "present", "value": 42 }),
    );
    let out = s.ok(
        "attendance.updateCount",
        json!({ "actorId": t, "studentId": student, "countType": "late", "value": "5" }),
    );
    assert_eq!(out["message"], "Late count updated successfully");
    assert_eq!(out["absentCount"], 3);
    assert_eq!(out["totalSessions"], 50);
    assert_eq!(out["attendancePercentage"], 94.0);

    let row = roster_row(&mut s, &t, &student);
    assert_eq!(row["absentCount"], 3);
    assert_eq!(row["attendancePercentage"], 94.0);
    assert_eq!(row["hasCustomAttendance"], true);
}

#[test]
fn absent_edit_is_stored_verbatim_and_raises_total() {
    let mut s = Sidecar::with_workspace("schoold-count-absent");
    let sc = school(&mut s, 1);
    let student = sc.student_ids[0].clone();
    let t = sc.teacher_id.clone();

    s.ok(
        "attendance.updateTotalSessions",
        json!({ "actorId": t, "studentId": student, "totalSessions": 20 }),
    );
    s.ok(
        "attendance.updateCount",
        json!({ "actorId": t, "studentId": student, "countType": "present", "value": 15 }),
    );
    s.ok(
        "attendance.updateCount",
        json!({ "actorId": t, "studentId": student, "countType": "late", "value": 2 }),
    );
    let out = s.ok(
        "attendance.updateCount",
        json!({ "actorId": t, "studentId": student, "countType": "absent", "value": 9 }),
    );
    assert_eq!(out["absentCount"], 9);
    assert_eq!(out["totalSessions"], 26);
    assert_eq!(out["attendancePercentage"], 65.4);
}

#[test]
fn invalid_values_and_count_types_are_rejected() {
    let mut s = Sidecar::with_workspace("schoold-count-invalid");
    let sc = school(&mut s, 1);
    let student = sc.student_ids[0].clone();
    let t = sc.teacher_id.clone();

    for bad in [json!(-1), json!("abc"), json!(1.5)] {
        let e = s.err(
            "attendance.updateCount",
            json!({ "actorId": t, "studentId": student, "countType": "present", "value": bad }),
        );
        assert_eq!(e["code"], "invalid_value");
    }
    let e = s.err(
        "attendance.updateCount",
        json!({ "actorId": t, "studentId": student, "countType": "excused", "value": 1 }),
    );
    assert_eq!(e["code"], "invalid_value");
    assert_eq!(
        e["message"],
        "Invalid count type. Must be present, late, or absent."
    );

    // Nothing was stored.
    let roster = s.ok("attendance.roster", json!({ "actorId": t }));
    assert_eq!(roster["students"][0]["hasCustomAttendance"], false);
}
