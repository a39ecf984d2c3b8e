#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub struct Sidecar {
    child: Child,
    stdin: Option<ChildStdin>,
    reader: BufReader<ChildStdout>,
    next_id: u64,
    pub workspace: PathBuf,
}

impl Sidecar {
    pub fn spawn(prefix: &str) -> Self {
        let exe = env!("CARGO_BIN_EXE_schoold");
        let mut child = Command::new(exe)
            .env_remove("SCHOOLD_WORKSPACE")
            .env_remove("SCHOOLD_DEFAULT_TOTAL_SESSIONS")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn schoold");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Sidecar {
            child,
            stdin: Some(stdin),
            reader: BufReader::new(stdout),
            next_id: 0,
            workspace: temp_dir(prefix),
        }
    }

    /// Spawns and selects a fresh workspace.
    pub fn with_workspace(prefix: &str) -> Self {
        let mut s = Self::spawn(prefix);
        let path = s.workspace.to_string_lossy().to_string();
        s.ok("workspace.select", json!({ "path": path }));
        s
    }

    pub fn request(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        let stdin = self.stdin.as_mut().expect("stdin open");
        writeln!(stdin, "{}", payload).expect("write request");
        stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader
            .read_line(&mut line)
            .expect("read response line");
        assert!(!line.trim().is_empty(), "empty response for {}", method);
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.request(method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error")
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    /// Expects a failure and returns the error object.
    pub fn err(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value.get("error").cloned().expect("error object")
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        drop(self.stdin.take());
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.workspace);
    }
}

/// A workspace with an admin, a teacher, one classroom and `n` students in it.
pub struct School {
    pub admin_id: String,
    pub teacher_id: String,
    pub classroom_id: String,
    pub student_ids: Vec<String>,
}

pub fn create_user(s: &mut Sidecar, actor_id: Option<&str>, username: &str, role: &str) -> String {
    let result = s.ok(
        "users.create",
        json!({
            "actorId": actor_id,
            "username": username,
            "firstName": username,
            "lastName": "Test",
            "role": role,
        }),
    );
    result["user"]["id"].as_str().expect("user id").to_string()
}

pub fn school(s: &mut Sidecar, students: usize) -> School {
    let admin_id = create_user(s, None, "admin", "admin");
    let teacher_id = create_user(s, Some(&admin_id), "teacher", "teacher");
    let classroom = s.ok(
        "classes.create",
        json!({
            "actorId": admin_id,
            "name": "Grade 7 Blue",
            "grade": "7",
            "teacherId": teacher_id,
        }),
    );
    let classroom_id = classroom["classroom"]["id"]
        .as_str()
        .expect("classroom id")
        .to_string();
    let student_ids = (0..students)
        .map(|i| {
            let id = create_user(s, Some(&admin_id), &format!("student{:02}", i), "student");
            s.ok(
                "classes.assignStudent",
                json!({ "actorId": admin_id, "studentId": id, "classroomId": classroom_id }),
            );
            id
        })
        .collect();
    School {
        admin_id,
        teacher_id,
        classroom_id,
        student_ids,
    }
}
