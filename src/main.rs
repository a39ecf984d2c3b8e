mod academics;
mod assignments;
mod attendance;
mod config;
mod db;
mod feedback;
mod grades;
mod identity;
mod ipc;
mod policy;

use anyhow::Result;
use std::io::{self, BufRead, Write};
use std::panic::{self, AssertUnwindSafe};
use tracing_subscriber::{fmt, prelude::*, util::SubscriberInitExt};

fn main() -> Result<()> {
    let cfg = config::Config::from_env()?;

    // stdout carries the protocol; logs go to stderr.
    let fmt = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(false)
        .with_target(false);
    tracing_subscriber::registry()
        .with(fmt)
        .with(cfg.log_level)
        .init();

    let mut state = ipc::AppState::new(cfg);
    if let Some(path) = state.config.workspace.clone() {
        match db::open_db(&path) {
            Ok(conn) => {
                tracing::info!(workspace = %path.display(), "workspace opened from environment");
                state.workspace = Some(path);
                state.db = Some(conn);
            }
            Err(e) => tracing::error!(workspace = %path.display(), error = ?e, "failed to open workspace"),
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                tracing::warn!(error = %e, "unparseable request line");
                let _ = writeln!(
                    stdout,
                    "{}",
                    serde_json::json!({
                        "ok": false,
                        "error": { "code": "bad_json", "message": e.to_string() }
                    })
                );
                let _ = stdout.flush();
                continue;
            }
        };

        tracing::debug!(id = %req.id, method = %req.method, "request");
        let id = req.id.clone();
        let method = req.method.clone();
        // An open transaction rolls back when its guard unwinds.
        let resp = panic::catch_unwind(AssertUnwindSafe(|| ipc::handle_request(&mut state, req)))
            .unwrap_or_else(|_| {
                tracing::error!(id = %id, method = %method, "handler panicked");
                serde_json::json!({
                    "id": id,
                    "ok": false,
                    "error": { "code": "internal_error", "message": "request handler panicked" }
                })
            });
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    Ok(())
}
