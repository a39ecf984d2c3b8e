use anyhow::Context;
use rusqlite::Connection;
use std::path::PathBuf;
use tracing::metadata::LevelFilter;

use crate::db;

/// Session count assumed for a student when no total has been entered and
/// fewer actual sessions than this have been recorded.
pub const DEFAULT_TOTAL_SESSIONS: i64 = 30;
pub const DEFAULT_QUICK_SESSION_MINUTES: i64 = 60;
pub const DEFAULT_LATE_THRESHOLD_MINUTES: i64 = 15;

pub const SETTING_DEFAULT_TOTAL_SESSIONS: &str = "attendance.defaultTotalSessions";

#[derive(Debug, Clone)]
pub struct Config {
    pub default_total_sessions: i64,
    pub quick_session_minutes: i64,
    pub late_threshold_minutes: i64,
    pub workspace: Option<PathBuf>,
    pub log_level: LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_total_sessions: DEFAULT_TOTAL_SESSIONS,
            quick_session_minutes: DEFAULT_QUICK_SESSION_MINUTES,
            late_threshold_minutes: DEFAULT_LATE_THRESHOLD_MINUTES,
            workspace: None,
            log_level: LevelFilter::INFO,
        }
    }
}

impl Config {
    /// Reads `.env` (if any) and `SCHOOLD_*` variables on top of the defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut cfg = Config::default();

        if let Some(v) = read_i64("SCHOOLD_DEFAULT_TOTAL_SESSIONS")? {
            cfg.default_total_sessions = v;
        }
        if let Some(v) = read_i64("SCHOOLD_QUICK_SESSION_MINUTES")? {
            cfg.quick_session_minutes = v;
        }
        if let Some(v) = read_i64("SCHOOLD_LATE_THRESHOLD_MINUTES")? {
            cfg.late_threshold_minutes = v;
        }
        if let Ok(p) = std::env::var("SCHOOLD_WORKSPACE") {
            if !p.trim().is_empty() {
                cfg.workspace = Some(PathBuf::from(p.trim()));
            }
        }
        if let Ok(level) = std::env::var("SCHOOLD_LOG") {
            cfg.log_level = level
                .trim()
                .parse::<LevelFilter>()
                .with_context(|| format!("SCHOOLD_LOG has an unknown level: {}", level))?;
        }
        Ok(cfg)
    }

    /// Default session total for a workspace. A value stored in the
    /// workspace settings wins over the process-wide one.
    pub fn default_total_sessions(&self, conn: &Connection) -> i64 {
        match db::settings_get_json(conn, SETTING_DEFAULT_TOTAL_SESSIONS) {
            Ok(Some(v)) => v
                .as_i64()
                .filter(|n| *n >= 0)
                .unwrap_or(self.default_total_sessions),
            Ok(None) => self.default_total_sessions,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read workspace settings, using default total");
                self.default_total_sessions
            }
        }
    }
}

fn read_i64(key: &str) -> anyhow::Result<Option<i64>> {
    let Ok(raw) = std::env::var(key) else {
        return Ok(None);
    };
    let v = raw
        .trim()
        .parse::<i64>()
        .with_context(|| format!("{} must be an integer, got {:?}", key, raw))?;
    if v < 0 {
        anyhow::bail!("{} must not be negative", key);
    }
    Ok(Some(v))
}
