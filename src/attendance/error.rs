use serde_json::json;

use super::sessions::SessionStatus;
use crate::academics::AcademicsError;
use crate::identity::IdentityError;
use crate::policy::PermissionDenied;

#[derive(thiserror::Error, Debug)]
pub enum AttendanceError {
    #[error("Permission denied")]
    PermissionDenied,
    #[error("{0}")]
    InvalidValue(String),
    #[error("Total sessions cannot be less than actual attendance records ({actual})")]
    BelowActualCount { actual: i64, requested: i64 },
    #[error("Student is not assigned to any classroom.")]
    ProfileIncomplete { student_id: String },
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("cannot move a {from} session to {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Academics(#[from] AcademicsError),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl From<PermissionDenied> for AttendanceError {
    fn from(_: PermissionDenied) -> Self {
        AttendanceError::PermissionDenied
    }
}

impl AttendanceError {
    pub fn code(&self) -> &'static str {
        match self {
            AttendanceError::PermissionDenied => "permission_denied",
            AttendanceError::InvalidValue(_) => "invalid_value",
            AttendanceError::BelowActualCount { .. } => "below_actual_count",
            AttendanceError::ProfileIncomplete { .. } => "profile_incomplete",
            AttendanceError::NotFound(_) => "not_found",
            AttendanceError::InvalidTransition { .. } => "invalid_transition",
            AttendanceError::Identity(e) => e.code(),
            AttendanceError::Academics(e) => e.code(),
            AttendanceError::Storage(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            AttendanceError::BelowActualCount { actual, requested } => Some(json!({
                "actualCount": actual,
                "requested": requested,
            })),
            AttendanceError::ProfileIncomplete { student_id } => {
                Some(json!({ "studentId": student_id }))
            }
            _ => None,
        }
    }
}
