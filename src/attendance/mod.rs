pub mod error;
pub mod overrides;
pub mod reconcile;
pub mod records;
pub mod sessions;
pub mod views;

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

pub use error::AttendanceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = AttendanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "late" => Ok(AttendanceStatus::Late),
            "excused" => Ok(AttendanceStatus::Excused),
            other => Err(AttendanceError::InvalidValue(format!(
                "status must be one of: present, absent, late, excused (got {:?})",
                other
            ))),
        }
    }
}

/// Which custom count an edit targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CountType {
    Present,
    Late,
    Absent,
}

impl CountType {
    pub fn as_str(self) -> &'static str {
        match self {
            CountType::Present => "present",
            CountType::Late => "late",
            CountType::Absent => "absent",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            CountType::Present => "Present",
            CountType::Late => "Late",
            CountType::Absent => "Absent",
        }
    }
}

impl FromStr for CountType {
    type Err = AttendanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Ok(CountType::Present),
            "late" => Ok(CountType::Late),
            "absent" => Ok(CountType::Absent),
            _ => Err(AttendanceError::InvalidValue(
                "Invalid count type. Must be present, late, or absent.".to_string(),
            )),
        }
    }
}

/// The (student, classroom, subject) key of override rows. Record tallies
/// use only the student and subject. `classroom_id` is `None` only for
/// students without a classroom, who can be viewed but not edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub student_id: String,
    pub classroom_id: Option<String>,
    pub subject_id: Option<String>,
}

impl Scope {
    /// Stored subject key; classroom-wide rows use the empty string.
    pub fn subject_key(&self) -> &str {
        self.subject_id.as_deref().unwrap_or("")
    }
}
