use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::CoreError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    Registered,
    Waitlisted,
    Cancelled,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Registered => "REGISTERED",
            EnrollmentStatus::Waitlisted => "WAITLISTED",
            EnrollmentStatus::Cancelled => "CANCELLED",
        }
    }

    /// Still occupies a seat or a waitlist place.
    pub fn is_active(&self) -> bool {
        matches!(self, EnrollmentStatus::Registered | EnrollmentStatus::Waitlisted)
    }

    pub fn is_terminal(&self) -> bool {
        *self == EnrollmentStatus::Cancelled
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnrollmentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "REGISTERED" => Ok(EnrollmentStatus::Registered),
            "WAITLISTED" => Ok(EnrollmentStatus::Waitlisted),
            "CANCELLED" => Ok(EnrollmentStatus::Cancelled),
            other => Err(CoreError::Validation(format!(
                "unknown enrollment status: {}",
                other
            ))),
        }
    }
}

/// Standing membership of one member in one course's weekly slot.
/// Never deleted; cancellation is a status change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Enrollment {
    pub id: Uuid,
    pub member_id: Uuid,
    pub course_id: Uuid,
    pub status: EnrollmentStatus,
    pub enrolled_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Enrollment {
    pub fn new(member_id: Uuid, course_id: Uuid, status: EnrollmentStatus, now: NaiveDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            member_id,
            course_id,
            status,
            enrolled_at: now,
            updated_at: now,
        }
    }

    pub fn update_status(&mut self, status: EnrollmentStatus, now: NaiveDateTime) {
        self.status = status;
        self.updated_at = now;
    }
}
