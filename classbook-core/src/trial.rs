use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::identity::{ContactInfo, Identity};
use crate::{CoreError, CoreResult};

pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrialStatus {
    Booked,
    Cancelled,
    Completed,
    NoShow,
}

impl TrialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrialStatus::Booked => "BOOKED",
            TrialStatus::Cancelled => "CANCELLED",
            TrialStatus::Completed => "COMPLETED",
            TrialStatus::NoShow => "NO_SHOW",
        }
    }

    pub fn is_active(&self) -> bool {
        *self == TrialStatus::Booked
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrialStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BOOKED" => Ok(TrialStatus::Booked),
            "CANCELLED" => Ok(TrialStatus::Cancelled),
            "COMPLETED" => Ok(TrialStatus::Completed),
            "NO_SHOW" | "NOSHOW" => Ok(TrialStatus::NoShow),
            other => Err(CoreError::Validation(format!("unknown trial status: {}", other))),
        }
    }
}

/// One-off reservation of a single occurrence of a course's weekly slot.
///
/// `identity` is always `Member` or `Guest`. `start_time` is the course start time
/// captured at booking; together with `course_id` and `booking_date` it forms the
/// capacity key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrialBooking {
    pub id: Uuid,
    pub identity: Identity,
    pub contact: ContactInfo,
    pub course_id: Uuid,
    pub booking_date: NaiveDate,
    pub start_time: NaiveTime,
    pub status: TrialStatus,
    pub booked_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl TrialBooking {
    pub fn new(
        identity: Identity,
        contact: ContactInfo,
        course_id: Uuid,
        booking_date: NaiveDate,
        start_time: NaiveTime,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity,
            contact,
            course_id,
            booking_date,
            start_time,
            status: TrialStatus::Booked,
            booked_at: now,
            updated_at: now,
        }
    }

    pub fn member_id(&self) -> Option<Uuid> {
        self.identity.member_id()
    }

    pub fn occurrence(&self) -> NaiveDateTime {
        self.booking_date.and_time(self.start_time)
    }

    /// Still booked although the occurrence has already started.
    pub fn is_overdue(&self, now: NaiveDateTime) -> bool {
        self.status == TrialStatus::Booked && self.occurrence() < now
    }

    pub fn update_status(&mut self, status: TrialStatus, now: NaiveDateTime) {
        self.status = status;
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrialBookingFilter {
    pub status: Option<TrialStatus>,
    pub course_id: Option<Uuid>,
    pub member_id: Option<Uuid>,
}

impl TrialBookingFilter {
    pub fn matches(&self, booking: &TrialBooking) -> bool {
        self.status.map_or(true, |s| booking.status == s)
            && self.course_id.map_or(true, |c| booking.course_id == c)
            && self.member_id.map_or(true, |m| booking.member_id() == Some(m))
    }
}

/// Zero-based page request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub size: u32,
}

impl Page {
    pub fn new(number: u32, size: u32) -> CoreResult<Self> {
        if size == 0 || size > MAX_PAGE_SIZE {
            return Err(CoreError::Validation(format!(
                "page size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        Ok(Self { number, size })
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.number) * u64::from(self.size)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self { number: 0, size: 20 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub number: u32,
    pub size: u32,
}

impl<T> Paged<T> {
    pub fn total_pages(&self) -> u64 {
        if self.size == 0 {
            0
        } else {
            self.total.div_ceil(u64::from(self.size))
        }
    }
}
