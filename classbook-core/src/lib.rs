pub mod clock;
pub mod course;
pub mod enrollment;
pub mod identity;
pub mod pii;
pub mod repository;
pub mod trial;

pub use clock::{Clock, FixedClock, SystemClock};
pub use course::{Course, CourseCatalog, Member, MemberDirectory};
pub use enrollment::{Enrollment, EnrollmentStatus};
pub use identity::{ContactInfo, Identity, IdentityResolver};
pub use trial::{Page, Paged, TrialBooking, TrialBookingFilter, TrialStatus};

/// Minimum lead time between booking a trial and the occurrence it pins.
pub const TRIAL_BOOKING_CUTOFF_HOURS: i64 = 24;

/// Business-rule rejections. Not faults: retrying the same request yields the same answer,
/// except for `ConcurrentUpdate`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConflictReason {
    #[error("member already holds an active enrollment for this course")]
    AlreadyEnrolled,
    #[error("enrollment is already cancelled")]
    AlreadyCancelled,
    #[error("course does not offer trial bookings")]
    NotTrialCourse,
    #[error("already a regular member of this course")]
    AlreadyMember,
    #[error("booking must be made at least 24 hours in advance")]
    BookingCutoff,
    #[error("already booked")]
    AlreadyBooked,
    #[error("trial capacity is not configured for this course")]
    TrialCapacityUnset,
    #[error("course is full")]
    SlotFull,
    #[error("status {status} is terminal")]
    TerminalStatus { status: String },
    #[error("concurrent update on the same capacity key")]
    ConcurrentUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(ConflictReason),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Storage fault: {0}")]
    Fault(String),
}

impl CoreError {
    pub fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
        CoreError::NotFound(format!("{} {}", kind, id))
    }

    /// Lost a check-then-insert race; the caller may re-run the whole check.
    pub fn is_contention(&self) -> bool {
        matches!(self, CoreError::Conflict(ConflictReason::ConcurrentUpdate))
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, CoreError::Fault(_))
    }

    pub fn conflict_reason(&self) -> Option<&ConflictReason> {
        match self {
            CoreError::Conflict(reason) => Some(reason),
            _ => None,
        }
    }
}

impl From<ConflictReason> for CoreError {
    fn from(reason: ConflictReason) -> Self {
        CoreError::Conflict(reason)
    }
}

impl From<validator::ValidationErrors> for CoreError {
    fn from(errors: validator::ValidationErrors) -> Self {
        CoreError::Validation(errors.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
