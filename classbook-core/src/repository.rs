use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use uuid::Uuid;

use crate::enrollment::{Enrollment, EnrollmentStatus};
use crate::identity::ContactInfo;
use crate::trial::{Page, Paged, TrialBooking, TrialBookingFilter, TrialStatus};
use crate::CoreResult;

/// What the admission transaction saw for one (member, course) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionSnapshot {
    pub active: Option<Enrollment>,
    pub registered: i64,
}

/// What a status-change transaction saw for one enrollment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionSnapshot {
    pub current: Enrollment,
    pub registered: i64,
}

/// Result of an enrollment status change, including any waitlist promotions
/// committed in the same transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentTransition {
    pub enrollment: Enrollment,
    pub promoted: Vec<Enrollment>,
}

pub type AdmissionRule<'a> = &'a (dyn Fn(&AdmissionSnapshot) -> CoreResult<EnrollmentStatus> + Send + Sync);
pub type TransitionRule<'a> = &'a (dyn Fn(&TransitionSnapshot) -> CoreResult<EnrollmentStatus> + Send + Sync);

/// Enrollment persistence. Every method that writes runs as one transaction scoped to
/// the course, so a concurrent reader sees either the state before or after it.
#[async_trait]
pub trait EnrollmentStore: Send + Sync {
    /// Reads the snapshot for `(member_id, course_id)`, asks `rule` for the status of the new
    /// row, and inserts it. Nothing is written when `rule` fails.
    async fn admit_enrollment(
        &self,
        member_id: Uuid,
        course_id: Uuid,
        now: NaiveDateTime,
        rule: AdmissionRule<'_>,
    ) -> CoreResult<Enrollment>;

    /// Applies the status chosen by `rule`. When a `Registered` row is cancelled, the oldest
    /// waitlisted rows of the course are promoted until `capacity` is reached.
    async fn transition_enrollment(
        &self,
        id: Uuid,
        capacity: i32,
        now: NaiveDateTime,
        rule: TransitionRule<'_>,
    ) -> CoreResult<EnrollmentTransition>;

    /// Promotes waitlisted rows, oldest first, while the course is below `capacity`.
    async fn fill_vacancies(
        &self,
        course_id: Uuid,
        capacity: i32,
        now: NaiveDateTime,
    ) -> CoreResult<Vec<Enrollment>>;

    async fn get_enrollment(&self, id: Uuid) -> CoreResult<Option<Enrollment>>;

    async fn find_active_enrollment(
        &self,
        member_id: Uuid,
        course_id: Uuid,
    ) -> CoreResult<Option<Enrollment>>;

    async fn list_enrollments_by_member(&self, member_id: Uuid) -> CoreResult<Vec<Enrollment>>;

    async fn list_enrollments_by_course(&self, course_id: Uuid) -> CoreResult<Vec<Enrollment>>;

    async fn count_registered(&self, course_id: Uuid) -> CoreResult<i64>;

    /// Waitlisted rows of a course in promotion order.
    async fn waitlist(&self, course_id: Uuid) -> CoreResult<Vec<Enrollment>>;
}

/// Which earlier bookings count as duplicates of a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateScope {
    /// Any active booking of the member for the course dated on or after `from`.
    MemberCourse {
        member_id: Uuid,
        course_id: Uuid,
        from: NaiveDate,
    },
    /// An active booking with the same contact tuple for the same course and date.
    GuestSlot {
        contact: ContactInfo,
        course_id: Uuid,
        booking_date: NaiveDate,
    },
}

impl DuplicateScope {
    /// Whether `booking` is an active booking inside this scope.
    pub fn matches(&self, booking: &TrialBooking) -> bool {
        if !booking.status.is_active() {
            return false;
        }
        match self {
            DuplicateScope::MemberCourse { member_id, course_id, from } => {
                booking.member_id() == Some(*member_id)
                    && booking.course_id == *course_id
                    && booking.booking_date >= *from
            }
            DuplicateScope::GuestSlot { contact, course_id, booking_date } => {
                booking.contact == *contact
                    && booking.course_id == *course_id
                    && booking.booking_date == *booking_date
            }
        }
    }
}

/// What the trial admission transaction saw for one capacity key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialSlotSnapshot {
    /// The booking member holds an active enrollment in the course.
    pub holds_enrollment: bool,
    pub duplicates: i64,
    /// Active bookings for (course, date, start time).
    pub booked: i64,
}

pub type TrialAdmissionRule<'a> = &'a (dyn Fn(&TrialSlotSnapshot) -> CoreResult<()> + Send + Sync);
pub type TrialTransitionRule<'a> = &'a (dyn Fn(&TrialBooking) -> CoreResult<TrialStatus> + Send + Sync);

#[async_trait]
pub trait TrialStore: Send + Sync {
    /// Reads the snapshot for the booking's capacity key and duplicate scope, consults
    /// `rule`, and inserts `booking` when it passes. One transaction.
    async fn admit_trial(
        &self,
        booking: TrialBooking,
        scope: &DuplicateScope,
        rule: TrialAdmissionRule<'_>,
    ) -> CoreResult<TrialBooking>;

    async fn transition_trial(
        &self,
        id: Uuid,
        now: NaiveDateTime,
        rule: TrialTransitionRule<'_>,
    ) -> CoreResult<TrialBooking>;

    async fn get_trial(&self, id: Uuid) -> CoreResult<Option<TrialBooking>>;

    async fn list_trials_by_member(&self, member_id: Uuid) -> CoreResult<Vec<TrialBooking>>;

    async fn list_trials_by_course(&self, course_id: Uuid) -> CoreResult<Vec<TrialBooking>>;

    /// Newest first.
    async fn list_trials(
        &self,
        filter: &TrialBookingFilter,
        page: Page,
    ) -> CoreResult<Paged<TrialBooking>>;

    /// Case-insensitive substring match on the contact name.
    async fn search_trials_by_name(&self, query: &str) -> CoreResult<Vec<TrialBooking>>;

    async fn count_booked(
        &self,
        course_id: Uuid,
        booking_date: NaiveDate,
        start_time: NaiveTime,
    ) -> CoreResult<i64>;

    /// Booked rows whose occurrence is strictly before `now`, ordered by id, starting after
    /// the `after` cursor.
    async fn find_overdue_trials(
        &self,
        now: NaiveDateTime,
        after: Option<Uuid>,
        limit: u32,
    ) -> CoreResult<Vec<TrialBooking>>;

    /// Moves one overdue row to `NoShow`. Returns `false` when the row is no longer booked
    /// or not yet overdue.
    async fn mark_no_show(&self, id: Uuid, now: NaiveDateTime) -> CoreResult<bool>;
}
