use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use classbook_core::repository::{
    AdmissionRule, AdmissionSnapshot, EnrollmentStore, EnrollmentTransition, TransitionRule,
    TransitionSnapshot,
};
use classbook_core::{
    Clock, ConflictReason, CoreError, CoreResult, Course, CourseCatalog, Enrollment,
    EnrollmentStatus, MemberDirectory,
};

use crate::retry::{retry_on_contention, ContentionPolicy};

/// Decides the status of a new enrollment. Capacity exhaustion degrades to the waitlist.
fn admission_rule(course: &Course) -> impl Fn(&AdmissionSnapshot) -> CoreResult<EnrollmentStatus> + Send + Sync + '_ {
    move |snapshot| {
        if snapshot.active.is_some() {
            return Err(ConflictReason::AlreadyEnrolled.into());
        }
        if course.is_full(snapshot.registered) {
            Ok(EnrollmentStatus::Waitlisted)
        } else {
            Ok(EnrollmentStatus::Registered)
        }
    }
}

fn cancel_rule(snapshot: &TransitionSnapshot) -> CoreResult<EnrollmentStatus> {
    if snapshot.current.status == EnrollmentStatus::Cancelled {
        return Err(ConflictReason::AlreadyCancelled.into());
    }
    Ok(EnrollmentStatus::Cancelled)
}

fn override_rule(
    course: &Course,
    target: EnrollmentStatus,
) -> impl Fn(&TransitionSnapshot) -> CoreResult<EnrollmentStatus> + Send + Sync + '_ {
    move |snapshot| {
        let current = snapshot.current.status;
        if current.is_terminal() {
            return Err(ConflictReason::TerminalStatus { status: current.to_string() }.into());
        }
        if target == EnrollmentStatus::Registered
            && current != EnrollmentStatus::Registered
            && course.is_full(snapshot.registered)
        {
            return Err(ConflictReason::SlotFull.into());
        }
        Ok(target)
    }
}

/// Lifecycle of standing enrollments: admission, cancellation with waitlist
/// promotion, and administrative overrides.
pub struct EnrollmentManager {
    catalog: Arc<dyn CourseCatalog>,
    members: Arc<dyn MemberDirectory>,
    store: Arc<dyn EnrollmentStore>,
    clock: Arc<dyn Clock>,
    policy: ContentionPolicy,
}

impl EnrollmentManager {
    pub fn new(
        catalog: Arc<dyn CourseCatalog>,
        members: Arc<dyn MemberDirectory>,
        store: Arc<dyn EnrollmentStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            catalog,
            members,
            store,
            clock,
            policy: ContentionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ContentionPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn course(&self, course_id: Uuid) -> CoreResult<Course> {
        self.catalog
            .get_course(course_id)
            .await?
            .ok_or_else(|| CoreError::not_found("course", course_id))
    }

    async fn enrollment(&self, id: Uuid) -> CoreResult<Enrollment> {
        self.store
            .get_enrollment(id)
            .await?
            .ok_or_else(|| CoreError::not_found("enrollment", id))
    }

    /// Registers the member, or waitlists them when the course is full.
    #[instrument(skip(self))]
    pub async fn enroll(&self, member_id: Uuid, course_id: Uuid) -> CoreResult<Enrollment> {
        if self.members.get_member(member_id).await?.is_none() {
            return Err(CoreError::not_found("member", member_id));
        }
        let course = self.course(course_id).await?;
        let rule = admission_rule(&course);
        let rule: AdmissionRule<'_> = &rule;

        let enrollment = retry_on_contention(&self.policy, "enroll", || {
            self.store.admit_enrollment(member_id, course_id, self.clock.now(), rule)
        })
        .await?;

        info!(enrollment_id = %enrollment.id, status = %enrollment.status, "Enrollment created");
        Ok(enrollment)
    }

    /// Cancels the enrollment. A cancelled seat is handed to the head of the waitlist
    /// in the same transaction.
    #[instrument(skip(self))]
    pub async fn cancel(&self, enrollment_id: Uuid) -> CoreResult<EnrollmentTransition> {
        let existing = self.enrollment(enrollment_id).await?;
        let course = self.course(existing.course_id).await?;
        let rule: TransitionRule<'_> = &cancel_rule;

        let transition = retry_on_contention(&self.policy, "cancel_enrollment", || {
            self.store
                .transition_enrollment(enrollment_id, course.max_capacity, self.clock.now(), rule)
        })
        .await?;

        info!(
            %enrollment_id,
            promoted = transition.promoted.len(),
            "Enrollment cancelled"
        );
        Ok(transition)
    }

    /// Administrative status override. `status` is parsed case-insensitively.
    #[instrument(skip(self))]
    pub async fn update_status(&self, enrollment_id: Uuid, status: &str) -> CoreResult<EnrollmentTransition> {
        let target: EnrollmentStatus = status.parse()?;
        let existing = self.enrollment(enrollment_id).await?;
        let course = self.course(existing.course_id).await?;
        let rule = override_rule(&course, target);
        let rule: TransitionRule<'_> = &rule;

        let transition = retry_on_contention(&self.policy, "update_enrollment_status", || {
            self.store
                .transition_enrollment(enrollment_id, course.max_capacity, self.clock.now(), rule)
        })
        .await?;

        info!(%enrollment_id, status = %target, "Enrollment status overridden");
        Ok(transition)
    }

    /// Promotes waitlisted members, oldest first, into any free seats. Safe to call
    /// repeatedly; a full course is left untouched.
    #[instrument(skip(self))]
    pub async fn process_waitlist(&self, course_id: Uuid) -> CoreResult<Vec<Enrollment>> {
        let course = self.course(course_id).await?;
        let promoted = retry_on_contention(&self.policy, "process_waitlist", || {
            self.store.fill_vacancies(course_id, course.max_capacity, self.clock.now())
        })
        .await?;
        if !promoted.is_empty() {
            info!(%course_id, promoted = promoted.len(), "Waitlist processed");
        }
        Ok(promoted)
    }

    pub async fn get(&self, enrollment_id: Uuid) -> CoreResult<Enrollment> {
        self.enrollment(enrollment_id).await
    }

    pub async fn list_by_member(&self, member_id: Uuid) -> CoreResult<Vec<Enrollment>> {
        self.store.list_enrollments_by_member(member_id).await
    }

    pub async fn list_by_course(&self, course_id: Uuid) -> CoreResult<Vec<Enrollment>> {
        self.store.list_enrollments_by_course(course_id).await
    }

    pub async fn is_full(&self, course_id: Uuid) -> CoreResult<bool> {
        let course = self.course(course_id).await?;
        Ok(course.is_full(self.store.count_registered(course_id).await?))
    }

    /// Whether the member holds an active (registered or waitlisted) enrollment.
    pub async fn is_enrolled(&self, member_id: Uuid, course_id: Uuid) -> CoreResult<bool> {
        Ok(self.store.find_active_enrollment(member_id, course_id).await?.is_some())
    }

    pub async fn enrolled_count(&self, course_id: Uuid) -> CoreResult<i64> {
        self.store.count_registered(course_id).await
    }

    pub async fn remaining_seats(&self, course_id: Uuid) -> CoreResult<i64> {
        let course = self.course(course_id).await?;
        let registered = self.store.count_registered(course_id).await?;
        Ok((i64::from(course.max_capacity) - registered).max(0))
    }

    /// 1-based place in the promotion queue, `None` unless waitlisted.
    pub async fn waitlist_position(&self, enrollment_id: Uuid) -> CoreResult<Option<usize>> {
        let enrollment = self.enrollment(enrollment_id).await?;
        if enrollment.status != EnrollmentStatus::Waitlisted {
            return Ok(None);
        }
        let queue = self.store.waitlist(enrollment.course_id).await?;
        Ok(queue.iter().position(|e| e.id == enrollment_id).map(|p| p + 1))
    }
}
