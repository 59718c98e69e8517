use chrono::{Duration, NaiveDate};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use classbook_core::repository::{
    DuplicateScope, TrialAdmissionRule, TrialSlotSnapshot, TrialStore, TrialTransitionRule,
};
use classbook_core::{
    Clock, ConflictReason, ContactInfo, CoreError, CoreResult, Course, CourseCatalog, Identity,
    MemberDirectory, Page, Paged, TrialBooking, TrialBookingFilter, TrialStatus,
    TRIAL_BOOKING_CUTOFF_HOURS,
};

use crate::retry::{retry_on_contention, ContentionPolicy};

/// Checks run against the locked capacity key, in rejection order.
fn trial_admission_rule<'a>(
    course: &'a Course,
    booking: &'a TrialBooking,
    clock: &'a dyn Clock,
) -> impl Fn(&TrialSlotSnapshot) -> CoreResult<()> + Send + Sync + 'a {
    move |snapshot| {
        if snapshot.holds_enrollment {
            return Err(ConflictReason::AlreadyMember.into());
        }
        if booking.occurrence() - clock.now() < Duration::hours(TRIAL_BOOKING_CUTOFF_HOURS) {
            return Err(ConflictReason::BookingCutoff.into());
        }
        if snapshot.duplicates > 0 {
            return Err(ConflictReason::AlreadyBooked.into());
        }
        let capacity = course.trial_capacity().ok_or(ConflictReason::TrialCapacityUnset)?;
        if snapshot.booked >= i64::from(capacity) {
            return Err(ConflictReason::SlotFull.into());
        }
        Ok(())
    }
}

fn cancel_rule(booking: &TrialBooking) -> CoreResult<TrialStatus> {
    if booking.status.is_terminal() {
        return Err(ConflictReason::TerminalStatus { status: booking.status.to_string() }.into());
    }
    Ok(TrialStatus::Cancelled)
}

fn override_rule(target: TrialStatus) -> impl Fn(&TrialBooking) -> CoreResult<TrialStatus> + Send + Sync {
    move |booking| {
        if booking.status.is_terminal() {
            return Err(ConflictReason::TerminalStatus { status: booking.status.to_string() }.into());
        }
        Ok(target)
    }
}

/// One-off trial reservations for prospective members and guests.
pub struct TrialBookingManager {
    catalog: Arc<dyn CourseCatalog>,
    members: Arc<dyn MemberDirectory>,
    store: Arc<dyn TrialStore>,
    clock: Arc<dyn Clock>,
    policy: ContentionPolicy,
}

impl TrialBookingManager {
    pub fn new(
        catalog: Arc<dyn CourseCatalog>,
        members: Arc<dyn MemberDirectory>,
        store: Arc<dyn TrialStore>,
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

    async fn booking(&self, booking_id: Uuid) -> CoreResult<TrialBooking> {
        self.store
            .get_trial(booking_id)
            .await?
            .ok_or_else(|| CoreError::not_found("trial booking", booking_id))
    }

    /// Settles who is booking and which contact details go on the row.
    /// Members default to their directory contact; anonymous callers with contact
    /// details book as guests.
    async fn resolve_identity(
        &self,
        identity: Identity,
        contact: Option<ContactInfo>,
    ) -> CoreResult<(Identity, ContactInfo)> {
        match identity {
            Identity::Member { member_id } => {
                let member = self
                    .members
                    .get_member(member_id)
                    .await?
                    .ok_or_else(|| CoreError::not_found("member", member_id))?;
                let contact = contact.unwrap_or_else(|| member.contact()).normalized()?;
                Ok((Identity::member(member_id), contact))
            }
            Identity::Guest { contact: own } => {
                let contact = contact.unwrap_or(own).normalized()?;
                Ok((Identity::guest(contact.clone()), contact))
            }
            Identity::Anonymous => {
                let contact = contact
                    .ok_or_else(|| {
                        CoreError::Validation("contact details are required for guest bookings".to_string())
                    })?
                    .normalized()?;
                Ok((Identity::guest(contact.clone()), contact))
            }
        }
    }

    /// Books one trial occurrence of `course_id` on `booking_date`.
    #[instrument(skip(self, identity, contact))]
    pub async fn book(
        &self,
        identity: Identity,
        course_id: Uuid,
        booking_date: NaiveDate,
        contact: Option<ContactInfo>,
    ) -> CoreResult<TrialBooking> {
        let course = self.course(course_id).await?;
        if !course.offers_trial_option {
            return Err(ConflictReason::NotTrialCourse.into());
        }
        let (identity, contact) = self.resolve_identity(identity, contact).await?;
        if !course.falls_on(booking_date) {
            return Err(CoreError::Validation(format!(
                "{} is not a scheduled day for course {}",
                booking_date, course.name
            )));
        }

        let booking = TrialBooking::new(
            identity,
            contact,
            course_id,
            booking_date,
            course.start_time,
            self.clock.now(),
        );
        let scope = match booking.member_id() {
            Some(member_id) => DuplicateScope::MemberCourse {
                member_id,
                course_id,
                from: self.clock.now().date(),
            },
            None => DuplicateScope::GuestSlot {
                contact: booking.contact.clone(),
                course_id,
                booking_date,
            },
        };
        let rule = trial_admission_rule(&course, &booking, self.clock.as_ref());
        let rule: TrialAdmissionRule<'_> = &rule;

        let booked = retry_on_contention(&self.policy, "book_trial", || {
            self.store.admit_trial(booking.clone(), &scope, rule)
        })
        .await?;

        info!(
            booking_id = %booked.id,
            %course_id,
            %booking_date,
            member = booked.identity.is_member(),
            "Trial booked"
        );
        debug!(contact = ?booked.contact, "Trial contact");
        Ok(booked)
    }

    #[instrument(skip(self))]
    pub async fn cancel(&self, booking_id: Uuid) -> CoreResult<TrialBooking> {
        let rule: TrialTransitionRule<'_> = &cancel_rule;
        let booking = self.store.transition_trial(booking_id, self.clock.now(), rule).await?;
        info!(%booking_id, "Trial cancelled");
        Ok(booking)
    }

    /// Administrative transition to any status; terminal rows stay put.
    #[instrument(skip(self))]
    pub async fn update_status(&self, booking_id: Uuid, status: &str) -> CoreResult<TrialBooking> {
        let target: TrialStatus = status.parse()?;
        let rule = override_rule(target);
        let rule: TrialTransitionRule<'_> = &rule;
        let booking = self.store.transition_trial(booking_id, self.clock.now(), rule).await?;
        info!(%booking_id, status = %target, "Trial status updated");
        Ok(booking)
    }

    pub async fn get(&self, booking_id: Uuid) -> CoreResult<TrialBooking> {
        self.booking(booking_id).await
    }

    pub async fn list_by_member(&self, member_id: Uuid) -> CoreResult<Vec<TrialBooking>> {
        self.store.list_trials_by_member(member_id).await
    }

    pub async fn list_by_course(&self, course_id: Uuid) -> CoreResult<Vec<TrialBooking>> {
        self.store.list_trials_by_course(course_id).await
    }

    pub async fn list(&self, filter: &TrialBookingFilter, page: Page) -> CoreResult<Paged<TrialBooking>> {
        Page::new(page.number, page.size)?;
        self.store.list_trials(filter, page).await
    }

    pub async fn search_by_name(&self, query: &str) -> CoreResult<Vec<TrialBooking>> {
        if query.trim().is_empty() {
            return Err(CoreError::Validation("search query must not be blank".to_string()));
        }
        self.store.search_trials_by_name(query).await
    }

    /// Free trial seats for one occurrence. Zero when the course has no trial ceiling.
    pub async fn available_seats(&self, course_id: Uuid, booking_date: NaiveDate) -> CoreResult<i64> {
        let course = self.course(course_id).await?;
        let Some(capacity) = course.trial_capacity() else {
            return Ok(0);
        };
        let booked = self
            .store
            .count_booked(course_id, booking_date, course.start_time)
            .await?;
        Ok((i64::from(capacity) - booked).max(0))
    }
}
