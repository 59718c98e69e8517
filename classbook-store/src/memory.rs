use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use classbook_core::repository::{
    AdmissionRule, AdmissionSnapshot, DuplicateScope, EnrollmentStore, EnrollmentTransition,
    TransitionRule, TransitionSnapshot, TrialAdmissionRule, TrialSlotSnapshot, TrialStore,
    TrialTransitionRule,
};
use classbook_core::{
    CoreError, CoreResult, Course, CourseCatalog, Enrollment, EnrollmentStatus, Member,
    MemberDirectory, Page, Paged, TrialBooking, TrialBookingFilter, TrialStatus,
};

#[derive(Default)]
struct State {
    courses: HashMap<Uuid, Course>,
    members: HashMap<Uuid, Member>,
    enrollments: HashMap<Uuid, Enrollment>,
    /// Insertion order, breaks `enrolled_at` ties in the waitlist.
    enrollment_seq: HashMap<Uuid, u64>,
    next_seq: u64,
    trials: HashMap<Uuid, TrialBooking>,
}

impl State {
    fn active_enrollment(&self, member_id: Uuid, course_id: Uuid) -> Option<&Enrollment> {
        self.enrollments.values().find(|e| {
            e.member_id == member_id && e.course_id == course_id && e.status.is_active()
        })
    }

    fn registered(&self, course_id: Uuid) -> i64 {
        self.enrollments
            .values()
            .filter(|e| e.course_id == course_id && e.status == EnrollmentStatus::Registered)
            .count() as i64
    }

    fn insert_enrollment(&mut self, enrollment: Enrollment) {
        self.next_seq += 1;
        self.enrollment_seq.insert(enrollment.id, self.next_seq);
        self.enrollments.insert(enrollment.id, enrollment);
    }

    fn waitlist(&self, course_id: Uuid) -> Vec<Enrollment> {
        let mut waiting: Vec<&Enrollment> = self
            .enrollments
            .values()
            .filter(|e| e.course_id == course_id && e.status == EnrollmentStatus::Waitlisted)
            .collect();
        waiting.sort_by_key(|e| (e.enrolled_at, self.enrollment_seq.get(&e.id).copied()));
        waiting.into_iter().cloned().collect()
    }

    fn fill_vacancies(&mut self, course_id: Uuid, capacity: i32, now: NaiveDateTime) -> Vec<Enrollment> {
        let vacancies = (i64::from(capacity) - self.registered(course_id)).max(0) as usize;
        let mut promoted = Vec::new();
        for candidate in self.waitlist(course_id).into_iter().take(vacancies) {
            if let Some(row) = self.enrollments.get_mut(&candidate.id) {
                row.update_status(EnrollmentStatus::Registered, now);
                promoted.push(row.clone());
            }
        }
        promoted
    }
}

/// Reservation store held in process memory.
///
/// A single async mutex guards all state, so every trait method is one serializable
/// transaction. Also serves as catalog and member directory for seeded data.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_course(&self, course: Course) {
        self.state.lock().await.courses.insert(course.id, course);
    }

    pub async fn add_member(&self, member: Member) {
        self.state.lock().await.members.insert(member.id, member);
    }
}

#[async_trait]
impl CourseCatalog for MemoryStore {
    async fn get_course(&self, id: Uuid) -> CoreResult<Option<Course>> {
        Ok(self.state.lock().await.courses.get(&id).cloned())
    }
}

#[async_trait]
impl MemberDirectory for MemoryStore {
    async fn get_member(&self, id: Uuid) -> CoreResult<Option<Member>> {
        Ok(self.state.lock().await.members.get(&id).cloned())
    }
}

#[async_trait]
impl EnrollmentStore for MemoryStore {
    async fn admit_enrollment(
        &self,
        member_id: Uuid,
        course_id: Uuid,
        now: NaiveDateTime,
        rule: AdmissionRule<'_>,
    ) -> CoreResult<Enrollment> {
        let mut state = self.state.lock().await;
        let snapshot = AdmissionSnapshot {
            active: state.active_enrollment(member_id, course_id).cloned(),
            registered: state.registered(course_id),
        };
        let status = rule(&snapshot)?;
        let enrollment = Enrollment::new(member_id, course_id, status, now);
        state.insert_enrollment(enrollment.clone());
        Ok(enrollment)
    }

    async fn transition_enrollment(
        &self,
        id: Uuid,
        capacity: i32,
        now: NaiveDateTime,
        rule: TransitionRule<'_>,
    ) -> CoreResult<EnrollmentTransition> {
        let mut state = self.state.lock().await;
        let current = state
            .enrollments
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("enrollment", id))?;
        let snapshot = TransitionSnapshot {
            registered: state.registered(current.course_id),
            current,
        };
        let target = rule(&snapshot)?;

        let enrollment = match state.enrollments.get_mut(&id) {
            Some(row) => {
                row.update_status(target, now);
                row.clone()
            }
            None => return Err(CoreError::not_found("enrollment", id)),
        };

        let vacated = snapshot.current.status == EnrollmentStatus::Registered
            && target == EnrollmentStatus::Cancelled;
        let promoted = if vacated {
            state.fill_vacancies(enrollment.course_id, capacity, now)
        } else {
            Vec::new()
        };

        Ok(EnrollmentTransition { enrollment, promoted })
    }

    async fn fill_vacancies(
        &self,
        course_id: Uuid,
        capacity: i32,
        now: NaiveDateTime,
    ) -> CoreResult<Vec<Enrollment>> {
        Ok(self.state.lock().await.fill_vacancies(course_id, capacity, now))
    }

    async fn get_enrollment(&self, id: Uuid) -> CoreResult<Option<Enrollment>> {
        Ok(self.state.lock().await.enrollments.get(&id).cloned())
    }

    async fn find_active_enrollment(
        &self,
        member_id: Uuid,
        course_id: Uuid,
    ) -> CoreResult<Option<Enrollment>> {
        Ok(self.state.lock().await.active_enrollment(member_id, course_id).cloned())
    }

    async fn list_enrollments_by_member(&self, member_id: Uuid) -> CoreResult<Vec<Enrollment>> {
        let state = self.state.lock().await;
        let mut rows: Vec<Enrollment> = state
            .enrollments
            .values()
            .filter(|e| e.member_id == member_id)
            .cloned()
            .collect();
        rows.sort_by_key(|e| (e.enrolled_at, state.enrollment_seq.get(&e.id).copied()));
        Ok(rows)
    }

    async fn list_enrollments_by_course(&self, course_id: Uuid) -> CoreResult<Vec<Enrollment>> {
        let state = self.state.lock().await;
        let mut rows: Vec<Enrollment> = state
            .enrollments
            .values()
            .filter(|e| e.course_id == course_id)
            .cloned()
            .collect();
        rows.sort_by_key(|e| (e.enrolled_at, state.enrollment_seq.get(&e.id).copied()));
        Ok(rows)
    }

    async fn count_registered(&self, course_id: Uuid) -> CoreResult<i64> {
        Ok(self.state.lock().await.registered(course_id))
    }

    async fn waitlist(&self, course_id: Uuid) -> CoreResult<Vec<Enrollment>> {
        Ok(self.state.lock().await.waitlist(course_id))
    }
}

#[async_trait]
impl TrialStore for MemoryStore {
    async fn admit_trial(
        &self,
        booking: TrialBooking,
        scope: &DuplicateScope,
        rule: TrialAdmissionRule<'_>,
    ) -> CoreResult<TrialBooking> {
        let mut state = self.state.lock().await;
        let holds_enrollment = booking
            .member_id()
            .map_or(false, |m| state.active_enrollment(m, booking.course_id).is_some());
        let duplicates = state.trials.values().filter(|t| scope.matches(t)).count() as i64;
        let booked = state
            .trials
            .values()
            .filter(|t| {
                t.status.is_active()
                    && t.course_id == booking.course_id
                    && t.booking_date == booking.booking_date
                    && t.start_time == booking.start_time
            })
            .count() as i64;

        rule(&TrialSlotSnapshot { holds_enrollment, duplicates, booked })?;

        state.trials.insert(booking.id, booking.clone());
        Ok(booking)
    }

    async fn transition_trial(
        &self,
        id: Uuid,
        now: NaiveDateTime,
        rule: TrialTransitionRule<'_>,
    ) -> CoreResult<TrialBooking> {
        let mut state = self.state.lock().await;
        let row = state
            .trials
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("trial booking", id))?;
        let target = rule(&*row)?;
        row.update_status(target, now);
        Ok(row.clone())
    }

    async fn get_trial(&self, id: Uuid) -> CoreResult<Option<TrialBooking>> {
        Ok(self.state.lock().await.trials.get(&id).cloned())
    }

    async fn list_trials_by_member(&self, member_id: Uuid) -> CoreResult<Vec<TrialBooking>> {
        let filter = TrialBookingFilter { member_id: Some(member_id), ..Default::default() };
        Ok(self.filtered(&filter).await)
    }

    async fn list_trials_by_course(&self, course_id: Uuid) -> CoreResult<Vec<TrialBooking>> {
        let filter = TrialBookingFilter { course_id: Some(course_id), ..Default::default() };
        Ok(self.filtered(&filter).await)
    }

    async fn list_trials(
        &self,
        filter: &TrialBookingFilter,
        page: Page,
    ) -> CoreResult<Paged<TrialBooking>> {
        let rows = self.filtered(filter).await;
        let total = rows.len() as u64;
        let items = rows
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.size as usize)
            .collect();
        Ok(Paged { items, total, number: page.number, size: page.size })
    }

    async fn search_trials_by_name(&self, query: &str) -> CoreResult<Vec<TrialBooking>> {
        let needle = query.trim().to_lowercase();
        let state = self.state.lock().await;
        let mut rows: Vec<TrialBooking> = state
            .trials
            .values()
            .filter(|t| t.contact.name.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.booked_at.cmp(&a.booked_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn count_booked(
        &self,
        course_id: Uuid,
        booking_date: NaiveDate,
        start_time: NaiveTime,
    ) -> CoreResult<i64> {
        let state = self.state.lock().await;
        Ok(state
            .trials
            .values()
            .filter(|t| {
                t.status == TrialStatus::Booked
                    && t.course_id == course_id
                    && t.booking_date == booking_date
                    && t.start_time == start_time
            })
            .count() as i64)
    }

    async fn find_overdue_trials(
        &self,
        now: NaiveDateTime,
        after: Option<Uuid>,
        limit: u32,
    ) -> CoreResult<Vec<TrialBooking>> {
        let state = self.state.lock().await;
        let mut rows: Vec<TrialBooking> = state
            .trials
            .values()
            .filter(|t| t.is_overdue(now) && after.map_or(true, |cursor| t.id > cursor))
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.id);
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn mark_no_show(&self, id: Uuid, now: NaiveDateTime) -> CoreResult<bool> {
        let mut state = self.state.lock().await;
        let row = state
            .trials
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("trial booking", id))?;
        if !row.is_overdue(now) {
            return Ok(false);
        }
        row.update_status(TrialStatus::NoShow, now);
        Ok(true)
    }
}

impl MemoryStore {
    async fn filtered(&self, filter: &TrialBookingFilter) -> Vec<TrialBooking> {
        let state = self.state.lock().await;
        let mut rows: Vec<TrialBooking> = state
            .trials
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.booked_at.cmp(&a.booked_at).then(a.id.cmp(&b.id)));
        rows
    }
}
