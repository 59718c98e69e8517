use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use futures_util::future::join_all;
use std::sync::Arc;
use uuid::Uuid;

use classbook_booking::{ContentionPolicy, Services};
use classbook_core::{
    Clock, ConflictReason, ContactInfo, CoreError, Course, EnrollmentStatus, FixedClock, Identity,
    Member, TrialStatus,
};
use classbook_store::MemoryStore;

// Saturday. The weekly slots below fall on Monday 2026-10-19.
fn saturday_morning() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 10, 17).unwrap().and_hms_opt(9, 0, 0).unwrap()
}

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
}

fn monday_evening(max_capacity: i32, max_trial_capacity: Option<i32>) -> Course {
    Course {
        id: Uuid::new_v4(),
        name: "Monday Pilates".to_string(),
        day_of_week: 1,
        start_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        duration_minutes: 60,
        max_capacity,
        offers_trial_option: max_trial_capacity.is_some(),
        max_trial_capacity,
    }
}

struct Studio {
    store: Arc<MemoryStore>,
    clock: Arc<FixedClock>,
    services: Services,
}

impl Studio {
    async fn open(courses: &[Course]) -> Self {
        let store = Arc::new(MemoryStore::new());
        for course in courses {
            store.add_course(course.clone()).await;
        }
        let clock = Arc::new(FixedClock::new(saturday_morning()));
        let policy = ContentionPolicy::new(3, std::time::Duration::from_millis(1));
        let services = Services::new(store.clone(), clock.clone(), policy, 50);
        Self { store, clock, services }
    }

    async fn member(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.store
            .add_member(Member {
                id,
                name: name.to_string(),
                email: format!("{}@studio.test", name.to_lowercase()),
                phone: "0933333333".to_string(),
            })
            .await;
        id
    }
}

fn contact(name: &str) -> ContactInfo {
    ContactInfo::new(name, format!("{}@x.com", name.to_lowercase()), "0900000000")
}

#[tokio::test]
async fn scenario_a_cancellation_promotes_waitlist() {
    let course = monday_evening(1, None);
    let studio = Studio::open(&[course.clone()]).await;
    let enrollments = &studio.services.enrollments;
    let x = studio.member("X").await;
    let y = studio.member("Y").await;

    let ex = enrollments.enroll(x, course.id).await.unwrap();
    assert_eq!(ex.status, EnrollmentStatus::Registered);
    let ey = enrollments.enroll(y, course.id).await.unwrap();
    assert_eq!(ey.status, EnrollmentStatus::Waitlisted);
    assert!(enrollments.is_full(course.id).await.unwrap());

    let transition = enrollments.cancel(ex.id).await.unwrap();
    assert_eq!(transition.enrollment.status, EnrollmentStatus::Cancelled);
    assert_eq!(transition.promoted.len(), 1);
    assert_eq!(transition.promoted[0].id, ey.id);
    assert_eq!(enrollments.get(ey.id).await.unwrap().status, EnrollmentStatus::Registered);
    assert!(enrollments.is_full(course.id).await.unwrap());
    assert_eq!(enrollments.enrolled_count(course.id).await.unwrap(), 1);
}

#[tokio::test]
async fn scenario_b_trial_slot_fills_up() {
    let course = monday_evening(10, Some(2));
    let studio = Studio::open(&[course.clone()]).await;
    let trials = &studio.services.trials;

    for name in ["A", "B"] {
        let booked = trials
            .book(Identity::guest(contact(name)), course.id, monday(), None)
            .await
            .unwrap();
        assert_eq!(booked.status, TrialStatus::Booked);
    }
    let err = trials
        .book(Identity::guest(contact("C")), course.id, monday(), None)
        .await
        .unwrap_err();
    assert_eq!(err, CoreError::Conflict(ConflictReason::SlotFull));
    assert_eq!(err.to_string(), "Conflict: course is full");
}

#[tokio::test]
async fn scenario_c_booking_cutoff() {
    let course = monday_evening(10, Some(5));
    let studio = Studio::open(&[course.clone()]).await;
    let trials = &studio.services.trials;
    let occurrence = course.occurrence(monday());

    studio.clock.set(occurrence - Duration::hours(10));
    let err = trials
        .book(Identity::guest(contact("A")), course.id, monday(), None)
        .await
        .unwrap_err();
    assert_eq!(err.conflict_reason(), Some(&ConflictReason::BookingCutoff));
    assert_eq!(
        err.to_string(),
        "Conflict: booking must be made at least 24 hours in advance"
    );

    studio.clock.set(occurrence - Duration::hours(30));
    trials
        .book(Identity::guest(contact("A")), course.id, monday(), None)
        .await
        .unwrap();

    // Exactly 24 hours ahead is still allowed.
    studio.clock.set(occurrence - Duration::hours(24));
    trials
        .book(Identity::guest(contact("B")), course.id, monday(), None)
        .await
        .unwrap();
    studio.clock.set(occurrence - Duration::hours(24) + Duration::seconds(1));
    let err = trials
        .book(Identity::guest(contact("C")), course.id, monday(), None)
        .await
        .unwrap_err();
    assert_eq!(err.conflict_reason(), Some(&ConflictReason::BookingCutoff));

    // A past occurrence is rejected the same way.
    let last_monday = monday() - Duration::days(7);
    let err = trials
        .book(Identity::guest(contact("A")), course.id, last_monday, None)
        .await
        .unwrap_err();
    assert_eq!(err.conflict_reason(), Some(&ConflictReason::BookingCutoff));
}

#[tokio::test]
async fn scenario_d_members_cannot_trial_their_own_course() {
    let course = monday_evening(10, Some(5));
    let studio = Studio::open(&[course.clone()]).await;
    let member = studio.member("Kim").await;
    studio.services.enrollments.enroll(member, course.id).await.unwrap();

    let err = studio
        .services
        .trials
        .book(Identity::member(member), course.id, monday(), None)
        .await
        .unwrap_err();
    assert_eq!(err.conflict_reason(), Some(&ConflictReason::AlreadyMember));
    assert_eq!(err.to_string(), "Conflict: already a regular member of this course");
}

#[tokio::test]
async fn scenario_e_sweeper_marks_past_bookings_only() {
    let course = monday_evening(10, Some(5));
    let studio = Studio::open(&[course.clone()]).await;
    let trials = &studio.services.trials;
    let next_monday = monday() + Duration::days(7);

    let this_week = trials
        .book(Identity::guest(contact("A")), course.id, monday(), None)
        .await
        .unwrap();
    let next_week = trials
        .book(Identity::guest(contact("A")), course.id, next_monday, None)
        .await
        .unwrap();

    // Tuesday 02:05: the first occurrence was yesterday, the second is next week.
    let sweep_at = (monday() + Duration::days(1)).and_hms_opt(2, 5, 0).unwrap();
    studio.clock.set(sweep_at);
    let result = studio.services.sweeper.sweep(studio.clock.now()).await.unwrap();
    assert_eq!(result.marked_no_show, 1);
    assert_eq!(result.failed, 0);
    assert_eq!(trials.get(this_week.id).await.unwrap().status, TrialStatus::NoShow);
    assert_eq!(trials.get(next_week.id).await.unwrap().status, TrialStatus::Booked);

    let second = studio.services.sweeper.sweep(studio.clock.now()).await.unwrap();
    assert_eq!(second.scanned, 0);
    assert_eq!(trials.get(this_week.id).await.unwrap().status, TrialStatus::NoShow);
}

#[tokio::test]
async fn scenario_f_guest_duplicates_are_scoped_to_the_date() {
    let course = monday_evening(10, Some(5));
    let studio = Studio::open(&[course.clone()]).await;
    let trials = &studio.services.trials;
    let guest = || Identity::guest(ContactInfo::new("A", "a@x.com", "0900000000"));

    trials.book(guest(), course.id, monday(), None).await.unwrap();
    let err = trials.book(guest(), course.id, monday(), None).await.unwrap_err();
    assert_eq!(err.conflict_reason(), Some(&ConflictReason::AlreadyBooked));
    assert_eq!(err.to_string(), "Conflict: already booked");

    // Case and whitespace differences still identify the same guest.
    let shouting = Identity::guest(ContactInfo::new(" A ", "A@X.COM", "0900000000"));
    let err = trials.book(shouting, course.id, monday(), None).await.unwrap_err();
    assert_eq!(err.conflict_reason(), Some(&ConflictReason::AlreadyBooked));

    let next_monday = monday() + Duration::days(7);
    trials.book(guest(), course.id, next_monday, None).await.unwrap();
}

#[tokio::test]
async fn member_duplicate_scope_ignores_unswept_past_bookings() {
    let course = monday_evening(10, Some(5));
    let studio = Studio::open(&[course.clone()]).await;
    let trials = &studio.services.trials;
    let member = studio.member("Lee").await;

    let past = trials
        .book(Identity::member(member), course.id, monday(), None)
        .await
        .unwrap();

    // The following Sunday: last Monday's booking is still Booked because no sweep ran.
    studio.clock.set((monday() + Duration::days(6)).and_hms_opt(9, 0, 0).unwrap());
    assert_eq!(trials.get(past.id).await.unwrap().status, TrialStatus::Booked);

    let next_monday = monday() + Duration::days(7);
    let booked = trials
        .book(Identity::member(member), course.id, next_monday, None)
        .await
        .unwrap();
    assert_eq!(booked.status, TrialStatus::Booked);

    let err = trials
        .book(Identity::member(member), course.id, next_monday + Duration::days(7), None)
        .await
        .unwrap_err();
    assert_eq!(err.conflict_reason(), Some(&ConflictReason::AlreadyBooked));
}

#[tokio::test]
async fn concurrent_enrollments_never_exceed_capacity() {
    let course = monday_evening(5, None);
    let studio = Studio::open(&[course.clone()]).await;
    let mut members = Vec::new();
    for i in 0..20 {
        members.push(studio.member(&format!("m{}", i)).await);
    }

    let handles = members.iter().map(|&member| {
        let enrollments = studio.services.enrollments.clone();
        let course_id = course.id;
        tokio::spawn(async move { enrollments.enroll(member, course_id).await })
    });
    let results = join_all(handles).await;
    assert!(results.into_iter().all(|r| matches!(r, Ok(Ok(_)))));

    let enrollments = &studio.services.enrollments;
    assert_eq!(enrollments.enrolled_count(course.id).await.unwrap(), 5);
    let all = enrollments.list_by_course(course.id).await.unwrap();
    let waitlisted = all.iter().filter(|e| e.status == EnrollmentStatus::Waitlisted).count();
    assert_eq!(waitlisted, 15);
}

#[tokio::test]
async fn concurrent_duplicate_enrollments_keep_one_active() {
    let course = monday_evening(5, None);
    let studio = Studio::open(&[course.clone()]).await;
    let member = studio.member("Dup").await;

    let handles = (0..8).map(|_| {
        let enrollments = studio.services.enrollments.clone();
        let course_id = course.id;
        tokio::spawn(async move { enrollments.enroll(member, course_id).await })
    });
    let results: Vec<_> = join_all(handles).await.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| e.conflict_reason() == Some(&ConflictReason::AlreadyEnrolled)));
}

#[tokio::test]
async fn concurrent_trial_bookings_respect_trial_capacity() {
    let course = monday_evening(10, Some(3));
    let studio = Studio::open(&[course.clone()]).await;

    let handles = (0..12).map(|i| {
        let trials = studio.services.trials.clone();
        let course_id = course.id;
        tokio::spawn(async move {
            trials
                .book(Identity::guest(contact(&format!("g{}", i))), course_id, monday(), None)
                .await
        })
    });
    let results: Vec<_> = join_all(handles).await.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 3);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| e.conflict_reason() == Some(&ConflictReason::SlotFull)));
    assert_eq!(studio.services.trials.available_seats(course.id, monday()).await.unwrap(), 0);
}

#[tokio::test]
async fn terminal_statuses_are_immutable() {
    let course = monday_evening(1, Some(2));
    let studio = Studio::open(&[course.clone()]).await;
    let member = studio.member("T").await;

    let enrollment = studio.services.enrollments.enroll(member, course.id).await.unwrap();
    studio.services.enrollments.cancel(enrollment.id).await.unwrap();
    for status in ["REGISTERED", "WAITLISTED", "CANCELLED"] {
        let err = studio
            .services
            .enrollments
            .update_status(enrollment.id, status)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(ConflictReason::TerminalStatus { .. })));
    }

    let booking = studio
        .services
        .trials
        .book(Identity::guest(contact("T")), course.id, monday(), None)
        .await
        .unwrap();
    studio.services.trials.update_status(booking.id, "NO_SHOW").await.unwrap();
    for status in ["BOOKED", "CANCELLED", "COMPLETED"] {
        let err = studio
            .services
            .trials
            .update_status(booking.id, status)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(ConflictReason::TerminalStatus { .. })));
    }
    assert_eq!(
        studio.services.trials.get(booking.id).await.unwrap().status,
        TrialStatus::NoShow
    );
}
