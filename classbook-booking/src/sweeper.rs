use chrono::NaiveDateTime;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument};

use classbook_core::repository::TrialStore;
use classbook_core::CoreResult;

pub const DEFAULT_BATCH_SIZE: u32 = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepResult {
    pub started_at: NaiveDateTime,
    pub scanned: u64,
    pub marked_no_show: u64,
    /// Rows resolved by someone else between the scan and the update.
    pub skipped: u64,
    /// Rows left `Booked` after an update error; picked up by the next run.
    pub failed: u64,
}

impl SweepResult {
    fn new(started_at: NaiveDateTime) -> Self {
        Self {
            started_at,
            scanned: 0,
            marked_no_show: 0,
            skipped: 0,
            failed: 0,
        }
    }
}

/// Resolves trial bookings that are still `Booked` after their occurrence into `NoShow`.
///
/// The overdue predicate is the only run state: a crashed or partial run is resumed by
/// sweeping again.
pub struct Sweeper {
    store: Arc<dyn TrialStore>,
    batch_size: u32,
}

impl Sweeper {
    pub fn new(store: Arc<dyn TrialStore>) -> Self {
        Self {
            store,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[instrument(skip(self))]
    pub async fn sweep(&self, now: NaiveDateTime) -> CoreResult<SweepResult> {
        let mut result = SweepResult::new(now);
        let mut cursor = None;

        loop {
            let batch = match self.store.find_overdue_trials(now, cursor, self.batch_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    // Rows already marked stay committed; the next run picks up the rest.
                    error!(
                        error = %e,
                        scanned = result.scanned,
                        marked_no_show = result.marked_no_show,
                        skipped = result.skipped,
                        failed = result.failed,
                        "No-show sweep aborted while scanning"
                    );
                    return Err(e);
                }
            };
            let Some(last) = batch.last() else {
                break;
            };
            cursor = Some(last.id);
            let exhausted = batch.len() < self.batch_size as usize;

            for booking in &batch {
                result.scanned += 1;
                match self.store.mark_no_show(booking.id, now).await {
                    Ok(true) => result.marked_no_show += 1,
                    Ok(false) => result.skipped += 1,
                    Err(e) => {
                        error!(booking_id = %booking.id, error = %e, "Failed to mark trial as no-show");
                        result.failed += 1;
                    }
                }
            }

            if exhausted {
                break;
            }
        }

        info!(
            scanned = result.scanned,
            marked_no_show = result.marked_no_show,
            skipped = result.skipped,
            failed = result.failed,
            "No-show sweep finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, NaiveDate, NaiveTime};
    use classbook_core::repository::{
        DuplicateScope, TrialAdmissionRule, TrialSlotSnapshot, TrialTransitionRule,
    };
    use classbook_core::{
        ContactInfo, CoreError, Identity, Page, Paged, TrialBooking, TrialBookingFilter, TrialStatus,
    };
    use classbook_store::MemoryStore;
    use std::collections::HashSet;
    use uuid::Uuid;

    /// Delegates to the memory store but fails updates for selected rows, and optionally
    /// every scan after the first page.
    struct FlakyStore {
        inner: MemoryStore,
        broken: HashSet<Uuid>,
        broken_paging: bool,
    }

    #[async_trait]
    impl TrialStore for FlakyStore {
        async fn admit_trial(
            &self,
            booking: TrialBooking,
            scope: &DuplicateScope,
            rule: TrialAdmissionRule<'_>,
        ) -> CoreResult<TrialBooking> {
            self.inner.admit_trial(booking, scope, rule).await
        }

        async fn transition_trial(
            &self,
            id: Uuid,
            now: NaiveDateTime,
            rule: TrialTransitionRule<'_>,
        ) -> CoreResult<TrialBooking> {
            self.inner.transition_trial(id, now, rule).await
        }

        async fn get_trial(&self, id: Uuid) -> CoreResult<Option<TrialBooking>> {
            self.inner.get_trial(id).await
        }

        async fn list_trials_by_member(&self, member_id: Uuid) -> CoreResult<Vec<TrialBooking>> {
            self.inner.list_trials_by_member(member_id).await
        }

        async fn list_trials_by_course(&self, course_id: Uuid) -> CoreResult<Vec<TrialBooking>> {
            self.inner.list_trials_by_course(course_id).await
        }

        async fn list_trials(
            &self,
            filter: &TrialBookingFilter,
            page: Page,
        ) -> CoreResult<Paged<TrialBooking>> {
            self.inner.list_trials(filter, page).await
        }

        async fn search_trials_by_name(&self, query: &str) -> CoreResult<Vec<TrialBooking>> {
            self.inner.search_trials_by_name(query).await
        }

        async fn count_booked(
            &self,
            course_id: Uuid,
            booking_date: NaiveDate,
            start_time: NaiveTime,
        ) -> CoreResult<i64> {
            self.inner.count_booked(course_id, booking_date, start_time).await
        }

        async fn find_overdue_trials(
            &self,
            now: NaiveDateTime,
            after: Option<Uuid>,
            limit: u32,
        ) -> CoreResult<Vec<TrialBooking>> {
            if self.broken_paging && after.is_some() {
                return Err(CoreError::Fault("statement timeout".to_string()));
            }
            self.inner.find_overdue_trials(now, after, limit).await
        }

        async fn mark_no_show(&self, id: Uuid, now: NaiveDateTime) -> CoreResult<bool> {
            if self.broken.contains(&id) {
                return Err(CoreError::Fault("connection reset".to_string()));
            }
            self.inner.mark_no_show(id, now).await
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 17).unwrap().and_hms_opt(2, 5, 0).unwrap()
    }

    async fn seed(store: &MemoryStore, course_id: Uuid, date: NaiveDate) -> Uuid {
        let booking = TrialBooking::new(
            Identity::guest(ContactInfo::new("G", "g@x.com", "0900000000")),
            ContactInfo::new("G", "g@x.com", "0900000000"),
            course_id,
            date,
            NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            now() - Duration::days(10),
        );
        let scope = DuplicateScope::GuestSlot {
            contact: booking.contact.clone(),
            course_id,
            booking_date: date,
        };
        let accept = |_: &TrialSlotSnapshot| -> CoreResult<()> { Ok(()) };
        store.admit_trial(booking, &scope, &accept).await.unwrap().id
    }

    #[tokio::test]
    async fn test_sweep_marks_only_past_occurrences() {
        let store = Arc::new(MemoryStore::new());
        let course = Uuid::new_v4();
        let yesterday = now().date().pred_opt().unwrap();
        let tomorrow = now().date().succ_opt().unwrap();
        let past = seed(&store, course, yesterday).await;
        let future = seed(&store, course, tomorrow).await;

        let sweeper = Sweeper::new(store.clone());
        let result = sweeper.sweep(now()).await.unwrap();
        assert_eq!(result.scanned, 1);
        assert_eq!(result.marked_no_show, 1);
        assert_eq!(store.get_trial(past).await.unwrap().unwrap().status, TrialStatus::NoShow);
        assert_eq!(store.get_trial(future).await.unwrap().unwrap().status, TrialStatus::Booked);

        let again = sweeper.sweep(now()).await.unwrap();
        assert_eq!(again.scanned, 0);
        assert_eq!(again.marked_no_show, 0);
    }

    #[tokio::test]
    async fn test_sweep_pages_through_every_batch() {
        let store = Arc::new(MemoryStore::new());
        let course = Uuid::new_v4();
        let yesterday = now().date().pred_opt().unwrap();
        for _ in 0..7 {
            seed(&store, course, yesterday).await;
        }
        let result = Sweeper::new(store.clone())
            .with_batch_size(3)
            .sweep(now())
            .await
            .unwrap();
        assert_eq!(result.marked_no_show, 7);
        let six_pm = NaiveTime::from_hms_opt(18, 0, 0).unwrap();
        assert_eq!(store.count_booked(course, yesterday, six_pm).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_row_failure_does_not_abort_the_run() {
        let inner = MemoryStore::new();
        let course = Uuid::new_v4();
        let yesterday = now().date().pred_opt().unwrap();
        let broken = seed(&inner, course, yesterday).await;
        let healthy = seed(&inner, course, yesterday).await;
        let store = Arc::new(FlakyStore {
            inner,
            broken: HashSet::from([broken]),
            broken_paging: false,
        });

        let result = Sweeper::new(store.clone()).sweep(now()).await.unwrap();
        assert_eq!(result.scanned, 2);
        assert_eq!(result.marked_no_show, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(store.get_trial(healthy).await.unwrap().unwrap().status, TrialStatus::NoShow);
        assert_eq!(store.get_trial(broken).await.unwrap().unwrap().status, TrialStatus::Booked);
    }

    #[tokio::test]
    async fn test_scan_failure_keeps_committed_rows() {
        let inner = MemoryStore::new();
        let course = Uuid::new_v4();
        let yesterday = now().date().pred_opt().unwrap();
        let a = seed(&inner, course, yesterday).await;
        let b = seed(&inner, course, yesterday).await;
        let store = Arc::new(FlakyStore {
            inner,
            broken: HashSet::new(),
            broken_paging: true,
        });

        let err = Sweeper::new(store.clone())
            .with_batch_size(1)
            .sweep(now())
            .await
            .unwrap_err();
        assert!(err.is_fault());

        let first = a.min(b);
        let second = a.max(b);
        assert_eq!(store.get_trial(first).await.unwrap().unwrap().status, TrialStatus::NoShow);
        assert_eq!(store.get_trial(second).await.unwrap().unwrap().status, TrialStatus::Booked);

        // A healthy rerun resumes from the remaining booked row.
        let rerun = Sweeper::new(store.clone()).sweep(now()).await.unwrap();
        assert_eq!(rerun.marked_no_show, 1);
        assert_eq!(store.get_trial(second).await.unwrap().unwrap().status, TrialStatus::NoShow);
    }
}
