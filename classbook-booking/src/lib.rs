pub mod enrollment;
pub mod retry;
pub mod sweeper;
pub mod trial;

pub use enrollment::EnrollmentManager;
pub use retry::{retry_on_contention, ContentionPolicy};
pub use sweeper::{SweepResult, Sweeper};
pub use trial::TrialBookingManager;

use std::sync::Arc;

use classbook_core::repository::{EnrollmentStore, TrialStore};
use classbook_core::{Clock, CourseCatalog, MemberDirectory};

/// The managers and the sweeper wired to one backing store.
pub struct Services {
    pub enrollments: Arc<EnrollmentManager>,
    pub trials: Arc<TrialBookingManager>,
    pub sweeper: Arc<Sweeper>,
}

impl Services {
    pub fn new<S>(store: Arc<S>, clock: Arc<dyn Clock>, policy: ContentionPolicy, batch_size: u32) -> Self
    where
        S: CourseCatalog + MemberDirectory + EnrollmentStore + TrialStore + 'static,
    {
        let enrollments = EnrollmentManager::new(store.clone(), store.clone(), store.clone(), clock.clone())
            .with_policy(policy.clone());
        let trials = TrialBookingManager::new(store.clone(), store.clone(), store.clone(), clock)
            .with_policy(policy);
        let sweeper = Sweeper::new(store).with_batch_size(batch_size);

        Self {
            enrollments: Arc::new(enrollments),
            trials: Arc::new(trials),
            sweeper: Arc::new(sweeper),
        }
    }
}
