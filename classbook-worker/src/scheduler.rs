use chrono::{Duration, NaiveDateTime, NaiveTime};
use std::future::Future;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{error, info};

use classbook_booking::Sweeper;
use classbook_core::Clock;

/// First local occurrence of `run_at` strictly after `now`.
pub fn next_run_after(now: NaiveDateTime, run_at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(run_at);
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

/// Runs the no-show sweep once a day at a fixed local time.
pub struct SweepScheduler {
    sweeper: Arc<Sweeper>,
    clock: Arc<dyn Clock>,
    run_at: NaiveTime,
    run_on_start: bool,
}

impl SweepScheduler {
    pub fn new(sweeper: Arc<Sweeper>, clock: Arc<dyn Clock>, run_at: NaiveTime) -> Self {
        Self {
            sweeper,
            clock,
            run_at,
            run_on_start: false,
        }
    }

    pub fn run_on_start(mut self, enabled: bool) -> Self {
        self.run_on_start = enabled;
        self
    }

    async fn run_once(&self) {
        let now = self.clock.now();
        if let Err(e) = self.sweeper.sweep(now).await {
            error!("No-show sweep aborted: {}", e);
        }
    }

    /// Loops until `shutdown` resolves. Returns how many sweeps were started.
    pub async fn run<S>(self, shutdown: S) -> u64
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut runs = 0;

        if self.run_on_start {
            self.run_once().await;
            runs += 1;
        }

        loop {
            let now = self.clock.now();
            let next = next_run_after(now, self.run_at);
            let wait = (next - now).to_std().unwrap_or_default();
            info!(next_run = %next, "No-show sweep scheduled");

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Sweep scheduler shutting down");
                    return runs;
                }
                _ = sleep(wait) => {
                    self.run_once().await;
                    runs += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use classbook_core::FixedClock;
    use classbook_store::MemoryStore;

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn run_at() -> NaiveTime {
        NaiveTime::from_hms_opt(2, 5, 0).unwrap()
    }

    #[test]
    fn test_next_run_later_today() {
        assert_eq!(next_run_after(at(17, 1, 0), run_at()), at(17, 2, 5));
    }

    #[test]
    fn test_next_run_rolls_to_tomorrow() {
        assert_eq!(next_run_after(at(17, 2, 5), run_at()), at(18, 2, 5));
        assert_eq!(next_run_after(at(17, 23, 59), run_at()), at(18, 2, 5));
    }

    #[tokio::test]
    async fn test_shutdown_after_startup_sweep() {
        let store = Arc::new(MemoryStore::new());
        let sweeper = Arc::new(Sweeper::new(store));
        let clock = Arc::new(FixedClock::new(at(17, 9, 0)));

        let runs = SweepScheduler::new(sweeper.clone(), clock.clone(), run_at())
            .run_on_start(true)
            .run(async {})
            .await;
        assert_eq!(runs, 1);

        let runs = SweepScheduler::new(sweeper, clock, run_at()).run(async {}).await;
        assert_eq!(runs, 0);
    }
}
