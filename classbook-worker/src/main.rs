mod scheduler;

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use classbook_booking::{ContentionPolicy, Services};
use classbook_core::{Clock, SystemClock};
use classbook_store::app_config::{Config, StoreBackend};
use classbook_store::{DbClient, MemoryStore, PgStore};

use crate::scheduler::SweepScheduler;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "classbook_worker=debug,classbook_booking=info,classbook_store=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    let run_at = config.sweeper.run_at_time()?;
    info!(backend = ?config.store.backend, run_at = %run_at, "Starting classbook worker");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let policy = ContentionPolicy::new(
        config.booking.contention_retries,
        Duration::from_millis(config.booking.contention_backoff_ms),
    );
    let batch_size = config.sweeper.batch_size;

    let services = match config.store.backend {
        StoreBackend::Postgres => {
            let db = DbClient::new(&config.database)
                .await
                .context("Failed to connect to Postgres")?;
            db.migrate().await.context("Failed to run migrations")?;
            Services::new(Arc::new(PgStore::new(db.pool.clone())), clock.clone(), policy, batch_size)
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; reservations are lost on exit");
            Services::new(Arc::new(MemoryStore::new()), clock.clone(), policy, batch_size)
        }
    };

    let runs = SweepScheduler::new(services.sweeper.clone(), clock, run_at)
        .run_on_start(config.sweeper.run_on_start)
        .run(shutdown_signal())
        .await;

    info!(runs, "Classbook worker stopped");
    Ok(())
}
