use chrono::NaiveTime;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub booking: BookingConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_seconds: u64,
}

fn default_max_connections() -> u32 { 5 }
fn default_acquire_timeout() -> u64 { 3 }

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    Postgres,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
}

/// Tuning for the check-then-insert retry when two writers race on a capacity key.
#[derive(Debug, Deserialize, Clone)]
pub struct BookingConfig {
    #[serde(default = "default_contention_retries")]
    pub contention_retries: u32,
    #[serde(default = "default_contention_backoff")]
    pub contention_backoff_ms: u64,
}

fn default_contention_retries() -> u32 { 3 }
fn default_contention_backoff() -> u64 { 25 }

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            contention_retries: default_contention_retries(),
            contention_backoff_ms: default_contention_backoff(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SweeperConfig {
    /// Local wall-clock time of the daily run, "HH:MM".
    #[serde(default = "default_run_at")]
    pub run_at: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default)]
    pub run_on_start: bool,
}

fn default_run_at() -> String { "02:05".to_string() }
fn default_batch_size() -> u32 { 200 }

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            run_at: default_run_at(),
            batch_size: default_batch_size(),
            run_on_start: false,
        }
    }
}

impl SweeperConfig {
    pub fn run_at_time(&self) -> Result<NaiveTime, config::ConfigError> {
        NaiveTime::parse_from_str(&self.run_at, "%H:%M").map_err(|e| {
            config::ConfigError::Message(format!("sweeper.run_at {:?}: {}", self.run_at, e))
        })
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `CLASSBOOK__DATABASE__URL=postgres://...`
            .add_source(config::Environment::with_prefix("CLASSBOOK").separator("__"))
            .build()?;

        let config: Config = s.try_deserialize()?;
        config.sweeper.run_at_time()?;
        Ok(config)
    }
}
