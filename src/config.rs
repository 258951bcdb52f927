//! Engine configuration.
//!
//! All knobs have defaults that suit production; `from_env` overlays the
//! `METRONOME_*` environment variables on top of them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::warn;

use crate::clock::{SharedClock, SystemClock};

const DEFAULT_MISFIRE_GRACE_SECS: u64 = 2 * 60 * 60;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_WORKER_COUNT: usize = 4;

#[derive(Clone)]
pub struct SchedulerConfig {
    /// How far past its scheduled time a firing may still run. Occurrences
    /// older than this are skipped on recovery.
    pub misfire_grace: Duration,
    /// How often the firing loop scans for due jobs.
    pub poll_interval: Duration,
    /// Upper bound on concurrently running handler invocations.
    pub worker_count: usize,
    /// Time source for trigger and misfire computation.
    pub clock: SharedClock,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            misfire_grace: Duration::from_secs(DEFAULT_MISFIRE_GRACE_SECS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            worker_count: DEFAULT_WORKER_COUNT,
            clock: Arc::new(SystemClock),
        }
    }
}

impl fmt::Debug for SchedulerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerConfig")
            .field("misfire_grace", &self.misfire_grace)
            .field("poll_interval", &self.poll_interval)
            .field("worker_count", &self.worker_count)
            .field("clock", &"<dyn Clock>")
            .finish()
    }
}

impl SchedulerConfig {
    /// Defaults overlaid with `METRONOME_MISFIRE_GRACE_SECS`,
    /// `METRONOME_POLL_INTERVAL_MS`, and `METRONOME_WORKER_COUNT`.
    /// Unset or unparseable variables fall back to the default.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        if let Some(secs) = env_parse::<u64>("METRONOME_MISFIRE_GRACE_SECS") {
            config.misfire_grace = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parse::<u64>("METRONOME_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(count) = env_parse::<usize>("METRONOME_WORKER_COUNT") {
            config.worker_count = count.max(1);
        }
        config
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

/// Connection string for the Postgres backends. Required, no default.
pub fn database_url() -> anyhow::Result<String> {
    dotenvy::dotenv().ok();
    std::env::var("METRONOME_DATABASE_URL")
        .context("METRONOME_DATABASE_URL must be set to use the Postgres backends")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SchedulerConfig::default();
        assert_eq!(config.misfire_grace, Duration::from_secs(7_200));
        assert_eq!(config.poll_interval, Duration::from_millis(1_000));
        assert_eq!(config.worker_count, 4);
    }

    #[test]
    fn unparseable_env_override_falls_back_to_default() {
        std::env::set_var("METRONOME_MISFIRE_GRACE_SECS", "two hours");
        let config = SchedulerConfig::from_env();
        assert_eq!(config.misfire_grace, Duration::from_secs(7_200));
        std::env::remove_var("METRONOME_MISFIRE_GRACE_SECS");
    }
}
