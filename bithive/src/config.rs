use std::time::Duration;

use crate::registry::DuplicatePolicy;
use crate::tracing::prelude::*;

/// Environment variable overriding [`MonitorConfig::request_timeout`] (ms).
pub const TIMEOUT_ENV: &str = "BITHIVE_TIMEOUT_MS";
/// Environment variable overriding [`MonitorConfig::overdue_margin`] (ms).
pub const OVERDUE_ENV: &str = "BITHIVE_OVERDUE_MS";
/// Environment variable selecting [`DuplicatePolicy::Allow`] (`1`/`true`)
/// or [`DuplicatePolicy::Reject`] (`0`/`false`).
pub const ALLOW_DUPLICATES_ENV: &str = "BITHIVE_ALLOW_DUPLICATES";

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Bound on each device's status request. A device that has not
    /// answered by then counts as failed for the cycle.
    pub request_timeout: Duration,

    /// Period of the refresh clock. Also the width of the window before the
    /// due time in which a cycle is started.
    pub tick: Duration,

    /// How far past due a cycle may get before the watchdog forces one.
    pub overdue_margin: Duration,

    /// Refresh interval used when none has been stored.
    pub default_refresh_interval: Duration,

    /// Smallest refresh interval accepted from a user.
    pub min_refresh_interval: Duration,

    /// Age beyond which history samples are pruned.
    pub history_window: Duration,

    /// Number of samples, current included, in the trailing hash rate
    /// average.
    pub average_window: usize,

    pub duplicates: DuplicatePolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(2000),
            tick: Duration::from_millis(100),
            overdue_margin: Duration::from_millis(2000),
            default_refresh_interval: Duration::from_secs(10),
            min_refresh_interval: Duration::from_secs(1),
            history_window: Duration::from_secs(24 * 60 * 60),
            average_window: 50,
            duplicates: DuplicatePolicy::Allow,
        }
    }
}

impl MonitorConfig {
    /// Defaults with overrides from the environment.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_millis(TIMEOUT_ENV) {
            config.request_timeout = ms;
        }
        if let Some(ms) = env_millis(OVERDUE_ENV) {
            config.overdue_margin = ms;
        }
        if let Ok(value) = std::env::var(ALLOW_DUPLICATES_ENV) {
            match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => config.duplicates = DuplicatePolicy::Allow,
                "0" | "false" | "no" => config.duplicates = DuplicatePolicy::Reject,
                other => warn!(var = ALLOW_DUPLICATES_ENV, value = other, "Ignoring invalid value"),
            }
        }

        config
    }
}

fn env_millis(var: &str) -> Option<Duration> {
    let value = std::env::var(var).ok()?;
    match value.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            warn!(var, value = %value, "Ignoring invalid duration");
            None
        }
    }
}
