//! Daily job configuration.

use chrono::NaiveTime;
use tally_core::ConfigError;

use crate::constants::{DEFAULT_DAILY_RUN_HOUR, DEFAULT_DAILY_RUN_MINUTE};

/// Configuration for the daily aggregation job and its scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyJobConfig {
    /// Local time of day the job fires (default: 00:05)
    pub run_at: NaiveTime,

    /// Whether each run also reconciles the account's forecasts against its
    /// sales (default: true)
    pub reconcile_forecasts: bool,

    /// Whether each failed account is logged individually (default: true)
    pub log_failures: bool,
}

fn default_run_at() -> NaiveTime {
    NaiveTime::from_hms_opt(DEFAULT_DAILY_RUN_HOUR, DEFAULT_DAILY_RUN_MINUTE, 0)
        .unwrap_or(NaiveTime::MIN)
}

impl Default for DailyJobConfig {
    fn default() -> Self {
        Self {
            run_at: default_run_at(),
            reconcile_forecasts: true,
            log_failures: true,
        }
    }
}

impl DailyJobConfig {
    /// Create DailyJobConfig from environment variables.
    ///
    /// Invalid values fall back to the defaults.
    ///
    /// # Environment Variables
    /// - `TALLY_DAILY_RUN_AT`: Local time of day as `HH:MM` (default: 00:05)
    /// - `TALLY_RECONCILE_FORECASTS`: Whether to reconcile forecasts (default: true)
    /// - `TALLY_DAILY_LOG_FAILURES`: Whether to log each failed account (default: true)
    pub fn from_env() -> Self {
        let run_at = std::env::var("TALLY_DAILY_RUN_AT")
            .ok()
            .and_then(|s| Self::parse_run_at(&s).ok())
            .unwrap_or_else(default_run_at);

        let reconcile_forecasts = std::env::var("TALLY_RECONCILE_FORECASTS")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        let log_failures = std::env::var("TALLY_DAILY_LOG_FAILURES")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        Self {
            run_at,
            reconcile_forecasts,
            log_failures,
        }
    }

    /// Parse an `HH:MM` time of day.
    pub fn parse_run_at(value: &str) -> Result<NaiveTime, ConfigError> {
        NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|e| ConfigError::InvalidValue {
            field: "run_at".to_string(),
            value: value.to_string(),
            reason: format!("expected HH:MM ({})", e),
        })
    }

    /// Create a configuration for development: forecasts untouched.
    pub fn development() -> Self {
        Self {
            reconcile_forecasts: false,
            ..Self::default()
        }
    }

    /// Create a configuration for production.
    pub fn production() -> Self {
        Self::default()
    }

    pub fn with_run_at(mut self, run_at: NaiveTime) -> Self {
        self.run_at = run_at;
        self
    }

    pub fn with_reconcile_forecasts(mut self, enabled: bool) -> Self {
        self.reconcile_forecasts = enabled;
        self
    }
}
