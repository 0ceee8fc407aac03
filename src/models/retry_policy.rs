//! RetryPolicy entity model and the backoff evaluator.
//!
//! The table stores one row per phase. [`RetryConfig`] is the typed view of a
//! row and owns the pure delay computation; the queue never schedules timers,
//! it only persists `next_retry_at`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};

use super::phase::Phase;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "retry_policy")]
pub struct Model {
    /// Phase name (see [`Phase`])
    #[sea_orm(primary_key, auto_increment = false)]
    pub phase: String,

    pub max_retries: i32,

    pub initial_delay_seconds: i64,

    pub max_delay_seconds: i64,

    /// Multiplier applied per attempt
    #[sea_orm(column_type = "Double")]
    pub backoff_factor: f64,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Retry and backoff parameters for one phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: i32,
    pub initial_delay_seconds: i64,
    pub max_delay_seconds: i64,
    pub backoff_factor: f64,
}

/// Upper bound on `max_delay_seconds` (30 days).
pub const MAX_RETRY_DELAY_SECONDS: i64 = 30 * 24 * 60 * 60;

/// Policy used for any phase without a stored row.
pub const DEFAULT_RETRY_CONFIG: RetryConfig = RetryConfig {
    max_retries: 3,
    initial_delay_seconds: 30,
    max_delay_seconds: 3600,
    backoff_factor: 2.0,
};

impl Default for RetryConfig {
    fn default() -> Self {
        DEFAULT_RETRY_CONFIG
    }
}

impl RetryConfig {
    /// `min(initial * factor^retry_count, max)`.
    pub fn delay(&self, retry_count: i32) -> Duration {
        let exponent = retry_count.max(0);
        let raw = self.initial_delay_seconds as f64 * self.backoff_factor.powi(exponent);
        let capped = raw.min(self.max_delay_seconds as f64).max(0.0);
        Duration::from_secs_f64(capped)
    }

    /// Absolute time at which a job that has failed `retry_count` times before
    /// becomes eligible again. `None` when the delay does not fit a timestamp.
    pub fn next_retry_at(&self, retry_count: i32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let delay = chrono::Duration::from_std(self.delay(retry_count)).ok()?;
        now.checked_add_signed(delay)
    }

    /// Checks the bounds an administrator-edited row must satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_retries < 0 {
            return Err(format!(
                "max_retries must not be negative, got {}",
                self.max_retries
            ));
        }
        if self.initial_delay_seconds < 0 {
            return Err(format!(
                "initial_delay_seconds must not be negative, got {}",
                self.initial_delay_seconds
            ));
        }
        if self.initial_delay_seconds > self.max_delay_seconds {
            return Err(format!(
                "initial_delay_seconds ({}) cannot be greater than max_delay_seconds ({})",
                self.initial_delay_seconds, self.max_delay_seconds
            ));
        }
        if self.max_delay_seconds > MAX_RETRY_DELAY_SECONDS {
            return Err(format!(
                "max_delay_seconds must be at most {MAX_RETRY_DELAY_SECONDS}, got {}",
                self.max_delay_seconds
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(format!(
                "backoff_factor must be a finite value >= 1.0, got {}",
                self.backoff_factor
            ));
        }
        Ok(())
    }
}

impl From<&Model> for RetryConfig {
    fn from(row: &Model) -> Self {
        Self {
            max_retries: row.max_retries,
            initial_delay_seconds: row.initial_delay_seconds,
            max_delay_seconds: row.max_delay_seconds,
            backoff_factor: row.backoff_factor,
        }
    }
}

/// A stored policy together with the phase it applies to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseRetryConfig {
    pub phase: Phase,
    #[serde(flatten)]
    pub config: RetryConfig,
}
