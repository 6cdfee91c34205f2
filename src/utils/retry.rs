//! Retry utilities: backoff builders and the billing retry calendar.
//!
//! Uses `backon` for exponential backoff with jitter. Provides the backoff
//! used for inline notification delivery and for the scheduler's
//! optimistic-concurrency retries.

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::config::{BillingConfig, NotificationConfig};

/// Backoff for inline email delivery attempts.
///
/// `inline_attempts` counts the first try, so `max_times` is one less.
pub fn notification_backoff(config: &NotificationConfig) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(config.min_backoff_ms))
        .with_max_delay(Duration::from_millis(config.max_backoff_ms))
        .with_max_times(config.inline_attempts.saturating_sub(1) as usize)
        .with_jitter()
}

/// Backoff for re-running a subscription's billing step after a version
/// conflict.
///
/// - Min delay: 10ms
/// - Max delay: 500ms
/// - Max attempts: 5
/// - Jitter enabled
pub fn conflict_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_millis(500))
        .with_max_times(5)
        .with_jitter()
}

/// Escalation policy for failed billing cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub past_due_after_failures: u32,
    pub expire_after_failures: u32,
    pub retry_delays_days: Vec<u32>,
}

impl RetryPolicy {
    pub fn from_config(config: &BillingConfig) -> Self {
        Self {
            past_due_after_failures: config.past_due_after_failures,
            expire_after_failures: config.expire_after_failures,
            retry_delays_days: config.retry_delays_days.clone(),
        }
    }

    /// Days to wait before retrying after the `failures`-th consecutive
    /// failure (1-based). The last configured delay repeats.
    pub fn retry_delay_days(&self, failures: u32) -> u32 {
        let index = failures.saturating_sub(1) as usize;
        self.retry_delays_days
            .get(index)
            .or_else(|| self.retry_delays_days.last())
            .copied()
            .unwrap_or(1)
            .max(1)
    }

    pub fn should_expire(&self, failures: u32) -> bool {
        failures >= self.expire_after_failures
    }

    pub fn is_past_due(&self, failures: u32) -> bool {
        failures >= self.past_due_after_failures
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&BillingConfig::default())
    }
}
