//! Notification delivery configuration.

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Send attempts made while dispatching, including the first.
    pub inline_attempts: u32,
    /// Total attempts before a notification is left for operators.
    pub max_attempts: u32,
    pub min_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Records retried per redelivery pass.
    pub redelivery_batch: usize,
    /// A record must be idle this long before redelivery picks it up.
    pub redelivery_idle_secs: u64,
}

impl NotificationConfig {
    pub fn redelivery_idle(&self) -> Duration {
        Duration::from_secs(self.redelivery_idle_secs)
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            inline_attempts: 3,
            max_attempts: 10,
            min_backoff_ms: 200,
            max_backoff_ms: 5_000,
            redelivery_batch: 100,
            redelivery_idle_secs: 60,
        }
    }
}
