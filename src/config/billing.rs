//! Billing and checkout configuration types.

use std::time::Duration;

use serde::Deserialize;

use crate::model::Cents;

/// Scheduler, payment and retry-escalation settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    /// Seconds between scheduler ticks.
    pub sweep_interval_secs: u64,
    /// Subscriptions billed in parallel during one sweep.
    pub max_concurrency: usize,
    /// Charge timeout; an expired charge is recorded as indeterminate.
    pub payment_timeout_secs: u64,
    /// Consecutive failed cycles before a subscription becomes `past_due`.
    pub past_due_after_failures: u32,
    /// Consecutive failed cycles before a subscription becomes `expired`.
    pub expire_after_failures: u32,
    /// Days until the next attempt after the 1st, 2nd, ... failure.
    pub retry_delays_days: Vec<u32>,
    /// Pending invoices older than this are reconciled with the gateway.
    pub stale_pending_after_secs: u64,
}

impl BillingConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn payment_timeout(&self) -> Duration {
        Duration::from_secs(self.payment_timeout_secs.max(1))
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 3600,
            max_concurrency: 8,
            payment_timeout_secs: 30,
            past_due_after_failures: 3,
            expire_after_failures: 4,
            retry_delays_days: vec![3, 7, 14],
            stale_pending_after_secs: 900,
        }
    }
}

/// Shipping rules for checkout quotes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CheckoutConfig {
    pub flat_shipping_cents: Cents,
    /// Subtotals at or above this ship free.
    pub free_shipping_threshold_cents: Cents,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            flat_shipping_cents: 599,
            free_shipping_threshold_cents: 5000,
        }
    }
}
