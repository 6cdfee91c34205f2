//! Notification Dispatcher.
//!
//! Maps a lifecycle event to an email and hands it to the email
//! collaborator, at most once per idempotency key:
//!
//! 1. Render the message and **claim** the key in the durable ledger.
//!    A key that is already recorded is a duplicate and is dropped.
//! 2. Send with bounded inline retries (exponential backoff).
//! 3. Record the outcome. Undelivered records are picked up later by
//!    [`NotificationDispatcher::redeliver_pending`].
//!
//! Delivery never feeds back into the state transition that triggered it:
//! callers fire notifications after their own write has committed and
//! ignore dispatch failures beyond logging them.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use backon::Retryable;
use chrono::Duration as ChronoDuration;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::collaborators::{EmailMessage, EmailSender};
use crate::config::NotificationConfig;
use crate::error::Result;
use crate::model::{Customer, Invoice, Order, OrderStatus, Subscription};
use crate::storage::{DeliveryState, NotificationLedger, NotificationRecord};
use crate::utils::retry::notification_backoff;

pub mod templates;

/// Lifecycle events that notify the customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationEvent {
    OrderConfirmed,
    OrderProcessing,
    OrderShipped,
    OrderOutForDelivery,
    OrderDelivered,
    SubscriptionBilled,
    PaymentFailed,
    SubscriptionExpired,
    SubscriptionCancelled,
    DeliverySkipped,
}

impl NotificationEvent {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OrderConfirmed => "order_confirmed",
            Self::OrderProcessing => "order_processing",
            Self::OrderShipped => "order_shipped",
            Self::OrderOutForDelivery => "order_out_for_delivery",
            Self::OrderDelivered => "order_delivered",
            Self::SubscriptionBilled => "subscription_billed",
            Self::PaymentFailed => "payment_failed",
            Self::SubscriptionExpired => "subscription_expired",
            Self::SubscriptionCancelled => "subscription_cancelled",
            Self::DeliverySkipped => "delivery_skipped",
        }
    }

    /// Event fired when an order enters `status`, if any.
    pub const fn for_order_status(status: OrderStatus) -> Option<Self> {
        match status {
            OrderStatus::Pending => Some(Self::OrderConfirmed),
            OrderStatus::Processing => Some(Self::OrderProcessing),
            OrderStatus::Shipped => Some(Self::OrderShipped),
            OrderStatus::OutForDelivery => Some(Self::OrderOutForDelivery),
            OrderStatus::Delivered => Some(Self::OrderDelivered),
            OrderStatus::PendingPayment | OrderStatus::Canceled | OrderStatus::Refunded => None,
        }
    }
}

/// Deterministic idempotency keys.
pub mod keys {
    use chrono::NaiveDate;
    use uuid::Uuid;

    use crate::model::OrderStatus;

    /// One key per order and target status.
    pub fn order_status(order_id: Uuid, status: OrderStatus) -> String {
        format!("order:{}:{}", order_id, status.as_str())
    }

    pub fn invoice_paid(invoice_id: Uuid) -> String {
        format!("invoice:{}:paid", invoice_id)
    }

    pub fn invoice_payment_failed(invoice_id: Uuid) -> String {
        format!("invoice:{}:payment_failed", invoice_id)
    }

    pub fn subscription_expired(subscription_id: Uuid) -> String {
        format!("subscription:{}:expired", subscription_id)
    }

    pub fn subscription_cancelled(subscription_id: Uuid) -> String {
        format!("subscription:{}:cancelled", subscription_id)
    }

    /// Keyed by the billing date that was skipped.
    pub fn delivery_skipped(subscription_id: Uuid, skipped: NaiveDate) -> String {
        format!("subscription:{}:skipped:{}", subscription_id, skipped)
    }
}

/// Entity a notification is about.
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    Order(&'a Order),
    Invoice {
        subscription: &'a Subscription,
        invoice: &'a Invoice,
    },
    Subscription {
        subscription: &'a Subscription,
        note: Option<&'a str>,
    },
}

impl Payload<'_> {
    pub fn customer(&self) -> &Customer {
        match self {
            Payload::Order(order) => &order.customer,
            Payload::Invoice { subscription, .. } | Payload::Subscription { subscription, .. } => {
                &subscription.customer
            }
        }
    }
}

/// Result of a dispatch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Sent now.
    Delivered,
    /// Key already recorded; nothing sent.
    Duplicate,
    /// Inline attempts failed; left for redelivery.
    Deferred,
}

/// Counts from one redelivery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedeliveryReport {
    pub delivered: u32,
    pub failed: u32,
}

#[derive(Debug)]
struct SendRejected;

pub struct NotificationDispatcher {
    ledger: Arc<dyn NotificationLedger>,
    email: Arc<dyn EmailSender>,
    clock: Arc<dyn Clock>,
    config: NotificationConfig,
}

impl NotificationDispatcher {
    pub fn new(
        ledger: Arc<dyn NotificationLedger>,
        email: Arc<dyn EmailSender>,
        clock: Arc<dyn Clock>,
        config: NotificationConfig,
    ) -> Self {
        Self {
            ledger,
            email,
            clock,
            config,
        }
    }

    /// Deliver the notification for `event` unless `idempotency_key` was
    /// already dispatched.
    pub async fn dispatch(
        &self,
        event: NotificationEvent,
        idempotency_key: &str,
        payload: Payload<'_>,
    ) -> Result<DispatchOutcome> {
        let message = templates::render(event, &payload);
        let now = self.clock.now();
        let record = NotificationRecord {
            key: idempotency_key.to_string(),
            event: event.as_str().to_string(),
            message,
            state: DeliveryState::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        };

        if !self.ledger.claim(&record).await? {
            debug!(key = %idempotency_key, event = event.as_str(), "Duplicate notification suppressed");
            return Ok(DispatchOutcome::Duplicate);
        }

        let (delivered, attempts) = self.deliver(&record.message, idempotency_key).await;
        let at = self.clock.now();
        if delivered {
            self.ledger
                .mark_delivered(idempotency_key, attempts, at)
                .await?;
            info!(
                key = %idempotency_key,
                event = event.as_str(),
                to = %record.message.to,
                attempts,
                "Notification delivered"
            );
            Ok(DispatchOutcome::Delivered)
        } else {
            self.ledger
                .mark_failed(idempotency_key, attempts, "email provider rejected message", at)
                .await?;
            warn!(
                key = %idempotency_key,
                event = event.as_str(),
                attempts,
                "Notification deferred after inline retries"
            );
            Ok(DispatchOutcome::Deferred)
        }
    }

    /// Dispatch, logging instead of returning errors.
    ///
    /// Used after a committed state transition, which must not be undone
    /// by a notification failure.
    pub(crate) async fn fire(
        &self,
        event: NotificationEvent,
        idempotency_key: &str,
        payload: Payload<'_>,
    ) -> Option<DispatchOutcome> {
        match self.dispatch(event, idempotency_key, payload).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(
                    key = %idempotency_key,
                    event = event.as_str(),
                    error = %e,
                    "Notification dispatch failed"
                );
                None
            }
        }
    }

    /// Send with inline retries. Returns whether it was accepted and the
    /// number of attempts made.
    async fn deliver(&self, message: &EmailMessage, key: &str) -> (bool, u32) {
        let attempts = AtomicU32::new(0);
        let result = (|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            if self.email.send(message).await {
                Ok(())
            } else {
                Err(SendRejected)
            }
        })
        .retry(notification_backoff(&self.config))
        .notify(|_: &SendRejected, dur: std::time::Duration| {
            debug!(key = %key, retry_in = ?dur, "Email send rejected, retrying");
        })
        .await;
        (result.is_ok(), attempts.load(Ordering::SeqCst))
    }

    /// Retry undelivered ledger records that have been idle for the
    /// configured period and still have attempts left.
    pub async fn redeliver_pending(&self) -> Result<RedeliveryReport> {
        let idle = ChronoDuration::from_std(self.config.redelivery_idle())
            .unwrap_or_else(|_| ChronoDuration::zero());
        let idle_since = self.clock.now() - idle;
        let records = self
            .ledger
            .list_undelivered(idle_since, self.config.max_attempts, self.config.redelivery_batch)
            .await?;

        let mut report = RedeliveryReport::default();
        for record in records {
            let attempts = record.attempts + 1;
            let at = self.clock.now();
            if self.email.send(&record.message).await {
                self.ledger.mark_delivered(&record.key, attempts, at).await?;
                report.delivered += 1;
            } else {
                self.ledger
                    .mark_failed(&record.key, attempts, "email provider rejected message", at)
                    .await?;
                report.failed += 1;
                if attempts >= self.config.max_attempts {
                    error!(
                        key = %record.key,
                        event = %record.event,
                        attempts,
                        "Notification retry budget exhausted"
                    );
                }
            }
        }

        if report.delivered + report.failed > 0 {
            info!(
                delivered = report.delivered,
                failed = report.failed,
                "Notification redelivery pass complete"
            );
        }
        Ok(report)
    }

    /// Notifications that used up their retry budget, for operators.
    pub async fn failed_notifications(&self) -> Result<Vec<NotificationRecord>> {
        Ok(self.ledger.list_exhausted(self.config.max_attempts).await?)
    }

    /// Ledger record for a key.
    pub async fn record(&self, idempotency_key: &str) -> Result<Option<NotificationRecord>> {
        Ok(self.ledger.get(idempotency_key).await?)
    }
}
