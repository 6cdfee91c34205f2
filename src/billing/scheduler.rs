//! Billing Scheduler.
//!
//! Each sweep selects billable subscriptions due today and bills them on a
//! bounded worker pool. One subscription's cycle runs under that
//! subscription's lock:
//!
//! 1. Open the cycle's invoice (unique per subscription and billing date).
//!    An existing invoice means the cycle was already attempted: final
//!    invoices get their bookkeeping completed, in-flight ones are left to
//!    reconciliation.
//! 2. Charge through the payment executor.
//! 3. Finalize the invoice and record the outcome on the subscription.
//!
//! Reconciliation resolves indeterminate and stale pending invoices by
//! asking the gateway what happened to their reference.

use std::sync::Arc;

use backon::Retryable;
use chrono::Duration as ChronoDuration;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::invoice::InvoiceGenerator;
use super::payment::{PaymentExecutor, PaymentOutcome};
use crate::clock::Clock;
use crate::collaborators::ChargeLookup;
use crate::config::BillingConfig;
use crate::error::{EngineError, Result};
use crate::model::{Invoice, InvoiceStatus, Subscription, SubscriptionStatus};
use crate::notification::{keys, NotificationDispatcher, NotificationEvent, Payload};
use crate::orders::OrderStateMachine;
use crate::storage::{CreateOutcome, InvoiceStore, InvoiceUpdate};
use crate::subscriptions::{CycleFailure, SubscriptionManager};
use crate::utils::retry::conflict_backoff;
use crate::utils::RetryPolicy;

/// Statuses an invoice can be finalized from.
const UNSETTLED: [InvoiceStatus; 2] = [InvoiceStatus::Pending, InvoiceStatus::Indeterminate];

/// Why a subscription was not charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Paused, cancelled or expired.
    NotBillable,
    /// Next billing date is in the future.
    NotDue,
    /// The cycle's invoice is pending or indeterminate.
    InFlight,
    /// The cycle's invoice was already final; bookkeeping was completed.
    AlreadyBilled,
}

/// Result of billing one subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Paid(Invoice),
    Failed {
        invoice: Invoice,
        escalation: CycleFailure,
    },
    Indeterminate(Invoice),
    Skipped(SkipReason),
}

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub paid: u32,
    pub failed: u32,
    pub indeterminate: u32,
    pub skipped: u32,
    pub errored: u32,
}

impl SweepReport {
    fn record(&mut self, outcome: &CycleOutcome) {
        match outcome {
            CycleOutcome::Paid(_) => self.paid += 1,
            CycleOutcome::Failed { .. } => self.failed += 1,
            CycleOutcome::Indeterminate(_) => self.indeterminate += 1,
            CycleOutcome::Skipped(_) => self.skipped += 1,
        }
    }
}

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub paid: u32,
    pub failed: u32,
    /// Still unknown; retried next pass.
    pub unresolved: u32,
    pub errored: u32,
}

pub struct BillingScheduler {
    subscriptions: Arc<SubscriptionManager>,
    orders: Arc<OrderStateMachine>,
    invoices: Arc<dyn InvoiceStore>,
    generator: InvoiceGenerator,
    payments: PaymentExecutor,
    notifier: Arc<NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    config: BillingConfig,
    policy: RetryPolicy,
}

impl BillingScheduler {
    pub fn new(
        subscriptions: Arc<SubscriptionManager>,
        orders: Arc<OrderStateMachine>,
        invoices: Arc<dyn InvoiceStore>,
        payments: PaymentExecutor,
        notifier: Arc<NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        config: BillingConfig,
    ) -> Self {
        Self {
            generator: InvoiceGenerator::new(invoices.clone(), clock.clone()),
            policy: RetryPolicy::from_config(&config),
            subscriptions,
            orders,
            invoices,
            payments,
            notifier,
            clock,
            config,
        }
    }

    /// Bill every subscription due today.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let today = self.clock.today();
        let due = self.subscriptions.due_for_billing(today).await?;
        if due.is_empty() {
            debug!(%today, "No subscriptions due");
            return Ok(SweepReport::default());
        }
        info!(%today, due = due.len(), "Billing sweep started");

        let results: Vec<(Uuid, Result<CycleOutcome>)> = stream::iter(due)
            .map(|subscription| {
                let id = subscription.id;
                async move { (id, self.bill_with_retry(id, true).await) }
            })
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        let mut report = SweepReport::default();
        for (id, result) in results {
            match result {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    report.errored += 1;
                    error!(subscription_id = %id, error = %e, "Billing failed");
                }
            }
        }

        info!(
            paid = report.paid,
            failed = report.failed,
            indeterminate = report.indeterminate,
            skipped = report.skipped,
            errored = report.errored,
            "Billing sweep complete"
        );
        Ok(report)
    }

    /// Bill one subscription now, at its current `next_billing_date`,
    /// whether or not that date has arrived.
    pub async fn bill_subscription(&self, subscription_id: Uuid) -> Result<CycleOutcome> {
        self.bill_with_retry(subscription_id, false).await
    }

    /// Resolve indeterminate invoices, and pending ones that have been
    /// pending too long, against the gateway.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let stale_after = ChronoDuration::seconds(
            i64::try_from(self.config.stale_pending_after_secs).unwrap_or(i64::MAX),
        );
        let cutoff = self.clock.now() - stale_after;

        let mut candidates = self
            .invoices
            .list_by_status(InvoiceStatus::Indeterminate)
            .await?;
        candidates.extend(
            self.invoices
                .list_by_status(InvoiceStatus::Pending)
                .await?
                .into_iter()
                .filter(|invoice| invoice.created_at <= cutoff),
        );

        let mut report = ReconcileReport::default();
        for invoice in candidates {
            let id = invoice.id;
            let result = (|| async { self.reconcile_invoice(id).await })
                .retry(conflict_backoff())
                .when(|e: &EngineError| e.is_retryable())
                .notify(|e: &EngineError, dur: std::time::Duration| {
                    warn!(invoice_id = %id, error = %e, retry_in = ?dur, "Reconcile conflict, retrying");
                })
                .await;

            match result {
                Ok(Some(CycleOutcome::Paid(_))) => report.paid += 1,
                Ok(Some(CycleOutcome::Failed { .. })) => report.failed += 1,
                Ok(Some(_)) => report.unresolved += 1,
                Ok(None) => {}
                Err(e) => {
                    report.errored += 1;
                    error!(invoice_id = %id, error = %e, "Reconciliation failed");
                }
            }
        }

        if report != ReconcileReport::default() {
            info!(
                paid = report.paid,
                failed = report.failed,
                unresolved = report.unresolved,
                errored = report.errored,
                "Reconciliation pass complete"
            );
        }
        Ok(report)
    }

    /// Invoices of one subscription by billing date.
    pub async fn invoices_for(&self, subscription_id: Uuid) -> Result<Vec<Invoice>> {
        Ok(self.invoices.list_for_subscription(subscription_id).await?)
    }

    /// Every failed invoice, for operator follow-up.
    pub async fn failed_invoices(&self) -> Result<Vec<Invoice>> {
        Ok(self.invoices.list_by_status(InvoiceStatus::Failed).await?)
    }

    /// One scheduler tick: reconcile, sweep, then redeliver notifications.
    pub async fn run_once(&self) -> Result<SweepReport> {
        if let Err(e) = self.reconcile().await {
            warn!(error = %e, "Reconciliation pass failed");
        }
        let report = self.sweep().await?;
        if let Err(e) = self.notifier.redeliver_pending().await {
            warn!(error = %e, "Notification redelivery failed");
        }
        Ok(report)
    }

    /// Tick on the configured interval until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.sweep_interval();
        info!(interval = ?period, "Billing scheduler started");

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Billing sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Billing scheduler stopped");
                        break;
                    }
                }
            }
        }
    }

    /// Run the scheduler as a background task.
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(async move { self.run(cancel_rx).await });
        SchedulerHandle {
            cancel: cancel_tx,
            task,
        }
    }

    // ------------------------------------------------------------------

    async fn bill_with_retry(&self, subscription_id: Uuid, only_if_due: bool) -> Result<CycleOutcome> {
        (|| async { self.bill_cycle(subscription_id, only_if_due).await })
            .retry(conflict_backoff())
            .when(|e: &EngineError| e.is_retryable())
            .notify(|e: &EngineError, dur: std::time::Duration| {
                warn!(
                    subscription_id = %subscription_id,
                    error = %e,
                    retry_in = ?dur,
                    "Billing conflict, retrying"
                );
            })
            .await
    }

    async fn bill_cycle(&self, subscription_id: Uuid, only_if_due: bool) -> Result<CycleOutcome> {
        let _guard = self.subscriptions.lock(subscription_id).await;
        let mut subscription = self.subscriptions.load(subscription_id).await?;

        if !subscription.status.is_billable() {
            return Ok(CycleOutcome::Skipped(SkipReason::NotBillable));
        }
        if only_if_due && subscription.next_billing_date > self.clock.today() {
            return Ok(CycleOutcome::Skipped(SkipReason::NotDue));
        }

        let invoice = match self.generator.open_cycle(&subscription).await? {
            CreateOutcome::Created(invoice) => invoice,
            CreateOutcome::Existing(invoice) => {
                return self.resume_cycle(&mut subscription, invoice).await;
            }
        };
        debug!(
            subscription_id = %subscription_id,
            invoice_id = %invoice.id,
            amount_cents = invoice.amount_cents,
            billing_date = %invoice.billing_date,
            "Invoice opened"
        );

        let outcome = self.payments.charge(&invoice, &subscription).await;
        self.settle(&mut subscription, invoice, outcome).await
    }

    /// The cycle already has an invoice.
    async fn resume_cycle(
        &self,
        subscription: &mut Subscription,
        invoice: Invoice,
    ) -> Result<CycleOutcome> {
        match invoice.status {
            InvoiceStatus::Paid => {
                info!(invoice_id = %invoice.id, "Completing bookkeeping for paid invoice");
                self.complete_paid(subscription, &invoice).await?;
                Ok(CycleOutcome::Skipped(SkipReason::AlreadyBilled))
            }
            InvoiceStatus::Failed => {
                info!(invoice_id = %invoice.id, "Completing bookkeeping for failed invoice");
                self.complete_failed(subscription, &invoice).await?;
                Ok(CycleOutcome::Skipped(SkipReason::AlreadyBilled))
            }
            InvoiceStatus::Pending | InvoiceStatus::Indeterminate => {
                debug!(
                    invoice_id = %invoice.id,
                    status = %invoice.status,
                    "Cycle awaiting reconciliation"
                );
                Ok(CycleOutcome::Skipped(SkipReason::InFlight))
            }
        }
    }

    /// Finalize `invoice` from a charge outcome and record it.
    async fn settle(
        &self,
        subscription: &mut Subscription,
        invoice: Invoice,
        outcome: PaymentOutcome,
    ) -> Result<CycleOutcome> {
        let at = self.clock.now();
        match outcome {
            PaymentOutcome::Paid { transaction_id } => {
                let invoice = self
                    .invoices
                    .transition(
                        invoice.id,
                        &UNSETTLED,
                        InvoiceUpdate {
                            status: InvoiceStatus::Paid,
                            transaction_id: Some(transaction_id),
                            error_message: None,
                            at,
                        },
                    )
                    .await?;
                info!(
                    subscription_id = %subscription.id,
                    invoice_id = %invoice.id,
                    amount_cents = invoice.amount_cents,
                    "Subscription charged"
                );
                self.complete_paid(subscription, &invoice).await?;
                Ok(CycleOutcome::Paid(invoice))
            }
            PaymentOutcome::Declined { reason } => {
                let invoice = self
                    .invoices
                    .transition(
                        invoice.id,
                        &UNSETTLED,
                        InvoiceUpdate {
                            status: InvoiceStatus::Failed,
                            transaction_id: None,
                            error_message: Some(reason),
                            at,
                        },
                    )
                    .await?;
                let escalation = self.complete_failed(subscription, &invoice).await?;
                warn!(
                    subscription_id = %subscription.id,
                    invoice_id = %invoice.id,
                    failures = subscription.consecutive_failures,
                    escalation = ?escalation,
                    "Subscription charge declined"
                );
                Ok(CycleOutcome::Failed {
                    invoice,
                    escalation,
                })
            }
            PaymentOutcome::Indeterminate { reason } => {
                let invoice = self
                    .invoices
                    .transition(
                        invoice.id,
                        &UNSETTLED,
                        InvoiceUpdate {
                            status: InvoiceStatus::Indeterminate,
                            transaction_id: None,
                            error_message: Some(reason),
                            at,
                        },
                    )
                    .await?;
                self.subscriptions
                    .record_indeterminate(subscription, &invoice)
                    .await?;
                warn!(
                    subscription_id = %subscription.id,
                    invoice_id = %invoice.id,
                    "Charge outcome unknown, awaiting reconciliation"
                );
                Ok(CycleOutcome::Indeterminate(invoice))
            }
        }
    }

    /// Order, schedule advance and receipt for a paid invoice. Each step
    /// is idempotent, so this can be replayed after a partial failure.
    async fn complete_paid(&self, subscription: &mut Subscription, invoice: &Invoice) -> Result<()> {
        self.orders
            .create_subscription_order(subscription, invoice)
            .await?;
        self.subscriptions
            .record_cycle_paid(subscription, invoice)
            .await?;
        let key = keys::invoice_paid(invoice.id);
        self.notifier
            .fire(
                NotificationEvent::SubscriptionBilled,
                &key,
                Payload::Invoice {
                    subscription: &*subscription,
                    invoice,
                },
            )
            .await;
        Ok(())
    }

    /// Escalation and notices for a failed invoice. Replay-safe.
    async fn complete_failed(
        &self,
        subscription: &mut Subscription,
        invoice: &Invoice,
    ) -> Result<CycleFailure> {
        let escalation = match self
            .subscriptions
            .record_cycle_failed(subscription, invoice, &self.policy)
            .await?
        {
            Some(escalation) => escalation,
            None => match subscription.status {
                SubscriptionStatus::Expired => CycleFailure::Expired,
                SubscriptionStatus::PastDue => CycleFailure::PastDue,
                _ => CycleFailure::Retrying,
            },
        };

        let key = keys::invoice_payment_failed(invoice.id);
        self.notifier
            .fire(
                NotificationEvent::PaymentFailed,
                &key,
                Payload::Invoice {
                    subscription: &*subscription,
                    invoice,
                },
            )
            .await;

        if escalation == CycleFailure::Expired {
            warn!(subscription_id = %subscription.id, "Subscription expired after repeated failures");
            let key = keys::subscription_expired(subscription.id);
            self.notifier
                .fire(
                    NotificationEvent::SubscriptionExpired,
                    &key,
                    Payload::Subscription {
                        subscription: &*subscription,
                        note: None,
                    },
                )
                .await;
        }
        Ok(escalation)
    }

    /// Returns `None` when the invoice was settled by someone else first.
    async fn reconcile_invoice(&self, invoice_id: Uuid) -> Result<Option<CycleOutcome>> {
        let Some(invoice) = self.invoices.get(invoice_id).await? else {
            return Err(EngineError::not_found("invoice", invoice_id));
        };
        let _guard = self.subscriptions.lock(invoice.subscription_id).await;

        // Re-read under the lock.
        let Some(invoice) = self.invoices.get(invoice_id).await? else {
            return Err(EngineError::not_found("invoice", invoice_id));
        };
        if invoice.status.is_final() {
            return Ok(None);
        }
        let mut subscription = self.subscriptions.load(invoice.subscription_id).await?;

        let lookup = match self.payments.lookup(&invoice).await {
            Ok(lookup) => lookup,
            Err(e) => {
                warn!(invoice_id = %invoice_id, error = %e, "Payment lookup failed");
                return Ok(Some(CycleOutcome::Indeterminate(invoice)));
            }
        };

        let outcome = match lookup {
            ChargeLookup::Settled { transaction_id } => PaymentOutcome::Paid { transaction_id },
            ChargeLookup::Declined { reason } => PaymentOutcome::Declined { reason },
            ChargeLookup::NotCharged => {
                info!(invoice_id = %invoice_id, "No charge found, charging again");
                self.payments.charge(&invoice, &subscription).await
            }
            ChargeLookup::Unknown => {
                debug!(invoice_id = %invoice_id, "Gateway cannot resolve charge yet");
                return Ok(Some(CycleOutcome::Indeterminate(invoice)));
            }
        };

        info!(invoice_id = %invoice_id, "Reconciling invoice");
        self.settle(&mut subscription, invoice, outcome).await.map(Some)
    }
}

/// Handle to a spawned scheduler.
pub struct SchedulerHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal the scheduler to stop after the current tick.
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }

    /// Stop and wait for the task to finish.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            error!(error = %e, "Billing scheduler task failed");
        }
    }
}
