//! Subscription Manager.
//!
//! Sole writer of a subscription's `status` and `next_billing_date`. Every
//! mutation takes the subscription's lock, checks the status precondition,
//! writes through the store's version check and appends a history entry.
//!
//! The billing scheduler takes the same lock through [`SubscriptionManager::lock`]
//! and records cycle outcomes with the `record_cycle_*` methods, so customer
//! changes and billing never interleave on one subscription.

use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::collaborators::{Catalog, TaxService};
use crate::error::{EngineError, Result};
use crate::model::{
    sum_cents, Actor, Address, Cents, Frequency, HistoryAction, HistoryEntry, Invoice,
    ItemSelection, ItemsUpdate, Subscription, SubscriptionDraft, SubscriptionItem,
    SubscriptionStatus,
};
use crate::notification::{keys, NotificationDispatcher, NotificationEvent, Payload};
use crate::schedule;
use crate::storage::SubscriptionStore;
use crate::utils::{KeyedLocks, RetryPolicy};

/// Status after a failed cycle was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleFailure {
    /// Still active; retried on the next billing date.
    Retrying,
    PastDue,
    Expired,
}

pub struct SubscriptionManager {
    store: Arc<dyn SubscriptionStore>,
    catalog: Arc<dyn Catalog>,
    tax: Arc<dyn TaxService>,
    notifier: Arc<NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks<Uuid>,
}

impl SubscriptionManager {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        catalog: Arc<dyn Catalog>,
        tax: Arc<dyn TaxService>,
        notifier: Arc<NotificationDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            catalog,
            tax,
            notifier,
            clock,
            locks: KeyedLocks::new(),
        }
    }

    /// Start a subscription at checkout.
    ///
    /// Items are priced from the catalog and the tax rate is quoted for the
    /// shipping address. The first billing date is `start_date`, or today.
    pub async fn create_subscription(&self, draft: SubscriptionDraft) -> Result<Subscription> {
        draft.customer.validate()?;
        draft.shipping_address.validate()?;
        if draft.payment_method_ref.trim().is_empty() {
            return Err(EngineError::validation("payment method is required"));
        }

        let today = self.clock.today();
        let start = draft.start_date.unwrap_or(today);
        if start < today {
            return Err(EngineError::validation(format!(
                "start date {} is in the past",
                start
            )));
        }

        let (items, amount_cents) = self.price_items(&draft.items).await?;
        let quote = self
            .tax
            .calculate_tax(amount_cents, &draft.shipping_address)
            .await?;

        let now = self.clock.now();
        let subscription = Subscription {
            id: Uuid::new_v4(),
            customer: draft.customer,
            status: SubscriptionStatus::Active,
            frequency: draft.frequency,
            items,
            amount_cents,
            tax_rate_bps: quote.rate_bps,
            next_billing_date: start,
            last_billing_date: None,
            shipping_address: draft.shipping_address,
            payment_method_ref: draft.payment_method_ref,
            consecutive_failures: 0,
            pause_reason: None,
            paused_at: None,
            cancelled_at: None,
            cancel_reason: None,
            skip_count: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        self.store.insert(&subscription).await?;
        self.append_history(
            &subscription,
            HistoryAction::Created,
            SubscriptionStatus::Active,
            Actor::Customer,
            None,
        )
        .await?;

        info!(
            subscription_id = %subscription.id,
            customer_id = %subscription.customer.id,
            frequency = %subscription.frequency,
            amount_cents,
            next_billing_date = %subscription.next_billing_date,
            "Subscription created"
        );
        Ok(subscription)
    }

    pub async fn get(&self, id: Uuid) -> Result<Subscription> {
        self.load(id).await
    }

    /// Billable subscriptions due on or before `on`.
    pub async fn due_for_billing(&self, on: NaiveDate) -> Result<Vec<Subscription>> {
        Ok(self.store.list_due(on).await?)
    }

    /// `active -> paused`. The billing date stays frozen until resume.
    pub async fn pause(&self, id: Uuid, reason: Option<String>) -> Result<Subscription> {
        let subscription = self
            .mutate(id, HistoryAction::Paused, reason.clone(), |s, _| {
                match s.status {
                    SubscriptionStatus::Active => {}
                    SubscriptionStatus::Paused => return Err(EngineError::AlreadyPaused(s.id)),
                    status => return Err(EngineError::NotActive { id: s.id, status }),
                }
                s.status = SubscriptionStatus::Paused;
                s.pause_reason = reason;
                Ok(())
            })
            .await?;
        info!(subscription_id = %id, "Subscription paused");
        Ok(subscription)
    }

    /// `paused -> active`, billing next one interval from today.
    pub async fn resume(&self, id: Uuid) -> Result<Subscription> {
        let subscription = self
            .mutate(id, HistoryAction::Resumed, None, |s, today| {
                if s.status != SubscriptionStatus::Paused {
                    return Err(EngineError::NotPaused {
                        id: s.id,
                        status: s.status,
                    });
                }
                s.status = SubscriptionStatus::Active;
                s.next_billing_date = schedule::next_after(today, s.frequency);
                s.pause_reason = None;
                s.paused_at = None;
                Ok(())
            })
            .await?;
        info!(
            subscription_id = %id,
            next_billing_date = %subscription.next_billing_date,
            "Subscription resumed"
        );
        Ok(subscription)
    }

    /// Skip the upcoming delivery.
    ///
    /// The next billing date moves two intervals: the skipped cycle's own
    /// advance plus one more. Nothing is billed.
    pub async fn skip_next(&self, id: Uuid, reason: Option<String>) -> Result<Subscription> {
        let mut skipped = None;
        let subscription = self
            .mutate(id, HistoryAction::DeliverySkipped, reason.clone(), |s, _| {
                if s.status != SubscriptionStatus::Active {
                    return Err(EngineError::NotActive {
                        id: s.id,
                        status: s.status,
                    });
                }
                skipped = Some(s.next_billing_date);
                s.next_billing_date = schedule::advance(s.next_billing_date, s.frequency, 2);
                s.skip_count += 1;
                Ok(())
            })
            .await?;

        if let Some(skipped) = skipped {
            info!(
                subscription_id = %id,
                skipped = %skipped,
                next_billing_date = %subscription.next_billing_date,
                "Delivery skipped"
            );
            let key = keys::delivery_skipped(id, skipped);
            self.notifier
                .fire(
                    NotificationEvent::DeliverySkipped,
                    &key,
                    Payload::Subscription {
                        subscription: &subscription,
                        note: reason.as_deref(),
                    },
                )
                .await;
        }
        Ok(subscription)
    }

    /// Switch frequency and re-anchor the schedule.
    ///
    /// The next date becomes `last_billing_date + new interval`, clamped to
    /// `today + new interval` when that is in the past. A never-billed
    /// subscription keeps its first billing date unless it has passed.
    /// A paused subscription only records the new frequency; resume
    /// computes the date.
    pub async fn change_frequency(&self, id: Uuid, frequency: Frequency) -> Result<Subscription> {
        let note = format!("new frequency: {}", frequency);
        let subscription = self
            .mutate(id, HistoryAction::FrequencyChanged, Some(note), |s, today| {
                match s.status {
                    SubscriptionStatus::Active => {
                        s.next_billing_date = rescheduled_date(
                            s.last_billing_date,
                            s.next_billing_date,
                            frequency,
                            today,
                        );
                    }
                    SubscriptionStatus::Paused => {}
                    status => return Err(EngineError::NotActive { id: s.id, status }),
                }
                s.frequency = frequency;
                Ok(())
            })
            .await?;
        info!(
            subscription_id = %id,
            frequency = %frequency,
            next_billing_date = %subscription.next_billing_date,
            "Subscription frequency changed"
        );
        Ok(subscription)
    }

    /// Change the shipping address and re-quote the tax rate for it.
    pub async fn update_address(&self, id: Uuid, address: Address) -> Result<Subscription> {
        address.validate()?;
        let current = self.load(id).await?;
        ensure_open(&current)?;
        let quote = self
            .tax
            .calculate_tax(current.amount_cents, &address)
            .await?;

        let subscription = self
            .mutate(id, HistoryAction::AddressChanged, None, |s, _| {
                s.shipping_address = address;
                s.tax_rate_bps = quote.rate_bps;
                Ok(())
            })
            .await?;
        info!(subscription_id = %id, tax_rate_bps = quote.rate_bps, "Subscription address updated");
        Ok(subscription)
    }

    /// Replace the box contents.
    ///
    /// Prices come from the catalog and the amount is recomputed here. A
    /// client-supplied amount is ignored.
    pub async fn update_items(&self, id: Uuid, update: ItemsUpdate) -> Result<Subscription> {
        let (items, amount_cents) = self.price_items(&update.items).await?;
        if let Some(client_amount) = update.client_amount_cents {
            if client_amount != amount_cents {
                warn!(
                    subscription_id = %id,
                    client_amount,
                    amount_cents,
                    "Ignoring client-supplied subscription amount"
                );
            }
        }

        let note = format!("amount: {}", crate::model::format_cents(amount_cents));
        let subscription = self
            .mutate(id, HistoryAction::ItemsChanged, Some(note), |s, _| {
                s.items = items;
                s.amount_cents = amount_cents;
                Ok(())
            })
            .await?;
        info!(subscription_id = %id, amount_cents, "Subscription items updated");
        Ok(subscription)
    }

    /// Allowed for active, paused and past_due subscriptions.
    pub async fn update_payment_method(
        &self,
        id: Uuid,
        payment_method_ref: &str,
    ) -> Result<Subscription> {
        if payment_method_ref.trim().is_empty() {
            return Err(EngineError::validation("payment method is required"));
        }
        let subscription = self
            .mutate(id, HistoryAction::PaymentMethodChanged, None, |s, _| {
                s.payment_method_ref = payment_method_ref.trim().to_string();
                Ok(())
            })
            .await?;
        info!(subscription_id = %id, "Subscription payment method updated");
        Ok(subscription)
    }

    /// Cancel for good. Cancelling twice is a no-op.
    pub async fn cancel(&self, id: Uuid, reason: Option<String>) -> Result<Subscription> {
        let subscription = {
            let _guard = self.locks.lock(&id).await;
            let mut subscription = self.load(id).await?;
            match subscription.status {
                SubscriptionStatus::Cancelled => {
                    debug!(subscription_id = %id, "Subscription already cancelled");
                    return Ok(subscription);
                }
                SubscriptionStatus::Expired => {
                    return Err(EngineError::SubscriptionClosed {
                        id,
                        status: subscription.status,
                    })
                }
                _ => {}
            }

            let old_status = subscription.status;
            subscription.status = SubscriptionStatus::Cancelled;
            subscription.cancelled_at = Some(self.clock.now());
            subscription.cancel_reason = reason.clone();
            self.save(&mut subscription).await?;
            self.append_history(
                &subscription,
                HistoryAction::Cancelled,
                old_status,
                Actor::Customer,
                reason.clone(),
            )
            .await?;
            subscription
        };

        info!(subscription_id = %id, "Subscription cancelled");
        let key = keys::subscription_cancelled(id);
        self.notifier
            .fire(
                NotificationEvent::SubscriptionCancelled,
                &key,
                Payload::Subscription {
                    subscription: &subscription,
                    note: reason.as_deref(),
                },
            )
            .await;
        Ok(subscription)
    }

    /// Audit log, oldest first.
    pub async fn history(&self, id: Uuid) -> Result<Vec<HistoryEntry>> {
        self.load(id).await?;
        Ok(self.store.history(id).await?)
    }

    // ------------------------------------------------------------------
    // Billing bookkeeping. Callers hold the subscription lock.
    // ------------------------------------------------------------------

    /// Exclusive access to one subscription.
    pub(crate) async fn lock(&self, id: Uuid) -> OwnedMutexGuard<()> {
        self.locks.lock(&id).await
    }

    /// Latest stored copy, without locking.
    pub(crate) async fn load(&self, id: Uuid) -> Result<Subscription> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| EngineError::not_found("subscription", id))
    }

    /// Advance the schedule past a paid cycle.
    ///
    /// Returns false if the cycle was already recorded.
    pub(crate) async fn record_cycle_paid(
        &self,
        subscription: &mut Subscription,
        invoice: &Invoice,
    ) -> Result<bool> {
        if subscription.next_billing_date != invoice.billing_date
            || !subscription.status.is_billable()
        {
            return Ok(false);
        }

        let old_status = subscription.status;
        subscription.last_billing_date = Some(invoice.billing_date);
        subscription.next_billing_date =
            schedule::next_after(invoice.billing_date, subscription.frequency);
        subscription.consecutive_failures = 0;
        subscription.status = SubscriptionStatus::Active;
        self.save(subscription).await?;
        self.append_history(
            subscription,
            HistoryAction::PaymentSucceeded,
            old_status,
            Actor::System,
            Some(invoice.invoice_number.clone()),
        )
        .await?;
        Ok(true)
    }

    /// Count a failed cycle and escalate per `policy`.
    ///
    /// Returns `None` if the cycle was already recorded.
    pub(crate) async fn record_cycle_failed(
        &self,
        subscription: &mut Subscription,
        invoice: &Invoice,
        policy: &RetryPolicy,
    ) -> Result<Option<CycleFailure>> {
        if subscription.next_billing_date != invoice.billing_date
            || !subscription.status.is_billable()
        {
            return Ok(None);
        }

        let old_status = subscription.status;
        let failures = subscription.consecutive_failures + 1;
        subscription.consecutive_failures = failures;

        let (outcome, action) = if policy.should_expire(failures) {
            subscription.status = SubscriptionStatus::Expired;
            (CycleFailure::Expired, HistoryAction::Expired)
        } else {
            let delay = policy.retry_delay_days(failures);
            subscription.next_billing_date = schedule::add_days(invoice.billing_date, delay);
            if policy.is_past_due(failures) {
                subscription.status = SubscriptionStatus::PastDue;
                (CycleFailure::PastDue, HistoryAction::PaymentFailed)
            } else {
                (CycleFailure::Retrying, HistoryAction::PaymentFailed)
            }
        };

        self.save(subscription).await?;
        self.append_history(
            subscription,
            action,
            old_status,
            Actor::System,
            invoice.error_message.clone(),
        )
        .await?;
        Ok(Some(outcome))
    }

    /// Note an unresolved charge. The schedule does not move.
    pub(crate) async fn record_indeterminate(
        &self,
        subscription: &Subscription,
        invoice: &Invoice,
    ) -> Result<()> {
        self.append_history(
            subscription,
            HistoryAction::PaymentIndeterminate,
            subscription.status,
            Actor::System,
            Some(invoice.invoice_number.clone()),
        )
        .await
    }

    // ------------------------------------------------------------------

    /// Load under lock, check the subscription is open, apply, save and
    /// log `action`.
    async fn mutate<F>(
        &self,
        id: Uuid,
        action: HistoryAction,
        notes: Option<String>,
        apply: F,
    ) -> Result<Subscription>
    where
        F: FnOnce(&mut Subscription, NaiveDate) -> Result<()> + Send,
    {
        let _guard = self.locks.lock(&id).await;
        let mut subscription = self.load(id).await?;
        ensure_open(&subscription)?;

        let old_status = subscription.status;
        apply(&mut subscription, self.clock.today())?;
        if subscription.status == SubscriptionStatus::Paused && old_status != subscription.status
        {
            subscription.paused_at = Some(self.clock.now());
        }
        self.save(&mut subscription).await?;
        self.append_history(&subscription, action, old_status, Actor::Customer, notes)
            .await?;
        Ok(subscription)
    }

    async fn save(&self, subscription: &mut Subscription) -> Result<()> {
        subscription.updated_at = self.clock.now();
        subscription.version = self.store.update(subscription).await?;
        Ok(())
    }

    async fn append_history(
        &self,
        subscription: &Subscription,
        action: HistoryAction,
        old_status: SubscriptionStatus,
        actor: Actor,
        notes: Option<String>,
    ) -> Result<()> {
        let entry = HistoryEntry {
            id: Uuid::new_v4(),
            subscription_id: subscription.id,
            action,
            old_status,
            new_status: subscription.status,
            actor,
            notes,
            at: self.clock.now(),
        };
        Ok(self.store.append_history(&entry).await?)
    }

    /// Price a selection from the catalog.
    async fn price_items(
        &self,
        selections: &[ItemSelection],
    ) -> Result<(Vec<SubscriptionItem>, Cents)> {
        if selections.is_empty() {
            return Err(EngineError::validation("subscription has no items"));
        }
        let mut items = Vec::with_capacity(selections.len());
        for selection in selections {
            if selection.quantity == 0 {
                return Err(EngineError::validation(format!(
                    "item {} has zero quantity",
                    selection.product_id
                )));
            }
            let product = self
                .catalog
                .product(&selection.product_id)
                .await?
                .ok_or_else(|| {
                    EngineError::validation(format!("unknown product: {}", selection.product_id))
                })?;
            items.push(SubscriptionItem {
                product_id: product.id,
                title: product.title,
                quantity: selection.quantity,
                unit_price_cents: product.price_cents,
            });
        }
        let amount = sum_cents(items.iter().map(SubscriptionItem::line_total))?;
        Ok((items, amount))
    }
}

fn ensure_open(subscription: &Subscription) -> Result<()> {
    if subscription.status.is_closed() {
        return Err(EngineError::SubscriptionClosed {
            id: subscription.id,
            status: subscription.status,
        });
    }
    Ok(())
}

/// Next billing date after switching to `frequency` on `today`.
pub fn rescheduled_date(
    last_billing_date: Option<NaiveDate>,
    next_billing_date: NaiveDate,
    frequency: Frequency,
    today: NaiveDate,
) -> NaiveDate {
    let candidate = match last_billing_date {
        Some(last) => schedule::next_after(last, frequency),
        None => next_billing_date,
    };
    if candidate < today {
        schedule::next_after(today, frequency)
    } else {
        candidate
    }
}
