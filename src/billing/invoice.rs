//! Invoice Generator.

use std::sync::Arc;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::Result;
use crate::model::{apply_rate_bps, Invoice, InvoiceStatus, Subscription};
use crate::storage::{CreateOutcome, InvoiceStore};

/// Opens one pending invoice per subscription cycle.
pub struct InvoiceGenerator {
    store: Arc<dyn InvoiceStore>,
    clock: Arc<dyn Clock>,
}

impl InvoiceGenerator {
    pub fn new(store: Arc<dyn InvoiceStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Pending invoice for the subscription's current billing date.
    ///
    /// Tax uses the rate captured on the subscription.
    pub fn draft(&self, subscription: &Subscription) -> Invoice {
        let subtotal = subscription.amount_cents;
        let tax = apply_rate_bps(subtotal, subscription.tax_rate_bps);
        Invoice {
            id: Uuid::new_v4(),
            invoice_number: invoice_number(subscription.next_billing_date, subscription.id),
            subscription_id: subscription.id,
            subtotal_cents: subtotal,
            tax_cents: tax,
            amount_cents: subtotal + tax,
            status: InvoiceStatus::Pending,
            billing_date: subscription.next_billing_date,
            attempt: subscription.consecutive_failures + 1,
            transaction_id: None,
            error_message: None,
            created_at: self.clock.now(),
            finalized_at: None,
        }
    }

    /// Create the cycle's invoice, or return the one already there.
    pub async fn open_cycle(&self, subscription: &Subscription) -> Result<CreateOutcome> {
        let draft = self.draft(subscription);
        Ok(self.store.create_if_absent(&draft).await?)
    }
}

/// `INV-YYYYMMDD-xxxxxxxx`: billing date and the first 8 hex digits of the
/// subscription id. Unique because invoices are unique per cycle.
pub fn invoice_number(billing_date: NaiveDate, subscription_id: Uuid) -> String {
    format!(
        "INV-{}-{}",
        billing_date.format("%Y%m%d"),
        &subscription_id.simple().to_string()[..8]
    )
}
