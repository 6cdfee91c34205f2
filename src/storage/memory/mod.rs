//! In-memory storage implementations.
//!
//! Used by tests and by `storage.type = memory`. Each store keeps its data
//! behind a single `RwLock`, which makes every trait method atomic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    CreateOutcome, DeliveryState, InvoiceStore, InvoiceUpdate, NotificationLedger,
    NotificationRecord, OrderStore, Result, StorageError, SubscriptionStore,
};
use crate::model::{HistoryEntry, Invoice, InvoiceStatus, Order, Subscription};

#[cfg(test)]
mod tests;

// ============================================================================
// Orders
// ============================================================================

#[derive(Default)]
pub struct MemoryOrderStore {
    orders: RwLock<HashMap<Uuid, Order>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert(&self, order: &Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(StorageError::Duplicate {
                entity: "order",
                id: order.id.to_string(),
            });
        }
        if orders
            .values()
            .any(|o| o.order_number == order.order_number)
        {
            return Err(StorageError::Duplicate {
                entity: "order",
                id: order.order_number.clone(),
            });
        }
        orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn update(&self, order: &Order) -> Result<u64> {
        let mut orders = self.orders.write().await;
        let stored = orders.get_mut(&order.id).ok_or_else(|| StorageError::NotFound {
            entity: "order",
            id: order.id.to_string(),
        })?;
        if stored.version != order.version {
            return Err(StorageError::VersionConflict {
                entity: "order",
                id: order.id.to_string(),
                expected: order.version,
            });
        }
        let mut next = order.clone();
        next.version = order.version + 1;
        *stored = next;
        Ok(order.version + 1)
    }

    async fn list_by_customer(&self, customer_id: &str) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.customer.id == customer_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }
}

// ============================================================================
// Subscriptions
// ============================================================================

#[derive(Default)]
pub struct MemorySubscriptionStore {
    subscriptions: RwLock<HashMap<Uuid, Subscription>>,
    history: RwLock<HashMap<Uuid, Vec<HistoryEntry>>>,
    injected_conflicts: AtomicU32,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` updates fail with a version conflict.
    pub fn inject_conflicts(&self, count: u32) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn insert(&self, subscription: &Subscription) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions.contains_key(&subscription.id) {
            return Err(StorageError::Duplicate {
                entity: "subscription",
                id: subscription.id.to_string(),
            });
        }
        subscriptions.insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Subscription>> {
        Ok(self.subscriptions.read().await.get(&id).cloned())
    }

    async fn update(&self, subscription: &Subscription) -> Result<u64> {
        let conflict = self
            .injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if conflict {
            return Err(StorageError::VersionConflict {
                entity: "subscription",
                id: subscription.id.to_string(),
                expected: subscription.version,
            });
        }

        let mut subscriptions = self.subscriptions.write().await;
        let stored =
            subscriptions
                .get_mut(&subscription.id)
                .ok_or_else(|| StorageError::NotFound {
                    entity: "subscription",
                    id: subscription.id.to_string(),
                })?;
        if stored.version != subscription.version {
            return Err(StorageError::VersionConflict {
                entity: "subscription",
                id: subscription.id.to_string(),
                expected: subscription.version,
            });
        }
        let mut next = subscription.clone();
        next.version = subscription.version + 1;
        *stored = next;
        Ok(subscription.version + 1)
    }

    async fn list_due(&self, on: NaiveDate) -> Result<Vec<Subscription>> {
        let mut due: Vec<Subscription> = self
            .subscriptions
            .read()
            .await
            .values()
            .filter(|s| s.status.is_billable() && s.next_billing_date <= on)
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.next_billing_date
                .cmp(&b.next_billing_date)
                .then(a.id.cmp(&b.id))
        });
        Ok(due)
    }

    async fn append_history(&self, entry: &HistoryEntry) -> Result<()> {
        self.history
            .write()
            .await
            .entry(entry.subscription_id)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn history(&self, subscription_id: Uuid) -> Result<Vec<HistoryEntry>> {
        Ok(self
            .history
            .read()
            .await
            .get(&subscription_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ============================================================================
// Invoices
// ============================================================================

#[derive(Default)]
struct InvoiceTables {
    by_id: HashMap<Uuid, Invoice>,
    by_cycle: HashMap<(Uuid, NaiveDate), Uuid>,
}

#[derive(Default)]
pub struct MemoryInvoiceStore {
    tables: RwLock<InvoiceTables>,
}

impl MemoryInvoiceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvoiceStore for MemoryInvoiceStore {
    async fn create_if_absent(&self, invoice: &Invoice) -> Result<CreateOutcome> {
        let mut tables = self.tables.write().await;
        let cycle = (invoice.subscription_id, invoice.billing_date);
        if let Some(existing_id) = tables.by_cycle.get(&cycle) {
            let existing = tables.by_id.get(existing_id).cloned().ok_or_else(|| {
                StorageError::Corrupt(format!("invoice index points at missing {}", existing_id))
            })?;
            return Ok(CreateOutcome::Existing(existing));
        }
        if tables.by_id.contains_key(&invoice.id) {
            return Err(StorageError::Duplicate {
                entity: "invoice",
                id: invoice.id.to_string(),
            });
        }
        tables.by_cycle.insert(cycle, invoice.id);
        tables.by_id.insert(invoice.id, invoice.clone());
        Ok(CreateOutcome::Created(invoice.clone()))
    }

    async fn get(&self, id: Uuid) -> Result<Option<Invoice>> {
        Ok(self.tables.read().await.by_id.get(&id).cloned())
    }

    async fn find(
        &self,
        subscription_id: Uuid,
        billing_date: NaiveDate,
    ) -> Result<Option<Invoice>> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_cycle
            .get(&(subscription_id, billing_date))
            .and_then(|id| tables.by_id.get(id))
            .cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[InvoiceStatus],
        update: InvoiceUpdate,
    ) -> Result<Invoice> {
        let mut tables = self.tables.write().await;
        let invoice = tables.by_id.get_mut(&id).ok_or_else(|| StorageError::NotFound {
            entity: "invoice",
            id: id.to_string(),
        })?;
        if !from.contains(&invoice.status) {
            return Err(StorageError::StatusConflict {
                entity: "invoice",
                id: id.to_string(),
                found: invoice.status.to_string(),
            });
        }
        apply_update(invoice, update);
        Ok(invoice.clone())
    }

    async fn list_for_subscription(&self, subscription_id: Uuid) -> Result<Vec<Invoice>> {
        let mut invoices: Vec<Invoice> = self
            .tables
            .read()
            .await
            .by_id
            .values()
            .filter(|i| i.subscription_id == subscription_id)
            .cloned()
            .collect();
        invoices.sort_by_key(|i| i.billing_date);
        Ok(invoices)
    }

    async fn list_by_status(&self, status: InvoiceStatus) -> Result<Vec<Invoice>> {
        let mut invoices: Vec<Invoice> = self
            .tables
            .read()
            .await
            .by_id
            .values()
            .filter(|i| i.status == status)
            .cloned()
            .collect();
        invoices.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(invoices)
    }
}

/// Apply a status change to an invoice in place.
pub(crate) fn apply_update(invoice: &mut Invoice, update: InvoiceUpdate) {
    invoice.status = update.status;
    if update.transaction_id.is_some() {
        invoice.transaction_id = update.transaction_id;
    }
    invoice.error_message = update.error_message;
    if update.status.is_final() {
        invoice.finalized_at = Some(update.at);
    }
}

// ============================================================================
// Notification ledger
// ============================================================================

#[derive(Default)]
pub struct MemoryLedger {
    records: RwLock<HashMap<String, NotificationRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    async fn modify(
        &self,
        key: &str,
        f: impl FnOnce(&mut NotificationRecord) + Send,
    ) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records.get_mut(key).ok_or_else(|| StorageError::NotFound {
            entity: "notification",
            id: key.to_string(),
        })?;
        f(record);
        Ok(())
    }
}

#[async_trait]
impl NotificationLedger for MemoryLedger {
    async fn claim(&self, record: &NotificationRecord) -> Result<bool> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.key) {
            return Ok(false);
        }
        records.insert(record.key.clone(), record.clone());
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<NotificationRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn mark_delivered(&self, key: &str, attempts: u32, at: DateTime<Utc>) -> Result<()> {
        self.modify(key, |record| {
            record.state = DeliveryState::Delivered;
            record.attempts = attempts;
            record.last_error = None;
            record.updated_at = at;
        })
        .await
    }

    async fn mark_failed(
        &self,
        key: &str,
        attempts: u32,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let error = error.to_string();
        self.modify(key, move |record| {
            record.state = DeliveryState::Failed;
            record.attempts = attempts;
            record.last_error = Some(error);
            record.updated_at = at;
        })
        .await
    }

    async fn list_undelivered(
        &self,
        idle_since: DateTime<Utc>,
        max_attempts: u32,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>> {
        let mut records: Vec<NotificationRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| {
                r.state != DeliveryState::Delivered
                    && r.attempts < max_attempts
                    && r.updated_at <= idle_since
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.key.cmp(&b.key)));
        records.truncate(limit);
        Ok(records)
    }

    async fn list_exhausted(&self, max_attempts: u32) -> Result<Vec<NotificationRecord>> {
        let mut records: Vec<NotificationRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.state == DeliveryState::Failed && r.attempts >= max_attempts)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.key.cmp(&b.key)));
        Ok(records)
    }
}
