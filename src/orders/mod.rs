//! Order State Machine.
//!
//! Drives an order through
//! `pending_payment -> pending -> processing -> shipped -> out_for_delivery -> delivered`,
//! with `canceled` and `refunded` reachable from every non-terminal status.
//!
//! Every mutation of one order runs under that order's lock and writes
//! through the store's version check. Notifications fire after the write,
//! keyed by `(order id, target status)`, so retried calls never email twice.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::collaborators::{InventoryService, TaxService};
use crate::config::CheckoutConfig;
use crate::error::{EngineError, Result};
use crate::model::{
    Address, Invoice, LineItem, Order, OrderDraft, OrderSource, OrderStatus, OrderTotals,
    PaymentStatus, Subscription,
};
use crate::notification::{keys, NotificationDispatcher, NotificationEvent, Payload};
use crate::storage::{OrderStore, StorageError};
use crate::utils::KeyedLocks;

/// Namespace for ids of orders spawned by subscription invoices.
const SUBSCRIPTION_ORDER_NAMESPACE: Uuid =
    Uuid::from_u128(0x6f1c_2a9e_83d4_4b57_a0e2_5c71_d9b8_3f40);

/// Attempts at finding an unused order number.
const ORDER_NUMBER_ATTEMPTS: usize = 5;

/// Outcome of a checkout payment authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentResult {
    Approved { transaction_id: String },
    Declined { reason: String },
}

pub struct OrderStateMachine {
    store: Arc<dyn OrderStore>,
    inventory: Arc<dyn InventoryService>,
    tax: Arc<dyn TaxService>,
    notifier: Arc<NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    checkout: CheckoutConfig,
    locks: KeyedLocks<Uuid>,
}

impl OrderStateMachine {
    pub fn new(
        store: Arc<dyn OrderStore>,
        inventory: Arc<dyn InventoryService>,
        tax: Arc<dyn TaxService>,
        notifier: Arc<NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        checkout: CheckoutConfig,
    ) -> Self {
        Self {
            store,
            inventory,
            tax,
            notifier,
            clock,
            checkout,
            locks: KeyedLocks::new(),
        }
    }

    /// Create an order awaiting payment.
    ///
    /// Validates the customer, the address, the totals and stock for every
    /// line. No notification is sent until payment is confirmed.
    pub async fn create_order(&self, draft: OrderDraft) -> Result<Order> {
        draft.customer.validate()?;
        draft.shipping_address.validate()?;
        validate_items(&draft.items)?;
        draft.totals.validate_against(&draft.items)?;

        for item in &draft.items {
            let available = self
                .inventory
                .check_availability(&item.product_id, item.quantity)
                .await?;
            if !available {
                return Err(EngineError::OutOfStock {
                    product_id: item.product_id.clone(),
                    requested: item.quantity,
                });
            }
        }

        let now = self.clock.now();
        let order = Order {
            id: Uuid::new_v4(),
            order_number: String::new(),
            status: OrderStatus::PendingPayment,
            customer: draft.customer,
            shipping_address: draft.shipping_address,
            items: draft.items,
            totals: draft.totals,
            payment_status: PaymentStatus::Unpaid,
            transaction_id: None,
            tracking_number: None,
            carrier: None,
            shipped_at: None,
            notes: draft.notes,
            source: OrderSource::Checkout,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        let order = self.insert_numbered(order).await?;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            customer_id = %order.customer.id,
            total_cents = order.totals.total_cents,
            "Order created"
        );
        Ok(order)
    }

    /// Apply the checkout payment outcome.
    ///
    /// Approval moves `pending_payment -> pending` and sends the
    /// confirmation. A decline leaves the order in `pending_payment`.
    /// Confirming an order that is already past `pending_payment` is a no-op.
    pub async fn confirm_payment(&self, order_id: Uuid, result: PaymentResult) -> Result<Order> {
        let order = {
            let guard = self.locks.lock(&order_id).await;
            let mut order = self.load(order_id).await?;

            match order.status {
                OrderStatus::PendingPayment => {}
                OrderStatus::Canceled | OrderStatus::Refunded => {
                    return Err(EngineError::IllegalTransition {
                        from: order.status,
                        to: OrderStatus::Pending,
                    });
                }
                OrderStatus::Pending => {
                    debug!(order_id = %order_id, "Payment already confirmed");
                    drop(guard);
                    self.notify_status(&order).await;
                    return Ok(order);
                }
                _ => {
                    debug!(order_id = %order_id, status = %order.status, "Payment already confirmed");
                    return Ok(order);
                }
            }

            match result {
                PaymentResult::Approved { transaction_id } => {
                    order.status = OrderStatus::Pending;
                    order.payment_status = PaymentStatus::Paid;
                    order.transaction_id = Some(transaction_id);
                }
                PaymentResult::Declined { reason } => {
                    order.payment_status = PaymentStatus::Failed;
                    self.save(&mut order).await?;
                    warn!(order_id = %order_id, reason = %reason, "Checkout payment declined");
                    return Ok(order);
                }
            }
            self.save(&mut order).await?;
            info!(order_id = %order_id, "Order payment confirmed");
            order
        };

        self.notify_status(&order).await;
        Ok(order)
    }

    /// Move an order to `new_status` along the status graph.
    ///
    /// Setting the current status again is accepted and re-offers its
    /// notification to the dispatcher, which drops it if already sent.
    pub async fn set_status(&self, order_id: Uuid, new_status: OrderStatus) -> Result<Order> {
        let order = {
            let _guard = self.locks.lock(&order_id).await;
            let mut order = self.load(order_id).await?;

            if order.status == new_status {
                debug!(order_id = %order_id, status = %new_status, "Status unchanged");
                order
            } else {
                if !order.status.can_transition_to(new_status) {
                    return Err(EngineError::IllegalTransition {
                        from: order.status,
                        to: new_status,
                    });
                }
                let from = order.status;
                order.status = new_status;
                match new_status {
                    OrderStatus::Shipped => order.shipped_at = Some(self.clock.now()),
                    OrderStatus::Refunded if order.payment_status == PaymentStatus::Paid => {
                        order.payment_status = PaymentStatus::Refunded;
                    }
                    _ => {}
                }
                self.save(&mut order).await?;
                info!(
                    order_id = %order_id,
                    from = %from,
                    to = %new_status,
                    "Order status changed"
                );
                order
            }
        };

        self.notify_status(&order).await;
        Ok(order)
    }

    /// Record tracking details.
    ///
    /// From `pending` or `processing` this ships the order, passing through
    /// every intermediate status and notifying each one. An unpaid order
    /// cannot ship. On an order that is already `shipped` the fields are
    /// overwritten and nothing is re-sent.
    pub async fn attach_tracking(
        &self,
        order_id: Uuid,
        tracking_number: &str,
        carrier: &str,
    ) -> Result<Order> {
        if tracking_number.trim().is_empty() {
            return Err(EngineError::validation("tracking number is required"));
        }

        let (order, entered) = {
            let _guard = self.locks.lock(&order_id).await;
            let mut order = self.load(order_id).await?;

            let entered = steps_to_shipped(order.status)?;
            order.tracking_number = Some(tracking_number.trim().to_string());
            order.carrier = Some(carrier.trim().to_string()).filter(|c| !c.is_empty());
            if !entered.is_empty() {
                order.status = OrderStatus::Shipped;
                order.shipped_at = Some(self.clock.now());
            }
            self.save(&mut order).await?;
            (order, entered)
        };

        if entered.is_empty() {
            info!(order_id = %order_id, tracking = %tracking_number, "Tracking updated");
        } else {
            info!(
                order_id = %order_id,
                tracking = %tracking_number,
                steps = entered.len(),
                "Order shipped"
            );
        }
        for status in entered {
            self.notify(&order, status).await;
        }
        Ok(order)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order> {
        self.load(order_id).await
    }

    pub async fn orders_for_customer(&self, customer_id: &str) -> Result<Vec<Order>> {
        Ok(self.store.list_by_customer(customer_id).await?)
    }

    /// Replace the internal notes of an order. Allowed in any status.
    pub async fn update_notes(&self, order_id: Uuid, notes: Option<String>) -> Result<Order> {
        let _guard = self.locks.lock(&order_id).await;
        let mut order = self.load(order_id).await?;
        order.notes = notes.filter(|n| !n.trim().is_empty());
        self.save(&mut order).await?;
        Ok(order)
    }

    /// Checkout totals for `items` shipped to `address`.
    pub async fn quote(&self, items: &[LineItem], address: &Address) -> Result<OrderTotals> {
        address.validate()?;
        validate_items(items)?;

        let subtotal = LineItem::subtotal(items)?;
        let shipping = if subtotal >= self.checkout.free_shipping_threshold_cents {
            0
        } else {
            self.checkout.flat_shipping_cents
        };
        let tax = self.tax.calculate_tax(subtotal, address).await?;
        OrderTotals::new(subtotal, shipping, tax.tax_cents)
    }

    /// Create the order for a paid subscription cycle.
    ///
    /// Starts at `pending` with payment recorded. The id is derived from the
    /// invoice id, so repeated calls for one invoice return the same order.
    pub(crate) async fn create_subscription_order(
        &self,
        subscription: &Subscription,
        invoice: &Invoice,
    ) -> Result<Order> {
        let id = subscription_order_id(invoice.id);
        if let Some(existing) = self.store.get(id).await? {
            return Ok(existing);
        }

        let now = self.clock.now();
        let items = subscription
            .items
            .iter()
            .map(|item| LineItem {
                product_id: item.product_id.clone(),
                title: item.title.clone(),
                quantity: item.quantity,
                unit_price_cents: item.unit_price_cents,
            })
            .collect();
        let order = Order {
            id,
            order_number: String::new(),
            status: OrderStatus::Pending,
            customer: subscription.customer.clone(),
            shipping_address: subscription.shipping_address.clone(),
            items,
            totals: OrderTotals::new(invoice.subtotal_cents, 0, invoice.tax_cents)?,
            payment_status: PaymentStatus::Paid,
            transaction_id: invoice.transaction_id.clone(),
            tracking_number: None,
            carrier: None,
            shipped_at: None,
            notes: None,
            source: OrderSource::Subscription {
                subscription_id: subscription.id,
                invoice_id: invoice.id,
            },
            version: 0,
            created_at: now,
            updated_at: now,
        };
        let order = self.insert_numbered(order).await?;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            subscription_id = %subscription.id,
            invoice_id = %invoice.id,
            "Subscription order created"
        );
        Ok(order)
    }

    async fn load(&self, order_id: Uuid) -> Result<Order> {
        self.store
            .get(order_id)
            .await?
            .ok_or_else(|| EngineError::not_found("order", order_id))
    }

    async fn save(&self, order: &mut Order) -> Result<()> {
        order.updated_at = self.clock.now();
        order.version = self.store.update(order).await?;
        Ok(())
    }

    /// Insert with a fresh order number, retrying number collisions.
    ///
    /// A duplicate on the order id itself means another caller created the
    /// same order first; that order is returned.
    async fn insert_numbered(&self, mut order: Order) -> Result<Order> {
        let mut last_err = None;
        for _ in 0..ORDER_NUMBER_ATTEMPTS {
            order.order_number = order_number(&order);
            match self.store.insert(&order).await {
                Ok(()) => return Ok(order),
                Err(StorageError::Duplicate { entity, id }) => {
                    if let Some(existing) = self.store.get(order.id).await? {
                        return Ok(existing);
                    }
                    debug!(order_number = %order.order_number, "Order number taken, retrying");
                    last_err = Some(StorageError::Duplicate { entity, id });
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(last_err
            .map(EngineError::from)
            .unwrap_or_else(|| EngineError::validation("could not allocate an order number")))
    }

    async fn notify_status(&self, order: &Order) {
        self.notify(order, order.status).await;
    }

    async fn notify(&self, order: &Order, status: OrderStatus) {
        if let Some(event) = NotificationEvent::for_order_status(status) {
            let key = keys::order_status(order.id, status);
            self.notifier.fire(event, &key, Payload::Order(order)).await;
        }
    }
}

/// Statuses entered when tracking is attached to an order in `from`.
///
/// Empty when the order is already shipped.
fn steps_to_shipped(from: OrderStatus) -> Result<Vec<OrderStatus>> {
    match from {
        OrderStatus::Pending => Ok(vec![OrderStatus::Processing, OrderStatus::Shipped]),
        OrderStatus::Processing => Ok(vec![OrderStatus::Shipped]),
        OrderStatus::Shipped => Ok(Vec::new()),
        from => Err(EngineError::IllegalTransition {
            from,
            to: OrderStatus::Shipped,
        }),
    }
}

fn validate_items(items: &[LineItem]) -> Result<()> {
    if items.is_empty() {
        return Err(EngineError::validation("order has no line items"));
    }
    for item in items {
        if item.product_id.trim().is_empty() {
            return Err(EngineError::validation("line item is missing a product id"));
        }
        if item.quantity == 0 {
            return Err(EngineError::validation(format!(
                "line item {} has zero quantity",
                item.product_id
            )));
        }
        if item.unit_price_cents < 0 {
            return Err(EngineError::validation(format!(
                "line item {} has a negative price",
                item.product_id
            )));
        }
    }
    Ok(())
}

/// Order id for the cycle billed by `invoice_id`.
pub fn subscription_order_id(invoice_id: Uuid) -> Uuid {
    Uuid::new_v5(&SUBSCRIPTION_ORDER_NAMESPACE, invoice_id.as_bytes())
}

/// `FC-YYMMDD-XXXXXX`, dated by creation.
fn order_number(order: &Order) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..6].to_uppercase();
    format!("FC-{}-{}", order.created_at.format("%y%m%d"), suffix)
}
