//! Order record and its status graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{amount_overflow, sum_cents, Address, Cents, Customer};
use crate::error::{EngineError, Result};

/// Status values for an Order.
///
/// Main chain: `pending_payment -> pending -> processing -> shipped ->
/// out_for_delivery -> delivered`. `canceled` and `refunded` are terminal
/// alternates reachable from every pre-delivery state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingPayment,
    Pending,
    Processing,
    Shipped,
    OutForDelivery,
    Delivered,
    Canceled,
    Refunded,
}

impl OrderStatus {
    /// Get the string representation of this status.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::OutForDelivery => "out_for_delivery",
            Self::Delivered => "delivered",
            Self::Canceled => "canceled",
            Self::Refunded => "refunded",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Canceled | Self::Refunded)
    }

    /// Next status on the main chain, if any.
    pub const fn successor(&self) -> Option<OrderStatus> {
        match self {
            Self::PendingPayment => Some(Self::Pending),
            Self::Pending => Some(Self::Processing),
            Self::Processing => Some(Self::Shipped),
            Self::Shipped => Some(Self::OutForDelivery),
            Self::OutForDelivery => Some(Self::Delivered),
            Self::Delivered | Self::Canceled | Self::Refunded => None,
        }
    }

    /// Whether `self -> next` is an edge of the status graph.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Canceled | Self::Refunded => true,
            _ => self.successor() == Some(next),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending_payment" => Ok(Self::PendingPayment),
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "shipped" => Ok(Self::Shipped),
            "out_for_delivery" => Ok(Self::OutForDelivery),
            "delivered" => Ok(Self::Delivered),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            "refunded" => Ok(Self::Refunded),
            other => Err(EngineError::validation(format!(
                "unknown order status: {}",
                other
            ))),
        }
    }
}

/// Allow comparing OrderStatus with &str directly.
impl PartialEq<str> for OrderStatus {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

/// Payment state of an order, tracked separately from fulfilment status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }
}

/// Line item frozen at order time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: String,
    pub title: String,
    pub quantity: u32,
    pub unit_price_cents: Cents,
}

impl LineItem {
    pub fn line_total(&self) -> Result<Cents> {
        self.unit_price_cents
            .checked_mul(Cents::from(self.quantity))
            .ok_or_else(amount_overflow)
    }

    /// Sum of the line totals of `items`.
    pub fn subtotal(items: &[LineItem]) -> Result<Cents> {
        sum_cents(items.iter().map(LineItem::line_total))
    }
}

/// Monetary totals of an order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal_cents: Cents,
    pub shipping_cents: Cents,
    pub tax_cents: Cents,
    pub total_cents: Cents,
}

impl OrderTotals {
    /// Build totals whose `total` is the sum of its parts.
    pub fn new(subtotal_cents: Cents, shipping_cents: Cents, tax_cents: Cents) -> Result<Self> {
        Ok(Self {
            subtotal_cents,
            shipping_cents,
            tax_cents,
            total_cents: sum_cents([subtotal_cents, shipping_cents, tax_cents].map(Ok))?,
        })
    }

    /// Check the totals against the line items they describe.
    ///
    /// `total == subtotal + shipping + tax` and `subtotal == sum(line totals)`.
    pub fn validate_against(&self, items: &[LineItem]) -> Result<()> {
        if self.subtotal_cents < 0 || self.shipping_cents < 0 || self.tax_cents < 0 {
            return Err(EngineError::validation("order amounts must not be negative"));
        }
        let items_sum = LineItem::subtotal(items)?;
        if items_sum != self.subtotal_cents {
            return Err(EngineError::validation(format!(
                "subtotal {} does not match line items {}",
                self.subtotal_cents, items_sum
            )));
        }
        let expected = sum_cents([self.subtotal_cents, self.shipping_cents, self.tax_cents].map(Ok))?;
        if expected != self.total_cents {
            return Err(EngineError::validation(format!(
                "total {} does not equal subtotal + shipping + tax ({})",
                self.total_cents, expected
            )));
        }
        Ok(())
    }
}

/// Where an order came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderSource {
    Checkout,
    Subscription {
        subscription_id: Uuid,
        invoice_id: Uuid,
    },
}

/// A purchase instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub customer: Customer,
    pub shipping_address: Address,
    pub items: Vec<LineItem>,
    pub totals: OrderTotals,
    pub payment_status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub tracking_number: Option<String>,
    pub carrier: Option<String>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub source: OrderSource,
    /// Optimistic concurrency version, bumped by every store update.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input to order creation at checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDraft {
    pub customer: Customer,
    pub shipping_address: Address,
    pub items: Vec<LineItem>,
    pub totals: OrderTotals,
    #[serde(default)]
    pub notes: Option<String>,
}
