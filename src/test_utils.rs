//! Test fixtures shared by unit and integration tests.
//!
//! Builders return valid records with fixed, recognisable values so tests
//! only spell out the fields they care about.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use uuid::Uuid;

use crate::model::{
    Address, Customer, Frequency, Invoice, InvoiceStatus, LineItem, Order, OrderSource,
    OrderStatus, OrderTotals, PaymentStatus, Subscription, SubscriptionItem, SubscriptionStatus,
};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}

/// Noon UTC on `date`.
pub fn noon(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(12, 0, 0).unwrap_or_default())
}

pub fn customer(id: &str) -> Customer {
    Customer {
        id: id.to_string(),
        email: format!("{}@example.com", id),
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
    }
}

pub fn address() -> Address {
    Address {
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        line1: "12 Orchard Lane".to_string(),
        line2: None,
        city: "Portland".to_string(),
        state: "OR".to_string(),
        postal_code: "97201".to_string(),
        country: "US".to_string(),
    }
}

pub fn line_item(product_id: &str, quantity: u32, unit_price_cents: i64) -> LineItem {
    LineItem {
        product_id: product_id.to_string(),
        title: product_id.replace('-', " "),
        quantity,
        unit_price_cents,
    }
}

/// Active subscription for one $45.00 box, due on `next_billing_date`.
pub fn subscription(
    customer_id: &str,
    frequency: Frequency,
    next_billing_date: NaiveDate,
) -> Subscription {
    let created = noon(next_billing_date);
    Subscription {
        id: Uuid::new_v4(),
        customer: customer(customer_id),
        status: SubscriptionStatus::Active,
        frequency,
        items: vec![SubscriptionItem {
            product_id: "harvest-box".to_string(),
            title: "Harvest Box".to_string(),
            quantity: 1,
            unit_price_cents: 4500,
        }],
        amount_cents: 4500,
        tax_rate_bps: 0,
        next_billing_date,
        last_billing_date: None,
        shipping_address: address(),
        payment_method_ref: "pm_card_visa".to_string(),
        consecutive_failures: 0,
        pause_reason: None,
        paused_at: None,
        cancelled_at: None,
        cancel_reason: None,
        skip_count: 0,
        version: 0,
        created_at: created,
        updated_at: created,
    }
}

/// Pending invoice for `subscription`'s current cycle.
pub fn invoice(subscription: &Subscription) -> Invoice {
    let billing_date = subscription.next_billing_date;
    Invoice {
        id: Uuid::new_v4(),
        invoice_number: format!(
            "INV-{}-{}",
            billing_date.format("%Y%m%d"),
            &subscription.id.simple().to_string()[..8]
        ),
        subscription_id: subscription.id,
        subtotal_cents: subscription.amount_cents,
        tax_cents: 0,
        amount_cents: subscription.amount_cents,
        status: InvoiceStatus::Pending,
        billing_date,
        attempt: 1,
        transaction_id: None,
        error_message: None,
        created_at: noon(billing_date),
        finalized_at: None,
    }
}

/// Checkout order awaiting payment.
pub fn order(customer_id: &str, order_number: &str) -> Order {
    let items = vec![line_item("kale-box", 2, 1500)];
    let created = noon(date(2025, 1, 1));
    Order {
        id: Uuid::new_v4(),
        order_number: order_number.to_string(),
        status: OrderStatus::PendingPayment,
        customer: customer(customer_id),
        shipping_address: address(),
        totals: OrderTotals {
            subtotal_cents: 3000,
            shipping_cents: 599,
            tax_cents: 0,
            total_cents: 3599,
        },
        items,
        payment_status: PaymentStatus::Unpaid,
        transaction_id: None,
        tracking_number: None,
        carrier: None,
        shipped_at: None,
        notes: None,
        source: OrderSource::Checkout,
        version: 0,
        created_at: created,
        updated_at: created,
    }
}
