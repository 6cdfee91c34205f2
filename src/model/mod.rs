//! Durable records owned by the engine: orders, subscriptions, invoices.

mod invoice;
mod order;
mod subscription;

pub use invoice::{Invoice, InvoiceStatus};
pub use order::{
    LineItem, Order, OrderDraft, OrderSource, OrderStatus, OrderTotals, PaymentStatus,
};
pub use subscription::{
    Actor, Frequency, HistoryAction, HistoryEntry, ItemSelection, ItemsUpdate, Subscription,
    SubscriptionDraft, SubscriptionItem, SubscriptionStatus,
};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Monetary amount in the smallest currency unit.
pub type Cents = i64;

/// Format cents as a dollar string, e.g. `4500` -> `"$45.00"`.
pub fn format_cents(cents: Cents) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}${}.{:02}", sign, abs / 100, abs % 100)
}

/// Add amounts, rejecting a sum that does not fit in [`Cents`].
pub fn sum_cents(amounts: impl IntoIterator<Item = Result<Cents>>) -> Result<Cents> {
    amounts.into_iter().try_fold(0 as Cents, |acc, amount| {
        acc.checked_add(amount?).ok_or_else(amount_overflow)
    })
}

pub(crate) fn amount_overflow() -> EngineError {
    EngineError::validation("amount exceeds the supported range")
}

/// Apply a basis-point rate to an amount, rounding half up.
pub fn apply_rate_bps(amount: Cents, rate_bps: u32) -> Cents {
    let raw = amount as i128 * rate_bps as i128;
    ((raw + 5_000) / 10_000) as Cents
}

/// Shipping address snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub first_name: String,
    pub last_name: String,
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

impl Address {
    /// Reject addresses with any required field blank.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("first_name", &self.first_name),
            ("last_name", &self.last_name),
            ("line1", &self.line1),
            ("city", &self.city),
            ("state", &self.state),
            ("postal_code", &self.postal_code),
            ("country", &self.country),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(EngineError::InvalidAddress { field });
            }
        }
        Ok(())
    }
}

/// Customer identity as supplied by the authentication layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub email: String,
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

impl Customer {
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(EngineError::validation("customer id is required"));
        }
        if !self.email.contains('@') {
            return Err(EngineError::validation(format!(
                "customer email is invalid: {:?}",
                self.email
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_address() -> Address {
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

    #[test]
    fn test_format_cents() {
        assert_eq!(format_cents(4500), "$45.00");
        assert_eq!(format_cents(1), "$0.01");
        assert_eq!(format_cents(-250), "-$2.50");
    }

    #[test]
    fn test_apply_rate_rounds_half_up() {
        // 8.25% of $10.10 = 83.325 cents
        assert_eq!(apply_rate_bps(1010, 825), 83);
        // 5% of $0.10 = 0.5 cents
        assert_eq!(apply_rate_bps(10, 500), 1);
        assert_eq!(apply_rate_bps(4500, 0), 0);
    }

    #[test]
    fn test_address_validation_names_missing_field() {
        let mut address = sample_address();
        assert!(address.validate().is_ok());

        address.city = "  ".to_string();
        match address.validate() {
            Err(EngineError::InvalidAddress { field }) => assert_eq!(field, "city"),
            other => panic!("expected InvalidAddress, got {:?}", other),
        }
    }

    #[test]
    fn test_line2_is_optional() {
        let mut address = sample_address();
        address.line2 = Some(String::new());
        assert!(address.validate().is_ok());
    }

    #[test]
    fn test_customer_requires_email() {
        let customer = Customer {
            id: "cust-1".to_string(),
            email: "not-an-email".to_string(),
            first_name: "Ada".to_string(),
            last_name: String::new(),
        };
        assert!(customer.validate().is_err());
    }
}
