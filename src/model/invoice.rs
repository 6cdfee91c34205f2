//! Invoice: the record of one billing attempt.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Cents;

/// Invoice status.
///
/// `Indeterminate` marks a charge whose outcome is unknown (timeout or
/// transport failure). It must be reconciled with the payment collaborator
/// before becoming `Paid` or `Failed`; it is never retried blindly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Failed,
    Indeterminate,
}

impl InvoiceStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Indeterminate => "indeterminate",
        }
    }

    /// Paid and failed invoices are immutable.
    pub const fn is_final(&self) -> bool {
        matches!(self, Self::Paid | Self::Failed)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "paid" => Some(Self::Paid),
            "failed" => Some(Self::Failed),
            "indeterminate" => Some(Self::Indeterminate),
            _ => None,
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One billing attempt for one subscription cycle.
///
/// Exactly one invoice exists per `(subscription_id, billing_date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub invoice_number: String,
    pub subscription_id: Uuid,
    pub subtotal_cents: Cents,
    pub tax_cents: Cents,
    /// Amount charged: subtotal + tax.
    pub amount_cents: Cents,
    pub status: InvoiceStatus,
    pub billing_date: NaiveDate,
    /// 1 for a first attempt, n for the n-th consecutive failed cycle retry.
    pub attempt: u32,
    pub transaction_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_statuses() {
        assert!(InvoiceStatus::Paid.is_final());
        assert!(InvoiceStatus::Failed.is_final());
        assert!(!InvoiceStatus::Pending.is_final());
        assert!(!InvoiceStatus::Indeterminate.is_final());
    }

    #[test]
    fn test_parse() {
        assert_eq!(InvoiceStatus::parse("indeterminate"), Some(InvoiceStatus::Indeterminate));
        assert_eq!(InvoiceStatus::parse("void"), None);
    }
}
