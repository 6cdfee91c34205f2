//! Subscription record, frequency and audit history.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{amount_overflow, Address, Cents, Customer};
use crate::error::{EngineError, Result};

/// Status values for a Subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    Cancelled,
    PastDue,
    Expired,
}

impl SubscriptionStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
            Self::PastDue => "past_due",
            Self::Expired => "expired",
        }
    }

    /// Statuses the scheduler may charge.
    pub const fn is_billable(&self) -> bool {
        matches!(self, Self::Active | Self::PastDue)
    }

    /// Cancelled and expired subscriptions never bill again.
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "cancelled" => Ok(Self::Cancelled),
            "past_due" => Ok(Self::PastDue),
            "expired" => Ok(Self::Expired),
            other => Err(EngineError::validation(format!(
                "unknown subscription status: {}",
                other
            ))),
        }
    }
}

/// Delivery/billing frequency.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
    #[serde(rename = "weekly")]
    Weekly,
    #[serde(rename = "biweekly")]
    Biweekly,
    #[serde(rename = "monthly")]
    Monthly,
    #[serde(rename = "4-weeks")]
    FourWeeks,
    #[serde(rename = "6-weeks")]
    SixWeeks,
    #[serde(rename = "8-weeks")]
    EightWeeks,
}

impl Frequency {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Biweekly => "biweekly",
            Self::Monthly => "monthly",
            Self::FourWeeks => "4-weeks",
            Self::SixWeeks => "6-weeks",
            Self::EightWeeks => "8-weeks",
        }
    }

    /// Human label used in notifications.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Weekly => "every week",
            Self::Biweekly => "every 2 weeks",
            Self::Monthly => "every month",
            Self::FourWeeks => "every 4 weeks",
            Self::SixWeeks => "every 6 weeks",
            Self::EightWeeks => "every 8 weeks",
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Frequency {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "weekly" => Ok(Self::Weekly),
            "biweekly" => Ok(Self::Biweekly),
            "monthly" => Ok(Self::Monthly),
            "4-weeks" => Ok(Self::FourWeeks),
            "6-weeks" => Ok(Self::SixWeeks),
            "8-weeks" => Ok(Self::EightWeeks),
            other => Err(EngineError::validation(format!(
                "unknown frequency: {}",
                other
            ))),
        }
    }
}

/// Item snapshot with the server-side price it was quoted at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionItem {
    pub product_id: String,
    pub title: String,
    pub quantity: u32,
    pub unit_price_cents: Cents,
}

impl SubscriptionItem {
    pub fn line_total(&self) -> Result<Cents> {
        self.unit_price_cents
            .checked_mul(Cents::from(self.quantity))
            .ok_or_else(amount_overflow)
    }
}

/// Client-side item selection. Carries no price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSelection {
    pub product_id: String,
    pub quantity: u32,
}

/// Item change request as received from a client.
///
/// `client_amount_cents` is accepted so requests deserialize, and ignored:
/// the stored amount is always recomputed from catalog prices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsUpdate {
    pub items: Vec<ItemSelection>,
    #[serde(default, rename = "amount")]
    pub client_amount_cents: Option<Cents>,
}

/// A recurring purchase contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub customer: Customer,
    pub status: SubscriptionStatus,
    pub frequency: Frequency,
    pub items: Vec<SubscriptionItem>,
    /// Pre-tax amount per cycle. Always derived from `items`.
    pub amount_cents: Cents,
    /// Tax rate quoted at checkout, re-quoted on address change.
    pub tax_rate_bps: u32,
    pub next_billing_date: NaiveDate,
    pub last_billing_date: Option<NaiveDate>,
    pub shipping_address: Address,
    pub payment_method_ref: String,
    /// Failed billing cycles since the last successful charge.
    pub consecutive_failures: u32,
    pub pause_reason: Option<String>,
    pub paused_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub skip_count: u32,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input to subscription checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionDraft {
    pub customer: Customer,
    pub frequency: Frequency,
    pub items: Vec<ItemSelection>,
    pub shipping_address: Address,
    pub payment_method_ref: String,
    /// First billing date. Defaults to today.
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
}

/// Kind of change recorded in subscription history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Created,
    Paused,
    Resumed,
    DeliverySkipped,
    FrequencyChanged,
    AddressChanged,
    ItemsChanged,
    PaymentMethodChanged,
    Cancelled,
    PaymentSucceeded,
    PaymentFailed,
    PaymentIndeterminate,
    Expired,
}

/// Who initiated a change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Customer,
    Admin,
    System,
}

/// One audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub action: HistoryAction,
    pub old_status: SubscriptionStatus,
    pub new_status: SubscriptionStatus,
    pub actor: Actor,
    pub notes: Option<String>,
    pub at: DateTime<Utc>,
}
