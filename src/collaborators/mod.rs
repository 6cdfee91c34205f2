//! Contracts for the external services the engine calls.
//!
//! The engine treats payment, tax, email, inventory and catalog as opaque
//! services. Each is an `async_trait` so the in-memory doubles in [`memory`]
//! and the HTTP clients in [`http`] are interchangeable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{Address, Cents};

pub mod http;
pub mod memory;

pub use http::{
    HttpCatalog, HttpClientConfig, HttpEmailSender, HttpInventoryService, HttpPaymentGateway,
    HttpTaxService,
};
pub use memory::{
    FlatRateTax, RecordingEmailSender, ScriptedCharge, ScriptedPaymentGateway, StaticCatalog,
    StaticInventory,
};

/// Result type for collaborator calls.
pub type Result<T> = std::result::Result<T, CollaboratorError>;

/// Failures talking to a collaborator.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("{service} request failed: {message}")]
    Request {
        service: &'static str,
        message: String,
    },

    #[error("{service} timed out")]
    Timeout { service: &'static str },

    #[error("{service} returned an unexpected response: {message}")]
    Protocol {
        service: &'static str,
        message: String,
    },
}

impl CollaboratorError {
    pub(crate) fn from_reqwest(service: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CollaboratorError::Timeout { service }
        } else if err.is_decode() {
            CollaboratorError::Protocol {
                service,
                message: err.to_string(),
            }
        } else {
            CollaboratorError::Request {
                service,
                message: err.to_string(),
            }
        }
    }
}

// ============================================================================
// Payment
// ============================================================================

/// A charge against a stored payment method.
///
/// `reference` is the engine's idempotency reference (the invoice id). The
/// gateway uses it to deduplicate retried charges and to answer lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub reference: String,
    pub amount_cents: Cents,
    pub payment_method_ref: String,
    pub description: String,
}

/// Definitive answer to a charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChargeResponse {
    Approved { transaction_id: String },
    Declined { reason: String },
}

/// What the gateway knows about a previously submitted reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChargeLookup {
    /// Money moved.
    Settled { transaction_id: String },
    /// The charge was received and declined.
    Declined { reason: String },
    /// No charge exists under this reference.
    NotCharged,
    /// The gateway cannot tell yet.
    Unknown,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Submit a charge. A transport failure or timeout leaves the outcome
    /// unknown and must be reconciled through [`PaymentGateway::lookup`].
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeResponse>;

    /// Look up the outcome of a charge by its reference.
    async fn lookup(&self, reference: &str) -> Result<ChargeLookup>;
}

// ============================================================================
// Tax
// ============================================================================

/// Tax owed on an amount shipped to an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxQuote {
    pub tax_cents: Cents,
    /// Rate in basis points (825 = 8.25%).
    pub rate_bps: u32,
}

#[async_trait]
pub trait TaxService: Send + Sync {
    async fn calculate_tax(&self, amount_cents: Cents, address: &Address) -> Result<TaxQuote>;
}

// ============================================================================
// Email
// ============================================================================

/// Rendered transactional email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Best-effort delivery. Returns whether the provider accepted the message.
    async fn send(&self, message: &EmailMessage) -> bool;
}

// ============================================================================
// Inventory and catalog
// ============================================================================

#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Whether `quantity` units of `product_id` can be sold now.
    async fn check_availability(&self, product_id: &str, quantity: u32) -> Result<bool>;
}

/// Canonical product price, read-only to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogProduct {
    pub id: String,
    pub title: String,
    pub price_cents: Cents,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn product(&self, product_id: &str) -> Result<Option<CatalogProduct>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charge_response_wire_format() {
        let approved: ChargeResponse =
            serde_json::from_str(r#"{"status":"approved","transaction_id":"txn_1"}"#).unwrap();
        assert_eq!(
            approved,
            ChargeResponse::Approved {
                transaction_id: "txn_1".to_string()
            }
        );

        let lookup: ChargeLookup = serde_json::from_str(r#"{"status":"not_charged"}"#).unwrap();
        assert_eq!(lookup, ChargeLookup::NotCharged);
    }
}
