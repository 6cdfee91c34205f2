//! Payment Executor.
//!
//! Wraps the gateway with a deadline. Anything short of a definitive
//! approve/decline is reported as indeterminate and must be reconciled
//! before the invoice is finalized.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::collaborators::{
    ChargeLookup, ChargeRequest, ChargeResponse, CollaboratorError, PaymentGateway,
};
use crate::model::{Invoice, Subscription};

/// Result of one charge attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Paid { transaction_id: String },
    Declined { reason: String },
    /// Timeout or transport failure. Money may or may not have moved.
    Indeterminate { reason: String },
}

pub struct PaymentExecutor {
    gateway: Arc<dyn PaymentGateway>,
    timeout: Duration,
}

impl PaymentExecutor {
    pub fn new(gateway: Arc<dyn PaymentGateway>, timeout: Duration) -> Self {
        Self { gateway, timeout }
    }

    /// Charge `invoice` to the subscription's payment method.
    ///
    /// The invoice id is the gateway reference, so a repeated charge for
    /// the same invoice is deduplicated by the gateway.
    pub async fn charge(&self, invoice: &Invoice, subscription: &Subscription) -> PaymentOutcome {
        let request = ChargeRequest {
            reference: invoice.id.to_string(),
            amount_cents: invoice.amount_cents,
            payment_method_ref: subscription.payment_method_ref.clone(),
            description: format!(
                "FreshCycle subscription ({}) {}",
                subscription.frequency.label(),
                invoice.invoice_number
            ),
        };

        match tokio::time::timeout(self.timeout, self.gateway.charge(&request)).await {
            Ok(Ok(ChargeResponse::Approved { transaction_id })) => {
                PaymentOutcome::Paid { transaction_id }
            }
            Ok(Ok(ChargeResponse::Declined { reason })) => PaymentOutcome::Declined { reason },
            Ok(Err(e)) => {
                warn!(invoice_id = %invoice.id, error = %e, "Charge outcome unknown");
                PaymentOutcome::Indeterminate {
                    reason: e.to_string(),
                }
            }
            Err(_) => {
                warn!(
                    invoice_id = %invoice.id,
                    timeout = ?self.timeout,
                    "Charge timed out"
                );
                PaymentOutcome::Indeterminate {
                    reason: format!("payment timed out after {:?}", self.timeout),
                }
            }
        }
    }

    /// Ask the gateway what happened to the charge for `invoice`.
    pub async fn lookup(&self, invoice: &Invoice) -> Result<ChargeLookup, CollaboratorError> {
        let reference = invoice.id.to_string();
        match tokio::time::timeout(self.timeout, self.gateway.lookup(&reference)).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout { service: "payment" }),
        }
    }
}
