//! In-process collaborator implementations.
//!
//! Used by tests and local runs. The payment gateway is scripted: each
//! charge consumes the next queued outcome, falling back to a default.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use super::{
    Catalog, CatalogProduct, ChargeLookup, ChargeRequest, ChargeResponse, CollaboratorError,
    EmailMessage, EmailSender, InventoryService, PaymentGateway, Result, TaxQuote, TaxService,
};
use crate::model::{apply_rate_bps, Address, Cents};

/// Outcome the scripted gateway produces for one charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedCharge {
    Approve,
    Decline(String),
    /// Fail with a timeout. `charged` decides whether the money moved,
    /// which is what a later lookup reports.
    Timeout { charged: bool },
    /// Do not answer for this long, then approve.
    Hang(Duration),
}

/// Payment gateway driven by a queue of scripted outcomes.
///
/// Charges are idempotent per reference: re-charging a settled reference
/// returns the original transaction without moving money again.
pub struct ScriptedPaymentGateway {
    script: Mutex<VecDeque<ScriptedCharge>>,
    fallback: Mutex<ScriptedCharge>,
    charges: Mutex<Vec<ChargeRequest>>,
    outcomes: RwLock<HashMap<String, ChargeLookup>>,
    settled_count: AtomicU64,
}

impl Default for ScriptedPaymentGateway {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(ScriptedCharge::Approve),
            charges: Mutex::new(Vec::new()),
            outcomes: RwLock::new(HashMap::new()),
            settled_count: AtomicU64::new(0),
        }
    }
}

impl ScriptedPaymentGateway {
    /// Gateway that approves everything.
    pub fn approving() -> Self {
        Self::default()
    }

    /// Gateway that declines everything with `reason`.
    pub fn declining(reason: impl Into<String>) -> Self {
        Self::default().with_fallback(ScriptedCharge::Decline(reason.into()))
    }

    pub fn with_fallback(mut self, outcome: ScriptedCharge) -> Self {
        *self.fallback.get_mut() = outcome;
        self
    }

    /// Queue an outcome for the next charge.
    pub async fn push(&self, outcome: ScriptedCharge) {
        self.script.lock().await.push_back(outcome);
    }

    pub async fn set_fallback(&self, outcome: ScriptedCharge) {
        *self.fallback.lock().await = outcome;
    }

    /// Override what a lookup reports for `reference`.
    pub async fn set_lookup(&self, reference: impl Into<String>, lookup: ChargeLookup) {
        self.outcomes.write().await.insert(reference.into(), lookup);
    }

    /// Every charge request received, in order.
    pub async fn charges(&self) -> Vec<ChargeRequest> {
        self.charges.lock().await.clone()
    }

    /// Number of charges that actually moved money.
    pub fn settled_count(&self) -> u64 {
        self.settled_count.load(Ordering::SeqCst)
    }

    async fn settle(&self, reference: &str) -> String {
        let n = self.settled_count.fetch_add(1, Ordering::SeqCst) + 1;
        let transaction_id = format!("txn_{:06}", n);
        self.outcomes.write().await.insert(
            reference.to_string(),
            ChargeLookup::Settled {
                transaction_id: transaction_id.clone(),
            },
        );
        transaction_id
    }
}

#[async_trait]
impl PaymentGateway for ScriptedPaymentGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeResponse> {
        self.charges.lock().await.push(request.clone());

        if let Some(ChargeLookup::Settled { transaction_id }) =
            self.outcomes.read().await.get(&request.reference).cloned()
        {
            return Ok(ChargeResponse::Approved { transaction_id });
        }

        let next = self.script.lock().await.pop_front();
        let outcome = match next {
            Some(outcome) => outcome,
            None => self.fallback.lock().await.clone(),
        };

        match outcome {
            ScriptedCharge::Approve => {
                let transaction_id = self.settle(&request.reference).await;
                Ok(ChargeResponse::Approved { transaction_id })
            }
            ScriptedCharge::Decline(reason) => {
                self.outcomes.write().await.insert(
                    request.reference.clone(),
                    ChargeLookup::Declined {
                        reason: reason.clone(),
                    },
                );
                Ok(ChargeResponse::Declined { reason })
            }
            ScriptedCharge::Timeout { charged } => {
                if charged {
                    self.settle(&request.reference).await;
                }
                Err(CollaboratorError::Timeout { service: "payment" })
            }
            ScriptedCharge::Hang(delay) => {
                tokio::time::sleep(delay).await;
                let transaction_id = self.settle(&request.reference).await;
                Ok(ChargeResponse::Approved { transaction_id })
            }
        }
    }

    async fn lookup(&self, reference: &str) -> Result<ChargeLookup> {
        Ok(self
            .outcomes
            .read()
            .await
            .get(reference)
            .cloned()
            .unwrap_or(ChargeLookup::NotCharged))
    }
}

/// Tax service applying a single rate everywhere.
#[derive(Debug, Clone, Copy)]
pub struct FlatRateTax {
    rate_bps: u32,
}

impl FlatRateTax {
    pub fn new(rate_bps: u32) -> Self {
        Self { rate_bps }
    }
}

#[async_trait]
impl TaxService for FlatRateTax {
    async fn calculate_tax(&self, amount_cents: Cents, _address: &Address) -> Result<TaxQuote> {
        Ok(TaxQuote {
            tax_cents: apply_rate_bps(amount_cents, self.rate_bps),
            rate_bps: self.rate_bps,
        })
    }
}

/// Email sender that keeps every accepted message.
#[derive(Default)]
pub struct RecordingEmailSender {
    sent: RwLock<Vec<EmailMessage>>,
    attempts: AtomicU32,
    failures_remaining: AtomicU32,
    unreachable: AtomicBool,
}

impl RecordingEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `count` sends.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Reject every send until switched back.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<EmailMessage> {
        self.sent.read().await.clone()
    }

    /// Accepted messages whose subject contains `needle`.
    pub async fn sent_with_subject(&self, needle: &str) -> Vec<EmailMessage> {
        self.sent
            .read()
            .await
            .iter()
            .filter(|m| m.subject.contains(needle))
            .cloned()
            .collect()
    }

    /// Send calls received, accepted or not.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, message: &EmailMessage) -> bool {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return false;
        }
        let injected_failure = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected_failure {
            return false;
        }
        self.sent.write().await.push(message.clone());
        true
    }
}

/// Inventory with fixed stock levels. Unknown products are unavailable.
#[derive(Default)]
pub struct StaticInventory {
    stock: RwLock<HashMap<String, u32>>,
}

impl StaticInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stock(mut self, product_id: impl Into<String>, quantity: u32) -> Self {
        self.stock.get_mut().insert(product_id.into(), quantity);
        self
    }

    pub async fn set_stock(&self, product_id: impl Into<String>, quantity: u32) {
        self.stock.write().await.insert(product_id.into(), quantity);
    }
}

#[async_trait]
impl InventoryService for StaticInventory {
    async fn check_availability(&self, product_id: &str, quantity: u32) -> Result<bool> {
        Ok(self
            .stock
            .read()
            .await
            .get(product_id)
            .is_some_and(|available| *available >= quantity))
    }
}

/// Catalog backed by a map.
#[derive(Default)]
pub struct StaticCatalog {
    products: RwLock<HashMap<String, CatalogProduct>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product(
        mut self,
        id: impl Into<String>,
        title: impl Into<String>,
        price_cents: Cents,
    ) -> Self {
        let id = id.into();
        self.products.get_mut().insert(
            id.clone(),
            CatalogProduct {
                id,
                title: title.into(),
                price_cents,
            },
        );
        self
    }

    pub async fn set_price(&self, product_id: &str, price_cents: Cents) {
        if let Some(product) = self.products.write().await.get_mut(product_id) {
            product.price_cents = price_cents;
        }
    }
}

#[async_trait]
impl Catalog for StaticCatalog {
    async fn product(&self, product_id: &str) -> Result<Option<CatalogProduct>> {
        Ok(self.products.read().await.get(product_id).cloned())
    }
}
