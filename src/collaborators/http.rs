//! JSON-over-HTTP collaborator clients.
//!
//! Endpoints (relative to each service's base URL):
//! - payment: `POST /charges`, `GET /charges/{reference}`
//! - tax: `POST /tax/calculate`
//! - email: `POST /send`
//! - inventory: `GET /inventory/{product_id}/availability?quantity=N`
//! - catalog: `GET /products/{product_id}`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    Catalog, CatalogProduct, ChargeLookup, ChargeRequest, ChargeResponse, CollaboratorError,
    EmailMessage, EmailSender, InventoryService, PaymentGateway, Result, TaxQuote, TaxService,
};
use crate::model::{Address, Cents};

/// Connection settings for one collaborator.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl HttpClientConfig {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
        }
    }
}

/// Shared client plumbing for the adapters below.
struct JsonService {
    service: &'static str,
    client: Client,
    base_url: String,
}

impl JsonService {
    fn new(service: &'static str, config: HttpClientConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            return Err(CollaboratorError::Request {
                service,
                message: "base URL not configured".to_string(),
            });
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CollaboratorError::from_reqwest(service, e))?;
        Ok(Self {
            service,
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn err(&self, e: reqwest::Error) -> CollaboratorError {
        CollaboratorError::from_reqwest(self.service, e)
    }

    async fn unexpected(&self, response: reqwest::Response) -> CollaboratorError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        CollaboratorError::Request {
            service: self.service,
            message: format!(
                "HTTP {} - {}",
                status,
                body.chars().take(200).collect::<String>()
            ),
        }
    }

    async fn post_json<B: Serialize + ?Sized, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| self.err(e))?;
        if !response.status().is_success() {
            return Err(self.unexpected(response).await);
        }
        response.json::<R>().await.map_err(|e| self.err(e))
    }
}

// ============================================================================
// Payment
// ============================================================================

pub struct HttpPaymentGateway {
    inner: JsonService,
}

impl HttpPaymentGateway {
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        Ok(Self {
            inner: JsonService::new("payment", config)?,
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeResponse> {
        debug!(
            reference = %request.reference,
            amount_cents = request.amount_cents,
            "Submitting charge"
        );
        self.inner.post_json("/charges", request).await
    }

    async fn lookup(&self, reference: &str) -> Result<ChargeLookup> {
        let response = self
            .inner
            .client
            .get(self.inner.url(&format!("/charges/{}", reference)))
            .send()
            .await
            .map_err(|e| self.inner.err(e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(ChargeLookup::NotCharged),
            status if status.is_success() => response
                .json::<ChargeLookup>()
                .await
                .map_err(|e| self.inner.err(e)),
            _ => Err(self.inner.unexpected(response).await),
        }
    }
}

// ============================================================================
// Tax
// ============================================================================

#[derive(Serialize)]
struct TaxRequest<'a> {
    amount_cents: Cents,
    address: &'a Address,
}

pub struct HttpTaxService {
    inner: JsonService,
}

impl HttpTaxService {
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        Ok(Self {
            inner: JsonService::new("tax", config)?,
        })
    }
}

#[async_trait]
impl TaxService for HttpTaxService {
    async fn calculate_tax(&self, amount_cents: Cents, address: &Address) -> Result<TaxQuote> {
        self.inner
            .post_json(
                "/tax/calculate",
                &TaxRequest {
                    amount_cents,
                    address,
                },
            )
            .await
    }
}

// ============================================================================
// Email
// ============================================================================

pub struct HttpEmailSender {
    inner: JsonService,
}

impl HttpEmailSender {
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        Ok(Self {
            inner: JsonService::new("email", config)?,
        })
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, message: &EmailMessage) -> bool {
        let result = self
            .inner
            .client
            .post(self.inner.url("/send"))
            .json(message)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(
                    to = %message.to,
                    status = %response.status(),
                    "Email provider rejected message"
                );
                false
            }
            Err(e) => {
                warn!(to = %message.to, error = %e, "Email provider unreachable");
                false
            }
        }
    }
}

// ============================================================================
// Inventory
// ============================================================================

#[derive(Deserialize)]
struct Availability {
    available: bool,
}

pub struct HttpInventoryService {
    inner: JsonService,
}

impl HttpInventoryService {
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        Ok(Self {
            inner: JsonService::new("inventory", config)?,
        })
    }
}

#[async_trait]
impl InventoryService for HttpInventoryService {
    async fn check_availability(&self, product_id: &str, quantity: u32) -> Result<bool> {
        let response = self
            .inner
            .client
            .get(
                self.inner
                    .url(&format!("/inventory/{}/availability", product_id)),
            )
            .query(&[("quantity", quantity)])
            .send()
            .await
            .map_err(|e| self.inner.err(e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => response
                .json::<Availability>()
                .await
                .map(|a| a.available)
                .map_err(|e| self.inner.err(e)),
            _ => Err(self.inner.unexpected(response).await),
        }
    }
}

// ============================================================================
// Catalog
// ============================================================================

pub struct HttpCatalog {
    inner: JsonService,
}

impl HttpCatalog {
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        Ok(Self {
            inner: JsonService::new("catalog", config)?,
        })
    }
}

#[async_trait]
impl Catalog for HttpCatalog {
    async fn product(&self, product_id: &str) -> Result<Option<CatalogProduct>> {
        let response = self
            .inner
            .client
            .get(self.inner.url(&format!("/products/{}", product_id)))
            .send()
            .await
            .map_err(|e| self.inner.err(e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<CatalogProduct>()
                .await
                .map(Some)
                .map_err(|e| self.inner.err(e)),
            _ => Err(self.inner.unexpected(response).await),
        }
    }
}
