//! Engine wiring.
//!
//! [`EngineBuilder`] assembles the stores, collaborators and clock into the
//! four components. Stores default to in-memory and the clock to the wall
//! clock; every collaborator must be supplied.
//!
//! ```ignore
//! let engine = EngineBuilder::new(Config::default())
//!     .with_stores(init_storage(&config.storage).await?)
//!     .with_http_collaborators()?
//!     .build()?;
//! let handle = engine.billing().clone().spawn();
//! ```

use std::sync::Arc;

use crate::billing::{BillingScheduler, PaymentExecutor};
use crate::clock::{Clock, SystemClock};
use crate::collaborators::{
    self, Catalog, EmailSender, HttpCatalog, HttpClientConfig, HttpEmailSender,
    HttpInventoryService, HttpPaymentGateway, HttpTaxService, InventoryService, PaymentGateway,
    TaxService,
};
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::notification::NotificationDispatcher;
use crate::orders::OrderStateMachine;
use crate::storage::Stores;
use crate::subscriptions::SubscriptionManager;

/// The assembled engine. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    orders: Arc<OrderStateMachine>,
    subscriptions: Arc<SubscriptionManager>,
    billing: Arc<BillingScheduler>,
    notifications: Arc<NotificationDispatcher>,
    stores: Stores,
}

impl Engine {
    pub fn orders(&self) -> &Arc<OrderStateMachine> {
        &self.orders
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    pub fn billing(&self) -> &Arc<BillingScheduler> {
        &self.billing
    }

    pub fn notifications(&self) -> &Arc<NotificationDispatcher> {
        &self.notifications
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    config: Config,
    stores: Option<Stores>,
    clock: Arc<dyn Clock>,
    payment: Option<Arc<dyn PaymentGateway>>,
    tax: Option<Arc<dyn TaxService>>,
    email: Option<Arc<dyn EmailSender>>,
    inventory: Option<Arc<dyn InventoryService>>,
    catalog: Option<Arc<dyn Catalog>>,
}

impl EngineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            stores: None,
            clock: Arc::new(SystemClock),
            payment: None,
            tax: None,
            email: None,
            inventory: None,
            catalog: None,
        }
    }

    pub fn with_stores(mut self, stores: Stores) -> Self {
        self.stores = Some(stores);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_payment_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.payment = Some(gateway);
        self
    }

    pub fn with_tax_service(mut self, tax: Arc<dyn TaxService>) -> Self {
        self.tax = Some(tax);
        self
    }

    pub fn with_email_sender(mut self, email: Arc<dyn EmailSender>) -> Self {
        self.email = Some(email);
        self
    }

    pub fn with_inventory(mut self, inventory: Arc<dyn InventoryService>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Use the HTTP clients for every collaborator, at the endpoints in
    /// `config.collaborators`.
    pub fn with_http_collaborators(mut self) -> collaborators::Result<Self> {
        let endpoints = &self.config.collaborators;
        let timeout = endpoints.request_timeout();
        let client = |url: &str| HttpClientConfig::new(url, timeout);

        self.payment = Some(Arc::new(HttpPaymentGateway::new(client(
            &endpoints.payment_url,
        ))?));
        self.tax = Some(Arc::new(HttpTaxService::new(client(&endpoints.tax_url))?));
        self.email = Some(Arc::new(HttpEmailSender::new(client(&endpoints.email_url))?));
        self.inventory = Some(Arc::new(HttpInventoryService::new(client(
            &endpoints.inventory_url,
        ))?));
        self.catalog = Some(Arc::new(HttpCatalog::new(client(&endpoints.catalog_url))?));
        Ok(self)
    }

    pub fn build(self) -> Result<Engine> {
        let payment = required(self.payment, "payment gateway")?;
        let tax = required(self.tax, "tax service")?;
        let email = required(self.email, "email sender")?;
        let inventory = required(self.inventory, "inventory service")?;
        let catalog = required(self.catalog, "catalog")?;
        let stores = self.stores.unwrap_or_else(Stores::in_memory);
        let clock = self.clock;
        let config = self.config;

        let notifications = Arc::new(NotificationDispatcher::new(
            stores.ledger.clone(),
            email,
            clock.clone(),
            config.notification.clone(),
        ));
        let orders = Arc::new(OrderStateMachine::new(
            stores.orders.clone(),
            inventory,
            tax.clone(),
            notifications.clone(),
            clock.clone(),
            config.checkout.clone(),
        ));
        let subscriptions = Arc::new(SubscriptionManager::new(
            stores.subscriptions.clone(),
            catalog,
            tax,
            notifications.clone(),
            clock.clone(),
        ));
        let billing = Arc::new(BillingScheduler::new(
            subscriptions.clone(),
            orders.clone(),
            stores.invoices.clone(),
            PaymentExecutor::new(payment, config.billing.payment_timeout()),
            notifications.clone(),
            clock,
            config.billing,
        ));

        Ok(Engine {
            orders,
            subscriptions,
            billing,
            notifications,
            stores,
        })
    }
}

fn required<T>(value: Option<T>, what: &str) -> Result<T> {
    value.ok_or_else(|| EngineError::validation(format!("{} is not configured", what)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        FlatRateTax, RecordingEmailSender, ScriptedPaymentGateway, StaticCatalog, StaticInventory,
    };
    use crate::error::ErrorKind;

    #[test]
    fn test_build_requires_collaborators() {
        let result = EngineBuilder::new(Config::for_test())
            .with_payment_gateway(Arc::new(ScriptedPaymentGateway::approving()))
            .build();
        match result {
            Err(e) => assert_eq!(e.kind(), ErrorKind::Validation),
            Ok(_) => panic!("engine built without collaborators"),
        }
    }

    #[test]
    fn test_build_with_doubles() {
        let engine = EngineBuilder::new(Config::for_test())
            .with_payment_gateway(Arc::new(ScriptedPaymentGateway::approving()))
            .with_tax_service(Arc::new(FlatRateTax::new(0)))
            .with_email_sender(Arc::new(RecordingEmailSender::new()))
            .with_inventory(Arc::new(StaticInventory::new()))
            .with_catalog(Arc::new(StaticCatalog::new()))
            .build();
        assert!(engine.is_ok());
    }

    #[test]
    fn test_http_collaborators_from_config() {
        let builder = EngineBuilder::new(Config::for_test())
            .with_http_collaborators()
            .unwrap();
        assert!(builder.build().is_ok());
    }
}
