//! Shared harness for engine integration tests.
//!
//! Builds an [`Engine`] on in-memory stores (or SQLite when asked) with the
//! scripted collaborators and a manual clock.

#![allow(dead_code)]

use std::sync::Arc;

use freshcycle::clock::ManualClock;
use freshcycle::collaborators::{
    FlatRateTax, RecordingEmailSender, ScriptedPaymentGateway, StaticCatalog, StaticInventory,
};
use freshcycle::config::Config;
use freshcycle::model::{Frequency, ItemSelection, SubscriptionDraft};
use freshcycle::storage::Stores;
use freshcycle::test_utils::{self, date};
use freshcycle::{Engine, EngineBuilder};

/// Tax rate applied everywhere in the harness: 8.25%.
pub const TAX_BPS: u32 = 825;

pub struct Harness {
    pub engine: Engine,
    pub clock: Arc<ManualClock>,
    pub gateway: Arc<ScriptedPaymentGateway>,
    pub email: Arc<RecordingEmailSender>,
    pub inventory: Arc<StaticInventory>,
    pub catalog: Arc<StaticCatalog>,
}

impl Harness {
    /// In-memory engine on 2025-03-01.
    pub fn new() -> Self {
        Self::with_stores(Stores::in_memory())
    }

    pub fn with_stores(stores: Stores) -> Self {
        let clock = Arc::new(ManualClock::at_date(date(2025, 3, 1)));
        let gateway = Arc::new(ScriptedPaymentGateway::approving());
        let email = Arc::new(RecordingEmailSender::new());
        let inventory = Arc::new(
            StaticInventory::new()
                .with_stock("kale-box", 50)
                .with_stock("fruit-box", 2),
        );
        let catalog = Arc::new(
            StaticCatalog::new()
                .with_product("harvest-box", "Harvest Box", 4500)
                .with_product("egg-dozen", "Dozen Eggs", 650),
        );

        let engine = EngineBuilder::new(Config::for_test())
            .with_stores(stores)
            .with_clock(clock.clone())
            .with_payment_gateway(gateway.clone())
            .with_tax_service(Arc::new(FlatRateTax::new(TAX_BPS)))
            .with_email_sender(email.clone())
            .with_inventory(inventory.clone())
            .with_catalog(catalog.clone())
            .build()
            .expect("engine should build");

        Self {
            engine,
            clock,
            gateway,
            email,
            inventory,
            catalog,
        }
    }

    /// SQLite engine on a fresh in-memory database.
    #[cfg(feature = "sqlite")]
    pub async fn sqlite() -> Self {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:")
            .await
            .expect("Failed to connect to SQLite");
        let stores = Stores::sqlite(pool).await.expect("Failed to create schema");
        Self::with_stores(stores)
    }

    pub fn subscription_draft(&self, customer_id: &str, frequency: Frequency) -> SubscriptionDraft {
        SubscriptionDraft {
            customer: test_utils::customer(customer_id),
            frequency,
            items: vec![ItemSelection {
                product_id: "harvest-box".to_string(),
                quantity: 1,
            }],
            shipping_address: test_utils::address(),
            payment_method_ref: "pm_card_visa".to_string(),
            start_date: None,
        }
    }
}
