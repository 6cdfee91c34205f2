//! Storage interfaces and implementations.
//!
//! Four stores back the engine:
//! - [`OrderStore`]: orders, optimistic concurrency on `version`
//! - [`SubscriptionStore`]: subscriptions and their history log
//! - [`InvoiceStore`]: invoices, unique per `(subscription_id, billing_date)`
//! - [`NotificationLedger`]: durable idempotency keys for dispatched notifications
//!
//! The in-memory backend is always compiled; SQLite sits behind the
//! `sqlite` feature.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::collaborators::EmailMessage;
use crate::config::StorageConfig;
use crate::model::{HistoryEntry, Invoice, InvoiceStatus, Order, Subscription};

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{MemoryInvoiceStore, MemoryLedger, MemoryOrderStore, MemorySubscriptionStore};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteInvoiceStore, SqliteLedger, SqliteOrderStore, SqliteSubscriptionStore};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} already exists: {id}")]
    Duplicate { entity: &'static str, id: String },

    #[error("version conflict on {entity} {id}: expected version {expected}")]
    VersionConflict {
        entity: &'static str,
        id: String,
        expected: u64,
    },

    #[error("{entity} {id} is {found}, not in an expected status")]
    StatusConflict {
        entity: &'static str,
        id: String,
        found: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid stored value: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported storage type: {0}")]
    Unsupported(String),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

// ============================================================================
// Orders
// ============================================================================

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a new order. Fails with `Duplicate` if the id or the order
    /// number is taken.
    async fn insert(&self, order: &Order) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Order>>;

    /// Replace an order. `order.version` must equal the stored version.
    /// Returns the new version.
    async fn update(&self, order: &Order) -> Result<u64>;

    /// Orders of one customer, newest first.
    async fn list_by_customer(&self, customer_id: &str) -> Result<Vec<Order>>;
}

// ============================================================================
// Subscriptions
// ============================================================================

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn insert(&self, subscription: &Subscription) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Subscription>>;

    /// Replace a subscription. `subscription.version` must equal the stored
    /// version. Returns the new version.
    async fn update(&self, subscription: &Subscription) -> Result<u64>;

    /// Billable subscriptions (`active`, `past_due`) with
    /// `next_billing_date <= on`, oldest due date first.
    async fn list_due(&self, on: NaiveDate) -> Result<Vec<Subscription>>;

    async fn append_history(&self, entry: &HistoryEntry) -> Result<()>;

    /// History of one subscription in the order it was recorded.
    async fn history(&self, subscription_id: Uuid) -> Result<Vec<HistoryEntry>>;
}

// ============================================================================
// Invoices
// ============================================================================

/// Result of [`InvoiceStore::create_if_absent`].
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created(Invoice),
    /// An invoice already existed for the cycle; it is returned unchanged.
    Existing(Invoice),
}

/// Fields written when an invoice changes status.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceUpdate {
    pub status: InvoiceStatus,
    pub transaction_id: Option<String>,
    pub error_message: Option<String>,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Atomically insert `invoice` unless one exists for its
    /// `(subscription_id, billing_date)`.
    async fn create_if_absent(&self, invoice: &Invoice) -> Result<CreateOutcome>;

    async fn get(&self, id: Uuid) -> Result<Option<Invoice>>;

    async fn find(&self, subscription_id: Uuid, billing_date: NaiveDate)
        -> Result<Option<Invoice>>;

    /// Move an invoice to a new status, provided its current status is one
    /// of `from`. Fails with `StatusConflict` otherwise.
    async fn transition(
        &self,
        id: Uuid,
        from: &[InvoiceStatus],
        update: InvoiceUpdate,
    ) -> Result<Invoice>;

    /// Invoices of one subscription by billing date.
    async fn list_for_subscription(&self, subscription_id: Uuid) -> Result<Vec<Invoice>>;

    /// Invoices in `status`, oldest first.
    async fn list_by_status(&self, status: InvoiceStatus) -> Result<Vec<Invoice>>;
}

// ============================================================================
// Notification ledger
// ============================================================================

/// Delivery state of a ledger record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Delivered,
    Failed,
}

impl DeliveryState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "delivered" => Some(Self::Delivered),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One idempotency key and the message it guards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub key: String,
    pub event: String,
    pub message: EmailMessage,
    pub state: DeliveryState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait NotificationLedger: Send + Sync {
    /// Record `record.key`. Returns false if the key was already recorded,
    /// in which case nothing is written.
    async fn claim(&self, record: &NotificationRecord) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<NotificationRecord>>;

    async fn mark_delivered(&self, key: &str, attempts: u32, at: DateTime<Utc>) -> Result<()>;

    async fn mark_failed(
        &self,
        key: &str,
        attempts: u32,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Records not yet delivered, with fewer than `max_attempts` attempts,
    /// last touched before `idle_since`. Oldest first, at most `limit`.
    async fn list_undelivered(
        &self,
        idle_since: DateTime<Utc>,
        max_attempts: u32,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>>;

    /// Failed records that used up `max_attempts`.
    async fn list_exhausted(&self, max_attempts: u32) -> Result<Vec<NotificationRecord>>;
}

// ============================================================================
// Wiring
// ============================================================================

/// The full set of stores the engine runs on.
#[derive(Clone)]
pub struct Stores {
    pub orders: Arc<dyn OrderStore>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub invoices: Arc<dyn InvoiceStore>,
    pub ledger: Arc<dyn NotificationLedger>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            orders: Arc::new(MemoryOrderStore::new()),
            subscriptions: Arc::new(MemorySubscriptionStore::new()),
            invoices: Arc::new(MemoryInvoiceStore::new()),
            ledger: Arc::new(MemoryLedger::new()),
        }
    }

    /// SQLite stores on an existing pool. Creates tables if missing.
    #[cfg(feature = "sqlite")]
    pub async fn sqlite(pool: sqlx::SqlitePool) -> Result<Self> {
        sqlite::init_schema(&pool).await?;
        Ok(Self {
            orders: Arc::new(SqliteOrderStore::new(pool.clone())),
            subscriptions: Arc::new(SqliteSubscriptionStore::new(pool.clone())),
            invoices: Arc::new(SqliteInvoiceStore::new(pool.clone())),
            ledger: Arc::new(SqliteLedger::new(pool)),
        })
    }
}

/// Initialize storage based on configuration.
pub async fn init_storage(config: &StorageConfig) -> Result<Stores> {
    info!("Storage: {} at {}", config.storage_type, config.path);

    match config.storage_type.as_str() {
        "memory" => Ok(Stores::in_memory()),
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            if let Some(parent) = std::path::Path::new(&config.path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            let pool =
                sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", config.path)).await?;
            Stores::sqlite(pool).await
        }
        #[cfg(not(feature = "sqlite"))]
        "sqlite" => {
            error!("SQLite storage requested but 'sqlite' feature is not enabled");
            Err(StorageError::Unsupported("sqlite".to_string()))
        }
        other => {
            error!("Unknown storage type: {}", other);
            Err(StorageError::Unsupported(other.to_string()))
        }
    }
}
