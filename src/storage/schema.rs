//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.
//! Each table keeps the full record as a JSON `data` document next to the
//! columns queries filter or sort on.

use sea_query::Iden;

/// Orders table schema.
#[derive(Iden)]
pub enum Orders {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "order_number"]
    OrderNumber,
    #[iden = "customer_id"]
    CustomerId,
    #[iden = "status"]
    Status,
    #[iden = "version"]
    Version,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "data"]
    Data,
}

/// Subscriptions table schema.
#[derive(Iden)]
pub enum Subscriptions {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "customer_id"]
    CustomerId,
    #[iden = "status"]
    Status,
    #[iden = "next_billing_date"]
    NextBillingDate,
    #[iden = "version"]
    Version,
    #[iden = "data"]
    Data,
}

/// Subscription history table schema.
#[derive(Iden)]
pub enum SubscriptionHistory {
    Table,
    #[iden = "seq"]
    Seq,
    #[iden = "id"]
    Id,
    #[iden = "subscription_id"]
    SubscriptionId,
    #[iden = "recorded_at"]
    RecordedAt,
    #[iden = "data"]
    Data,
}

/// Invoices table schema.
#[derive(Iden)]
pub enum Invoices {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "subscription_id"]
    SubscriptionId,
    #[iden = "billing_date"]
    BillingDate,
    #[iden = "status"]
    Status,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "data"]
    Data,
}

/// Notification ledger table schema.
#[derive(Iden)]
pub enum Notifications {
    Table,
    #[iden = "idempotency_key"]
    Key,
    #[iden = "state"]
    State,
    #[iden = "attempts"]
    Attempts,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
    #[iden = "data"]
    Data,
}

/// SQL for creating the orders table.
pub const CREATE_ORDERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    id TEXT PRIMARY KEY,
    order_number TEXT NOT NULL UNIQUE,
    customer_id TEXT NOT NULL,
    status TEXT NOT NULL,
    version INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    data TEXT NOT NULL
)"#;

pub const CREATE_ORDERS_CUSTOMER_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_orders_customer ON orders(customer_id, created_at)";

/// SQL for creating the subscriptions table.
pub const CREATE_SUBSCRIPTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS subscriptions (
    id TEXT PRIMARY KEY,
    customer_id TEXT NOT NULL,
    status TEXT NOT NULL,
    next_billing_date TEXT NOT NULL,
    version INTEGER NOT NULL,
    data TEXT NOT NULL
)"#;

pub const CREATE_SUBSCRIPTIONS_DUE_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_subscriptions_due ON subscriptions(status, next_billing_date)";

/// SQL for creating the subscription history table.
pub const CREATE_SUBSCRIPTION_HISTORY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS subscription_history (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    subscription_id TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    data TEXT NOT NULL
)"#;

pub const CREATE_SUBSCRIPTION_HISTORY_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_subscription_history_sub ON subscription_history(subscription_id, seq)";

/// SQL for creating the invoices table.
///
/// The unique cycle constraint is what makes invoice creation idempotent.
pub const CREATE_INVOICES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS invoices (
    id TEXT PRIMARY KEY,
    subscription_id TEXT NOT NULL,
    billing_date TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    data TEXT NOT NULL,
    UNIQUE (subscription_id, billing_date)
)"#;

pub const CREATE_INVOICES_STATUS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_invoices_status ON invoices(status, created_at)";

/// SQL for creating the notification ledger table.
pub const CREATE_NOTIFICATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS notifications (
    idempotency_key TEXT PRIMARY KEY,
    state TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    data TEXT NOT NULL
)"#;

pub const CREATE_NOTIFICATIONS_STATE_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_notifications_state ON notifications(state, updated_at)";

/// Every schema statement, in creation order.
pub const SCHEMA: &[&str] = &[
    CREATE_ORDERS_TABLE,
    CREATE_ORDERS_CUSTOMER_INDEX,
    CREATE_SUBSCRIPTIONS_TABLE,
    CREATE_SUBSCRIPTIONS_DUE_INDEX,
    CREATE_SUBSCRIPTION_HISTORY_TABLE,
    CREATE_SUBSCRIPTION_HISTORY_INDEX,
    CREATE_INVOICES_TABLE,
    CREATE_INVOICES_STATUS_INDEX,
    CREATE_NOTIFICATIONS_TABLE,
    CREATE_NOTIFICATIONS_STATE_INDEX,
];
