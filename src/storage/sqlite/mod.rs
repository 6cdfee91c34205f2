//! SQLite implementations of storage interfaces.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::info;

use super::Result;

mod invoice_store;
mod ledger;
mod order_store;
mod subscription_store;

pub use invoice_store::SqliteInvoiceStore;
pub use ledger::SqliteLedger;
pub use order_store::SqliteOrderStore;
pub use subscription_store::SqliteSubscriptionStore;

/// Create every table and index if missing.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    for statement in super::schema::SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    info!("SQLite schema initialized");
    Ok(())
}

/// Fixed-width UTC timestamp so stored values sort lexicographically.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Decode the JSON `data` column of a row.
pub(crate) fn decode<T: DeserializeOwned>(row: &SqliteRow) -> Result<T> {
    let data: String = row.try_get("data")?;
    Ok(serde_json::from_str(&data)?)
}

/// Start a write transaction on `conn`.
///
/// BEGIN IMMEDIATE acquires the write lock upfront, preventing deadlocks
/// when concurrent DEFERRED transactions race to upgrade from shared to exclusive.
pub(crate) async fn begin_immediate(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
    Ok(())
}

/// Commit on success, roll back on error.
pub(crate) async fn finish<T>(conn: &mut SqliteConnection, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            sqlx::query("COMMIT").execute(&mut *conn).await?;
            Ok(value)
        }
        Err(e) => {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            Err(e)
        }
    }
}
