//! SQLite NotificationLedger implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::{SqliteConnection, SqlitePool};

use super::{begin_immediate, decode, finish, timestamp};
use crate::storage::schema::Notifications;
use crate::storage::{
    DeliveryState, NotificationLedger, NotificationRecord, Result, StorageError,
};

/// SQLite implementation of NotificationLedger.
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Create a new SQLite notification ledger.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn write_state(
        conn: &mut SqliteConnection,
        key: &str,
        state: DeliveryState,
        attempts: u32,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let select = Query::select()
            .column(Notifications::Data)
            .from(Notifications::Table)
            .and_where(Expr::col(Notifications::Key).eq(key))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&select).fetch_optional(&mut *conn).await?;
        let mut record: NotificationRecord = match row {
            Some(row) => decode(&row)?,
            None => {
                return Err(StorageError::NotFound {
                    entity: "notification",
                    id: key.to_string(),
                })
            }
        };
        record.state = state;
        record.attempts = attempts;
        record.last_error = error.map(str::to_string);
        record.updated_at = at;

        let data = serde_json::to_string(&record)?;
        let update = Query::update()
            .table(Notifications::Table)
            .values([
                (Notifications::State, state.as_str().into()),
                (Notifications::Attempts, (attempts as i64).into()),
                (Notifications::UpdatedAt, timestamp(at).into()),
                (Notifications::Data, data.into()),
            ])
            .and_where(Expr::col(Notifications::Key).eq(key))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&update).execute(&mut *conn).await?;
        Ok(())
    }

    async fn set_state(
        &self,
        key: &str,
        state: DeliveryState,
        attempts: u32,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        begin_immediate(&mut conn).await?;
        let result = Self::write_state(&mut conn, key, state, attempts, error, at).await;
        finish(&mut conn, result).await
    }
}

#[async_trait]
impl NotificationLedger for SqliteLedger {
    async fn claim(&self, record: &NotificationRecord) -> Result<bool> {
        let data = serde_json::to_string(record)?;

        let query = Query::insert()
            .into_table(Notifications::Table)
            .columns([
                Notifications::Key,
                Notifications::State,
                Notifications::Attempts,
                Notifications::CreatedAt,
                Notifications::UpdatedAt,
                Notifications::Data,
            ])
            .values_panic([
                record.key.clone().into(),
                record.state.as_str().into(),
                (record.attempts as i64).into(),
                timestamp(record.created_at).into(),
                timestamp(record.updated_at).into(),
                data.into(),
            ])
            .on_conflict(
                OnConflict::column(Notifications::Key)
                    .do_nothing()
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, key: &str) -> Result<Option<NotificationRecord>> {
        let query = Query::select()
            .column(Notifications::Data)
            .from(Notifications::Table)
            .and_where(Expr::col(Notifications::Key).eq(key))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(decode).transpose()
    }

    async fn mark_delivered(&self, key: &str, attempts: u32, at: DateTime<Utc>) -> Result<()> {
        self.set_state(key, DeliveryState::Delivered, attempts, None, at)
            .await
    }

    async fn mark_failed(
        &self,
        key: &str,
        attempts: u32,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.set_state(key, DeliveryState::Failed, attempts, Some(error), at)
            .await
    }

    async fn list_undelivered(
        &self,
        idle_since: DateTime<Utc>,
        max_attempts: u32,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>> {
        let query = Query::select()
            .column(Notifications::Data)
            .from(Notifications::Table)
            .and_where(Expr::col(Notifications::State).ne(DeliveryState::Delivered.as_str()))
            .and_where(Expr::col(Notifications::Attempts).lt(max_attempts as i64))
            .and_where(Expr::col(Notifications::UpdatedAt).lte(timestamp(idle_since)))
            .order_by(Notifications::CreatedAt, Order::Asc)
            .order_by(Notifications::Key, Order::Asc)
            .limit(limit as u64)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(decode).collect()
    }

    async fn list_exhausted(&self, max_attempts: u32) -> Result<Vec<NotificationRecord>> {
        let query = Query::select()
            .column(Notifications::Data)
            .from(Notifications::Table)
            .and_where(Expr::col(Notifications::State).eq(DeliveryState::Failed.as_str()))
            .and_where(Expr::col(Notifications::Attempts).gte(max_attempts as i64))
            .order_by(Notifications::CreatedAt, Order::Asc)
            .order_by(Notifications::Key, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(decode).collect()
    }
}
