//! SQLite InvoiceStore implementation.

use async_trait::async_trait;
use chrono::NaiveDate;
use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{begin_immediate, decode, finish, timestamp};
use crate::model::{Invoice, InvoiceStatus};
use crate::storage::memory::apply_update;
use crate::storage::schema::Invoices;
use crate::storage::{CreateOutcome, InvoiceStore, InvoiceUpdate, Result, StorageError};

/// SQLite implementation of InvoiceStore.
pub struct SqliteInvoiceStore {
    pool: SqlitePool,
}

impl SqliteInvoiceStore {
    /// Create a new SQLite invoice store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Read-check-write of one invoice within an already-started transaction.
    async fn transition_in(
        conn: &mut SqliteConnection,
        id: Uuid,
        from: &[InvoiceStatus],
        update: InvoiceUpdate,
    ) -> Result<Invoice> {
        let select = Query::select()
            .column(Invoices::Data)
            .from(Invoices::Table)
            .and_where(Expr::col(Invoices::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&select).fetch_optional(&mut *conn).await?;
        let mut invoice: Invoice = match row {
            Some(row) => decode(&row)?,
            None => {
                return Err(StorageError::NotFound {
                    entity: "invoice",
                    id: id.to_string(),
                })
            }
        };

        if !from.contains(&invoice.status) {
            return Err(StorageError::StatusConflict {
                entity: "invoice",
                id: id.to_string(),
                found: invoice.status.to_string(),
            });
        }
        apply_update(&mut invoice, update);

        let data = serde_json::to_string(&invoice)?;
        let query = Query::update()
            .table(Invoices::Table)
            .values([
                (Invoices::Status, invoice.status.as_str().into()),
                (Invoices::Data, data.into()),
            ])
            .and_where(Expr::col(Invoices::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&mut *conn).await?;
        Ok(invoice)
    }
}

fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[async_trait]
impl InvoiceStore for SqliteInvoiceStore {
    async fn create_if_absent(&self, invoice: &Invoice) -> Result<CreateOutcome> {
        let data = serde_json::to_string(invoice)?;

        let query = Query::insert()
            .into_table(Invoices::Table)
            .columns([
                Invoices::Id,
                Invoices::SubscriptionId,
                Invoices::BillingDate,
                Invoices::Status,
                Invoices::CreatedAt,
                Invoices::Data,
            ])
            .values_panic([
                invoice.id.to_string().into(),
                invoice.subscription_id.to_string().into(),
                date_key(invoice.billing_date).into(),
                invoice.status.as_str().into(),
                timestamp(invoice.created_at).into(),
                data.into(),
            ])
            .on_conflict(
                OnConflict::columns([Invoices::SubscriptionId, Invoices::BillingDate])
                    .do_nothing()
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 1 {
            return Ok(CreateOutcome::Created(invoice.clone()));
        }

        match self.find(invoice.subscription_id, invoice.billing_date).await? {
            Some(existing) => Ok(CreateOutcome::Existing(existing)),
            None => Err(StorageError::Duplicate {
                entity: "invoice",
                id: invoice.id.to_string(),
            }),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Invoice>> {
        let query = Query::select()
            .column(Invoices::Data)
            .from(Invoices::Table)
            .and_where(Expr::col(Invoices::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(decode).transpose()
    }

    async fn find(
        &self,
        subscription_id: Uuid,
        billing_date: NaiveDate,
    ) -> Result<Option<Invoice>> {
        let query = Query::select()
            .column(Invoices::Data)
            .from(Invoices::Table)
            .and_where(Expr::col(Invoices::SubscriptionId).eq(subscription_id.to_string()))
            .and_where(Expr::col(Invoices::BillingDate).eq(date_key(billing_date)))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(decode).transpose()
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[InvoiceStatus],
        update: InvoiceUpdate,
    ) -> Result<Invoice> {
        let mut conn = self.pool.acquire().await?;
        begin_immediate(&mut conn).await?;
        let result = Self::transition_in(&mut conn, id, from, update).await;
        finish(&mut conn, result).await
    }

    async fn list_for_subscription(&self, subscription_id: Uuid) -> Result<Vec<Invoice>> {
        let query = Query::select()
            .column(Invoices::Data)
            .from(Invoices::Table)
            .and_where(Expr::col(Invoices::SubscriptionId).eq(subscription_id.to_string()))
            .order_by(Invoices::BillingDate, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(decode).collect()
    }

    async fn list_by_status(&self, status: InvoiceStatus) -> Result<Vec<Invoice>> {
        let query = Query::select()
            .column(Invoices::Data)
            .from(Invoices::Table)
            .and_where(Expr::col(Invoices::Status).eq(status.as_str()))
            .order_by(Invoices::CreatedAt, Order::Asc)
            .order_by(Invoices::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(decode).collect()
    }
}
