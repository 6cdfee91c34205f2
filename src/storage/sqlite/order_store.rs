//! SQLite OrderStore implementation.

use async_trait::async_trait;
use sea_query::{Expr, Order as SortOrder, Query, SqliteQueryBuilder};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{decode, timestamp};
use crate::model::Order;
use crate::storage::schema::Orders;
use crate::storage::{OrderStore, Result, StorageError};

/// SQLite implementation of OrderStore.
pub struct SqliteOrderStore {
    pool: SqlitePool,
}

impl SqliteOrderStore {
    /// Create a new SQLite order store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl OrderStore for SqliteOrderStore {
    async fn insert(&self, order: &Order) -> Result<()> {
        let data = serde_json::to_string(order)?;

        let query = Query::insert()
            .into_table(Orders::Table)
            .columns([
                Orders::Id,
                Orders::OrderNumber,
                Orders::CustomerId,
                Orders::Status,
                Orders::Version,
                Orders::CreatedAt,
                Orders::Data,
            ])
            .values_panic([
                order.id.to_string().into(),
                order.order_number.clone().into(),
                order.customer.id.clone().into(),
                order.status.as_str().into(),
                (order.version as i64).into(),
                timestamp(order.created_at).into(),
                data.into(),
            ])
            .to_string(SqliteQueryBuilder);

        match sqlx::query(&query).execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StorageError::Duplicate {
                entity: "order",
                id: order.order_number.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>> {
        let query = Query::select()
            .column(Orders::Data)
            .from(Orders::Table)
            .and_where(Expr::col(Orders::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;

        row.as_ref().map(decode).transpose()
    }

    async fn update(&self, order: &Order) -> Result<u64> {
        let next_version = order.version + 1;
        let mut stored = order.clone();
        stored.version = next_version;
        let data = serde_json::to_string(&stored)?;

        let query = Query::update()
            .table(Orders::Table)
            .values([
                (Orders::Status, order.status.as_str().into()),
                (Orders::Version, (next_version as i64).into()),
                (Orders::Data, data.into()),
            ])
            .and_where(Expr::col(Orders::Id).eq(order.id.to_string()))
            .and_where(Expr::col(Orders::Version).eq(order.version as i64))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 1 {
            return Ok(next_version);
        }

        match self.get(order.id).await? {
            Some(_) => Err(StorageError::VersionConflict {
                entity: "order",
                id: order.id.to_string(),
                expected: order.version,
            }),
            None => Err(StorageError::NotFound {
                entity: "order",
                id: order.id.to_string(),
            }),
        }
    }

    async fn list_by_customer(&self, customer_id: &str) -> Result<Vec<Order>> {
        let query = Query::select()
            .column(Orders::Data)
            .from(Orders::Table)
            .and_where(Expr::col(Orders::CustomerId).eq(customer_id))
            .order_by(Orders::CreatedAt, SortOrder::Desc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        rows.iter().map(decode).collect()
    }
}
