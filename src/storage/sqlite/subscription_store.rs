//! SQLite SubscriptionStore implementation.

use async_trait::async_trait;
use chrono::NaiveDate;
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{decode, timestamp};
use crate::model::{HistoryEntry, Subscription, SubscriptionStatus};
use crate::storage::schema::{SubscriptionHistory, Subscriptions};
use crate::storage::{Result, StorageError, SubscriptionStore};

/// SQLite implementation of SubscriptionStore.
pub struct SqliteSubscriptionStore {
    pool: SqlitePool,
}

impl SqliteSubscriptionStore {
    /// Create a new SQLite subscription store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// ISO-8601 dates compare correctly as text.
fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[async_trait]
impl SubscriptionStore for SqliteSubscriptionStore {
    async fn insert(&self, subscription: &Subscription) -> Result<()> {
        let data = serde_json::to_string(subscription)?;

        let query = Query::insert()
            .into_table(Subscriptions::Table)
            .columns([
                Subscriptions::Id,
                Subscriptions::CustomerId,
                Subscriptions::Status,
                Subscriptions::NextBillingDate,
                Subscriptions::Version,
                Subscriptions::Data,
            ])
            .values_panic([
                subscription.id.to_string().into(),
                subscription.customer.id.clone().into(),
                subscription.status.as_str().into(),
                date_key(subscription.next_billing_date).into(),
                (subscription.version as i64).into(),
                data.into(),
            ])
            .to_string(SqliteQueryBuilder);

        match sqlx::query(&query).execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StorageError::Duplicate {
                    entity: "subscription",
                    id: subscription.id.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Subscription>> {
        let query = Query::select()
            .column(Subscriptions::Data)
            .from(Subscriptions::Table)
            .and_where(Expr::col(Subscriptions::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(decode).transpose()
    }

    async fn update(&self, subscription: &Subscription) -> Result<u64> {
        let next_version = subscription.version + 1;
        let mut stored = subscription.clone();
        stored.version = next_version;
        let data = serde_json::to_string(&stored)?;

        let query = Query::update()
            .table(Subscriptions::Table)
            .values([
                (Subscriptions::Status, subscription.status.as_str().into()),
                (
                    Subscriptions::NextBillingDate,
                    date_key(subscription.next_billing_date).into(),
                ),
                (Subscriptions::Version, (next_version as i64).into()),
                (Subscriptions::Data, data.into()),
            ])
            .and_where(Expr::col(Subscriptions::Id).eq(subscription.id.to_string()))
            .and_where(Expr::col(Subscriptions::Version).eq(subscription.version as i64))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 1 {
            return Ok(next_version);
        }

        match self.get(subscription.id).await? {
            Some(_) => Err(StorageError::VersionConflict {
                entity: "subscription",
                id: subscription.id.to_string(),
                expected: subscription.version,
            }),
            None => Err(StorageError::NotFound {
                entity: "subscription",
                id: subscription.id.to_string(),
            }),
        }
    }

    async fn list_due(&self, on: NaiveDate) -> Result<Vec<Subscription>> {
        let billable = [
            SubscriptionStatus::Active.as_str(),
            SubscriptionStatus::PastDue.as_str(),
        ];

        let query = Query::select()
            .column(Subscriptions::Data)
            .from(Subscriptions::Table)
            .and_where(Expr::col(Subscriptions::Status).is_in(billable))
            .and_where(Expr::col(Subscriptions::NextBillingDate).lte(date_key(on)))
            .order_by(Subscriptions::NextBillingDate, Order::Asc)
            .order_by(Subscriptions::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(decode).collect()
    }

    async fn append_history(&self, entry: &HistoryEntry) -> Result<()> {
        let data = serde_json::to_string(entry)?;

        let query = Query::insert()
            .into_table(SubscriptionHistory::Table)
            .columns([
                SubscriptionHistory::Id,
                SubscriptionHistory::SubscriptionId,
                SubscriptionHistory::RecordedAt,
                SubscriptionHistory::Data,
            ])
            .values_panic([
                entry.id.to_string().into(),
                entry.subscription_id.to_string().into(),
                timestamp(entry.at).into(),
                data.into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn history(&self, subscription_id: Uuid) -> Result<Vec<HistoryEntry>> {
        let query = Query::select()
            .column(SubscriptionHistory::Data)
            .from(SubscriptionHistory::Table)
            .and_where(
                Expr::col(SubscriptionHistory::SubscriptionId).eq(subscription_id.to_string()),
            )
            .order_by(SubscriptionHistory::Seq, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(decode).collect()
    }
}
