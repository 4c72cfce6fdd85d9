use async_trait::async_trait;
use common::{OrderId, Version};
use domain::Order;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{OrderStoreError, Result, store::OrderStore, store::expected_stored_version};

/// PostgreSQL-backed order store.
///
/// One row per order. The full record lives in a JSONB column; `version`,
/// `status` and `terminal` are broken out for the compare-and-set update and
/// for the startup scan.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `database_url` and returns a store.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let body: serde_json::Value = row.try_get("body")?;
        Ok(serde_json::from_value(body)?)
    }

    /// The stored version, or the initial version for an unsaved order.
    async fn stored_version(&self, order_id: OrderId) -> Result<Version> {
        Ok(self
            .get_version(order_id)
            .await?
            .unwrap_or_else(Version::initial))
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id(), version = %order.version()))]
    async fn save(&self, order: &Order) -> Result<()> {
        let expected = expected_stored_version(order);
        if order.version() == Version::initial() {
            return Err(OrderStoreError::VersionConflict {
                order_id: order.id(),
                expected,
                actual: self.stored_version(order.id()).await?,
            });
        }
        let body = serde_json::to_value(order)?;

        let result = if expected == Version::initial() {
            sqlx::query(
                r#"
                INSERT INTO orders (id, buyer_id, status, terminal, version, body, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(order.id().as_uuid())
            .bind(order.buyer_id().as_uuid())
            .bind(order.status().as_str())
            .bind(order.is_terminal())
            .bind(order.version().as_i64())
            .bind(&body)
            .bind(order.created_at())
            .bind(order.updated_at())
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE orders
                SET status = $2, terminal = $3, version = $4, body = $5, updated_at = $6
                WHERE id = $1 AND version = $7
                "#,
            )
            .bind(order.id().as_uuid())
            .bind(order.status().as_str())
            .bind(order.is_terminal())
            .bind(order.version().as_i64())
            .bind(&body)
            .bind(order.updated_at())
            .bind(expected.as_i64())
            .execute(&self.pool)
            .await?
        };

        if result.rows_affected() == 0 {
            metrics::counter!("order_store_conflicts_total").increment(1);
            let actual = self.stored_version(order.id()).await?;
            return Err(OrderStoreError::VersionConflict {
                order_id: order.id(),
                expected,
                actual,
            });
        }

        Ok(())
    }

    async fn load(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT body FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn load_non_terminal(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT body
            FROM orders
            WHERE NOT terminal
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    async fn list(&self, limit: usize) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT body
            FROM orders
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    async fn get_version(&self, order_id: OrderId) -> Result<Option<Version>> {
        let version: Option<i64> = sqlx::query_scalar("SELECT version FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        Ok(version.map(Version::new))
    }
}
