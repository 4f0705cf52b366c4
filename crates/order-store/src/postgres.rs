use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{Order, OrderOutcome, OrderStatus};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    OrderId, Result, StoreError, Version,
    idempotency::{Claim, IdempotencyRecord, IdempotencyStore},
    store::OrderStore,
};

/// Runs the database migrations against `pool`.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

/// PostgreSQL-backed order store implementation.
///
/// The order is kept as a JSONB document next to the columns used for
/// lookups and optimistic concurrency.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        run_migrations(&self.pool).await
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let document: serde_json::Value = row.try_get("document")?;
        let mut order: Order = serde_json::from_value(document)?;
        order.set_version(Version::new(row.try_get("version")?));
        Ok(order)
    }

    async fn current_version(&self, order_id: OrderId) -> Result<Option<Version>> {
        let version: Option<i64> = sqlx::query_scalar("SELECT version FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        Ok(version.map(Version::new))
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn insert(&self, order: &Order) -> Result<Version> {
        let version = Version::first();
        let document = serde_json::to_value(order)?;

        let result = sqlx::query(
            r#"
            INSERT INTO orders (id, status, version, document, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.status().as_str())
        .bind(version.as_i64())
        .bind(document)
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(order.id()));
        }
        Ok(version)
    }

    async fn update(&self, order: &Order) -> Result<Version> {
        let expected = order.version();
        let next = expected.next();
        let document = serde_json::to_value(order)?;

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, version = $3, document = $4, updated_at = $5
            WHERE id = $1 AND version = $6
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.status().as_str())
        .bind(next.as_i64())
        .bind(document)
        .bind(order.updated_at())
        .bind(expected.as_i64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.current_version(order.id()).await? {
                Some(actual) => {
                    tracing::warn!(
                        order_id = %order.id(),
                        %expected,
                        %actual,
                        "Stale order update rejected"
                    );
                    Err(StoreError::ConcurrencyConflict {
                        order_id: order.id(),
                        expected,
                        actual,
                    })
                }
                None => Err(StoreError::NotFound(order.id())),
            };
        }
        Ok(next)
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row: Option<PgRow> = sqlx::query("SELECT version, document FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn list_by_status(&self, statuses: &[OrderStatus]) -> Result<Vec<Order>> {
        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();

        let rows = sqlx::query(
            r#"
            SELECT version, document
            FROM orders
            WHERE status = ANY($1)
            ORDER BY created_at ASC
            "#,
        )
        .bind(statuses)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }
}

/// PostgreSQL-backed idempotency store implementation.
///
/// `claim` relies on the primary key of `idempotency_keys` so that concurrent
/// claims across processes resolve to a single winner.
#[derive(Clone)]
pub struct PostgresIdempotencyStore {
    pool: PgPool,
}

impl PostgresIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: PgRow) -> Result<IdempotencyRecord> {
        let outcome: Option<serde_json::Value> = row.try_get("outcome")?;
        let outcome = outcome
            .map(serde_json::from_value::<OrderOutcome>)
            .transpose()?;

        Ok(IdempotencyRecord {
            key: row.try_get("key")?,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            outcome,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            completed_at: row.try_get::<Option<DateTime<Utc>>, _>("completed_at")?,
        })
    }
}

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    async fn claim(&self, key: &str, order_id: OrderId) -> Result<Claim> {
        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key, order_id)
            VALUES ($1, $2)
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(order_id.as_uuid())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(Claim::Acquired);
        }

        // Lost the race; report what the winner holds.
        let record = self
            .lookup(key)
            .await?
            .ok_or_else(|| StoreError::UnclaimedKey(key.to_string()))?;

        Ok(match record.outcome {
            Some(outcome) => Claim::Completed(Box::new(outcome)),
            None => Claim::InFlight {
                order_id: record.order_id,
            },
        })
    }

    async fn complete(&self, key: &str, outcome: &OrderOutcome) -> Result<bool> {
        let outcome_json = serde_json::to_value(outcome)?;

        let result = sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET outcome = $2, completed_at = NOW()
            WHERE key = $1 AND outcome IS NULL
            "#,
        )
        .bind(key)
        .bind(outcome_json)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        match self.lookup(key).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::UnclaimedKey(key.to_string())),
        }
    }

    async fn lookup(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT key, order_id, outcome, created_at, completed_at
            FROM idempotency_keys
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn release(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM idempotency_keys WHERE key = $1 AND outcome IS NULL")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
