//! SQLite order and withdrawal store.
//!
//! Decimals are stored as canonical TEXT and timestamps as RFC 3339 TEXT
//! with fixed precision, so lexical ordering matches time ordering.
//! Identifier uniqueness is enforced by primary keys; violations surface
//! as `StorageError::Conflict`.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::TryStreamExt;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use super::{OrderStore, StorageError, WithdrawalStore};
use crate::types::{Order, OrderStatus, UserId, Withdrawal};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS orders (
        id          TEXT PRIMARY KEY,
        user_id     TEXT NOT NULL,
        status      TEXT NOT NULL DEFAULT 'NEW',
        accrual     TEXT NOT NULL DEFAULT '0',
        uploaded_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS orders_user_idx ON orders (user_id)",
    "CREATE INDEX IF NOT EXISTS orders_status_idx ON orders (status)",
    "CREATE TABLE IF NOT EXISTS withdrawals (
        id           TEXT PRIMARY KEY,
        user_id      TEXT NOT NULL,
        sum          TEXT NOT NULL,
        processed_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS withdrawals_user_idx ON withdrawals (user_id)",
];

const ORDER_COLUMNS: &str = "id, user_id, status, accrual, uploaded_at";
const WITHDRAWAL_COLUMNS: &str = "id, user_id, sum, processed_at";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `uri` and apply the schema.
    pub async fn connect(uri: &str, max_connections: u32) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(uri)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!(max_connections, "SQLite store ready");
        Ok(store)
    }

    /// Wrap an existing pool. The caller is responsible for `migrate`.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Schema applied");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn now_text() -> (DateTime<Utc>, String) {
    let now = Utc::now();
    let text = now.to_rfc3339_opts(SecondsFormat::Micros, true);
    // Round-trip through text so the returned value equals what a later read yields.
    let stored = parse_timestamp(&text).unwrap_or(now);
    (stored, text)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("timestamp {s:?}: {e}")))
}

fn parse_decimal(s: &str) -> Result<Decimal, StorageError> {
    Decimal::from_str(s).map_err(|e| StorageError::Corrupt(format!("decimal {s:?}: {e}")))
}

fn parse_user(s: &str) -> Result<UserId, StorageError> {
    Uuid::parse_str(s).map_err(|e| StorageError::Corrupt(format!("user id {s:?}: {e}")))
}

fn order_from_row(row: &SqliteRow) -> Result<Order, StorageError> {
    let status: String = row.try_get("status")?;
    Ok(Order {
        id: row.try_get("id")?,
        user_id: parse_user(row.try_get("user_id")?)?,
        status: status.parse().map_err(StorageError::Corrupt)?,
        accrual: parse_decimal(row.try_get("accrual")?)?,
        uploaded_at: parse_timestamp(row.try_get("uploaded_at")?)?,
    })
}

fn withdrawal_from_row(row: &SqliteRow) -> Result<Withdrawal, StorageError> {
    Ok(Withdrawal {
        id: row.try_get("id")?,
        user_id: parse_user(row.try_get("user_id")?)?,
        sum: parse_decimal(row.try_get("sum")?)?,
        processed_at: parse_timestamp(row.try_get("processed_at")?)?,
    })
}

/// Map a unique-constraint violation on insert to `Conflict`.
fn insert_error(err: sqlx::Error, what: String) -> StorageError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::Conflict(what),
        _ => StorageError::Database(err),
    }
}

// ---------------------------------------------------------------------------
// OrderStore
// ---------------------------------------------------------------------------

#[async_trait]
impl OrderStore for SqliteStore {
    async fn create_order(&self, id: &str, user_id: UserId) -> Result<Order, StorageError> {
        let (uploaded_at, uploaded_text) = now_text();
        sqlx::query(
            "INSERT INTO orders (id, user_id, status, accrual, uploaded_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(id)
        .bind(user_id.to_string())
        .bind(OrderStatus::New.as_str())
        .bind(Decimal::ZERO.to_string())
        .bind(uploaded_text)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error(e, format!("order {id}")))?;

        Ok(Order {
            id: id.to_string(),
            user_id,
            status: OrderStatus::New,
            accrual: Decimal::ZERO,
            uploaded_at,
        })
    }

    async fn find_order_by_id(&self, id: &str) -> Result<Order, StorageError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StorageError::NotFound)?;
        order_from_row(&row)
    }

    async fn find_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>, StorageError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = ?1 ORDER BY uploaded_at, id"
        );
        let mut rows = sqlx::query(&sql).bind(user_id.to_string()).fetch(&self.pool);

        let mut orders = Vec::new();
        while let Some(row) = rows.try_next().await? {
            orders.push(order_from_row(&row)?);
        }
        Ok(orders)
    }

    async fn find_orders_pending_scan(&self) -> Result<Vec<Order>, StorageError> {
        let [a, b, c] = OrderStatus::PENDING;
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE status IN (?1, ?2, ?3) ORDER BY uploaded_at, id"
        );
        let mut rows = sqlx::query(&sql)
            .bind(a.as_str())
            .bind(b.as_str())
            .bind(c.as_str())
            .fetch(&self.pool);

        let mut orders = Vec::new();
        while let Some(row) = rows.try_next().await? {
            orders.push(order_from_row(&row)?);
        }
        Ok(orders)
    }

    async fn update_order(
        &self,
        id: &str,
        status: OrderStatus,
        accrual: Decimal,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE orders SET status = ?1, accrual = ?2 WHERE id = ?3 AND status NOT IN (?4, ?5)",
        )
        .bind(status.as_str())
        .bind(accrual.to_string())
        .bind(id)
        .bind(OrderStatus::Invalid.as_str())
        .bind(OrderStatus::Processed.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// WithdrawalStore
// ---------------------------------------------------------------------------

#[async_trait]
impl WithdrawalStore for SqliteStore {
    async fn create_withdrawal(
        &self,
        id: &str,
        user_id: UserId,
        sum: Decimal,
    ) -> Result<Withdrawal, StorageError> {
        let (processed_at, processed_text) = now_text();
        sqlx::query(
            "INSERT INTO withdrawals (id, user_id, sum, processed_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(id)
        .bind(user_id.to_string())
        .bind(sum.to_string())
        .bind(processed_text)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error(e, format!("withdrawal {id}")))?;

        Ok(Withdrawal {
            id: id.to_string(),
            user_id,
            sum,
            processed_at,
        })
    }

    async fn find_withdrawal_by_id(&self, id: &str) -> Result<Withdrawal, StorageError> {
        let sql = format!("SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StorageError::NotFound)?;
        withdrawal_from_row(&row)
    }

    async fn find_withdrawals_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Withdrawal>, StorageError> {
        let sql = format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE user_id = ?1 ORDER BY processed_at, id"
        );
        let mut rows = sqlx::query(&sql).bind(user_id.to_string()).fetch(&self.pool);

        let mut withdrawals = Vec::new();
        while let Some(row) = rows.try_next().await? {
            withdrawals.push(withdrawal_from_row(&row)?);
        }
        Ok(withdrawals)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
