//! `PostgreSQL` event store implementation for Gatekeeper.
//!
//! This crate provides the production [`EventStore`] backed by a single `logs`
//! table. It uses sqlx with a connection pool and embedded migrations.
//!
//! # Ordering
//!
//! - Appends run one at a time under a transaction-scoped advisory lock.
//! - `id` comes from the table's `BIGSERIAL` sequence, so it is unique and
//!   increases with insertion order across all connections.
//! - `ts` is the database clock at insert (`clock_timestamp()`), raised to the
//!   latest stored `ts` if the clock stepped back. It never decreases as `id`
//!   increases. The server's clock is never used.
//! - `recent` orders by `id DESC`.
//!
//! # Example
//!
//! ```no_run
//! use gatekeeper_postgres::PostgresEventStore;
//! use gatekeeper_core::event::RecognitionEventDraft;
//! use gatekeeper_core::event_store::EventStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresEventStore::new("postgres://localhost/gatekeeper").await?;
//! store.migrate().await?;
//!
//! let event = store.append(RecognitionEventDraft::accepted("u1", None, "qr")).await?;
//! assert_eq!(store.recent(1).await?[0].id, event.id);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use gatekeeper_core::event::{EventId, RecognitionEvent, RecognitionEventDraft};
use gatekeeper_core::event_store::{EventStore, StoreError};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Default pool size.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Default time to wait for a pooled connection.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Transaction-scoped advisory lock taken by every append.
const APPEND_LOCK_KEY: i64 = 0x6761_7465_6b65_6570;

#[derive(sqlx::FromRow)]
struct LogRow {
    id: i64,
    user_id: Option<String>,
    name: Option<String>,
    camera_id: String,
    matched: bool,
    score: f64,
    ts: DateTime<Utc>,
}

impl From<LogRow> for RecognitionEvent {
    fn from(row: LogRow) -> Self {
        Self {
            id: EventId::new(row.id),
            timestamp: row.ts,
            user_id: row.user_id,
            display_name: row.name,
            source_id: row.camera_id,
            matched: row.matched,
            score: row.score,
        }
    }
}

fn store_error(error: sqlx::Error, acquire_timeout: Duration) -> StoreError {
    match error {
        sqlx::Error::PoolTimedOut => StoreError::Timeout(acquire_timeout),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            StoreError::DecodeError(error.to_string())
        }
        other => StoreError::DatabaseError(other.to_string()),
    }
}

/// `PostgreSQL`-backed [`EventStore`].
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
    acquire_timeout: Duration,
}

impl PostgresEventStore {
    /// Connect with the default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the connection fails.
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        Self::connect(database_url, DEFAULT_MAX_CONNECTIONS, DEFAULT_ACQUIRE_TIMEOUT).await
    }

    /// Connect with explicit pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the connection fails.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::DatabaseError(format!("Failed to connect: {e}")))?;

        tracing::info!(max_connections, "Connected to PostgreSQL event store");

        Ok(Self {
            pool,
            acquire_timeout,
        })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }

    /// Create the `logs` table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("PostgreSQL event store closed");
    }
}

impl EventStore for PostgresEventStore {
    fn append(
        &self,
        draft: RecognitionEventDraft,
    ) -> Pin<Box<dyn Future<Output = Result<RecognitionEvent, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| store_error(e, self.acquire_timeout))?;

            // Appends are serialized so ids and timestamps advance together.
            sqlx::query("SELECT pg_advisory_xact_lock($1)")
                .bind(APPEND_LOCK_KEY)
                .execute(&mut *tx)
                .await
                .map_err(|e| store_error(e, self.acquire_timeout))?;

            let (id, ts): (i64, DateTime<Utc>) = sqlx::query_as(
                r"
                INSERT INTO logs (user_id, name, camera_id, matched, score, ts)
                VALUES (
                    $1, $2, $3, $4, $5,
                    GREATEST(
                        clock_timestamp(),
                        (SELECT COALESCE(MAX(ts), '-infinity'::timestamptz) FROM logs)
                    )
                )
                RETURNING id, ts
                ",
            )
            .bind(draft.user_id.as_deref())
            .bind(draft.display_name.as_deref())
            .bind(&draft.source_id)
            .bind(draft.matched)
            .bind(draft.score)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| store_error(e, self.acquire_timeout))?;

            tx.commit()
                .await
                .map_err(|e| store_error(e, self.acquire_timeout))?;

            tracing::debug!(event_id = id, camera_id = %draft.source_id, "Recognition event stored");

            Ok(draft.into_event(EventId::new(id), ts))
        })
    }

    fn recent(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RecognitionEvent>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            if limit == 0 {
                return Ok(Vec::new());
            }
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);

            let rows: Vec<LogRow> = sqlx::query_as(
                r"
                SELECT id, user_id, name, camera_id, matched, score, ts
                FROM logs
                ORDER BY id DESC
                LIMIT $1
                ",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error(e, self.acquire_timeout))?;

            Ok(rows.into_iter().map(RecognitionEvent::from).collect())
        })
    }

    fn count(&self) -> Pin<Box<dyn Future<Output = Result<u64, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM logs")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| store_error(e, self.acquire_timeout))?;

            u64::try_from(count).map_err(|e| StoreError::DecodeError(format!("Negative count: {e}")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeout_maps_to_store_timeout() {
        let error = store_error(sqlx::Error::PoolTimedOut, Duration::from_secs(3));
        assert!(matches!(error, StoreError::Timeout(d) if d == Duration::from_secs(3)));
    }

    #[test]
    fn other_errors_map_to_database_error() {
        let error = store_error(sqlx::Error::RowNotFound, DEFAULT_ACQUIRE_TIMEOUT);
        assert!(matches!(error, StoreError::DatabaseError(_)));
    }
}
