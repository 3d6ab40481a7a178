//! PostgreSQL storage backend.
//!
//! Uses `sqlx` with connection pooling. Every write is idempotent via
//! `ON CONFLICT`; range mutations run in a single transaction. The schema is
//! initialized on first connect.
//!
//! All operations are retried at this boundary with the shared classifier,
//! except integrity-constraint violations (SQLSTATE class 23), which are
//! permanent.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use transferindex_core::error::IndexerError;
use transferindex_core::retry::{retry, RetryPolicy};

use crate::{BlockRow, NewBlock, NewTransfer, Store};

/// Connection options for the Postgres backend.
#[derive(Debug, Clone)]
pub struct PostgresOptions {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: u32,
    /// Connection timeout in seconds (default: 30)
    pub connect_timeout_secs: u64,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            connect_timeout_secs: 30,
        }
    }
}

/// PostgreSQL-backed [`Store`].
///
/// Thread-safe and cheaply cloneable — wraps a connection pool internally.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    policy: RetryPolicy,
}

impl PostgresStore {
    /// Connect and initialize the schema.
    pub async fn connect(database_url: &str) -> Result<Self, IndexerError> {
        Self::connect_with_options(database_url, PostgresOptions::default()).await
    }

    /// Connect with custom pool options.
    pub async fn connect_with_options(
        database_url: &str,
        opts: PostgresOptions,
    ) -> Result<Self, IndexerError> {
        let pool = PgPoolOptions::new()
            .max_connections(opts.max_connections)
            .acquire_timeout(Duration::from_secs(opts.connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| IndexerError::Storage(format!("postgres connect: {e}")))?;

        let store = Self {
            pool,
            policy: RetryPolicy::default(),
        };
        store.init_schema().await?;
        info!("PostgresStore connected and schema initialized");
        Ok(store)
    }

    /// Create tables and indexes if they don't already exist.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS blocks (
                hash         TEXT PRIMARY KEY,
                number       BIGINT NOT NULL,
                parent_hash  TEXT NOT NULL,
                "timestamp"  TIMESTAMPTZ NOT NULL,
                processed_at TIMESTAMPTZ,
                finalized_at TIMESTAMPTZ,
                reorged_at   TIMESTAMPTZ
            )"#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        // One canonical row per height; replaced forks keep their rows.
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS ux_blocks_canonical_number
             ON blocks(number) WHERE reorged_at IS NULL",
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS erc20_transfers (
                tx_hash       TEXT    NOT NULL,
                log_index     INTEGER NOT NULL,
                block_number  BIGINT  NOT NULL,
                from_address  TEXT    NOT NULL,
                to_address    TEXT    NOT NULL,
                value         NUMERIC(78,0) NOT NULL,
                token_address TEXT    NOT NULL,
                reorged_at    TIMESTAMPTZ,
                PRIMARY KEY (tx_hash, log_index)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_erc20_transfers_block
             ON erc20_transfers(block_number)",
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        debug!("PostgresStore schema initialized");
        Ok(())
    }

    /// Apply operator-supplied SQL (schema upgrades). Statements run in
    /// order; stops on first error.
    pub async fn run_migrations(&self, sql: &str) -> Result<(), IndexerError> {
        for stmt in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| IndexerError::Storage(format!("migration failed: {e}\nSQL: {stmt}")))?;
        }
        Ok(())
    }

    /// Get the underlying connection pool (for custom queries).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn save_block(&self, block: &NewBlock) -> Result<(), IndexerError> {
        retry(&self.policy, "save_block", || async move {
            // Conflict on hash: a replay is a no-op; a previously reorged
            // fork that won again is revived (its height was vacated by
            // mark_reorged_range). finalized_at is never cleared.
            sqlx::query(
                r#"INSERT INTO blocks (hash, number, parent_hash, "timestamp")
                   VALUES ($1, $2, $3, $4)
                   ON CONFLICT (hash) DO UPDATE
                   SET reorged_at = NULL, processed_at = NULL
                   WHERE blocks.reorged_at IS NOT NULL"#,
            )
            .bind(&block.hash)
            .bind(block.number)
            .bind(&block.parent_hash)
            .bind(block.timestamp)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
            Ok(())
        })
        .await
    }

    async fn save_transfers_batch(&self, transfers: &[NewTransfer]) -> Result<(), IndexerError> {
        if transfers.is_empty() {
            return Ok(());
        }
        retry(&self.policy, "save_transfers_batch", || async move {
            let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
            for t in transfers {
                // Revive a soft-deleted row when the winning fork re-included
                // the same transaction; otherwise duplicates are ignored.
                sqlx::query(
                    "INSERT INTO erc20_transfers
                        (tx_hash, log_index, block_number, from_address, to_address, value, token_address)
                     VALUES ($1, $2, $3, $4, $5, $6::NUMERIC, $7)
                     ON CONFLICT (tx_hash, log_index) DO UPDATE
                     SET block_number = EXCLUDED.block_number, reorged_at = NULL
                     WHERE erc20_transfers.reorged_at IS NOT NULL",
                )
                .bind(&t.tx_hash)
                .bind(t.log_index)
                .bind(t.block_number)
                .bind(&t.from_address)
                .bind(&t.to_address)
                .bind(&t.value)
                .bind(&t.token_address)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
            }
            tx.commit()
                .await
                .map_err(|e| IndexerError::Storage(format!("commit batch: {e}")))?;
            Ok(())
        })
        .await
    }

    async fn mark_block_processed(&self, number: i64) -> Result<(), IndexerError> {
        retry(&self.policy, "mark_block_processed", || async move {
            sqlx::query(
                "UPDATE blocks SET processed_at = now()
                 WHERE number = $1 AND reorged_at IS NULL AND processed_at IS NULL",
            )
            .bind(number)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
            Ok(())
        })
        .await
    }

    async fn get_block(&self, number: i64) -> Result<BlockRow, IndexerError> {
        retry(&self.policy, "get_block", || async move {
            let row = sqlx::query(
                r#"SELECT hash, number, parent_hash, "timestamp",
                          processed_at, finalized_at, reorged_at
                   FROM blocks
                   WHERE number = $1 AND reorged_at IS NULL"#,
            )
            .bind(number)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

            let row = row.ok_or(IndexerError::BlockNotFound)?;
            Ok(BlockRow {
                hash: row.get("hash"),
                number: row.get("number"),
                parent_hash: row.get("parent_hash"),
                timestamp: row.get("timestamp"),
                processed_at: row.get("processed_at"),
                finalized_at: row.get("finalized_at"),
                reorged_at: row.get("reorged_at"),
            })
        })
        .await
    }

    async fn get_latest_processed_block_number(&self) -> Result<i64, IndexerError> {
        retry(&self.policy, "get_latest_processed_block_number", || async move {
            let row = sqlx::query(
                "SELECT MAX(number) AS latest FROM blocks
                 WHERE processed_at IS NOT NULL AND reorged_at IS NULL",
            )
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

            row.get::<Option<i64>, _>("latest")
                .ok_or(IndexerError::BlockNotFound)
        })
        .await
    }

    async fn mark_reorged_range(&self, from: i64) -> Result<(), IndexerError> {
        retry(&self.policy, "mark_reorged_range", || async move {
            let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
            sqlx::query(
                "UPDATE blocks SET reorged_at = now()
                 WHERE number > $1 AND reorged_at IS NULL",
            )
            .bind(from)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
            sqlx::query(
                "UPDATE erc20_transfers SET reorged_at = now()
                 WHERE block_number > $1 AND reorged_at IS NULL",
            )
            .bind(from)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
            tx.commit()
                .await
                .map_err(|e| IndexerError::Storage(format!("commit reorg mark: {e}")))?;
            Ok(())
        })
        .await
    }

    async fn mark_finalized_up_to(&self, number: i64) -> Result<(), IndexerError> {
        retry(&self.policy, "mark_finalized_up_to", || async move {
            sqlx::query(
                "UPDATE blocks SET finalized_at = now()
                 WHERE number <= $1 AND finalized_at IS NULL AND reorged_at IS NULL",
            )
            .bind(number)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
            Ok(())
        })
        .await
    }

    async fn delete_range(&self, from: i64) -> Result<(), IndexerError> {
        retry(&self.policy, "delete_range", || async move {
            // Reverse dependency order: transfers reference blocks.
            let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
            sqlx::query("DELETE FROM erc20_transfers WHERE block_number > $1")
                .bind(from)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
            sqlx::query("DELETE FROM blocks WHERE number > $1")
                .bind(from)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
            tx.commit()
                .await
                .map_err(|e| IndexerError::Storage(format!("commit delete: {e}")))?;
            Ok(())
        })
        .await
    }
}

/// Map a sqlx error, surfacing SQLSTATE class 23 as a permanent
/// constraint violation.
fn map_sqlx_err(e: sqlx::Error) -> IndexerError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().map(|c| c.starts_with("23")).unwrap_or(false) {
            return IndexerError::ConstraintViolation(db.to_string());
        }
    }
    IndexerError::Storage(e.to_string())
}
