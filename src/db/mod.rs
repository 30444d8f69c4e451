#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

mod mappers;
mod read_ops;
mod write_ops;

#[cfg(test)]
mod claim_behaviors;
#[cfg(test)]
mod circuit_store_behaviors;
#[cfg(test)]
pub(crate) mod test_support;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, SwarmError};

pub use write_ops::CircuitTransition;

/// Schema applied by [`SwarmDb::initialize_schema`].
pub const SCHEMA_SQL: &str = include_str!("schema.sql");

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct SwarmDb {
    pool: SqlitePool,
}

impl SwarmDb {
    /// Open (creating if needed) the SQLite database at `database_url`.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the pool cannot connect.
    pub async fn new(database_url: &str) -> Result<Self> {
        let max_connections = resolve_pool_max_connections();

        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| SwarmError::ConfigError(format!("Invalid database URL: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        info!(max_connections, "Connected to SQLite swarm database");
        Ok(Self { pool })
    }

    /// Create a new `SwarmDb` with an existing pool (for testing).
    #[must_use]
    pub const fn new_with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Apply the bundled schema. Safe to call more than once.
    ///
    /// # Errors
    /// Returns an error if any schema statement fails.
    pub async fn initialize_schema(&self) -> Result<()> {
        self.initialize_schema_from_sql(SCHEMA_SQL).await
    }

    /// # Errors
    /// Returns an error if any schema statement fails.
    pub async fn initialize_schema_from_sql(&self, schema_sql: &str) -> Result<()> {
        sqlx::raw_sql(schema_sql)
            .execute(self.pool())
            .await
            .map(|_result| ())
            .map_err(|e| SwarmError::DatabaseError(format!("Failed to initialize schema: {e}")))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn resolve_pool_max_connections() -> u32 {
    resolve_pool_max_connections_from(|key| std::env::var(key).ok())
}

fn resolve_pool_max_connections_from<F>(env_lookup: F) -> u32
where
    F: Fn(&str) -> Option<String>,
{
    env_lookup("SWARM_DB_MAX_CONNECTIONS")
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|v| *v > 0)
        .unwrap_or_else(|| {
            let worker_count = env_lookup("SWARM_MAX_WORKERS")
                .and_then(|v| v.parse::<u32>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(4);

            8_u32.max(worker_count.saturating_mul(3))
        })
}
