use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::DataSource;
use crate::database::driver::is_valid_identifier;
use crate::database::pool::{ConnectionPool, PoolOptions};

/// Errors from pools, drivers and connection routing
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Invalid database URL: {0}")]
    InvalidDatabaseUrl(String),

    #[error("Unsupported database driver: {0}")]
    UnsupportedDriver(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Tenant '{0}' has no data source configured")]
    UnconfiguredTenant(String),

    #[error("Switching to schema '{schema}' failed: {reason}")]
    SchemaSwitch { schema: String, reason: String },

    #[error("Unknown schema: {0}")]
    UnknownSchema(String),

    #[error("Relation does not exist: {0}")]
    UnknownTable(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Timed out after {timeout:?} waiting for a connection from pool '{pool}'")]
    PoolTimedOut { pool: String, timeout: Duration },

    #[error("Pool '{0}' is closed")]
    PoolClosed(String),

    #[error("Connection routed for '{routed}' was released as '{released}'")]
    ConnectionMismatch { routed: String, released: String },

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// Registry of named connection pools, built lazily and cached for the
/// lifetime of the process
pub struct DatabaseManager {
    options: PoolOptions,
    pools: RwLock<HashMap<String, Arc<ConnectionPool>>>,
}

impl DatabaseManager {
    pub fn new(options: PoolOptions) -> Self {
        Self {
            options,
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// Get existing pool or create a new one lazily
    pub async fn get_pool(
        &self,
        name: &str,
        source: &DataSource,
    ) -> Result<Arc<ConnectionPool>, DatabaseError> {
        if !is_valid_identifier(name) {
            return Err(DatabaseError::InvalidIdentifier(name.to_string()));
        }

        // Fast path: try read lock
        {
            let pools = self.pools.read().await;
            if let Some(pool) = pools.get(name) {
                return Ok(Arc::clone(pool));
            }
        }

        let mut pools = self.pools.write().await;
        // Another task may have won the race while we waited for the write lock
        if let Some(pool) = pools.get(name) {
            return Ok(Arc::clone(pool));
        }

        let pool = ConnectionPool::new(name, source.clone(), &self.options)?;
        pools.insert(name.to_string(), Arc::clone(&pool));

        info!(
            "Created database pool for: {} ({})",
            name,
            source.redacted_url()
        );
        Ok(pool)
    }

    /// Names of every pool built so far
    pub async fn pool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Ping one connection from every pool built so far
    pub async fn health_check(&self) -> Result<(), DatabaseError> {
        let pools: Vec<Arc<ConnectionPool>> = self.pools.read().await.values().cloned().collect();
        for pool in pools {
            let mut conn = pool.acquire().await?;
            conn.ping().await?;
        }
        Ok(())
    }

    /// Close and remove all pools (e.g., on shutdown)
    pub async fn close_all(&self) {
        let mut pools = self.pools.write().await;
        for (name, pool) in pools.drain() {
            pool.close().await;
            info!("Closed database pool: {}", name);
        }
    }
}
