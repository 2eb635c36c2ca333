use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::DataSource;
use crate::database::driver::Connection;
use crate::database::manager::DatabaseError;
use crate::database::postgres::{self, PgSession};
use crate::database::sqlite::{self, SqliteSession};

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// sqlx pool for the backend named by a data source URL
#[derive(Clone)]
pub enum DbPool {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

/// Named pool of connections to a single data source.
///
/// Connections open lazily. A pool built with [`ConnectionPool::resetting_schema`]
/// puts every connection back on its default schema when it is checked in, by
/// whatever path; a connection whose reset fails is closed instead of reused.
pub struct ConnectionPool {
    name: String,
    source: DataSource,
    acquire_timeout: Duration,
    inner: DbPool,
}

impl ConnectionPool {
    pub fn new(
        name: impl Into<String>,
        source: DataSource,
        options: &PoolOptions,
    ) -> Result<Arc<Self>, DatabaseError> {
        Self::build(name.into(), source, options, None)
    }

    pub fn resetting_schema(
        name: impl Into<String>,
        source: DataSource,
        options: &PoolOptions,
        schema: &str,
    ) -> Result<Arc<Self>, DatabaseError> {
        Self::build(name.into(), source, options, Some(schema.to_string()))
    }

    fn build(
        name: String,
        source: DataSource,
        options: &PoolOptions,
        reset: Option<String>,
    ) -> Result<Arc<Self>, DatabaseError> {
        let inner = match source.scheme()?.as_str() {
            "postgres" | "postgresql" => DbPool::Postgres(pg_pool(&name, &source, options, reset)?),
            "sqlite" => DbPool::Sqlite(sqlite_pool(&name, &source, options, reset)?),
            other => return Err(DatabaseError::UnsupportedDriver(other.to_string())),
        };
        debug!("Configured pool '{}' for {}", name, source.redacted_url());

        Ok(Arc::new(Self {
            name,
            source,
            acquire_timeout: options.acquire_timeout,
            inner,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &DataSource {
        &self.source
    }

    /// Borrow a connection, waiting at most `acquire_timeout` for a free slot
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection, DatabaseError> {
        let conn: Box<dyn Connection> = match &self.inner {
            DbPool::Postgres(pool) => Box::new(PgSession::new(
                pool.acquire().await.map_err(|e| self.acquire_error(e))?,
            )),
            DbPool::Sqlite(pool) => Box::new(SqliteSession::new(
                pool.acquire().await.map_err(|e| self.acquire_error(e))?,
            )),
        };

        Ok(PooledConnection {
            conn,
            pool: Arc::clone(self),
        })
    }

    fn acquire_error(&self, err: sqlx::Error) -> DatabaseError {
        match err {
            sqlx::Error::PoolTimedOut => DatabaseError::PoolTimedOut {
                pool: self.name.clone(),
                timeout: self.acquire_timeout,
            },
            sqlx::Error::PoolClosed => DatabaseError::PoolClosed(self.name.clone()),
            other => DatabaseError::Sqlx(other),
        }
    }

    pub fn idle_count(&self) -> usize {
        match &self.inner {
            DbPool::Postgres(pool) => pool.num_idle(),
            DbPool::Sqlite(pool) => pool.num_idle(),
        }
    }

    /// Open connections, idle or borrowed
    pub fn size(&self) -> u32 {
        match &self.inner {
            DbPool::Postgres(pool) => pool.size(),
            DbPool::Sqlite(pool) => pool.size(),
        }
    }

    pub fn is_closed(&self) -> bool {
        match &self.inner {
            DbPool::Postgres(pool) => pool.is_closed(),
            DbPool::Sqlite(pool) => pool.is_closed(),
        }
    }

    /// Refuse further borrows and wait for borrowed connections to come back
    pub async fn close(&self) {
        match &self.inner {
            DbPool::Postgres(pool) => pool.close().await,
            DbPool::Sqlite(pool) => pool.close().await,
        }
    }
}

fn pg_pool(
    name: &str,
    source: &DataSource,
    options: &PoolOptions,
    reset: Option<String>,
) -> Result<PgPool, DatabaseError> {
    let mut connect = PgConnectOptions::from_str(&source.url)?;
    if let Some(username) = &source.username {
        connect = connect.username(username);
    }
    if let Some(password) = &source.password {
        connect = connect.password(password);
    }

    let mut pool = PgPoolOptions::new()
        .max_connections(options.max_connections.max(1))
        .acquire_timeout(options.acquire_timeout);

    if let Some(schema) = reset {
        let pool_name = name.to_string();
        pool = pool.after_release(move |conn, _meta| {
            let schema = schema.clone();
            let pool_name = pool_name.clone();
            Box::pin(async move {
                match postgres::set_search_path(conn, &schema).await {
                    Ok(()) => Ok(true),
                    Err(e) => {
                        warn!(
                            "Resetting connection of pool '{}' to schema '{}' failed, closing it: {}",
                            pool_name, schema, e
                        );
                        Ok(false)
                    }
                }
            })
        });
    }

    Ok(pool.connect_lazy_with(connect))
}

fn sqlite_pool(
    name: &str,
    source: &DataSource,
    options: &PoolOptions,
    reset: Option<String>,
) -> Result<SqlitePool, DatabaseError> {
    let connect = SqliteConnectOptions::from_str(&source.url)?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

    let mut pool = SqlitePoolOptions::new()
        .max_connections(options.max_connections.max(1))
        .acquire_timeout(options.acquire_timeout)
        .after_connect(|conn, _meta| Box::pin(async move { sqlite::prepare_session(conn).await }));

    if let Some(schema) = reset {
        let pool_name = name.to_string();
        pool = pool.after_release(move |conn, _meta| {
            let schema = schema.clone();
            let pool_name = pool_name.clone();
            Box::pin(async move {
                match sqlite::switch_schema(conn, &schema).await {
                    Ok(()) => Ok(true),
                    Err(e) => {
                        warn!(
                            "Resetting connection of pool '{}' to schema '{}' failed, closing it: {}",
                            pool_name, schema, e
                        );
                        Ok(false)
                    }
                }
            })
        });
    }

    Ok(pool.connect_lazy_with(connect))
}

/// Throwaway SQLite database under the system temp directory
#[cfg(test)]
pub(crate) fn scratch_url(label: &str) -> String {
    format!(
        "sqlite://{}/{}-{}.db",
        std::env::temp_dir().display(),
        label,
        uuid::Uuid::new_v4().simple()
    )
}

/// Connection borrowed from a [`ConnectionPool`]. Dropping it checks it back in.
pub struct PooledConnection {
    conn: Box<dyn Connection>,
    pool: Arc<ConnectionPool>,
}

impl PooledConnection {
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Return the connection to its pool for reuse
    pub fn checkin(self) {
        drop(self);
    }

    /// Close the connection instead of returning it
    pub fn discard(self) {
        debug!("Discarding connection from pool '{}'", self.pool.name);
        self.conn.detach();
    }
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        &*self.conn
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.conn
    }
}
