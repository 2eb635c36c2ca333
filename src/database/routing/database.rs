use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use super::RoutedConnection;
use crate::config::DataSource;
use crate::database::driver::RowScope;
use crate::database::manager::{DatabaseError, DatabaseManager};
use crate::database::pool::{ConnectionPool, PoolOptions};
use crate::tenancy::TenantId;

const DEFAULT_POOL: &str = "default";

/// Database-per-tenant routing: every tenant borrows from its own pool
pub struct DatabaseRouter {
    manager: DatabaseManager,
    default_source: DataSource,
    sources: HashMap<TenantId, DataSource>,
}

impl DatabaseRouter {
    pub fn new(
        options: PoolOptions,
        default_source: DataSource,
        sources: HashMap<TenantId, DataSource>,
    ) -> Self {
        Self {
            manager: DatabaseManager::new(options),
            default_source,
            sources,
        }
    }

    pub fn manager(&self) -> &DatabaseManager {
        &self.manager
    }

    pub fn tenants(&self) -> impl Iterator<Item = &TenantId> {
        self.sources.keys()
    }

    /// Pool name for a tenant; never collides with the default pool
    pub fn pool_name(tenant: &TenantId) -> String {
        format!("tenant_{}", tenant.to_identifier())
    }

    /// Pool for `tenant`, built on first use from its configured data source
    pub async fn tenant_pool(&self, tenant: &TenantId) -> Result<Arc<ConnectionPool>, DatabaseError> {
        let source = self
            .sources
            .get(tenant)
            .ok_or_else(|| DatabaseError::UnconfiguredTenant(tenant.to_string()))?;
        self.manager.get_pool(&Self::pool_name(tenant), source).await
    }

    pub async fn default_pool(&self) -> Result<Arc<ConnectionPool>, DatabaseError> {
        self.manager.get_pool(DEFAULT_POOL, &self.default_source).await
    }

    pub(super) async fn get_connection(&self, tenant: &TenantId) -> Result<RoutedConnection, DatabaseError> {
        let conn = self.tenant_pool(tenant).await?.acquire().await?;
        Ok(RoutedConnection::new(conn, Some(tenant.clone()), RowScope::All))
    }

    pub(super) async fn get_any_connection(&self) -> Result<RoutedConnection, DatabaseError> {
        let conn = self.default_pool().await?.acquire().await?;
        Ok(RoutedConnection::new(conn, None, RowScope::All))
    }

    /// Check the connection back into the pool it came from, provided that pool
    /// is the one its tenant routes to
    pub(super) async fn release(&self, conn: RoutedConnection) -> Result<(), DatabaseError> {
        let expected = match conn.tenant() {
            Some(tenant) => Self::pool_name(tenant),
            None => DEFAULT_POOL.to_string(),
        };

        let conn = conn.into_pooled();
        if conn.pool().name() != expected {
            warn!(
                "Discarding connection borrowed from pool '{}' but routed to '{}'",
                conn.pool().name(),
                expected
            );
            let routed = conn.pool().name().to_string();
            conn.discard();
            return Err(DatabaseError::ConnectionMismatch {
                routed,
                released: expected,
            });
        }

        conn.checkin();
        Ok(())
    }

    pub(super) async fn bootstrap(&self, tables: &[&str]) -> Result<(), DatabaseError> {
        let mut pools = vec![self.default_pool().await?];
        for tenant in self.sources.keys() {
            pools.push(self.tenant_pool(tenant).await?);
        }

        for pool in pools {
            let mut conn = pool.acquire().await?;
            for table in tables {
                conn.ensure_table(table).await?;
            }
            conn.checkin();
        }
        Ok(())
    }

    pub(super) async fn close(&self) {
        self.manager.close_all().await;
    }
}
