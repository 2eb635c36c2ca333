//! Tenant-aware connection routing.
//!
//! One [`ConnectionRouter`] is built at startup for the configured
//! [`TenancyStrategy`] and hands out [`RoutedConnection`]s:
//!
//! - `Schema`: one shared pool, the session schema is switched per tenant and
//!   reset before the connection goes back to the pool.
//! - `Database`: one lazily built pool per tenant database.
//! - `Discriminator`: one shared pool, every query carries a tenant predicate.
//!
//! Under `Schema` the shared pool resets every connection to the default
//! schema on checkin, so a routed connection that is dropped instead of
//! released never reaches the next borrower with a tenant schema still active.

pub mod database;
pub mod discriminator;
pub mod schema;

pub use database::DatabaseRouter;
pub use discriminator::DiscriminatorRouter;
pub use schema::SchemaRouter;

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{TenancyConfig, TenancyStrategy};
use crate::database::driver::{Connection, RowScope};
use crate::database::manager::DatabaseError;
use crate::database::pool::{ConnectionPool, PoolOptions, PooledConnection};
use crate::tenancy::TenantId;

/// Pooled connection bound to one tenant (or to none, for bootstrap work)
pub struct RoutedConnection {
    conn: PooledConnection,
    tenant: Option<TenantId>,
    scope: RowScope,
}

impl RoutedConnection {
    pub(crate) fn new(conn: PooledConnection, tenant: Option<TenantId>, scope: RowScope) -> Self {
        Self { conn, tenant, scope }
    }

    pub fn tenant(&self) -> Option<&TenantId> {
        self.tenant.as_ref()
    }

    /// Row predicate every query on this connection must apply
    pub fn scope(&self) -> &RowScope {
        &self.scope
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        self.conn.pool()
    }

    pub(crate) fn into_pooled(self) -> PooledConnection {
        self.conn
    }

    /// Close the physical connection without returning it to its pool
    pub fn discard(self) {
        self.conn.discard();
    }
}

impl Deref for RoutedConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        &*self.conn
    }
}

impl DerefMut for RoutedConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.conn
    }
}

/// Connection provider for the configured isolation strategy
pub enum ConnectionRouter {
    Schema(SchemaRouter),
    Database(DatabaseRouter),
    Discriminator(DiscriminatorRouter),
}

impl ConnectionRouter {
    pub fn from_config(config: &TenancyConfig, options: PoolOptions) -> Result<Self, DatabaseError> {
        info!(
            "Routing tenant connections by {:?} strategy ({} tenants configured)",
            config.strategy,
            config.tenants.len()
        );
        let router = match config.strategy {
            TenancyStrategy::Schema => ConnectionRouter::Schema(SchemaRouter::new(
                ConnectionPool::resetting_schema(
                    "shared",
                    config.shared.clone(),
                    &options,
                    &config.default_schema,
                )?,
                config.default_schema.clone(),
                config.schema_mappings(),
            )),
            TenancyStrategy::Database => {
                let mut sources = config.data_sources();
                // The super tenant works against the shared database unless given its own
                sources
                    .entry(config.super_tenant.clone())
                    .or_insert_with(|| config.shared.clone());
                ConnectionRouter::Database(DatabaseRouter::new(options, config.shared.clone(), sources))
            }
            TenancyStrategy::Discriminator => ConnectionRouter::Discriminator(DiscriminatorRouter::new(
                ConnectionPool::new("shared", config.shared.clone(), &options)?,
            )),
        };
        Ok(router)
    }

    pub fn strategy(&self) -> TenancyStrategy {
        match self {
            ConnectionRouter::Schema(_) => TenancyStrategy::Schema,
            ConnectionRouter::Database(_) => TenancyStrategy::Database,
            ConnectionRouter::Discriminator(_) => TenancyStrategy::Discriminator,
        }
    }

    /// Tenants with storage of their own. Empty under the discriminator
    /// strategy, where every tenant shares one set of tables.
    pub fn tenants(&self) -> Vec<TenantId> {
        let mut tenants: Vec<TenantId> = match self {
            ConnectionRouter::Schema(router) => router.tenants().cloned().collect(),
            ConnectionRouter::Database(router) => router.tenants().cloned().collect(),
            ConnectionRouter::Discriminator(_) => Vec::new(),
        };
        tenants.sort();
        tenants
    }

    /// Borrow a connection confined to `tenant`
    pub async fn get_connection(&self, tenant: &TenantId) -> Result<RoutedConnection, DatabaseError> {
        tracing::debug!("Routing connection for tenant '{}'", tenant);
        match self {
            ConnectionRouter::Schema(router) => router.get_connection(tenant).await,
            ConnectionRouter::Database(router) => router.get_connection(tenant).await,
            ConnectionRouter::Discriminator(router) => router.get_connection(tenant).await,
        }
    }

    /// Give back a connection obtained from [`ConnectionRouter::get_connection`].
    ///
    /// The connection is discarded instead of pooled when it was routed for a
    /// different tenant or when resetting it fails.
    pub async fn release_connection(
        &self,
        tenant: &TenantId,
        conn: RoutedConnection,
    ) -> Result<(), DatabaseError> {
        if conn.tenant() != Some(tenant) {
            let routed = conn
                .tenant()
                .map_or_else(|| "<none>".to_string(), |t| t.to_string());
            warn!(
                "Discarding connection from pool '{}': routed for '{}' but released as '{}'",
                conn.pool().name(),
                routed,
                tenant
            );
            conn.discard();
            return Err(DatabaseError::ConnectionMismatch {
                routed,
                released: tenant.to_string(),
            });
        }

        match self {
            ConnectionRouter::Schema(router) => router.release(conn).await,
            ConnectionRouter::Database(router) => router.release(conn).await,
            ConnectionRouter::Discriminator(router) => router.release(conn).await,
        }
    }

    /// Borrow a connection not bound to any tenant (bootstrap, metadata, registry)
    pub async fn get_any_connection(&self) -> Result<RoutedConnection, DatabaseError> {
        match self {
            ConnectionRouter::Schema(router) => router.get_any_connection().await,
            ConnectionRouter::Database(router) => router.get_any_connection().await,
            ConnectionRouter::Discriminator(router) => router.get_any_connection().await,
        }
    }

    pub async fn release_any_connection(&self, conn: RoutedConnection) -> Result<(), DatabaseError> {
        if let Some(tenant) = conn.tenant().cloned() {
            warn!(
                "Discarding connection from pool '{}': routed for '{}' but released as untenanted",
                conn.pool().name(),
                tenant
            );
            conn.discard();
            return Err(DatabaseError::ConnectionMismatch {
                routed: tenant.to_string(),
                released: "<none>".to_string(),
            });
        }

        match self {
            ConnectionRouter::Schema(router) => router.release(conn).await,
            ConnectionRouter::Database(router) => router.release(conn).await,
            ConnectionRouter::Discriminator(router) => router.release(conn).await,
        }
    }

    /// Pool backing the untenanted connection; used by the database-backed tenant registry
    pub async fn default_pool(&self) -> Result<Arc<ConnectionPool>, DatabaseError> {
        match self {
            ConnectionRouter::Schema(router) => Ok(Arc::clone(router.pool())),
            ConnectionRouter::Database(router) => router.default_pool().await,
            ConnectionRouter::Discriminator(router) => Ok(Arc::clone(router.pool())),
        }
    }

    /// Create schemas and tables needed for `tables` under the active strategy
    pub async fn bootstrap(&self, tables: &[&str]) -> Result<(), DatabaseError> {
        match self {
            ConnectionRouter::Schema(router) => router.bootstrap(tables).await?,
            ConnectionRouter::Database(router) => router.bootstrap(tables).await?,
            ConnectionRouter::Discriminator(router) => router.bootstrap(tables).await?,
        }
        info!("Bootstrapped tables {:?} for {:?} strategy", tables, self.strategy());
        Ok(())
    }

    /// Round-trip to the default data source, and to every tenant database
    /// opened so far under the database strategy
    pub async fn health_check(&self) -> Result<(), DatabaseError> {
        let mut conn = self.get_any_connection().await?;
        let pinged = conn.ping().await;
        self.release_any_connection(conn).await?;
        pinged?;

        if let ConnectionRouter::Database(router) = self {
            router.manager().health_check().await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        match self {
            ConnectionRouter::Schema(router) => router.pool().close().await,
            ConnectionRouter::Database(router) => router.close().await,
            ConnectionRouter::Discriminator(router) => router.pool().close().await,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::config::DataSource;

    const STRATEGIES: [TenancyStrategy; 3] = [
        TenancyStrategy::Schema,
        TenancyStrategy::Database,
        TenancyStrategy::Discriminator,
    ];

    fn router(strategy: TenancyStrategy) -> ConnectionRouter {
        ConnectionRouter::from_config(&config(strategy), single_connection()).unwrap()
    }

    #[tokio::test]
    async fn builds_router_for_each_strategy() {
        for strategy in STRATEGIES {
            let router = router(strategy);
            assert_eq!(router.strategy(), strategy);
            router.bootstrap(&["tutorials"]).await.unwrap();
            router.health_check().await.unwrap();
        }
    }

    #[tokio::test]
    async fn unsupported_shared_source_is_rejected() {
        let mut config = config(TenancyStrategy::Schema);
        config.shared = DataSource::new("mysql://localhost/app");
        assert!(matches!(
            ConnectionRouter::from_config(&config, single_connection()),
            Err(DatabaseError::UnsupportedDriver(_))
        ));
    }

    #[tokio::test]
    async fn lists_tenants_with_own_storage() {
        let expected = vec![tenant("super-tenant"), tenant("tenant1"), tenant("tenant2")];
        assert_eq!(router(TenancyStrategy::Schema).tenants(), expected);
        assert_eq!(router(TenancyStrategy::Database).tenants(), expected);
        assert!(router(TenancyStrategy::Discriminator).tenants().is_empty());
    }

    #[tokio::test]
    async fn releasing_as_another_tenant_discards() {
        for strategy in STRATEGIES {
            let router = router(strategy);
            router.bootstrap(&["tutorials"]).await.unwrap();

            let mut conn = router.get_connection(&tenant("tenant1")).await.unwrap();
            let id = conn.id().await.unwrap();
            let pool = Arc::clone(conn.pool());
            let err = router
                .release_connection(&tenant("tenant2"), conn)
                .await
                .unwrap_err();

            assert!(matches!(err, DatabaseError::ConnectionMismatch { .. }));
            assert_eq!(pool.idle_count(), 0, "{:?}", strategy);

            let mut next = router.get_connection(&tenant("tenant1")).await.unwrap();
            assert_ne!(next.id().await.unwrap(), id, "{:?}", strategy);
        }
    }

    #[tokio::test]
    async fn untenanted_release_rejects_tenant_connections() {
        let router = router(TenancyStrategy::Discriminator);
        let conn = router.get_connection(&tenant("tenant1")).await.unwrap();
        assert!(router.release_any_connection(conn).await.is_err());
    }

    #[tokio::test]
    async fn dropped_connection_is_reset_before_reuse() {
        let router = router(TenancyStrategy::Schema);
        router.bootstrap(&["tutorials"]).await.unwrap();

        let mut conn = router.get_connection(&tenant("tenant1")).await.unwrap();
        let id = conn.id().await.unwrap();
        assert_eq!(conn.current_schema().await.unwrap(), "tenant1");
        drop(conn);

        let ConnectionRouter::Schema(schema) = &router else {
            unreachable!()
        };
        let mut idle = schema.pool().acquire().await.unwrap();
        assert_eq!(idle.id().await.unwrap(), id);
        assert_eq!(idle.current_schema().await.unwrap(), "public");
        drop(idle);

        let mut next = router.get_connection(&tenant("tenant2")).await.unwrap();
        assert_eq!(next.current_schema().await.unwrap(), "tenant2");
    }
}
