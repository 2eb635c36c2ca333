use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::RoutedConnection;
use crate::database::driver::RowScope;
use crate::database::manager::DatabaseError;
use crate::database::pool::ConnectionPool;
use crate::tenancy::TenantId;

/// Schema-per-tenant routing over one shared pool
pub struct SchemaRouter {
    pool: Arc<ConnectionPool>,
    default_schema: String,
    schemas: HashMap<TenantId, String>,
}

impl SchemaRouter {
    pub fn new(
        pool: Arc<ConnectionPool>,
        default_schema: String,
        schemas: HashMap<TenantId, String>,
    ) -> Self {
        Self {
            pool,
            default_schema,
            schemas,
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn tenants(&self) -> impl Iterator<Item = &TenantId> {
        self.schemas.keys()
    }

    /// Schema holding `tenant`'s tables
    pub fn schema_for(&self, tenant: &TenantId) -> String {
        self.schemas
            .get(tenant)
            .cloned()
            .unwrap_or_else(|| tenant.to_identifier())
    }

    pub(super) async fn get_connection(&self, tenant: &TenantId) -> Result<RoutedConnection, DatabaseError> {
        let schema = self.schema_for(tenant);
        let mut conn = self.pool.acquire().await?;

        if let Err(e) = conn.set_schema(&schema).await {
            warn!(
                "Switching connection to schema '{}' for tenant '{}' failed, discarding: {}",
                schema, tenant, e
            );
            conn.discard();
            return Err(DatabaseError::SchemaSwitch {
                schema,
                reason: e.to_string(),
            });
        }

        debug!("Connection switched to schema '{}' for tenant '{}'", schema, tenant);
        Ok(RoutedConnection::new(conn, Some(tenant.clone()), RowScope::All))
    }

    pub(super) async fn get_any_connection(&self) -> Result<RoutedConnection, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        if let Err(e) = conn.set_schema(&self.default_schema).await {
            conn.discard();
            return Err(DatabaseError::SchemaSwitch {
                schema: self.default_schema.clone(),
                reason: e.to_string(),
            });
        }
        Ok(RoutedConnection::new(conn, None, RowScope::All))
    }

    /// Reset to the default schema, then check in. A connection whose reset
    /// fails is closed and the failure reported. The pool repeats the reset on
    /// checkin, which also covers connections dropped without `release`.
    pub(super) async fn release(&self, conn: RoutedConnection) -> Result<(), DatabaseError> {
        let mut conn = conn.into_pooled();
        match conn.set_schema(&self.default_schema).await {
            Ok(()) => {
                conn.checkin();
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Resetting connection to schema '{}' failed, discarding: {}",
                    self.default_schema, e
                );
                conn.discard();
                Err(DatabaseError::SchemaSwitch {
                    schema: self.default_schema.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    pub(super) async fn bootstrap(&self, tables: &[&str]) -> Result<(), DatabaseError> {
        let mut schemas: BTreeSet<&str> = self.schemas.values().map(String::as_str).collect();
        schemas.insert(&self.default_schema);

        let mut conn = self.pool.acquire().await?;
        for schema in schemas {
            conn.ensure_schema(schema).await?;
            conn.set_schema(schema).await?;
            for table in tables {
                conn.ensure_table(table).await?;
            }
            info!("Prepared schema '{}'", schema);
        }
        conn.set_schema(&self.default_schema).await?;
        conn.checkin();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::DataSource;
    use crate::database::pool::scratch_url;
    use sqlx::{Connection as _, SqliteConnection};

    fn router_at(url: &str) -> SchemaRouter {
        let mut schemas = HashMap::new();
        schemas.insert(tenant("tenant1"), "tenant1".to_string());
        schemas.insert(tenant("tenant-two"), "tenant_two".to_string());
        SchemaRouter::new(
            ConnectionPool::resetting_schema(
                "shared",
                DataSource::new(url),
                &single_connection(),
                "public",
            )
            .unwrap(),
            "public".to_string(),
            schemas,
        )
    }

    fn router() -> SchemaRouter {
        router_at(&scratch_url("schema"))
    }

    #[tokio::test]
    async fn reused_connection_observes_new_tenant_schema() {
        let router = router();
        router.bootstrap(&["tutorials"]).await.unwrap();

        let mut first = router.get_connection(&tenant("tenant1")).await.unwrap();
        let id = first.id().await.unwrap();
        assert_eq!(first.current_schema().await.unwrap(), "tenant1");
        router.release(first).await.unwrap();

        let mut second = router.get_connection(&tenant("tenant-two")).await.unwrap();
        assert_eq!(second.id().await.unwrap(), id);
        assert_eq!(second.current_schema().await.unwrap(), "tenant_two");
    }

    #[tokio::test]
    async fn release_resets_to_default_schema() {
        let router = router();
        router.bootstrap(&["tutorials"]).await.unwrap();

        let conn = router.get_connection(&tenant("tenant1")).await.unwrap();
        router.release(conn).await.unwrap();

        let mut idle = router.pool().acquire().await.unwrap();
        assert_eq!(idle.current_schema().await.unwrap(), "public");
    }

    #[tokio::test]
    async fn failed_switch_discards_connection() {
        let router = router();
        // No bootstrap: the tenant schema does not exist yet
        let err = router.get_connection(&tenant("tenant1")).await.err().unwrap();

        assert!(matches!(err, DatabaseError::SchemaSwitch { .. }));
        assert_eq!(router.pool().idle_count(), 0);
        assert_eq!(router.pool().size(), 0);
    }

    #[tokio::test]
    async fn failed_reset_discards_connection() {
        let url = scratch_url("schema");
        let router = router_at(&url);
        router.bootstrap(&["tutorials"]).await.unwrap();

        let mut conn = router.get_connection(&tenant("tenant1")).await.unwrap();
        let id = conn.id().await.unwrap();

        // Unregister the default schema behind the pool's back
        let mut admin = SqliteConnection::connect(&url).await.unwrap();
        sqlx::query("DELETE FROM schemata WHERE name = 'public'")
            .execute(&mut admin)
            .await
            .unwrap();

        let err = router.release(conn).await.unwrap_err();
        assert!(matches!(err, DatabaseError::SchemaSwitch { ref schema, .. } if schema == "public"));
        assert_eq!(router.pool().idle_count(), 0);
        assert_eq!(router.pool().size(), 0);

        // New sessions re-register the default schema
        let mut next = router.get_connection(&tenant("tenant1")).await.unwrap();
        assert_ne!(next.id().await.unwrap(), id);
        assert_eq!(next.current_schema().await.unwrap(), "tenant1");
    }

    #[tokio::test]
    async fn dropped_connection_with_failed_reset_is_closed() {
        let url = scratch_url("schema");
        let router = router_at(&url);
        router.bootstrap(&["tutorials"]).await.unwrap();

        let mut conn = router.get_connection(&tenant("tenant1")).await.unwrap();
        let id = conn.id().await.unwrap();

        let mut admin = SqliteConnection::connect(&url).await.unwrap();
        sqlx::query("DELETE FROM schemata WHERE name = 'public'")
            .execute(&mut admin)
            .await
            .unwrap();
        drop(conn);

        let mut next = router.pool().acquire().await.unwrap();
        assert_ne!(next.id().await.unwrap(), id);
        assert_eq!(next.current_schema().await.unwrap(), "public");
    }

    #[tokio::test]
    async fn unmapped_tenants_use_identifier_schema() {
        let router = SchemaRouter::new(
            ConnectionPool::new("shared", DataSource::new("sqlite::memory:"), &single_connection())
                .unwrap(),
            "public".to_string(),
            HashMap::from([(tenant("tenant-two"), "tenant_two".to_string())]),
        );
        assert_eq!(router.schema_for(&tenant("new-tenant")), "new_tenant");
        assert_eq!(router.schema_for(&tenant("tenant-two")), "tenant_two");
    }
}
