use std::sync::Arc;

use super::RoutedConnection;
use crate::database::driver::RowScope;
use crate::database::manager::DatabaseError;
use crate::database::pool::ConnectionPool;
use crate::tenancy::TenantId;

/// Shared tables with a tenant column. Connections are not mutated; isolation
/// comes from the [`RowScope::Tenant`] predicate carried by each connection.
pub struct DiscriminatorRouter {
    pool: Arc<ConnectionPool>,
}

impl DiscriminatorRouter {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub(super) async fn get_connection(&self, tenant: &TenantId) -> Result<RoutedConnection, DatabaseError> {
        let conn = self.pool.acquire().await?;
        Ok(RoutedConnection::new(
            conn,
            Some(tenant.clone()),
            RowScope::Tenant(tenant.clone()),
        ))
    }

    pub(super) async fn get_any_connection(&self) -> Result<RoutedConnection, DatabaseError> {
        let conn = self.pool.acquire().await?;
        Ok(RoutedConnection::new(conn, None, RowScope::All))
    }

    pub(super) async fn release(&self, conn: RoutedConnection) -> Result<(), DatabaseError> {
        conn.into_pooled().checkin();
        Ok(())
    }

    pub(super) async fn bootstrap(&self, tables: &[&str]) -> Result<(), DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        for table in tables {
            conn.ensure_table(table).await?;
        }
        conn.checkin();
        Ok(())
    }
}
