use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use super::error::TenancyError;
use super::tenant_id::TenantId;
use crate::database::pool::ConnectionPool;

/// Decides whether a tenant identifier is known and active.
///
/// Implementations may hit a database or a remote service; callers should not
/// assume the check is cheap.
#[async_trait]
pub trait TenantValidator: Send + Sync {
    async fn is_valid(&self, tenant: &TenantId) -> Result<bool, TenancyError>;
}

/// Validator backed by the tenant ids listed in configuration
#[derive(Debug, Clone, Default)]
pub struct RegistryValidator {
    known: HashSet<TenantId>,
}

impl RegistryValidator {
    pub fn new(known: impl IntoIterator<Item = TenantId>) -> Self {
        Self {
            known: known.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

#[async_trait]
impl TenantValidator for RegistryValidator {
    async fn is_valid(&self, tenant: &TenantId) -> Result<bool, TenancyError> {
        Ok(self.known.contains(tenant))
    }
}

/// Validator that looks tenants up in the `tenants` table of the default data source
pub struct DatabaseValidator {
    pool: Arc<ConnectionPool>,
}

impl DatabaseValidator {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantValidator for DatabaseValidator {
    async fn is_valid(&self, tenant: &TenantId) -> Result<bool, TenancyError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| TenancyError::RegistryUnavailable(e.to_string()))?;

        let active = conn
            .tenant_is_active(tenant.as_str())
            .await
            .map_err(|e| TenancyError::RegistryUnavailable(e.to_string()));

        // The lookup does not mutate session state
        conn.checkin();
        active
    }
}

pub type SharedValidator = Arc<dyn TenantValidator>;
