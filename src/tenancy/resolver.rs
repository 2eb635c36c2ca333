use tracing::warn;

use super::context::TenantContext;
use super::error::TenancyError;
use super::tenant_id::TenantId;

/// Exposes the request's tenant to the connection layer.
///
/// Falls back to the default tenant (the public/bootstrap identity) when no
/// request context is active.
#[derive(Debug, Clone)]
pub struct TenantIdentifierResolver {
    default_tenant: TenantId,
}

impl TenantIdentifierResolver {
    pub fn new(default_tenant: TenantId) -> Self {
        Self { default_tenant }
    }

    pub fn default_tenant(&self) -> &TenantId {
        &self.default_tenant
    }

    pub fn resolve_current(&self) -> TenantId {
        TenantContext::current().unwrap_or_else(|| self.default_tenant.clone())
    }

    /// Sessions opened for one tenant must never be reused for another
    pub fn validate_existing_sessions(&self) -> bool {
        true
    }

    /// Bind a unit of work to `requested`.
    ///
    /// When a request context is active it must agree with the tenant the caller
    /// passed explicitly; a disagreement is a consistency error and the work is
    /// aborted instead of silently running against the wrong tenant.
    pub fn bind(&self, requested: &TenantId) -> Result<TenantId, TenancyError> {
        if let Some(current) = TenantContext::current() {
            if self.validate_existing_sessions() && &current != requested {
                warn!(
                    "Rejecting session for tenant '{}' inside request of tenant '{}'",
                    requested, current
                );
                return Err(TenancyError::SessionTenantMismatch {
                    session: requested.to_string(),
                    current: current.to_string(),
                });
            }
        }
        Ok(requested.clone())
    }
}
