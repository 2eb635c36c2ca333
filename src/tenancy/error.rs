use thiserror::Error;

/// Errors raised while establishing or reading tenant identity
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TenancyError {
    #[error("Missing tenant header: {0}")]
    MissingTenantHeader(String),

    #[error("Invalid tenant identifier: {0}")]
    InvalidTenantId(String),

    #[error("Unknown tenant: {0}")]
    UnknownTenant(String),

    #[error("Tenant registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("Missing tenant in context")]
    MissingTenantInContext,

    #[error("Tenant context is not available outside a request scope")]
    ContextNotInScope,

    #[error("Session bound to tenant '{session}' cannot be used by tenant '{current}'")]
    SessionTenantMismatch { session: String, current: String },
}
