// Tenant identity: identifiers, request context, validation and resolution

pub mod context;
pub mod error;
pub mod resolver;
pub mod tenant_id;
pub mod validator;

pub use context::TenantContext;
pub use error::TenancyError;
pub use resolver::TenantIdentifierResolver;
pub use tenant_id::TenantId;
pub use validator::{DatabaseValidator, RegistryValidator, SharedValidator, TenantValidator};
