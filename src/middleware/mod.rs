pub mod response;
pub mod tenant_filter;

pub use response::{ApiResponse, ApiResult};
pub use tenant_filter::{tenant_filter_middleware, TenantFilter};
