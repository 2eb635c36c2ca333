use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::error::ApiError;
use crate::tenancy::{SharedValidator, TenancyError, TenantContext, TenantId};

/// Settings shared by every invocation of [`tenant_filter_middleware`]
#[derive(Clone)]
pub struct TenantFilter {
    header_name: String,
    validator: SharedValidator,
}

impl TenantFilter {
    pub fn new(header_name: impl Into<String>, validator: SharedValidator) -> Self {
        Self {
            header_name: header_name.into(),
            validator,
        }
    }

    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    /// Read, normalise and validate the tenant named by the request headers
    pub async fn resolve(&self, headers: &HeaderMap) -> Result<TenantId, TenancyError> {
        let raw = headers
            .get(self.header_name.as_str())
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| TenancyError::MissingTenantHeader(self.header_name.clone()))?;

        let tenant = TenantId::parse(raw)?;

        if !self.validator.is_valid(&tenant).await? {
            return Err(TenancyError::UnknownTenant(tenant.to_string()));
        }
        Ok(tenant)
    }
}

/// Resolves the request tenant and runs the rest of the stack inside a
/// [`TenantContext`] scope. Rejected requests never reach the handler; the
/// context is gone once the response is produced, whatever the outcome.
pub async fn tenant_filter_middleware(
    State(filter): State<TenantFilter>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let tenant = match filter.resolve(request.headers()).await {
        Ok(tenant) => tenant,
        Err(e) => {
            tracing::warn!(
                "Rejecting {} {}: {}",
                request.method(),
                request.uri().path(),
                e
            );
            return Err(e.into());
        }
    };

    tracing::debug!("Request bound to tenant '{}'", tenant);
    request.extensions_mut().insert(tenant.clone());

    Ok(TenantContext::scope(tenant, next.run(request)).await)
}
