// Ring 4: Enrichment - stamps the owning tenant on new records
use async_trait::async_trait;

use crate::observer::context::ObserverContext;
use crate::observer::error::ObserverError;
use crate::observer::traits::{Observer, ObserverRing};
use crate::tenancy::TenantContext;
use crate::types::Operation;

/// Sets the tenant of a record from the request context right before its
/// first write. A record that already names a tenant is left untouched.
#[derive(Default)]
pub struct TenantAssignmentObserver;

#[async_trait]
impl Observer for TenantAssignmentObserver {
    fn name(&self) -> &'static str {
        "TenantAssignmentObserver"
    }

    fn ring(&self) -> ObserverRing {
        ObserverRing::Enrichment
    }

    fn applies_to_operation(&self, op: Operation) -> bool {
        op == Operation::Create
    }

    async fn execute(&self, ctx: &mut ObserverContext<'_>) -> Result<(), ObserverError> {
        if ctx.entity.tenant().is_some() {
            return Ok(());
        }

        match TenantContext::current() {
            Some(tenant) => {
                tracing::debug!("Assigning tenant '{}' to new {} record", tenant, ctx.table);
                ctx.entity.set_tenant(tenant);
                Ok(())
            }
            None => Err(ObserverError::MissingTenant {
                operation: format!("{:?}", ctx.operation),
                table: ctx.table.to_string(),
            }),
        }
    }
}
