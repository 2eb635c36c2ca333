use std::time::Instant;

use crate::database::models::TenantAssignable;
use crate::observer::traits::ObserverRing;
use crate::types::Operation;

/// State handed to every observer for one entity on its way to storage
pub struct ObserverContext<'a> {
    pub operation: Operation,
    pub table: &'static str,
    pub entity: &'a mut dyn TenantAssignable,

    pub start_time: Instant,
    pub current_ring: Option<ObserverRing>,
}

impl<'a> ObserverContext<'a> {
    pub fn new(
        operation: Operation,
        table: &'static str,
        entity: &'a mut dyn TenantAssignable,
    ) -> Self {
        Self {
            operation,
            table,
            entity,
            start_time: Instant::now(),
            current_ring: None,
        }
    }
}
