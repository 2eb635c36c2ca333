use std::collections::BTreeMap;
use std::time::Instant;
use tokio::time::timeout;

use crate::database::models::TenantAssignable;
use crate::observer::context::ObserverContext;
use crate::observer::error::ObserverError;
use crate::observer::implementations::TenantAssignmentObserver;
use crate::observer::traits::{Observer, ObserverRing};
use crate::types::Operation;

/// Runs registered observers in ring order, stopping at the first failure
pub struct ObserverPipeline {
    observers: BTreeMap<ObserverRing, Vec<Box<dyn Observer>>>,
}

impl ObserverPipeline {
    pub fn new() -> Self {
        Self {
            observers: BTreeMap::new(),
        }
    }

    /// Pipeline with the observers every tenant-scoped write needs
    pub fn with_defaults() -> Self {
        let mut pipeline = Self::new();
        pipeline.register_observer(Box::new(TenantAssignmentObserver));
        pipeline
    }

    pub fn register_observer(&mut self, observer: Box<dyn Observer>) {
        let ring = observer.ring();
        let name = observer.name();
        let ring_observers = self.observers.entry(ring).or_default();
        ring_observers.push(observer);
        ring_observers.sort_by_key(|o| o.priority());

        tracing::debug!("Registered observer '{}' for ring {:?}", name, ring);
    }

    pub fn len(&self) -> usize {
        self.observers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every applicable observer against `entity`. Nothing may be written
    /// when this returns an error.
    pub async fn run(
        &self,
        operation: Operation,
        table: &'static str,
        entity: &mut dyn TenantAssignable,
    ) -> Result<(), ObserverError> {
        let mut ctx = ObserverContext::new(operation, table, entity);

        for (&ring, observers) in &self.observers {
            ctx.current_ring = Some(ring);

            for observer in observers {
                if !observer.applies_to_operation(operation) || !observer.applies_to_table(table) {
                    tracing::trace!(
                        "Observer {} skipped for {:?} on {}",
                        observer.name(),
                        operation,
                        table
                    );
                    continue;
                }

                let observer_start = Instant::now();
                match timeout(observer.timeout(), observer.execute(&mut ctx)).await {
                    Ok(Ok(())) => {
                        tracing::debug!(
                            "Observer: {} completed successfully in {:?}",
                            observer.name(),
                            observer_start.elapsed()
                        );
                    }
                    Ok(Err(error)) => {
                        tracing::warn!("Observer: {} failed: {}", observer.name(), error);
                        return Err(error);
                    }
                    Err(_) => {
                        tracing::error!(
                            "Observer: {} timed out after {:?}",
                            observer.name(),
                            observer.timeout()
                        );
                        return Err(ObserverError::TimeoutError(format!(
                            "Observer {} timed out after {:?}",
                            observer.name(),
                            observer.timeout()
                        )));
                    }
                }
            }
        }

        tracing::trace!(
            "Observer pipeline finished {:?} on {} in {:?}",
            operation,
            table,
            ctx.start_time.elapsed()
        );
        Ok(())
    }
}

impl Default for ObserverPipeline {
    fn default() -> Self {
        Self::with_defaults()
    }
}
