use std::cell::RefCell;
use std::future::Future;

use super::error::TenancyError;
use super::tenant_id::TenantId;

tokio::task_local! {
    static CURRENT_TENANT: RefCell<Option<TenantId>>;
}

/// Request-scoped holder of the current tenant.
///
/// The cell lives in tokio task-local storage rather than a thread-local, so the
/// value follows the request task across worker threads. Outside of a scope
/// there is no current tenant and `set_current` fails.
///
/// Work handed to `tokio::spawn` does not inherit the cell; wrap it with
/// [`TenantContext::propagate`] to carry the tenant explicitly.
pub struct TenantContext;

impl TenantContext {
    /// Run `fut` with `tenant` as the current tenant. The value is cleared on
    /// every exit path: completion, error, panic unwinding or cancellation.
    pub async fn scope<F: Future>(tenant: TenantId, fut: F) -> F::Output {
        CURRENT_TENANT
            .scope(RefCell::new(None), async move {
                let _guard = ContextGuard::enter(tenant);
                fut.await
            })
            .await
    }

    /// Synchronous variant of [`TenantContext::scope`]
    pub fn sync_scope<R>(tenant: Option<TenantId>, f: impl FnOnce() -> R) -> R {
        CURRENT_TENANT.sync_scope(RefCell::new(tenant), f)
    }

    /// Wrap `fut` so it runs with the caller's current tenant (if any).
    /// Use this when handing tenant-bound work to another task.
    pub fn propagate<F: Future>(fut: F) -> impl Future<Output = F::Output> {
        let tenant = Self::current();
        CURRENT_TENANT.scope(RefCell::new(tenant), fut)
    }

    pub fn current() -> Option<TenantId> {
        CURRENT_TENANT
            .try_with(|cell| cell.borrow().clone())
            .ok()
            .flatten()
    }

    /// Current tenant or `MissingTenantInContext`
    pub fn require() -> Result<TenantId, TenancyError> {
        Self::current().ok_or(TenancyError::MissingTenantInContext)
    }

    pub fn set_current(tenant: TenantId) -> Result<(), TenancyError> {
        CURRENT_TENANT
            .try_with(|cell| {
                *cell.borrow_mut() = Some(tenant);
            })
            .map_err(|_| TenancyError::ContextNotInScope)
    }

    pub fn clear() {
        let _ = CURRENT_TENANT.try_with(|cell| cell.borrow_mut().take());
    }
}

/// Sets the tenant on creation and clears it on drop
struct ContextGuard;

impl ContextGuard {
    fn enter(tenant: TenantId) -> Self {
        // Only called from inside a freshly established scope
        let _ = TenantContext::set_current(tenant);
        ContextGuard
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        TenantContext::clear();
    }
}
