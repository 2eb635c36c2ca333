use axum::{
    middleware,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::config::TenancyConfig;
use crate::database::manager::DatabaseError;
use crate::database::models::{TenantEntity, Tutorial};
use crate::database::pool::PoolOptions;
use crate::database::repository::{Persistence, TenantRepository};
use crate::database::routing::ConnectionRouter;
use crate::handlers;
use crate::middleware::{tenant_filter_middleware, TenantFilter};
use crate::observer::ObserverPipeline;
use crate::tenancy::{DatabaseValidator, RegistryValidator, SharedValidator, TenantIdentifierResolver};

/// Tables every deployment needs, created at startup
pub const TABLES: &[&str] = &[Tutorial::TABLE];

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub persistence: Persistence,
    pub tutorials: TenantRepository<Tutorial>,
}

/// Fully wired service, ready to be served
pub struct App {
    pub state: AppState,
    pub filter: TenantFilter,
}

impl App {
    /// Build routing, storage and tenant validation from configuration and
    /// prepare the tables
    pub async fn bootstrap(
        tenancy: &TenancyConfig,
        options: PoolOptions,
    ) -> Result<Self, DatabaseError> {
        let router = ConnectionRouter::from_config(tenancy, options)?;
        router.bootstrap(TABLES).await?;

        let validator: SharedValidator = if tenancy.registry_in_database {
            info!("Validating tenants against the tenants table");
            Arc::new(DatabaseValidator::new(router.default_pool().await?))
        } else {
            let registry = RegistryValidator::new(tenancy.known_tenants());
            info!("Validating tenants against {} configured tenants", registry.len());
            Arc::new(registry)
        };

        let persistence = Persistence::new(
            Arc::new(router),
            TenantIdentifierResolver::new(tenancy.default_tenant.clone()),
            Arc::new(ObserverPipeline::with_defaults()),
            tenancy.super_tenant.clone(),
        );

        Ok(Self {
            state: AppState {
                tutorials: persistence.repository(),
                persistence,
            },
            filter: TenantFilter::new(tenancy.header_name.clone(), validator),
        })
    }

    pub fn router(&self) -> Router {
        Router::new()
            // Public
            .route("/health", get(handlers::health))
            // Tenant-scoped API
            .merge(tutorial_routes(self.filter.clone()))
            // Global middleware
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    pub async fn shutdown(&self) {
        self.state.persistence.router().close().await;
    }
}

fn tutorial_routes(filter: TenantFilter) -> Router<AppState> {
    use handlers::tutorials;

    Router::new()
        .route(
            "/api/tutorials",
            get(tutorials::list)
                .post(tutorials::create)
                .delete(tutorials::delete_all),
        )
        .route("/api/tutorials/count", get(tutorials::count))
        .route(
            "/api/tutorials/:id",
            get(tutorials::get)
                .put(tutorials::update)
                .delete(tutorials::delete),
        )
        .route_layer(middleware::from_fn_with_state(filter, tenant_filter_middleware))
}
