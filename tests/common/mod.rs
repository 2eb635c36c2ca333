#![allow(dead_code)]

use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use tenancy_api_rust::app::App;
use tenancy_api_rust::config::{DataSource, TenancyConfig, TenancyStrategy, TenantDescriptor};
use tenancy_api_rust::database::{ConnectionRouter, PoolOptions, RowScope};
use tenancy_api_rust::tenancy::TenantId;

pub const STRATEGIES: [TenancyStrategy; 3] = [
    TenancyStrategy::Schema,
    TenancyStrategy::Database,
    TenancyStrategy::Discriminator,
];

pub const SUPER_TENANT: &str = "super-tenant";

/// In-process service backed by throwaway SQLite databases
pub struct TestApp {
    pub app: App,
    pub router: Router,
    pub strategy: TenancyStrategy,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestResponse {
    pub fn data(&self) -> &Value {
        &self.body["data"]
    }

    pub fn id(&self) -> String {
        self.data()["id"].as_str().unwrap_or_default().to_string()
    }
}

fn tenant(name: &str) -> TenantId {
    TenantId::parse(name).expect("valid tenant id")
}

fn scratch_url(label: &str) -> String {
    format!(
        "sqlite://{}/{}-{}.db",
        std::env::temp_dir().display(),
        label,
        uuid::Uuid::new_v4().simple()
    )
}

pub fn tenancy_config(strategy: TenancyStrategy) -> TenancyConfig {
    let mut config = TenancyConfig::new(
        strategy,
        DataSource::new(scratch_url("app")),
        tenant(SUPER_TENANT),
    );
    for name in ["tenant1", "tenant2"] {
        let mut descriptor = TenantDescriptor::new(tenant(name));
        descriptor.url = Some(scratch_url(name));
        config = config.with_tenant(descriptor);
    }
    config
}

pub async fn spawn(strategy: TenancyStrategy) -> Result<TestApp> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let options = PoolOptions {
        max_connections: 4,
        acquire_timeout: Duration::from_secs(2),
    };

    let app = App::bootstrap(&tenancy_config(strategy), options)
        .await
        .context("failed to bootstrap app")?;
    let router = app.router();

    Ok(TestApp {
        app,
        router,
        strategy,
    })
}

impl TestApp {
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        tenant: Option<&str>,
        body: Option<Value>,
    ) -> Result<TestResponse> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tenant) = tenant {
            builder = builder.header("X-Tenant-ID", tenant);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body)?))?,
            None => builder.body(Body::empty())?,
        };

        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .with_context(|| format!("non-JSON body: {}", String::from_utf8_lossy(&bytes)))?
        };

        Ok(TestResponse { status, body })
    }

    pub async fn create(&self, tenant: &str, title: &str) -> Result<TestResponse> {
        self.send(
            Method::POST,
            "/api/tutorials",
            Some(tenant),
            Some(serde_json::json!({ "title": title, "description": "created in tests" })),
        )
        .await
    }

    pub async fn get(&self, tenant: &str, id: &str) -> Result<TestResponse> {
        self.send(Method::GET, &format!("/api/tutorials/{}", id), Some(tenant), None)
            .await
    }

    /// Rows of every tenant, read behind the tenant filter
    pub async fn stored_tutorials(&self) -> Result<i64> {
        let router: &ConnectionRouter = self.app.state.persistence.router();

        if self.strategy == TenancyStrategy::Discriminator {
            let mut conn = router.get_any_connection().await?;
            let count = conn.count("tutorials", &RowScope::All).await;
            router.release_any_connection(conn).await?;
            return Ok(count?);
        }

        let mut total = 0;
        for tenant in router.tenants() {
            let mut conn = router.get_connection(&tenant).await?;
            let count = conn.count("tutorials", &RowScope::All).await;
            router.release_connection(&tenant, conn).await?;
            total += count?;
        }
        Ok(total)
    }
}
