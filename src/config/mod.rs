use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::database::manager::DatabaseError;
use crate::database::pool::PoolOptions;
use crate::tenancy::TenantId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub tenancy: TenancyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    /// Seconds to wait for a free pool slot
    pub connection_timeout: u64,
}

impl DatabaseConfig {
    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            max_connections: self.max_connections,
            acquire_timeout: Duration::from_secs(self.connection_timeout),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
}

/// Isolation strategy, fixed for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenancyStrategy {
    Schema,
    Database,
    Discriminator,
}

impl std::str::FromStr for TenancyStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "schema" => Ok(TenancyStrategy::Schema),
            "database" | "db" => Ok(TenancyStrategy::Database),
            "discriminator" | "gdm" | "column" => Ok(TenancyStrategy::Discriminator),
            other => Err(format!("unknown tenancy strategy '{}'", other)),
        }
    }
}

/// Connection settings for one database
#[derive(Clone, Serialize, Deserialize)]
pub struct DataSource {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl DataSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    fn parsed(&self) -> Result<url::Url, DatabaseError> {
        url::Url::parse(&self.url).map_err(|_| DatabaseError::InvalidDatabaseUrl(self.redacted_url()))
    }

    pub fn scheme(&self) -> Result<String, DatabaseError> {
        Ok(self.parsed()?.scheme().to_string())
    }

    /// URL safe to log: any password is masked
    pub fn redacted_url(&self) -> String {
        match url::Url::parse(&self.url) {
            Ok(mut url) => {
                if url.password().is_some() {
                    let _ = url.set_password(Some("***"));
                }
                url.to_string()
            }
            Err(_) => "<invalid url>".to_string(),
        }
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource")
            .field("url", &self.redacted_url())
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// One tenant as declared in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantDescriptor {
    pub id: TenantId,
    /// Dedicated database (database strategy)
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Schema name (schema strategy); derived from the id when absent
    #[serde(default)]
    pub schema: Option<String>,
}

impl TenantDescriptor {
    pub fn new(id: TenantId) -> Self {
        Self {
            id,
            url: None,
            username: None,
            password: None,
            schema: None,
        }
    }

    pub fn data_source(&self) -> Option<DataSource> {
        self.url.as_ref().map(|url| DataSource {
            url: url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        })
    }

    pub fn schema_name(&self) -> String {
        self.schema.clone().unwrap_or_else(|| self.id.to_identifier())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenancyConfig {
    pub strategy: TenancyStrategy,
    #[serde(default = "default_header_name")]
    pub header_name: String,
    pub super_tenant: TenantId,
    /// Identity used when no request context is active
    #[serde(default = "default_tenant")]
    pub default_tenant: TenantId,
    #[serde(default = "default_schema")]
    pub default_schema: String,
    /// Shared database (schema and discriminator strategies) and the default
    /// pool used for bootstrap under the database strategy
    pub shared: DataSource,
    #[serde(default)]
    pub tenants: Vec<TenantDescriptor>,
    /// Check tenants against the `tenants` table instead of this file
    #[serde(default)]
    pub registry_in_database: bool,
}

fn default_header_name() -> String {
    "X-Tenant-ID".to_string()
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_tenant() -> TenantId {
    TenantId::parse("public").expect("literal tenant id is valid")
}

fn default_super_tenant() -> TenantId {
    TenantId::parse("super-tenant").expect("literal tenant id is valid")
}

impl TenancyConfig {
    pub fn new(strategy: TenancyStrategy, shared: DataSource, super_tenant: TenantId) -> Self {
        Self {
            strategy,
            header_name: default_header_name(),
            super_tenant,
            default_tenant: default_tenant(),
            default_schema: default_schema(),
            shared,
            tenants: Vec::new(),
            registry_in_database: false,
        }
    }

    pub fn with_tenant(mut self, tenant: TenantDescriptor) -> Self {
        self.tenants.push(tenant);
        self
    }

    /// Every identifier the configuration registry accepts (super tenant included)
    pub fn known_tenants(&self) -> Vec<TenantId> {
        let mut ids: Vec<TenantId> = self.tenants.iter().map(|t| t.id.clone()).collect();
        if !ids.contains(&self.super_tenant) {
            ids.push(self.super_tenant.clone());
        }
        ids
    }

    pub fn schema_mappings(&self) -> HashMap<TenantId, String> {
        let mut mappings: HashMap<TenantId, String> = self
            .tenants
            .iter()
            .map(|t| (t.id.clone(), t.schema_name()))
            .collect();
        mappings
            .entry(self.super_tenant.clone())
            .or_insert_with(|| self.super_tenant.to_identifier());
        mappings
    }

    pub fn data_sources(&self) -> HashMap<TenantId, DataSource> {
        self.tenants
            .iter()
            .filter_map(|t| t.data_source().map(|source| (t.id.clone(), source)))
            .collect()
    }

    /// Load from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e))?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> anyhow::Result<Self> {
        let config: TenancyConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the active strategy cannot route with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.strategy == TenancyStrategy::Database {
            let missing: Vec<&str> = self
                .tenants
                .iter()
                .filter(|t| t.url.is_none())
                .map(|t| t.id.as_str())
                .collect();
            if !missing.is_empty() {
                anyhow::bail!(
                    "database strategy needs a url for every tenant; missing for: {}",
                    missing.join(", ")
                );
            }
        }
        Ok(())
    }

    /// Build from `TENANCY_*` and `DATABASE_URL` environment variables
    fn from_env(default_url: &str) -> Self {
        let strategy = env::var("TENANCY_STRATEGY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(TenancyStrategy::Discriminator);

        let super_tenant = env::var("TENANCY_SUPER_TENANT")
            .ok()
            .and_then(|v| TenantId::parse(&v).ok())
            .unwrap_or_else(default_super_tenant);

        let shared = DataSource {
            url: env::var("DATABASE_URL").unwrap_or_else(|_| default_url.to_string()),
            username: env::var("DATABASE_USERNAME").ok(),
            password: env::var("DATABASE_PASSWORD").ok(),
        };

        let mut config = Self::new(strategy, shared, super_tenant);
        if let Ok(v) = env::var("TENANCY_HEADER") {
            config.header_name = v;
        }
        if let Ok(v) = env::var("TENANCY_DEFAULT_SCHEMA") {
            config.default_schema = v;
        }
        if let Ok(v) = env::var("TENANCY_REGISTRY_IN_DATABASE") {
            config.registry_in_database = v.parse().unwrap_or(false);
        }
        if let Ok(v) = env::var("TENANCY_TENANTS") {
            config.tenants = v
                .split(',')
                .filter_map(|s| TenantId::parse(s).ok())
                .map(TenantDescriptor::new)
                .collect();
        }
        config
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }

        if let Some(port) = env::var("API_PORT")
            .ok()
            .or_else(|| env::var("PORT").ok())
            .and_then(|s| s.parse::<u16>().ok())
        {
            self.api.port = port;
        }

        self
    }

    /// Tenancy settings for this process. A tenancy file, given explicitly or
    /// through `TENANCY_CONFIG`, replaces the env-derived section wholesale;
    /// a file that cannot be loaded is an error.
    pub fn resolve_tenancy(&self, path: Option<PathBuf>) -> anyhow::Result<TenancyConfig> {
        let path = path.or_else(|| env::var_os("TENANCY_CONFIG").map(PathBuf::from));
        let tenancy = match path {
            Some(path) => TenancyConfig::from_yaml_file(&path)?,
            None => self.tenancy.clone(),
        };
        tenancy.validate()?;
        Ok(tenancy)
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                max_connections: 10,
                connection_timeout: 30,
            },
            api: ApiConfig { port: 3000 },
            tenancy: TenancyConfig::from_env("sqlite://tenancy.db"),
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            database: DatabaseConfig {
                max_connections: 20,
                connection_timeout: 10,
            },
            api: ApiConfig { port: 8080 },
            tenancy: TenancyConfig::from_env("postgres://localhost:5432/app"),
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            database: DatabaseConfig {
                max_connections: 50,
                connection_timeout: 5,
            },
            api: ApiConfig { port: 8080 },
            tenancy: TenancyConfig::from_env("postgres://localhost:5432/app"),
        }
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}
