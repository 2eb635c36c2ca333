use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use tenancy_api_rust::app::App;
use tenancy_api_rust::config;

#[derive(Debug, Parser)]
#[command(name = "tenancy-api", version, about = "Multi-tenant data access service")]
struct Args {
    /// Port to listen on (overrides API_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Tenancy YAML file (overrides TENANCY_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, TENANCY_*, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    // Initialize configuration (this loads the config singleton)
    let config = config::config();
    tracing::info!("Starting tenancy API in {:?} mode", config.environment);

    let tenancy = config.resolve_tenancy(args.config)?;
    tracing::info!(
        "Using {} backend at {}",
        tenancy.shared.scheme()?,
        tenancy.shared.redacted_url()
    );

    let app = App::bootstrap(&tenancy, config.database.pool_options()).await?;

    let port = args.port.unwrap_or(config.api.port);
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {}: {}", bind_addr, e))?;

    tracing::info!(
        "Listening on http://{} ({:?} strategy, tenant header '{}')",
        bind_addr,
        tenancy.strategy,
        tenancy.header_name
    );

    axum::serve(listener, app.router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    app.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
