//! Shelfgate -- object storage gateway for the Shelf book-reading service.
//!
//! Startup wires the configured driver, session store and token verifier
//! into the shared [`shelfgate::AppState`] and serves until SIGTERM or
//! SIGINT; shutdown only stops accepting connections and drains
//! in-flight requests.

use std::sync::Arc;

use clap::Parser;
use tracing::info;

/// Command-line arguments for the Shelfgate server.
#[derive(Parser, Debug)]
#[command(
    name = "shelfgate",
    version,
    about = "Object storage gateway for the Shelf book-reading service"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "shelfgate.example.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = shelfgate::config::load_config(&cli.config)?;

    // Initialize tracing / logging per config; RUST_LOG wins when set.
    // Nothing is logged before this point.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.clone()));
    if config.logging.format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    info!("Configuration loaded from {}", cli.config);

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    // Initialize Prometheus metrics recorder and register metric descriptions.
    if config.observability.metrics {
        shelfgate::metrics::init_metrics();
        shelfgate::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    // Initialize the object store driver.
    let driver: Arc<dyn shelfgate::storage::driver::ObjectStoreDriver> =
        match config.storage.driver.as_str() {
            "s3" => {
                let s3_config = config.storage.s3.as_ref().ok_or_else(|| {
                    anyhow::anyhow!(
                        "storage.driver is 's3' but the storage.s3 config section is missing"
                    )
                })?;
                Arc::new(shelfgate::storage::s3::S3Driver::new(s3_config).await?)
            }
            "memory" => {
                info!("In-memory storage driver initialized (state is not durable)");
                Arc::new(shelfgate::storage::memory::MemoryDriver::new())
            }
            other => anyhow::bail!("unknown storage.driver: {other}"),
        };

    // Initialize the multipart session side-table.
    let sessions: Arc<dyn shelfgate::session::store::SessionStore> =
        match config.sessions.engine.as_str() {
            "sqlite" => {
                let path = &config.sessions.path;
                if let Some(parent) = std::path::Path::new(path).parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let store = shelfgate::session::sqlite::SqliteSessionStore::new(path)?;
                info!("SQLite session store initialized at {}", path);
                Arc::new(store)
            }
            "memory" => {
                info!("In-memory session store initialized");
                Arc::new(shelfgate::session::memory::MemorySessionStore::new())
            }
            other => anyhow::bail!("unknown sessions.engine: {other}"),
        };

    // Token verifier per auth config.
    let verifier = shelfgate::auth::build_verifier(&config.auth)?;
    info!("Token verifier initialized: mode={}", config.auth.mode);

    let state = Arc::new(shelfgate::AppState::new(config, driver, sessions, verifier));
    let app = shelfgate::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Shelfgate listening on {}", bind_addr);

    // Graceful shutdown: stop accepting new connections, drain in-flight
    // requests, exit.
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shelfgate shut down");

    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
