//! Castline API Server

use anyhow::Context;
use castline_api::{AppState, routes};
use castline_config::{CastlineConfig, LogFormat};
use castline_db::{PgPostRepo, PgPublishJobRepo, create_pool, run_migrations};
use castline_providers::ProviderRegistry;
use castline_scheduler::ScheduledSweeper;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser)]
#[command(name = "castline-server")]
#[command(about = "Castline publish pipeline API server", long_about = None)]
struct Args {
    /// Path to castline.kdl
    #[arg(short, long, env = "CASTLINE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = CastlineConfig::load(args.config.as_deref())
        .with_context(|| format!("failed to load config {:?}", args.config))?;
    config.apply_env()?;

    init_tracing(config.logging.format);

    let origin = match config.server.public_origin.clone() {
        Some(origin) => origin,
        None => {
            warn!("PUBLIC_ORIGIN is not set; media URLs will point at http://localhost");
            Url::parse("http://localhost")?
        }
    };

    info!("Connecting to database...");
    let pool = create_pool(&config.database.url, config.database.max_connections).await?;
    run_migrations(&pool).await?;
    info!("Database connected");

    let registry = ProviderRegistry::from_config(&config.providers)?;
    if registry.is_empty() {
        warn!("No provider adapters configured; every provider will report not_configured");
    }

    let state = AppState::new(
        Arc::new(PgPostRepo::new(pool.clone())),
        Arc::new(PgPublishJobRepo::new(pool)),
        registry,
        &config,
        origin,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = if config.sweeper.enabled {
        let sweeper = ScheduledSweeper::new(
            state.posts.clone(),
            state.claimer.clone(),
            state.runner.clone(),
            config.sweeper.clone(),
        );
        Some(tokio::spawn(async move { sweeper.run(shutdown_rx).await }))
    } else {
        info!("Scheduled post sweeper disabled");
        None
    };

    let hub = state.hub.clone();
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = config.server.bind;
    info!("Starting server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        info!("Shutting down");
        let _ = shutdown_tx.send(true);
        // Open sockets hold the server open until their queues close.
        hub.shutdown();
    })
    .await?;

    if let Some(sweeper) = sweeper {
        if let Err(e) = sweeper.await {
            warn!(error = %e, "Sweeper task ended abnormally");
        }
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
