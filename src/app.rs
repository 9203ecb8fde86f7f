//! Application bootstrap: pool, engine, lifecycle subscribers, HTTP server.

use crate::config::Config;
use crate::data::UploadStore;
use crate::data::uploads::PgUploadStore;
use crate::engine::MemoryEngine;
use crate::provenance;
use crate::state::AppState;
use crate::web::create_router;
use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Main application struct containing all necessary components
pub struct App {
    config: Arc<Config>,
    state: AppState,
}

impl App {
    /// Create a new App instance with all necessary components initialized
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        let config = Arc::new(config);

        // Create database connection pool
        let db_pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(4))
            .idle_timeout(Duration::from_secs(60 * 2))
            .connect(&config.database_url)
            .await
            .context("Failed to create database pool")?;

        info!(
            min_connections = 0,
            max_connections = 4,
            acquire_timeout = "4s",
            idle_timeout = "2m",
            "database pool established"
        );

        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .context("Failed to run database migrations")?;

        let store: Arc<dyn UploadStore> = Arc::new(PgUploadStore::new(db_pool));
        let engine = Arc::new(MemoryEngine::new(store.clone(), config.max_upload_size));
        info!(max_upload_size = config.max_upload_size, "using upload limit");

        // Lifecycle subscribers: structured event log + uploader IP recorder.
        // Each owns an independent queue off the engine's broadcast channel.
        tokio::spawn(provenance::log_upload_events(engine.events().subscribe()));
        tokio::spawn(provenance::record_uploader_ips(
            engine.events().subscribe(),
            store,
        ));

        let state = AppState::new(config.clone(), engine);

        Ok(App { config, state })
    }

    /// Bind and serve until a shutdown signal arrives.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let router = create_router(self.state.clone());
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;

        info!(%addr, base_path = %self.config.base_path, "upload gateway listening");

        let drain = Duration::from_secs(self.config.shutdown_timeout);
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal(drain))
        .await
        .context("server error")
    }
}

async fn shutdown_signal(drain: Duration) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, draining in-flight requests");

    // Bound the drain: if connections linger past the deadline, exit anyway.
    tokio::spawn(async move {
        tokio::time::sleep(drain).await;
        warn!(timeout_secs = drain.as_secs(), "graceful shutdown timed out");
        std::process::exit(1);
    });
}
