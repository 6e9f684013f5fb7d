//! Varlock server entry point.
//!
//! Bootstraps the PostgreSQL pool, key store, envelope cipher, and the
//! read-repair worker pool, then starts the Axum HTTP server with graceful
//! shutdown. On shutdown the rotation queue is drained before exit.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing::info;

use varlock_core::envelope::EnvelopeCipher;
use varlock_core::keyring::{EncryptionKey, KeyRegistry, KeyStore};
use varlock_core::rotator::{self, RotatorConfig};

use varlock_server::config::ServerConfig;
use varlock_server::keystore::PgKeyStore;
use varlock_server::rotation::PgRepairStore;
use varlock_server::routes;
use varlock_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!("Varlock starting");

    let master = config
        .master_key()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid master key configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("failed to connect to PostgreSQL")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run database migrations")?;

    // Key store → registry → cipher.
    let keystore = Arc::new(PgKeyStore::new(
        pool.clone(),
        EncryptionKey::from_bytes(master),
    ));
    let registry = Arc::new(KeyRegistry::new(
        Arc::clone(&keystore) as Arc<dyn KeyStore>,
        Duration::from_secs(config.key_cache_ttl_secs),
    ));
    let cipher = Arc::new(EnvelopeCipher::new(Arc::clone(&registry)));

    // Read-repair worker pool.
    let repair_store = Arc::new(PgRepairStore::new(pool.clone()));
    let (rotator_handle, rotator_workers) = rotator::spawn(
        Arc::clone(&cipher),
        repair_store,
        RotatorConfig {
            workers: config.rotation_workers,
            queue_depth: config.rotation_queue_depth,
        },
    );

    if config.hmac_secret.is_empty() {
        tracing::warn!("VARLOCK_HMAC_SECRET not set — request-integrity perimeter is disabled");
    }

    let state = Arc::new(AppState {
        pool,
        registry,
        cipher,
        rotator: rotator_handle,
        keystore,
        config: Arc::new(config.clone()),
    });

    let app = routes::build_router(Arc::clone(&state));

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "Varlock server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Drop the last scheduling handle so the workers drain and exit.
    info!("draining rotation queue");
    drop(state);
    rotator_workers.shutdown(Duration::from_secs(10)).await;

    info!("Varlock server stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
}
