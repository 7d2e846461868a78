//! iam-session 服务入口

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use iam_adapter_memory::MemoryStore;
use iam_adapter_redis::{RedisStore, create_connection_manager};
use iam_common::RetryConfig;
use iam_config::{AppConfig, StoreBackend};
use iam_session::infrastructure::{DirectoryCredentialVerifier, TracingAuditSink};
use iam_session::{Collaborators, Stores, build_router, build_state};
use iam_telemetry::{init_metrics, init_tracing};
use secrecy::ExposeSecret;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config_dir = std::env::var("IAM_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let config = AppConfig::load(&config_dir).context("Failed to load configuration")?;

    init_tracing(
        &config.telemetry.log_level,
        config.telemetry.json || config.is_production(),
    )?;
    let metrics = init_metrics()?;

    info!(
        app_name = %config.app_name,
        app_env = %config.app_env,
        backend = ?config.store.backend,
        "Starting session service"
    );

    let stores = connect_stores(&config).await?;

    let credentials = DirectoryCredentialVerifier::from_config(&config.directory)
        .context("Invalid user directory")?;
    if credentials.is_empty() {
        warn!("User directory is empty, every login will fail");
    }
    let collaborators = Collaborators::new(Arc::new(credentials), Arc::new(TracingAuditSink));

    let state = build_state(&config, &stores, collaborators)?.with_metrics(metrics);
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "Listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Session service stopped");
    Ok(())
}

async fn connect_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    match config.store.backend {
        StoreBackend::Redis => {
            let redis = config
                .redis
                .as_ref()
                .context("store.backend = \"redis\" requires a [redis] section")?;
            let retry = RetryConfig::new(
                redis.connect_retries.max(1),
                Duration::from_millis(200),
                Duration::from_secs(5),
            );
            let conn = create_connection_manager(redis.url.expose_secret(), &retry).await?;
            let store = RedisStore::new(conn)
                .with_key_prefix(config.store.key_prefix.clone())
                .with_command_timeout(Duration::from_millis(redis.command_timeout_ms));
            store.ping().await?;

            info!(
                key_prefix = %config.store.key_prefix,
                command_timeout_ms = redis.command_timeout_ms,
                "Using Redis store"
            );
            Ok(Stores::from_store(store))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory store, state is not shared between processes");
            Ok(Stores::from_store(MemoryStore::new()))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => warn!(error = %e, "Failed to listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
