//! Social lookup gateway
//!
//! Single-binary Rust service that:
//! 1. Loads a pool of scraping accounts and egress proxies
//! 2. Keeps one authenticated scraping session, rotating accounts on failure
//! 3. Serves profile, post and post-link lookups as JSON

mod config;
mod error;
mod handlers;
mod metrics;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use scraper::{HttpScraper, StatusPolicy};
use session_pool::{Credential, CredentialPool, FailoverExecutor, SessionCache, SessionFactory};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::Config;

/// How long in-flight lookups may run after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    executor: Arc<FailoverExecutor>,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/get_profile", get(handlers::get_profile))
        .route("/get_insta_post", get(handlers::get_insta_post))
        .route("/get_insta_post_links", get(handlers::get_insta_post_links))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Wire scraper, pool, session cache and executor from configuration.
fn build_executor(config: &Config, accounts: Vec<Credential>) -> Result<FailoverExecutor> {
    let upstream = config.scraper.upstream()?;
    let policy = StatusPolicy::new(config.scraper.terminal_statuses.clone());
    info!(
        upstream = %upstream,
        terminal_statuses = ?policy.terminal_statuses(),
        "scraping backend configured"
    );
    let client = HttpScraper::new(
        upstream,
        config.scraper.user_agent.clone(),
        config.scraper.request_timeout(),
        policy,
    );

    let pool = CredentialPool::with_thread_rng(accounts, config.pool.proxy_endpoints.clone())
        .context("failed to build credential pool")?;
    let factory = SessionFactory::new(Arc::new(client), config.scraper.login_timeout());
    let cache = Arc::new(SessionCache::new(Arc::new(pool), factory));

    let mut executor = FailoverExecutor::new(cache, config.scraper.request_timeout());
    if let Some(max_attempts) = config.pool.max_attempts {
        executor = executor.with_max_attempts(max_attempts);
    }
    Ok(executor)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting social-gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        upstream_url = %config.scraper.upstream_url,
        proxies = config.pool.proxy_endpoints.len(),
        max_connections = config.server.max_connections,
        "configuration loaded"
    );

    let accounts = config
        .resolve_accounts()
        .await
        .context("failed to resolve scraping accounts")?;
    let executor = build_executor(&config, accounts)?;
    info!(
        accounts = executor.cache().pool().size(),
        max_attempts = executor.max_attempts(),
        "failover executor ready"
    );

    let app_state = AppState {
        executor: Arc::new(executor),
        prometheus: prometheus_handle,
        started_at: Instant::now(),
    };
    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts: notify the server to drain, then race the drain against
    // the timeout.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: gateway uptime plus pool and session status.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut body = state.executor.health().await;
    body["uptime_seconds"] = serde_json::json!(state.started_at.elapsed().as_secs());
    axum::Json(body)
}

/// Prometheus metrics endpoint: returns metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
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
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
