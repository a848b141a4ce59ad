//! Class Controller
//!
//! Hosts the class session runtime and its operational endpoints.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Open the registry store (Redis when `REDIS_URL` is set, in-memory otherwise)
//! 4. Start the runtime (coordinator actor, registry cleanup task)
//! 5. Serve `/health`, `/ready` and `/metrics`
//! 6. Refresh readiness from coordinator and registry health until shutdown
//!
//! Vendor SDK bindings are supplied by the embedding client; the
//! standalone binary runs with the mock provider factory.

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use class_controller::config::Config;
use class_controller::discovery::{
    InMemoryStore, KeyValueStore, RedisStore, SessionDiscoveryService,
};
use class_controller::observability::{health_router, init_metrics_recorder, HealthState};
use class_controller::provider::mock::MockProviderFactory;
use class_controller::ClassRuntime;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Readiness refresh period.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound on runtime shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "class_controller=debug,cc=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Class Controller");

    let config = Config::from_env().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        health_bind_address = %config.health_bind_address,
        registry = if config.redis_url.is_some() { "redis" } else { "memory" },
        primary_provider = %config.primary_provider,
        fallback_provider = ?config.fallback_provider,
        rendering_strategy = config.rendering_strategy.as_str(),
        max_participants = config.max_participants,
        "Configuration loaded"
    );

    // Before anything records a metric.
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new());
    let discovery = SessionDiscoveryService::new(open_registry_store(&config).await?);

    let runtime = ClassRuntime::start(
        config.clone(),
        discovery,
        Arc::new(MockProviderFactory::new()),
    );
    let shutdown_token = runtime.child_token();

    let app = health_router(Arc::clone(&health_state))
        .route(
            "/metrics",
            axum::routing::get(move || {
                let handle = prometheus_handle.clone();
                async move { handle.render() }
            }),
        )
        .layer(TraceLayer::new_for_http());
    serve_endpoints(&config.health_bind_address, app, shutdown_token.child_token()).await?;

    health_state.mark_started();
    info!("Class Controller ready");

    watch_health(&runtime, &health_state, shutdown_token.child_token()).await;

    info!("Shutdown requested");
    health_state.mark_stopping();

    if let Err(e) = runtime.shutdown(SHUTDOWN_TIMEOUT).await {
        warn!(error = %e, "Runtime shutdown error");
    }

    info!("Class Controller stopped");
    Ok(())
}

/// Redis when `REDIS_URL` is set, otherwise a process-local registry.
async fn open_registry_store(
    config: &Config,
) -> Result<Arc<dyn KeyValueStore>, Box<dyn std::error::Error>> {
    let Some(redis_url) = &config.redis_url else {
        warn!("REDIS_URL not set, session registry is process-local");
        return Ok(Arc::new(InMemoryStore::new()));
    };

    let store = RedisStore::connect(redis_url).await.map_err(|e| {
        error!(error = %e, "Registry store connection failed");
        e
    })?;
    info!("Registry store connected");
    Ok(Arc::new(store))
}

/// Bind the operational endpoints and serve them until `cancel_token` fires.
///
/// Binding happens before the spawn so a bad address fails startup.
async fn serve_endpoints(
    bind_address: &str,
    app: Router,
    cancel_token: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %bind_address, "Invalid health bind address");
        format!("invalid health bind address {bind_address}: {e}")
    })?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind operational endpoints");
        format!("failed to bind {addr}: {e}")
    })?;
    info!(addr = %addr, "Serving /health, /ready and /metrics");

    tokio::spawn(async move {
        let server = axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel_token.cancelled().await });
        if let Err(e) = server.await {
            error!(error = %e, "Operational endpoint server failed");
        }
    });
    Ok(())
}

/// Refresh the readiness flags until shutdown is requested.
async fn watch_health(
    runtime: &ClassRuntime,
    health_state: &HealthState,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(HEALTH_CHECK_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            () = cancel_token.cancelled() => break,
            _ = ticker.tick() => {
                health_state.set_coordinator_running(runtime.check_health());
                health_state.set_registry_reachable(runtime.check_registry().await);
            }
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM.
///
/// # Panics
///
/// If the signal handlers cannot be installed.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "no graceful shutdown without signal handlers"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "no graceful shutdown without signal handlers"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
