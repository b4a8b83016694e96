//! Social Graph Service Binary
//!
//! Runs the social graph kernel as a REST API service with production-grade features:
//! - Structured JSON logging for Cloud Logging
//! - Request tracing with correlation IDs
//! - Background reconciliation of the graph store
//! - Graceful shutdown handling
//!
//! ## Configuration
//!
//! Environment variables:
//! - `STORE_BACKEND`: `postgres` (PostgreSQL + Neo4j) or `memory` (default: postgres)
//! - `DATABASE_URL`: PostgreSQL connection string
//! - `NEO4J_URI`, `NEO4J_USER`, `NEO4J_PASSWORD`: Neo4j connection
//! - `PORT`: Service port (default: 8080)
//! - `HOST`: Service host (default: 0.0.0.0)
//! - `RUST_LOG`: Log level filter (default: info)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: json)
//!
//! Kernel tuning (`RECONCILE_INTERVAL_SECS`, `RECS_CACHE_*`, `SYNC_*`, limits)
//! is read by `KernelConfig::from_env`.
//!
//! ## Usage
//!
//! ```bash
//! STORE_BACKEND=memory LOG_FORMAT=pretty cargo run --bin social_graph_service --features service
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, warn, Instrument};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use social_graph_kernel::service::{create_router, metrics_middleware, Backends, ServiceState};
use social_graph_kernel::{KernelConfig, Neo4jEdgeStore, PostgresStore, StoreError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Initialize the tracing subscriber with JSON or pretty format
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "social_graph_service=info,social_graph_kernel=info,social_graph=info,tower_http=info,sqlx=warn,neo4rs=warn"
            .into()
    });

    if log_format == "pretty" {
        // Pretty format for local development
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .init();
    } else {
        // JSON format for production (Cloud Logging compatible)
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .flatten_event(true),
            )
            .init();
    }
}

/// Request logging middleware that adds correlation ID and timing
async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    // Extract Cloud Trace context if present
    let trace_id = request
        .headers()
        .get("X-Cloud-Trace-Context")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split('/').next().unwrap_or(s).to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let method = request.method().clone();
    let uri = request.uri().path().to_string();

    let span = info_span!(
        "request",
        trace_id = %trace_id,
        method = %method,
        path = %uri,
        status = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );

    let response = next.run(request).instrument(span.clone()).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();

    span.record("status", status);
    span.record("latency_ms", latency.as_millis() as u64);

    info!(
        target: "social_graph_service::access",
        trace_id = %trace_id,
        method = %method,
        path = %uri,
        status = status,
        latency_ms = latency.as_millis() as u64,
        "request completed"
    );

    response
}

/// Run a store connection future with the startup timeout.
async fn connect<T>(
    name: &str,
    fut: impl std::future::Future<Output = Result<T, StoreError>>,
) -> Result<T, Box<dyn std::error::Error>> {
    info!("Connecting to {name}...");
    let connect_start = Instant::now();

    match tokio::time::timeout(CONNECT_TIMEOUT, fut).await {
        Ok(Ok(store)) => {
            info!(
                latency_ms = connect_start.elapsed().as_millis() as u64,
                "{name} connection established"
            );
            Ok(store)
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Failed to connect to {name}");
            Err(e.into())
        }
        Err(_) => {
            tracing::error!("{name} connection timeout after {}s", CONNECT_TIMEOUT.as_secs());
            Err(format!("{name} connection timeout").into())
        }
    }
}

async fn build_backends(kind: &str) -> Result<Backends, Box<dyn std::error::Error>> {
    match kind {
        "memory" => {
            warn!("STORE_BACKEND=memory: data is lost on restart");
            Ok(Backends::in_memory())
        }
        "postgres" => {
            let relational = Arc::new(connect("PostgreSQL", PostgresStore::from_env()).await?);
            let graph = connect("Neo4j", Neo4jEdgeStore::from_env()).await?;
            if let Err(e) = graph.ensure_schema().await {
                warn!(error = %e, "Could not ensure Neo4j constraints");
            }

            Ok(Backends {
                edges: Arc::new(graph),
                subscriptions: relational.clone(),
                posts: relational.clone(),
                users: relational,
                name: "postgres",
            })
        }
        other => Err(format!("Unknown STORE_BACKEND: {other}").into()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging
    init_tracing();

    let version = env!("CARGO_PKG_VERSION");
    let build_sha = option_env!("BUILD_SHA").unwrap_or("dev");

    info!(
        version = version,
        build_sha = build_sha,
        "Starting Social Graph Service"
    );

    // Load configuration from environment
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let backend = std::env::var("STORE_BACKEND").unwrap_or_else(|_| "postgres".to_string());

    let config = KernelConfig::from_env();
    info!(
        backend = %backend,
        reconcile_interval_secs = config.reconcile_interval.as_secs(),
        cache_enabled = config.cache.enabled,
        cache_ttl_secs = config.cache.ttl.as_secs(),
        max_retries = config.retry.max_retries,
        "Kernel configuration loaded"
    );

    let backends = build_backends(&backend).await?;
    let state = ServiceState::new(backends, config.clone());

    // The pending ledger does not survive restarts; diff both stores once.
    match state.reconciler.full_sweep().await {
        Ok(report) => info!(
            added = report.added,
            removed = report.removed,
            failed = report.failed,
            "Startup reconciliation complete"
        ),
        Err(e) => warn!(error = %e, "Startup reconciliation skipped"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler = Arc::clone(&state.reconciler).spawn(config.reconcile_interval, shutdown_rx);

    // Build router with middleware
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!(
        address = %addr,
        version = version,
        "Social Graph Service listening"
    );

    let listener = TcpListener::bind(addr).await?;

    // Graceful shutdown handling
    let shutdown_signal = async {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
            _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
        }
    };

    info!("Ready to accept connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    // Stop the reconciler after in-flight requests drain.
    let _ = shutdown_tx.send(true);
    if let Err(e) = reconciler.await {
        warn!(error = %e, "Reconciler task ended abnormally");
    }

    info!("Social Graph Service shutdown complete");

    Ok(())
}
