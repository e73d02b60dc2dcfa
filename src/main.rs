//! dex-matcher — the matching and event-sequencing core of a decentralized
//! exchange order matcher (spec.md §1-§9).
//!
//! Startup sequence: load config, open the KV store, rebuild the order
//! index, spawn the matcher's replay-then-live consumer, and serve the
//! HTTP surface once replay reaches the queue's tip. Exit codes follow
//! spec.md §6: 0 clean, 1 directory preparation failure, 2 startup
//! timeout, 3 queue unavailable.

mod actors;
mod api;
mod book;
mod broadcaster;
mod chain;
mod config;
mod domain;
mod error;
mod middleware;
mod queue;
mod store;
mod validator;

use std::sync::Arc;
use std::time::Duration;

use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use actors::MatcherActor;
use chain::MockChain;
use config::{Config, QueueKind};
use error::MatcherError;
use queue::{local::LocalEventQueue, remote::RemoteEventQueue, EventQueue};
use store::{AssetDecimalsCache, AssetPairRegistry, KvStore, OrderDb, RateCache, SubmissionRateLimiter};
use validator::OrderValidator;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "dex_matcher=info,tower_http=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    match run(config).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!(error = %e, exit_code = e.exit_code(), "matcher exiting with error");
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(config: Config) -> Result<(), MatcherError> {
    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        error!(error = %e, dir = %config.data_dir.display(), "failed to prepare data directory");
        return Err(MatcherError::InternalInvariant(format!("data dir preparation failed: {e}")));
    }

    let kv = KvStore::open(&config.data_dir)?;
    let pairs = Arc::new(AssetPairRegistry::new(kv.clone())?);
    for (pair, rules) in config.matching_rules.clone() {
        pairs.register(pair, rules)?;
    }
    let order_db = Arc::new(OrderDb::new(kv.clone()));
    order_db.rebuild_index()?;

    // `BlockchainContext` is an external collaborator per spec.md §1; this
    // binary runs against an in-memory double until wired to a real node
    // client, matching the out-of-scope boundary spec.md draws.
    let chain: Arc<dyn chain::BlockchainContext> = Arc::new(MockChain::new());

    let decimals = Arc::new(AssetDecimalsCache::new());
    let rates = Arc::new(RateCache::new(kv.clone())?);
    let submission_limits = Arc::new(SubmissionRateLimiter::new(config.order_rate_per_window, config.rate_window_ms));

    let queue: Arc<dyn EventQueue> = match config.queue_kind {
        QueueKind::Local => Arc::new(LocalEventQueue::open(&config.local_queue_path)?),
        QueueKind::Remote => {
            let remote_config = config
                .remote_queue
                .clone()
                .ok_or_else(|| MatcherError::InternalInvariant("remote queue selected but unconfigured".into()))?;
            Arc::new(RemoteEventQueue::connect(remote_config)?)
        }
    };

    let broadcast_config = broadcaster::BroadcastConfig {
        backoff_base_ms: config.broadcast_poll_interval_ms,
        deadline_ms: config.broadcast_deadline_ms,
        ..Default::default()
    };
    let matcher = MatcherActor::with_broadcast_config(
        pairs.clone(),
        chain.clone(),
        order_db.clone(),
        kv.clone(),
        config.min_fill_unit,
        config.snapshot_interval_default,
        config.snapshot_intervals.clone(),
        broadcast_config,
    );

    let validator = Arc::new(OrderValidator::new(
        config.validator.clone(),
        pairs.clone(),
        decimals.clone(),
        rates.clone(),
        chain.clone(),
        matcher.clone(),
    ));

    let consumer_matcher = matcher.clone();
    let consumer_queue = queue.clone();
    tokio::spawn(async move {
        consumer_matcher.run_consumer(consumer_queue).await;
    });

    wait_for_startup(matcher.clone()).await?;

    let ip_rate_limiter = middleware::rate_limit::RateLimitLayer::new(middleware::rate_limit::RateLimitConfig::default());

    let state = api::AppState { matcher: matcher.clone(), queue: queue.clone(), validator, submission_limits, rates };
    let app = api::router(state)
        .layer(axum::middleware::from_fn_with_state(ip_rate_limiter, middleware::rate_limit::rate_limit_middleware))
        .layer(axum::middleware::from_fn(middleware::logging::request_logging))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .map_err(|e| MatcherError::QueueUnavailable(format!("failed to bind http port: {e}")))?;
    info!(port = config.http_port, "dex-matcher listening");

    let shutdown_queue = queue.clone();
    let shutdown_matcher = matcher.clone();
    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(shutdown_matcher, shutdown_queue))
        .await
        .map_err(|e| MatcherError::InternalInvariant(format!("http server error: {e}")))?;

    Ok(())
}

/// Blocks until the matcher reports `Working` (replay caught up to the
/// queue's tip observed at startup), or terminates the process with exit
/// code 2 if `STARTUP_TIMEOUT` elapses first (spec.md §5, §6).
async fn wait_for_startup(matcher: actors::MatcherHandle) -> Result<(), MatcherError> {
    let deadline = tokio::time::Instant::now() + STARTUP_TIMEOUT;
    loop {
        if matcher.status() == actors::matcher_actor::MatcherStatus::Working {
            info!("snapshot restore and replay complete, accepting orders");
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(MatcherError::Timeout("snapshot restoration did not complete in time".into()));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn shutdown_signal(matcher: actors::MatcherHandle, queue: Arc<dyn EventQueue>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, flushing snapshots and closing queue");
    matcher.flush_all_snapshots().await;
    if let Err(e) = queue.close().await {
        error!(error = %e, "error closing event queue during shutdown");
    }
}
