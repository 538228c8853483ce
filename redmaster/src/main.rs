// ABOUTME: Unified daemon that runs the failover coordinator and its status HTTP server
// ABOUTME: Wires the watcher, bus listener and event loop together with graceful shutdown

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use dotenv::dotenv;
use redmaster_core::metrics::METRICS;
use redmaster_core::{RedisHandle, RedisServer, Settings};
use redmaster_coordinator::{
    BusListener, BusPublisher, Coordinator, CoordinatorEvent, MasterWatcher, WatcherCommand,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[derive(Clone)]
struct AppState {
    events: mpsc::Sender<CoordinatorEvent>,
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// GET /status - coordinator state snapshot
///
/// The report is produced by the event loop itself, so it is always
/// consistent with the protocol state.
async fn status(State(state): State<AppState>) -> Response {
    let (tx, rx) = oneshot::channel();
    if state
        .events
        .send(CoordinatorEvent::Status { reply: tx })
        .await
        .is_err()
    {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    match rx.await {
        Ok(report) => Json(report).into_response(),
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

/// GET /metrics - failover counters in Prometheus text format
///
/// Everything is served from the process-global atomic counters, so a
/// scrape never touches the Redis pool or the bus.
async fn metrics() -> impl IntoResponse {
    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )
        .body(METRICS.to_prometheus())
        .unwrap()
}

/// Identity stamped on this process's logs.
///
/// Exactly one coordinator is expected per deployment, so the id mainly
/// tells restarts apart: the deploy revision plus a per-process suffix.
fn coordinator_instance_id() -> String {
    let revision = std::env::var("K_REVISION").unwrap_or_else(|_| "local".to_string());
    let suffix = &Uuid::new_v4().to_string()[..8];
    format!("redmaster-{}-{}", revision, suffix)
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let worker_threads = std::env::var("TOKIO_WORKER_THREADS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(num_cpus::get);

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing with JSON format in production for log aggregation
    let is_production = std::env::var("NODE_ENV").unwrap_or_default() == "production";
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if is_production {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("\nConfiguration error:\n  {}\n\nSee the deployment guide for required variables.\n", e);
            std::process::exit(1);
        }
    };

    let instance_id = coordinator_instance_id();
    tracing::info!(
        instance_id = %instance_id,
        servers = settings.redis_servers.len(),
        clients = settings.client_ids.len(),
        "Redmaster coordinator starting"
    );

    // One handle per configured pool member; probes and admin commands all
    // go through these.
    let mut servers: Vec<Arc<dyn RedisServer>> = Vec::new();
    for addr in &settings.redis_servers {
        servers.push(Arc::new(RedisHandle::new(
            addr.clone(),
            settings.probe_timeout,
        )?));
    }

    // The publisher connection is held for the process lifetime and
    // released on shutdown when the coordinator drops it.
    let publisher = Arc::new(BusPublisher::connect(&settings.bus_url).await?);
    tracing::info!("✔︎ Control bus publisher connected");

    let (event_tx, event_rx) = mpsc::channel(1024);
    let (watcher_tx, watcher_rx) = watch::channel(WatcherCommand::Pause);
    let cancel = CancellationToken::new();

    // Startup master determination happens here; a stale master file leaves
    // a switch already enqueued on the loop.
    let coordinator = Coordinator::start(
        settings.clone(),
        servers.clone(),
        publisher,
        event_tx.clone(),
        watcher_tx,
    )
    .await?;
    tracing::info!("✔︎ Initial master determined");

    let task_tracker = TaskTracker::new();

    let coordinator_cancel = cancel.clone();
    let coordinator_handle = task_tracker.spawn(coordinator.run(event_rx, coordinator_cancel));

    let watcher = MasterWatcher::new(
        servers,
        settings.watcher_interval,
        settings.master_retries,
        event_tx.clone(),
        watcher_rx,
        cancel.clone(),
    );
    task_tracker.spawn(watcher.run());
    tracing::info!(
        interval = ?settings.watcher_interval,
        retries = settings.master_retries,
        "✔︎ Master watcher started"
    );

    let listener = BusListener::new(settings.bus_url.clone(), event_tx.clone(), cancel.clone());
    task_tracker.spawn(listener.run());
    tracing::info!("✔︎ Bus listener started");

    // Status/metrics HTTP surface
    let app_state = AppState {
        events: event_tx.clone(),
    };
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .with_state(app_state)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let trace_id = request
                    .headers()
                    .get("x-trace-id")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from)
                    .unwrap_or_else(|| Uuid::new_v4().to_string()[..8].to_string());

                tracing::span!(
                    Level::INFO,
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    trace_id = %trace_id,
                )
            }),
        );

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], settings.port));
    let shutdown_signal = Arc::new(Notify::new());
    let shutdown_for_api = shutdown_signal.clone();
    let api_handle = tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        tracing::info!("🌐 Status server listening on {}", addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_for_api.notified().await;
            })
            .await
            .unwrap();
    });

    tracing::info!(instance_id = %instance_id, "✨ Redmaster running");

    wait_for_shutdown_signal().await;

    // Stop the background tasks first so nothing publishes into a closing
    // bus, then drain the HTTP server.
    cancel.cancel();
    shutdown_signal.notify_waiters();
    task_tracker.close();

    match tokio::time::timeout(Duration::from_secs(10), task_tracker.wait()).await {
        Ok(()) => tracing::info!("All coordinator tasks completed"),
        Err(_) => {
            tracing::warn!("Task drain timed out after 10s, aborting coordinator");
            coordinator_handle.abort();
        }
    }

    match tokio::time::timeout(Duration::from_secs(5), api_handle).await {
        Ok(result) => {
            if let Err(e) = result {
                tracing::warn!("Status server task error: {:?}", e);
            }
        }
        Err(_) => tracing::warn!("Status server shutdown timed out after 5s"),
    }

    tracing::info!("Graceful shutdown complete");
    Ok(())
}
