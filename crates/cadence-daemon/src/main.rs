//! cadence-daemon: workers, scheduler, and the WebSocket bridge.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{error, info};

use cadence_bridge::auth::TokenSigner;
use cadence_bridge::bus::InMemoryBus;
use cadence_bridge::ws::{BridgeState, HealthSource};
use cadence_connectors::HttpClient;
use cadence_core::config::Config;
use cadence_core::registry::Registry;
use cadence_core::types::TenantStatus;
use cadence_daemon::queue::{JobQueue, QUEUE_AI_INSIGHTS, QUEUE_DEFAULT};
use cadence_daemon::scheduler;
use cadence_daemon::worker::{self, WorkerEnv};
use cadence_telemetry::health::{HealthSnapshot, ServiceState};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Health snapshots are refreshed in the background; the WS handler reads
/// the latest one synchronously.
struct CachedHealth {
    latest: Mutex<serde_json::Value>,
}

impl HealthSource for CachedHealth {
    fn snapshot(&self) -> serde_json::Value {
        self.latest.lock().expect("health lock poisoned").clone()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("fatal: cannot load configuration: {e}");
            std::process::exit(2);
        }
    };

    cadence_telemetry::logging::init_logging("cadence-daemon", &config.general.log_level);
    info!(version = env!("CARGO_PKG_VERSION"), "cadence daemon starting");

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("cannot create data dir {}", data_dir.display()))?;

    let registry = Arc::new(
        Registry::open(&data_dir)
            .await
            .context("failed to open tenant registry")?,
    );
    let queue = Arc::new(
        JobQueue::open(data_dir.join("queue.db"))
            .await
            .context("failed to open job queue")?,
    );
    let bus = InMemoryBus::new();

    if config.broker.redis_url.is_some() {
        // The broker-backed publisher slot; the in-process bus serves a
        // single-node deployment.
        info!("REDIS_URL set; broker-backed publisher not active in this build");
    }

    let ws_secret = std::env::var("CADENCE_WS_SECRET")
        .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());
    let signer = TokenSigner::new(ws_secret.as_bytes());

    let env = Arc::new(WorkerEnv {
        registry: registry.clone(),
        queue: queue.clone(),
        bus: bus.clone(),
        http: HttpClient::new().map_err(|e| anyhow::anyhow!("http client: {e}"))?,
        default_ai_key: config.ai.default_api_key.clone(),
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // --- Workers: every worker drains both queues, default first. ---
    let mut handles = Vec::new();
    for i in 0..config.daemon.workers.max(1) {
        let env = env.clone();
        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            info!(worker = i, "spawning worker");
            worker::run_worker(
                env,
                vec![QUEUE_DEFAULT.to_string(), QUEUE_AI_INSIGHTS.to_string()],
                rx,
            )
            .await;
        }));
    }

    // --- Scheduler ---
    {
        let env = env.clone();
        let rx = shutdown_rx.clone();
        let interval = config.daemon.sync_interval_minutes;
        handles.push(tokio::spawn(async move {
            scheduler::run_scheduler(env, interval, rx).await;
        }));
    }

    // --- Health refresher ---
    let health = Arc::new(CachedHealth {
        latest: Mutex::new(serde_json::json!({ "status": "starting" })),
    });
    {
        let health = health.clone();
        let registry = registry.clone();
        let queue = queue.clone();
        let mut rx = shutdown_rx.clone();
        let started_at = Instant::now();
        handles.push(tokio::spawn(async move {
            loop {
                if *rx.borrow() {
                    break;
                }
                let snapshot = compute_health(started_at, &registry, &queue).await;
                *health.latest.lock().expect("health lock poisoned") =
                    serde_json::to_value(&snapshot).unwrap_or_default();
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs(10)) => {}
                    _ = rx.changed() => break,
                }
            }
        }));
    }

    // --- WebSocket bridge ---
    let bridge = Arc::new(BridgeState {
        bus: bus.clone(),
        signer,
        registry: registry.clone(),
        health,
    });
    let app = cadence_bridge::ws::router(bridge);

    let bind_addr = format!("{}:{}", config.daemon.host, config.daemon.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, "bridge listening");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "bridge server error");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("ctrl-c received, shutting down");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        let _ = handle.await;
    }
    server.abort();

    info!("cadence daemon stopped");
    Ok(())
}

async fn compute_health(
    started_at: Instant,
    registry: &Registry,
    queue: &JobQueue,
) -> HealthSnapshot {
    let mut services = BTreeMap::new();

    let active_tenants = match registry.list_tenants(Some(TenantStatus::Active)).await {
        Ok(tenants) => {
            services.insert("database".to_string(), ServiceState::Up);
            tenants.len() as u32
        }
        Err(_) => {
            services.insert("database".to_string(), ServiceState::Down);
            0
        }
    };

    let queue_depth = match queue.depth().await {
        Ok(depth) => {
            services.insert("queue".to_string(), ServiceState::Up);
            depth
        }
        Err(_) => {
            services.insert("queue".to_string(), ServiceState::Down);
            0
        }
    };

    HealthSnapshot::build(started_at, services, active_tenants, queue_depth)
}
