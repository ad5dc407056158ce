/*!
 * Executor Service
 *
 * ## Task Layout
 *
 * ```text
 * Main Process
 *     │
 *     ├──> Dispatcher      XREADGROUP ──▶ worker pool (semaphore-bounded)
 *     ├──> Reclaimer       XPENDING/XCLAIM sweep for stranded entries
 *     ├──> Heartbeat publisher
 *     └──> Health + metrics servers
 * ```
 *
 * The stock binary runs in simulation mode; live execution needs an
 * embedder-injected `ChainRpc` implementation via the library API, so
 * starting without either is an invalid configuration.
 *
 * ## Exit Codes
 *
 * - 0: normal shutdown
 * - 1: substrate unreachable at startup
 * - 2: invalid configuration
 * - 3: shutdown budget exceeded
 */

use anyhow::Context;
use axum::{Json, Router, routing::get};
use serde_json::{Value, json};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{Semaphore, broadcast};
use tracing::{error, info, warn};

use arbflow_common::{HeartbeatCounters, HeartbeatPublisher, LockManager, RetryPolicy, StreamBus};
use arbflow_config::topology;
use arbflow_domain::{ReportedState, ServiceRole};
use arbflow_executor::{
    ExecutionDispatcher, ExecutorConfig, NullRpc, Reclaimer, RecentIds, StrategyContext,
    StrategyRegistry, WorkerShared, dedup, metrics,
};

/// Workers get the long budget; readers and the reclaimer wind down faster
const WORKER_SHUTDOWN_BUDGET: Duration = Duration::from_secs(5);
const READER_SHUTDOWN_BUDGET: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> ExitCode {
    arbflow_common::init_tracing_from_env();

    info!("🚀 Starting ArbFlow Executor");

    let config = match ExecutorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {:#}", e);
            return ExitCode::from(2);
        }
    };

    if !config.simulation.enabled {
        error!(
            "Live execution requires an embedded ChainRpc implementation; \
             run with SIMULATION_MODE=true or wire the engine through the library API"
        );
        return ExitCode::from(2);
    }

    info!("📋 Configuration loaded:");
    info!("   - Instance: {}", config.instance_id);
    info!("   - Redis: {}:{}", config.redis.host, config.redis.port);
    info!(
        "   - Pool: max_in_flight={} lock_ttl={:?}",
        config.executor.max_in_flight, config.executor.lock_ttl
    );
    info!(
        "   - Simulation: success_rate={} latency={:?}",
        config.simulation.success_rate, config.simulation.latency
    );

    match run(config).await {
        Ok(code) => code,
        Err(e) => {
            error!("Executor failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ExecutorConfig) -> anyhow::Result<ExitCode> {
    let redis_url = config.redis.url();

    info!("📡 Connecting to stream substrate...");
    // Blocking group reads park a connection, so the read loop gets its own
    let mut read_bus = match StreamBus::connect(&redis_url).await {
        Ok(bus) => bus,
        Err(e) => {
            error!("Substrate unreachable at startup: {}", e);
            return Ok(ExitCode::from(1));
        }
    };
    if let Err(e) = read_bus.ping().await {
        error!("Substrate ping failed at startup: {}", e);
        return Ok(ExitCode::from(1));
    }
    let side_bus = match StreamBus::connect(&redis_url).await {
        Ok(bus) => bus,
        Err(e) => {
            error!("Substrate unreachable at startup: {}", e);
            return Ok(ExitCode::from(1));
        }
    };
    let locks = match LockManager::connect(&redis_url, &config.instance_id).await {
        Ok(locks) => locks,
        Err(e) => {
            error!("Lock manager connection failed at startup: {}", e);
            return Ok(ExitCode::from(1));
        }
    };
    info!("✅ Stream substrate connected");

    let counters = HeartbeatCounters::new();

    let shared = Arc::new(WorkerShared {
        registry: StrategyRegistry::with_defaults(),
        context: StrategyContext::new(
            Arc::new(NullRpc),
            &config.wallet_id,
            config.executor.max_gas_price_gwei,
            config.simulation,
        ),
        dedup: RecentIds::new(dedup::DEFAULT_CAPACITY),
        counters: counters.clone(),
        caps: config.caps.clone(),
        settings: config.executor,
        instance_id: config.instance_id.clone(),
    });
    info!("✅ Strategy registry ready ({} strategies)", shared.registry.len());

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let pool = Arc::new(Semaphore::new(config.executor.max_in_flight));

    // Heartbeat publisher (short retry policy so it never stalls)
    let heartbeat_bus = StreamBus::connect_with_policy(&redis_url, RetryPolicy::short())
        .await
        .context("Failed to create heartbeat connection")?;
    let heartbeat = HeartbeatPublisher::new(
        heartbeat_bus,
        topology::SERVICE_HEARTBEATS,
        &config.instance_id,
        ServiceRole::Executor,
        counters.clone(),
        config.health.heartbeat_interval,
        config.caps.service_heartbeats,
    );
    let heartbeat_handle = tokio::spawn(heartbeat.run(shutdown_tx.subscribe()));

    spawn_http_servers(config.health_port, config.metrics_port);

    // Dispatcher + reclaimer
    let dispatcher = ExecutionDispatcher::new(
        read_bus,
        side_bus.clone(),
        locks.clone(),
        Arc::clone(&shared),
        config.reader,
        Arc::clone(&pool),
    );
    let dispatcher_handle = tokio::spawn(dispatcher.run(shutdown_tx.subscribe()));

    let reclaimer_bus = StreamBus::connect(&redis_url)
        .await
        .context("Failed to create reclaimer connection")?;
    let reclaimer = Reclaimer::new(reclaimer_bus, locks, Arc::clone(&shared), Arc::clone(&pool));
    let reclaimer_handle = tokio::spawn(reclaimer.run(shutdown_tx.subscribe()));

    counters.set_state(ReportedState::Healthy);
    info!("✅ Executor is running");
    info!("   - Press Ctrl+C to shutdown gracefully");

    signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    info!("🛑 Shutting down Executor...");
    counters.set_state(ReportedState::Failed);
    let _ = shutdown_tx.send(());

    // Readers first, then drain the worker pool within its budget
    let readers_done = tokio::time::timeout(READER_SHUTDOWN_BUDGET, async {
        let _ = dispatcher_handle.await;
        let _ = reclaimer_handle.await;
    })
    .await;

    let workers_done = tokio::time::timeout(WORKER_SHUTDOWN_BUDGET, async {
        // All permits free again means no worker is mid-entry
        let _ = pool.acquire_many(config.executor.max_in_flight as u32).await;
    })
    .await;

    let heartbeat_done =
        tokio::time::timeout(Duration::from_secs(1), async { let _ = heartbeat_handle.await; })
            .await;

    if readers_done.is_err() || workers_done.is_err() || heartbeat_done.is_err() {
        warn!("Shutdown budget exceeded; in-flight entries stay un-acked for redelivery");
        return Ok(ExitCode::from(3));
    }

    info!("👋 Executor stopped");
    Ok(ExitCode::SUCCESS)
}

fn spawn_http_servers(health_port: u16, metrics_port: u16) {
    tokio::spawn(async move {
        let app = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/live", get(liveness_check));
        let addr = format!("0.0.0.0:{health_port}");
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => {
                info!("🏥 Health server listening on {}", addr);
                if let Err(e) = axum::serve(listener, app).await {
                    warn!("Health server error: {}", e);
                }
            }
            Err(e) => warn!("Failed to bind health server to {}: {}", addr, e),
        }
    });

    tokio::spawn(async move {
        let app = Router::new().route("/metrics", get(metrics_handler));
        let addr = format!("0.0.0.0:{metrics_port}");
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => {
                info!("📊 Metrics server listening on {}", addr);
                if let Err(e) = axum::serve(listener, app).await {
                    warn!("Metrics server error: {}", e);
                }
            }
            Err(e) => warn!(
                "Failed to bind metrics server to {}: {}. Metrics will be unavailable.",
                addr, e
            ),
        }
    });
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "executor",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn readiness_check() -> Json<Value> {
    Json(json!({
        "ready": true,
        "service": "executor",
        "in_flight": metrics::IN_FLIGHT.get(),
    }))
}

async fn liveness_check() -> Json<Value> {
    Json(json!({
        "alive": true,
        "service": "executor",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn metrics_handler() -> Result<String, (axum::http::StatusCode, String)> {
    metrics::render_metrics()
        .map_err(|e| (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
