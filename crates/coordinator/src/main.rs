/*!
 * Coordinator Service
 *
 * One instance per region is active at a time; the rest are standbys.
 *
 * ## Task Layout
 *
 * ```text
 * Main Process
 *     │
 *     ├──> Heartbeat publisher        (always)
 *     ├──> Leader elector             (always; acquire/renew/release)
 *     ├──> Health + metrics servers   (always)
 *     │
 *     └──> Active-only (started on election, stopped on demotion):
 *          ├──> Opportunity forwarder
 *          └──> Health monitor + alert dispatch
 * ```
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
use std::time::Duration;
use tokio::signal;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

use arbflow_common::{HeartbeatCounters, HeartbeatPublisher, LockManager, RetryPolicy, StreamBus};
use arbflow_config::topology;
use arbflow_coordinator::{
    CoordinatorConfig, Forwarder, HealthMonitor, LeaderElector, LeaderState,
    alerts::EventPublisher, metrics,
};
use arbflow_domain::{ReportedState, ServiceRole};

/// Budget for readers and the elector to wind down before abandonment
const SHUTDOWN_BUDGET: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> ExitCode {
    arbflow_common::init_tracing_from_env();

    info!("🚀 Starting ArbFlow Coordinator");

    let config = match CoordinatorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {:#}", e);
            return ExitCode::from(2);
        }
    };

    info!("📋 Configuration loaded:");
    info!("   - Instance: {}", config.instance_id);
    info!("   - Region: {}", config.region);
    info!("   - Redis: {}:{}", config.redis.host, config.redis.port);
    info!(
        "   - Lease: ttl={:?} renew={:?} retry={:?}",
        config.leader.lease_ttl, config.leader.renew_interval, config.leader.retry_interval
    );
    info!(
        "   - Health: stale={:?} grace={:?} eval={:?} hysteresis={}",
        config.health.stale_threshold,
        config.health.startup_grace,
        config.health.eval_interval,
        config.health.hysteresis_count
    );
    info!("   - Monitored services: {}", config.monitored_services.len());

    match run(config).await {
        Ok(code) => code,
        Err(e) => {
            error!("Coordinator failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: CoordinatorConfig) -> anyhow::Result<ExitCode> {
    let redis_url = config.redis.url();

    // Substrate connections. Unreachable Redis at startup is exit code 1.
    info!("📡 Connecting to stream substrate...");
    let mut bus = match StreamBus::connect(&redis_url).await {
        Ok(bus) => bus,
        Err(e) => {
            error!("Substrate unreachable at startup: {}", e);
            return Ok(ExitCode::from(1));
        }
    };
    if let Err(e) = bus.ping().await {
        error!("Substrate ping failed at startup: {}", e);
        return Ok(ExitCode::from(1));
    }
    let locks = match LockManager::connect(&redis_url, &config.instance_id).await {
        Ok(locks) => locks,
        Err(e) => {
            error!("Lock manager connection failed at startup: {}", e);
            return Ok(ExitCode::from(1));
        }
    };
    info!("✅ Stream substrate connected");

    let events = EventPublisher::new(
        bus.clone(),
        &config.instance_id,
        &config.region,
        config.caps.coordinator_events,
    );

    // Shutdown fan-out
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Heartbeat publisher (short retry policy so it never stalls)
    let counters = HeartbeatCounters::new();
    let heartbeat_bus = StreamBus::connect_with_policy(&redis_url, RetryPolicy::short())
        .await
        .context("Failed to create heartbeat connection")?;
    let heartbeat = HeartbeatPublisher::new(
        heartbeat_bus,
        topology::SERVICE_HEARTBEATS,
        &config.instance_id,
        ServiceRole::Coordinator,
        counters.clone(),
        config.health.heartbeat_interval,
        config.caps.service_heartbeats,
    );
    let heartbeat_handle = tokio::spawn(heartbeat.run(shutdown_tx.subscribe()));

    // Health + metrics endpoints
    spawn_http_servers(config.health_port, config.metrics_port);

    // Leader elector
    let (elector, leader_rx) = LeaderElector::new(
        locks,
        events.clone(),
        &config.region,
        config.leader,
    );
    let elector_handle = tokio::spawn(elector.run(shutdown_tx.subscribe()));

    counters.set_state(ReportedState::Healthy);
    info!("✅ Coordinator is running (standby until elected)");
    info!("   - Press Ctrl+C to shutdown gracefully");

    // Supervise active-only subsystems against leadership changes
    let supervisor_handle = tokio::spawn(supervise_active_tasks(
        config.clone(),
        redis_url.clone(),
        events.clone(),
        counters.clone(),
        leader_rx,
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    info!("🛑 Shutting down Coordinator...");
    counters.set_state(ReportedState::Failed);
    let _ = shutdown_tx.send(());

    let wind_down = tokio::time::timeout(SHUTDOWN_BUDGET, async {
        let _ = supervisor_handle.await;
        let _ = elector_handle.await;
    })
    .await;
    // Heartbeat has its own (shorter) budget
    let heartbeat_done =
        tokio::time::timeout(Duration::from_secs(1), async { let _ = heartbeat_handle.await; })
            .await;

    if wind_down.is_err() || heartbeat_done.is_err() {
        warn!("Shutdown budget exceeded; abandoning remaining tasks");
        return Ok(ExitCode::from(3));
    }

    info!("👋 Coordinator stopped");
    Ok(ExitCode::SUCCESS)
}

/// Start/stop the forwarder and health monitor as leadership changes.
///
/// Each activation gets a fresh demotion channel; demotion or shutdown
/// signals it and waits out the reader budget.
async fn supervise_active_tasks(
    config: CoordinatorConfig,
    redis_url: String,
    events: EventPublisher,
    counters: std::sync::Arc<HeartbeatCounters>,
    mut leader_rx: watch::Receiver<LeaderState>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut active: Option<(broadcast::Sender<()>, Vec<tokio::task::JoinHandle<()>>)> = None;

    loop {
        tokio::select! {
            changed = leader_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *leader_rx.borrow_and_update();
                match state {
                    LeaderState::Active if active.is_none() => {
                        match start_active_tasks(&config, &redis_url, &events, &counters).await {
                            Ok(started) => active = Some(started),
                            Err(e) => {
                                error!("Failed to start active-only subsystems: {:#}", e);
                            }
                        }
                    }
                    LeaderState::Standby => {
                        if let Some((demote_tx, handles)) = active.take() {
                            info!("Stopping active-only subsystems");
                            let _ = demote_tx.send(());
                            let _ = tokio::time::timeout(SHUTDOWN_BUDGET, async {
                                for handle in handles {
                                    let _ = handle.await;
                                }
                            })
                            .await;
                        }
                    }
                    _ => {}
                }
            }
            _ = shutdown.recv() => {
                if let Some((demote_tx, handles)) = active.take() {
                    let _ = demote_tx.send(());
                    let _ = tokio::time::timeout(SHUTDOWN_BUDGET, async {
                        for handle in handles {
                            let _ = handle.await;
                        }
                    })
                    .await;
                }
                break;
            }
        }
    }
}

async fn start_active_tasks(
    config: &CoordinatorConfig,
    redis_url: &str,
    events: &EventPublisher,
    counters: &std::sync::Arc<HeartbeatCounters>,
) -> anyhow::Result<(broadcast::Sender<()>, Vec<tokio::task::JoinHandle<()>>)> {
    let (demote_tx, _) = broadcast::channel::<()>(1);

    // The forwarder blocks on group reads, so it owns a dedicated connection
    let forwarder_bus = StreamBus::connect(redis_url)
        .await
        .context("Failed to create forwarder connection")?;
    let forwarder = Forwarder::new(
        forwarder_bus,
        &config.instance_id,
        config.reader,
        config.caps.clone(),
        counters.clone(),
    );
    let forwarder_handle = tokio::spawn(forwarder.run(demote_tx.subscribe()));

    let monitor_bus = StreamBus::connect(redis_url)
        .await
        .context("Failed to create health monitor connection")?;
    let monitor = HealthMonitor::new(
        monitor_bus,
        events.clone(),
        config.health,
        &config.monitored_services,
    );
    let monitor_handle = tokio::spawn(monitor.run(demote_tx.subscribe()));

    info!("Active-only subsystems started (forwarder, health monitor)");
    Ok((demote_tx, vec![forwarder_handle, monitor_handle]))
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
        "service": "coordinator",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn readiness_check() -> Json<Value> {
    Json(json!({
        "ready": true,
        "service": "coordinator",
        "leader": metrics::IS_LEADER.get() == 1,
    }))
}

async fn liveness_check() -> Json<Value> {
    Json(json!({
        "alive": true,
        "service": "coordinator",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn metrics_handler() -> Result<String, (axum::http::StatusCode, String)> {
    metrics::render_metrics()
        .map_err(|e| (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
