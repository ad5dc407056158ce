//! Configuration for ArbFlow services
//!
//! All configuration is environment-variable driven with sane defaults;
//! services call `dotenvy::dotenv().ok()` once and then build their config
//! from these shared settings structs plus service-local fields.
//!
//! Invalid values are configuration errors: services report them and exit
//! with code 2 rather than running with a half-parsed config.

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Stream names, consumer groups, and Redis key schema.
///
/// The stream topology is the system's API surface; names are fixed, only
/// the retention caps are tunable.
pub mod topology {
    /// Detected opportunities, produced by detectors
    pub const OPPORTUNITIES: &str = "stream:opportunities";
    /// Enriched requests, produced by the active coordinator
    pub const EXECUTION_REQUESTS: &str = "stream:execution-requests";
    /// Terminal outcomes, produced by executors
    pub const EXECUTION_RESULTS: &str = "stream:execution-results";
    /// Liveness records from every service
    pub const SERVICE_HEARTBEATS: &str = "stream:service-heartbeats";
    /// Leadership + degradation transitions
    pub const COORDINATOR_EVENTS: &str = "stream:coordinator-events";
    /// Unroutable opportunity entries
    pub const FORWARDING_DLQ: &str = "stream:forwarding-dlq";
    /// Poison execution requests
    pub const EXECUTION_DLQ: &str = "stream:execution-dlq";

    /// Consumer group of the coordinator forwarder on `OPPORTUNITIES`
    pub const COORDINATOR_GROUP: &str = "coordinator-group";
    /// Consumer group of executors on `EXECUTION_REQUESTS`
    pub const EXECUTION_GROUP: &str = "execution-engine-group";

    /// Leader lease key for a region; value = coordinator instance id
    pub fn leader_key(region: &str) -> String {
        format!("leader:{region}")
    }

    /// Per-opportunity execution lock; value = executor instance id
    pub fn opportunity_lock_key(opportunity_id: &str) -> String {
        format!("lock:opp:{opportunity_id}")
    }
}

/// Redis connection settings shared by all services.
#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

impl RedisSettings {
    /// `REDIS_URL` wins when present; otherwise `REDIS_HOST`/`REDIS_PORT`
    /// (defaults localhost:6379) with optional `REDIS_PASSWORD`.
    pub fn from_env() -> Result<Self> {
        if let Ok(url) = env::var("REDIS_URL") {
            return Self::parse_url(&url);
        }

        let host = env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("REDIS_PORT")
            .unwrap_or_else(|_| "6379".to_string())
            .parse::<u16>()
            .context("REDIS_PORT must be a valid port number")?;
        let password = env::var("REDIS_PASSWORD").ok();

        Ok(Self {
            host,
            port,
            password,
        })
    }

    fn parse_url(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("redis://")
            .context("REDIS_URL must start with redis://")?;

        let (auth, addr) = match rest.rsplit_once('@') {
            Some((auth, addr)) => (Some(auth), addr),
            None => (None, rest),
        };
        let password = auth.map(|a| match a.split_once(':') {
            Some((_user, pass)) => pass.to_string(),
            None => a.to_string(),
        });

        let (host, port) = match addr.split_once(':') {
            Some((host, port)) => (
                host.to_string(),
                port.trim_end_matches('/')
                    .parse::<u16>()
                    .context("REDIS_URL port must be a valid port number")?,
            ),
            None => (addr.trim_end_matches('/').to_string(), 6379),
        };

        Ok(Self {
            host,
            port,
            password,
        })
    }

    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}:{}", password, self.host, self.port),
            None => format!("redis://{}:{}", self.host, self.port),
        }
    }
}

/// Approximate MAXLEN retention caps per stream.
#[derive(Debug, Clone)]
pub struct StreamCaps {
    pub opportunities: usize,
    pub execution_requests: usize,
    pub execution_results: usize,
    pub service_heartbeats: usize,
    pub coordinator_events: usize,
    pub forwarding_dlq: usize,
    pub execution_dlq: usize,
}

impl StreamCaps {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            opportunities: env_usize("MAXLEN_OPPORTUNITIES", 10_000)?,
            execution_requests: env_usize("MAXLEN_EXECUTION_REQUESTS", 5_000)?,
            execution_results: env_usize("MAXLEN_EXECUTION_RESULTS", 5_000)?,
            service_heartbeats: env_usize("MAXLEN_SERVICE_HEARTBEATS", 1_000)?,
            coordinator_events: env_usize("MAXLEN_COORDINATOR_EVENTS", 5_000)?,
            forwarding_dlq: env_usize("MAXLEN_FORWARDING_DLQ", 10_000)?,
            execution_dlq: env_usize("MAXLEN_EXECUTION_DLQ", 10_000)?,
        })
    }
}

/// Stream reader tuning shared by the forwarder and the dispatcher.
#[derive(Debug, Clone, Copy)]
pub struct ReaderSettings {
    pub batch_size: usize,
    pub block: Duration,
}

impl ReaderSettings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            batch_size: env_usize("STREAM_BATCH_SIZE", 10)?,
            block: Duration::from_millis(env_u64("STREAM_BLOCK_MS", 100)?),
        })
    }
}

/// Leader-lease tuning for the coordinator.
#[derive(Debug, Clone, Copy)]
pub struct LeaderSettings {
    pub lease_ttl: Duration,
    pub renew_interval: Duration,
    pub retry_interval: Duration,
}

impl LeaderSettings {
    pub fn from_env() -> Result<Self> {
        let lease_ttl_ms = env_u64("LEASE_TTL_MS", 30_000)?;
        // Renewal defaults to a third of the lease so two renewals can fail
        // before the lease lapses.
        let renew_default = lease_ttl_ms / 3;
        let settings = Self {
            lease_ttl: Duration::from_millis(lease_ttl_ms),
            renew_interval: Duration::from_millis(env_u64("LEASE_RENEW_INTERVAL_MS", renew_default)?),
            retry_interval: Duration::from_millis(env_u64("LEASE_RETRY_INTERVAL_MS", 5_000)?),
        };

        if settings.renew_interval >= settings.lease_ttl {
            anyhow::bail!(
                "LEASE_RENEW_INTERVAL_MS ({:?}) must be shorter than LEASE_TTL_MS ({:?})",
                settings.renew_interval,
                settings.lease_ttl
            );
        }
        Ok(settings)
    }
}

/// Health monitor tuning.
#[derive(Debug, Clone, Copy)]
pub struct HealthSettings {
    pub heartbeat_interval: Duration,
    pub stale_threshold: Duration,
    pub startup_grace: Duration,
    pub eval_interval: Duration,
    pub hysteresis_count: u32,
}

impl HealthSettings {
    pub fn from_env() -> Result<Self> {
        let hysteresis_count = env_u64("HYSTERESIS_COUNT", 3)? as u32;
        if hysteresis_count == 0 {
            anyhow::bail!("HYSTERESIS_COUNT must be at least 1");
        }
        Ok(Self {
            heartbeat_interval: Duration::from_millis(env_u64("HEARTBEAT_INTERVAL_MS", 5_000)?),
            stale_threshold: Duration::from_millis(env_u64("STALE_HEARTBEAT_THRESHOLD_MS", 30_000)?),
            startup_grace: Duration::from_millis(env_u64("STARTUP_GRACE_PERIOD_MS", 120_000)?),
            eval_interval: Duration::from_millis(env_u64("EVAL_INTERVAL_MS", 5_000)?),
            hysteresis_count,
        })
    }
}

/// Executor worker-pool and lock tuning.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    pub max_in_flight: usize,
    pub lock_ttl: Duration,
    pub max_delivery_attempts: u64,
    pub max_gas_price_gwei: f64,
}

impl ExecutorSettings {
    pub fn from_env() -> Result<Self> {
        let max_in_flight = env_usize("MAX_IN_FLIGHT", 16)?;
        if max_in_flight == 0 {
            anyhow::bail!("MAX_IN_FLIGHT must be at least 1");
        }
        Ok(Self {
            max_in_flight,
            lock_ttl: Duration::from_millis(env_u64("OPPORTUNITY_LOCK_TTL_MS", 60_000)?),
            max_delivery_attempts: env_u64("MAX_DELIVERY_ATTEMPTS", 5)?,
            max_gas_price_gwei: env_f64("MAX_GAS_PRICE_GWEI", 300.0)?,
        })
    }
}

/// Simulation-mode tuning (synthetic results, no external systems).
#[derive(Debug, Clone, Copy)]
pub struct SimulationSettings {
    pub enabled: bool,
    pub success_rate: f64,
    pub latency: Duration,
    pub profit_variance: f64,
}

impl SimulationSettings {
    pub fn from_env() -> Result<Self> {
        let success_rate = env_f64("SIMULATION_SUCCESS_RATE", 1.0)?;
        if !(0.0..=1.0).contains(&success_rate) {
            anyhow::bail!("SIMULATION_SUCCESS_RATE must be within [0, 1]");
        }
        Ok(Self {
            enabled: env_bool("SIMULATION_MODE", false)?,
            success_rate,
            latency: Duration::from_millis(env_u64("SIMULATION_LATENCY_MS", 50)?),
            profit_variance: env_f64("SIMULATION_PROFIT_VARIANCE", 0.1)?,
        })
    }
}

/// Leader-lease region, default `global`.
pub fn region() -> String {
    env::var("REGION").unwrap_or_else(|_| "global".to_string())
}

fn env_u64(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("{name} must be a valid non-negative integer")),
        Err(_) => Ok(default),
    }
}

fn env_usize(name: &str, default: usize) -> Result<usize> {
    Ok(env_u64(name, default as u64)? as usize)
}

fn env_f64(name: &str, default: f64) -> Result<f64> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<f64>()
            .with_context(|| format!("{name} must be a valid number")),
        Err(_) => Ok(default),
    }
}

fn env_bool(name: &str, default: bool) -> Result<bool> {
    match env::var(name) {
        Ok(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => anyhow::bail!("{name} must be a boolean, got {other:?}"),
        },
        Err(_) => Ok(default),
    }
}
