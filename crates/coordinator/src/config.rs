/*!
 * Configuration Module for the Coordinator
 *
 * Environment variables (beyond the shared ones in `arbflow-config`):
 * - INSTANCE_ID: coordinator identity (default: coordinator-{hostname})
 * - REGION: leader-lease region (default: global)
 * - MONITORED_SERVICES: comma list of `serviceId:role` entries the health
 *   monitor registers up front (e.g. "executor-1:executor,partition-eu:partition")
 * - COORDINATOR_HEALTH_PORT / COORDINATOR_METRICS_PORT: listen ports
 */

use anyhow::{Context, Result};
use std::env;

use arbflow_config::{
    HealthSettings, LeaderSettings, ReaderSettings, RedisSettings, StreamCaps,
};
use arbflow_domain::ServiceRole;

use crate::health::MonitoredService;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub instance_id: String,
    pub region: String,

    pub redis: RedisSettings,
    pub caps: StreamCaps,
    pub reader: ReaderSettings,
    pub leader: LeaderSettings,
    pub health: HealthSettings,

    /// Services the health monitor expects to see heartbeating
    pub monitored_services: Vec<MonitoredService>,

    pub health_port: u16,
    pub metrics_port: u16,
}

impl CoordinatorConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let instance_id = match env::var("INSTANCE_ID") {
            Ok(id) => id,
            Err(_) => {
                let host = hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| "local".to_string());
                format!("coordinator-{host}")
            }
        };

        let monitored_services = parse_monitored_services(
            &env::var("MONITORED_SERVICES").unwrap_or_default(),
        )?;

        let health_port = env::var("COORDINATOR_HEALTH_PORT")
            .unwrap_or_else(|_| "8081".to_string())
            .parse::<u16>()
            .context("COORDINATOR_HEALTH_PORT must be a valid port number")?;

        let metrics_port = env::var("COORDINATOR_METRICS_PORT")
            .unwrap_or_else(|_| "9091".to_string())
            .parse::<u16>()
            .context("COORDINATOR_METRICS_PORT must be a valid port number")?;

        Ok(Self {
            instance_id,
            region: arbflow_config::region(),
            redis: RedisSettings::from_env()?,
            caps: StreamCaps::from_env()?,
            reader: ReaderSettings::from_env()?,
            leader: LeaderSettings::from_env()?,
            health: HealthSettings::from_env()?,
            monitored_services,
            health_port,
            metrics_port,
        })
    }
}

fn parse_monitored_services(raw: &str) -> Result<Vec<MonitoredService>> {
    let mut services = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (service_id, role) = item
            .split_once(':')
            .with_context(|| format!("MONITORED_SERVICES entry {item:?} must be serviceId:role"))?;
        let role: ServiceRole = role
            .trim()
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .with_context(|| format!("MONITORED_SERVICES entry {item:?}"))?;
        services.push(MonitoredService {
            service_id: service_id.trim().to_string(),
            role,
        });
    }
    Ok(services)
}
