/*!
 * Configuration Module for the Executor
 *
 * Environment variables (beyond the shared ones in `arbflow-config`):
 * - INSTANCE_ID: executor identity (default: executor-{hostname})
 * - WALLET_ID: wallet identity handed to strategies via the context
 * - EXECUTOR_HEALTH_PORT / EXECUTOR_METRICS_PORT: listen ports
 */

use anyhow::{Context, Result};
use std::env;

use arbflow_config::{
    ExecutorSettings, HealthSettings, ReaderSettings, RedisSettings, SimulationSettings,
    StreamCaps,
};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub instance_id: String,
    pub wallet_id: String,

    pub redis: RedisSettings,
    pub caps: StreamCaps,
    pub reader: ReaderSettings,
    pub executor: ExecutorSettings,
    pub simulation: SimulationSettings,
    pub health: HealthSettings,

    pub health_port: u16,
    pub metrics_port: u16,
}

impl ExecutorConfig {
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
                format!("executor-{host}")
            }
        };

        let wallet_id = env::var("WALLET_ID").unwrap_or_else(|_| "default-wallet".to_string());

        let health_port = env::var("EXECUTOR_HEALTH_PORT")
            .unwrap_or_else(|_| "8082".to_string())
            .parse::<u16>()
            .context("EXECUTOR_HEALTH_PORT must be a valid port number")?;

        let metrics_port = env::var("EXECUTOR_METRICS_PORT")
            .unwrap_or_else(|_| "9092".to_string())
            .parse::<u16>()
            .context("EXECUTOR_METRICS_PORT must be a valid port number")?;

        Ok(Self {
            instance_id,
            wallet_id,
            redis: RedisSettings::from_env()?,
            caps: StreamCaps::from_env()?,
            reader: ReaderSettings::from_env()?,
            executor: ExecutorSettings::from_env()?,
            simulation: SimulationSettings::from_env()?,
            health: HealthSettings::from_env()?,
            health_port,
            metrics_port,
        })
    }
}
