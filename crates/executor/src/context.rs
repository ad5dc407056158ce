/*!
 * Strategy Context and the Chain-RPC Boundary
 *
 * Strategies never hold clients of their own; everything external arrives
 * through the context: the `ChainRpc` trait (gas, pre-flight, submission),
 * the wallet identity, and the simulation settings.
 *
 * The on-chain side of `ChainRpc` (transaction construction, gas
 * estimation, provider rotation, MEV-protection routing) lives outside this
 * system; embedders inject an implementation. The stock binary runs in
 * simulation mode, where strategies short-circuit before ever touching RPC.
 */

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use arbflow_config::SimulationSettings;
use arbflow_domain::{ExecutionErrorKind, ExecutionResult, Opportunity, SwapHop};

use crate::simulation;

/// Failures crossing the RPC boundary, pre-mapped for the result taxonomy.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc unavailable: {0}")]
    Unavailable(String),

    #[error("pre-flight rejected: {0}")]
    PreflightReject(String),

    #[error("execution reverted: {0}")]
    Reverted(String),

    #[error("rpc timed out: {0}")]
    Timeout(String),

    #[error("no chain rpc configured")]
    Unconfigured,
}

impl RpcError {
    /// Map onto the executor result taxonomy.
    pub fn as_execution_error(&self) -> ExecutionErrorKind {
        match self {
            RpcError::PreflightReject(_) => ExecutionErrorKind::SimulationReject,
            RpcError::Reverted(_) => ExecutionErrorKind::Revert,
            RpcError::Timeout(_) => ExecutionErrorKind::Timeout,
            RpcError::Unavailable(_) | RpcError::Unconfigured => ExecutionErrorKind::Unknown,
        }
    }
}

/// A fully-validated swap ready to cross the RPC boundary.
#[derive(Debug, Clone)]
pub struct SwapExecution {
    pub opportunity_id: String,
    pub chain: String,
    pub wallet_id: String,
    pub amount_in: u128,
    pub hops: Vec<SwapHop>,
    /// Unix millis; the RPC layer enforces this mid-flight
    pub deadline: i64,
}

/// Outcome of a landed submission.
#[derive(Debug, Clone)]
pub struct SubmittedSwap {
    pub tx_hash: String,
    pub realized_profit_usd: f64,
}

/// The boundary to the out-of-scope on-chain layer.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Current gas price for the chain, in gwei.
    async fn gas_price_gwei(&self, chain: &str) -> Result<f64, RpcError>;

    /// Dry-run the swap against current chain state.
    async fn preflight(&self, request: &SwapExecution) -> Result<(), RpcError>;

    /// Build, sign, and submit; resolves once the transaction lands.
    async fn submit(&self, request: &SwapExecution) -> Result<SubmittedSwap, RpcError>;
}

/// Placeholder for deployments without an injected RPC implementation.
/// Every call fails with `Unconfigured`; simulation mode never gets here.
pub struct NullRpc;

#[async_trait]
impl ChainRpc for NullRpc {
    async fn gas_price_gwei(&self, _chain: &str) -> Result<f64, RpcError> {
        Err(RpcError::Unconfigured)
    }

    async fn preflight(&self, _request: &SwapExecution) -> Result<(), RpcError> {
        Err(RpcError::Unconfigured)
    }

    async fn submit(&self, _request: &SwapExecution) -> Result<SubmittedSwap, RpcError> {
        Err(RpcError::Unconfigured)
    }
}

/// Everything a strategy is allowed to reach.
pub struct StrategyContext {
    pub rpc: Arc<dyn ChainRpc>,
    pub wallet_id: String,
    pub max_gas_price_gwei: f64,
    simulation: Option<SimulationSettings>,
}

impl StrategyContext {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        wallet_id: &str,
        max_gas_price_gwei: f64,
        simulation: SimulationSettings,
    ) -> Self {
        Self {
            rpc,
            wallet_id: wallet_id.to_string(),
            max_gas_price_gwei,
            simulation: simulation.enabled.then_some(simulation),
        }
    }

    pub fn simulation_enabled(&self) -> bool {
        self.simulation.is_some()
    }

    /// Simulation short-circuit: strategies call this right after shape
    /// validation. `Some` means the synthetic result replaces execution.
    pub async fn simulate_if_enabled(&self, opportunity: &Opportunity) -> Option<ExecutionResult> {
        match &self.simulation {
            Some(settings) => Some(simulation::synthesize(settings, opportunity).await),
            None => None,
        }
    }

    /// Build the boundary-crossing request for an opportunity.
    pub fn swap_execution(&self, opportunity: &Opportunity) -> SwapExecution {
        SwapExecution {
            opportunity_id: opportunity.id.clone(),
            chain: opportunity.chain.clone(),
            wallet_id: self.wallet_id.clone(),
            amount_in: opportunity.amount_in,
            hops: opportunity.swap_path.clone(),
            deadline: opportunity.deadline,
        }
    }

    /// Gas ceiling check. `Ok(false)` is the `gas-spike` outcome.
    pub async fn gas_within_ceiling(&self, chain: &str) -> Result<bool, RpcError> {
        let gwei = self.rpc.gas_price_gwei(chain).await?;
        Ok(gwei <= self.max_gas_price_gwei)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simulation_settings(enabled: bool) -> SimulationSettings {
        SimulationSettings {
            enabled,
            success_rate: 1.0,
            latency: std::time::Duration::ZERO,
            profit_variance: 0.0,
        }
    }

    fn opportunity() -> Opportunity {
        serde_json::from_str(
            r#"{
                "id": "opp-ctx",
                "type": "cross-dex",
                "chain": "ethereum",
                "buyVenue": "uniswap_v3",
                "sellVenue": "sushiswap",
                "confidence": 0.9,
                "deadline": 9999999999999,
                "pipelineTimestamps": { "detectedAt": 1 }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_rpc_error_mapping() {
        assert_eq!(
            RpcError::PreflightReject("slippage".into()).as_execution_error(),
            ExecutionErrorKind::SimulationReject
        );
        assert_eq!(
            RpcError::Reverted("out of gas".into()).as_execution_error(),
            ExecutionErrorKind::Revert
        );
        assert_eq!(
            RpcError::Timeout("deadline".into()).as_execution_error(),
            ExecutionErrorKind::Timeout
        );
        assert_eq!(
            RpcError::Unconfigured.as_execution_error(),
            ExecutionErrorKind::Unknown
        );
    }

    #[tokio::test]
    async fn test_simulation_short_circuit() {
        let ctx = StrategyContext::new(
            Arc::new(NullRpc),
            "wallet-1",
            300.0,
            simulation_settings(true),
        );
        assert!(ctx.simulation_enabled());

        let result = ctx.simulate_if_enabled(&opportunity()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.opportunity_id, "opp-ctx");
    }

    #[tokio::test]
    async fn test_live_mode_does_not_short_circuit() {
        let ctx = StrategyContext::new(
            Arc::new(NullRpc),
            "wallet-1",
            300.0,
            simulation_settings(false),
        );
        assert!(!ctx.simulation_enabled());
        assert!(ctx.simulate_if_enabled(&opportunity()).await.is_none());

        // NullRpc refuses everything
        assert!(matches!(
            ctx.gas_within_ceiling("ethereum").await,
            Err(RpcError::Unconfigured)
        ));
    }
}
