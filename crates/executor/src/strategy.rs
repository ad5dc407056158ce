/*!
 * Strategy Contract and Registry
 *
 * The executor holds one registry mapping opportunity `type` to exactly one
 * strategy. Resolution at dispatch:
 *
 * 1. `chain == "solana"` is the authoritative chain-family signal: such
 *    opportunities always route to the Solana strategy, whatever their tag.
 * 2. Otherwise, exact match on `type`.
 * 3. No match -> the dispatcher publishes `error=no-strategy`.
 *
 * Every strategy obeys the same contract: opportunity + context in,
 * `ExecutionResult` out, all failures tagged, nothing escapes the boundary.
 */

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use arbflow_domain::{ExecutionErrorKind, ExecutionResult, Opportunity, OpportunityKind, SwapHop};

use crate::context::StrategyContext;

#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// The opportunity `type` this strategy is registered under.
    fn kind(&self) -> OpportunityKind;

    async fn execute(&self, opportunity: &Opportunity, ctx: &StrategyContext) -> ExecutionResult;
}

/// Read-only after startup; shared across workers.
pub struct StrategyRegistry {
    by_kind: HashMap<OpportunityKind, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            by_kind: HashMap::new(),
        }
    }

    /// Register under the strategy's own kind; last registration wins.
    pub fn register(&mut self, strategy: Arc<dyn Strategy>) {
        self.by_kind.insert(strategy.kind(), strategy);
    }

    /// All eight pipeline strategies.
    pub fn with_defaults() -> Self {
        use crate::strategies::*;

        let mut registry = Self::new();
        registry.register(Arc::new(cross_dex::CrossDexStrategy));
        registry.register(Arc::new(triangular::TriangularStrategy));
        registry.register(Arc::new(multi_leg::MultiLegStrategy));
        registry.register(Arc::new(cross_chain::CrossChainStrategy));
        registry.register(Arc::new(flash_loan::FlashLoanStrategy));
        registry.register(Arc::new(backrun::BackrunStrategy));
        registry.register(Arc::new(statistical::StatisticalStrategy));
        registry.register(Arc::new(solana::SolanaStrategy));
        registry
    }

    /// Resolve the single strategy for this opportunity, or `None` for the
    /// `no-strategy` outcome.
    pub fn resolve(&self, opportunity: &Opportunity) -> Option<Arc<dyn Strategy>> {
        if opportunity.chain == "solana" {
            let solana = self.by_kind.get(&OpportunityKind::Solana).cloned();
            if solana.is_some() {
                return solana;
            }
            // No Solana strategy registered: a solana-chain opportunity has
            // nowhere else to go
            return None;
        }
        self.by_kind.get(&opportunity.kind).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_kind.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Hop-chain coherence: each hop must consume the previous hop's output.
pub fn validate_hop_chain(path: &[SwapHop]) -> Result<(), String> {
    for pair in path.windows(2) {
        if pair[0].token_out != pair[1].token_in {
            return Err(format!(
                "hop output {} does not feed next hop input {}",
                pair[0].token_out, pair[1].token_in
            ));
        }
    }
    for (index, hop) in path.iter().enumerate() {
        if hop.venue.is_empty() || hop.token_in.is_empty() || hop.token_out.is_empty() {
            return Err(format!("hop {index} has empty venue or token"));
        }
    }
    Ok(())
}

/// The shared live-execution tail: gas ceiling, optional pre-flight, submit.
/// Called by strategies after shape validation and the simulation
/// short-circuit; every RPC failure maps onto the result taxonomy here.
pub async fn execute_via_rpc(
    opportunity: &Opportunity,
    ctx: &StrategyContext,
    preflight: bool,
) -> ExecutionResult {
    match ctx.gas_within_ceiling(&opportunity.chain).await {
        Ok(true) => {}
        Ok(false) => {
            return ExecutionResult::failure(
                opportunity,
                ExecutionErrorKind::GasSpike,
                format!("gas above {} gwei ceiling", ctx.max_gas_price_gwei),
            );
        }
        Err(e) => {
            return ExecutionResult::failure(opportunity, e.as_execution_error(), e.to_string());
        }
    }

    let request = ctx.swap_execution(opportunity);

    if preflight {
        if let Err(e) = ctx.rpc.preflight(&request).await {
            return ExecutionResult::failure(opportunity, e.as_execution_error(), e.to_string());
        }
        debug!("Pre-flight passed for {}", opportunity.id);
    }

    match ctx.rpc.submit(&request).await {
        Ok(submitted) => ExecutionResult::success(
            opportunity,
            submitted.tx_hash,
            submitted.realized_profit_usd,
        ),
        Err(e) => ExecutionResult::failure(opportunity, e.as_execution_error(), e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opportunity(kind: &str, chain: &str) -> Opportunity {
        serde_json::from_str(&format!(
            r#"{{
                "id": "opp-reg",
                "type": "{kind}",
                "chain": "{chain}",
                "buyVenue": "a",
                "sellVenue": "b",
                "confidence": 0.9,
                "deadline": 9999999999999,
                "pipelineTimestamps": {{ "detectedAt": 1 }}
            }}"#
        ))
        .unwrap()
    }

    #[test]
    fn test_exact_kind_resolution() {
        let registry = StrategyRegistry::with_defaults();

        let resolved = registry.resolve(&opportunity("cross-dex", "ethereum")).unwrap();
        assert_eq!(resolved.kind(), OpportunityKind::CrossDex);

        let resolved = registry.resolve(&opportunity("flash-loan", "arbitrum")).unwrap();
        assert_eq!(resolved.kind(), OpportunityKind::FlashLoan);
    }

    #[test]
    fn test_solana_chain_overrides_kind() {
        let registry = StrategyRegistry::with_defaults();

        // Tagged cross-dex but living on solana: the chain is authoritative
        let resolved = registry.resolve(&opportunity("cross-dex", "solana")).unwrap();
        assert_eq!(resolved.kind(), OpportunityKind::Solana);

        let resolved = registry.resolve(&opportunity("backrun", "solana")).unwrap();
        assert_eq!(resolved.kind(), OpportunityKind::Solana);
    }

    #[test]
    fn test_missing_strategy_resolves_none() {
        let registry = StrategyRegistry::new();
        assert!(registry.resolve(&opportunity("cross-dex", "ethereum")).is_none());
        assert!(registry.resolve(&opportunity("cross-dex", "solana")).is_none());
    }

    #[test]
    fn test_hop_chain_validation() {
        let good: Vec<SwapHop> = serde_json::from_str(
            r#"[
                {"venue":"uniswap_v3","tokenIn":"WETH","tokenOut":"USDC","minOut":"1"},
                {"venue":"sushiswap","tokenIn":"USDC","tokenOut":"WETH","minOut":"1"}
            ]"#,
        )
        .unwrap();
        assert!(validate_hop_chain(&good).is_ok());

        let broken: Vec<SwapHop> = serde_json::from_str(
            r#"[
                {"venue":"uniswap_v3","tokenIn":"WETH","tokenOut":"USDC","minOut":"1"},
                {"venue":"sushiswap","tokenIn":"DAI","tokenOut":"WETH","minOut":"1"}
            ]"#,
        )
        .unwrap();
        assert!(validate_hop_chain(&broken).is_err());

        let empty_venue: Vec<SwapHop> = serde_json::from_str(
            r#"[{"venue":"","tokenIn":"WETH","tokenOut":"USDC","minOut":"1"}]"#,
        )
        .unwrap();
        assert!(validate_hop_chain(&empty_venue).is_err());
    }
}
