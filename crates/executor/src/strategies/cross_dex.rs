/*!
 * Cross-DEX Strategy
 *
 * Same-chain, two-venue price gap: buy on `buyVenue`, sell on `sellVenue`.
 * Detectors usually omit the swap path for this type (the venue pair is the
 * route); when a path is supplied it must be a coherent buy/sell pair.
 */

use async_trait::async_trait;

use arbflow_domain::{ExecutionErrorKind, ExecutionResult, Opportunity, OpportunityKind};

use crate::context::StrategyContext;
use crate::strategy::{Strategy, execute_via_rpc, validate_hop_chain};

pub struct CrossDexStrategy;

impl CrossDexStrategy {
    fn validate(&self, opp: &Opportunity) -> Result<(), String> {
        if opp.buy_venue.is_empty() || opp.sell_venue.is_empty() {
            return Err("cross-dex requires both buy and sell venues".into());
        }
        if opp.buy_venue == opp.sell_venue {
            return Err(format!(
                "buy and sell venue are both {:?}; no price gap to capture",
                opp.buy_venue
            ));
        }
        if !opp.swap_path.is_empty() {
            if opp.swap_path.len() != 2 {
                return Err(format!(
                    "cross-dex path must be a buy/sell pair, got {} hops",
                    opp.swap_path.len()
                ));
            }
            validate_hop_chain(&opp.swap_path)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Strategy for CrossDexStrategy {
    fn name(&self) -> &'static str {
        "cross-dex"
    }

    fn kind(&self) -> OpportunityKind {
        OpportunityKind::CrossDex
    }

    async fn execute(&self, opportunity: &Opportunity, ctx: &StrategyContext) -> ExecutionResult {
        if let Err(detail) = self.validate(opportunity) {
            return ExecutionResult::failure(opportunity, ExecutionErrorKind::PathInvalid, detail);
        }

        if let Some(result) = ctx.simulate_if_enabled(opportunity).await {
            return result;
        }

        execute_via_rpc(opportunity, ctx, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opportunity(buy: &str, sell: &str) -> Opportunity {
        serde_json::from_str(&format!(
            r#"{{
                "id": "opp-cd",
                "type": "cross-dex",
                "chain": "ethereum",
                "buyVenue": "{buy}",
                "sellVenue": "{sell}",
                "expectedProfitUsd": 12.0,
                "confidence": 0.9,
                "deadline": 9999999999999,
                "pipelineTimestamps": {{ "detectedAt": 1 }}
            }}"#
        ))
        .unwrap()
    }

    #[test]
    fn test_validates_venue_pair() {
        let strategy = CrossDexStrategy;
        assert!(strategy.validate(&opportunity("uniswap_v3", "sushiswap")).is_ok());
        assert!(strategy.validate(&opportunity("", "sushiswap")).is_err());
        assert!(strategy.validate(&opportunity("uniswap_v3", "uniswap_v3")).is_err());
    }

    #[test]
    fn test_rejects_malformed_path() {
        let strategy = CrossDexStrategy;
        let mut opp = opportunity("uniswap_v3", "sushiswap");
        opp.swap_path = serde_json::from_str(
            r#"[{"venue":"uniswap_v3","tokenIn":"WETH","tokenOut":"USDC","minOut":"1"}]"#,
        )
        .unwrap();
        // One hop is not a buy/sell pair
        assert!(strategy.validate(&opp).is_err());
    }

    #[tokio::test]
    async fn test_path_invalid_is_terminal() {
        let strategy = CrossDexStrategy;
        let ctx = crate::context::StrategyContext::new(
            std::sync::Arc::new(crate::context::NullRpc),
            "wallet",
            300.0,
            arbflow_config::SimulationSettings {
                enabled: true,
                success_rate: 1.0,
                latency: std::time::Duration::ZERO,
                profit_variance: 0.0,
            },
        );

        // Invalid shape fails before the simulation short-circuit
        let result = strategy.execute(&opportunity("", ""), &ctx).await;
        assert!(!result.success);
        assert_eq!(result.error, Some(ExecutionErrorKind::PathInvalid));
    }
}
