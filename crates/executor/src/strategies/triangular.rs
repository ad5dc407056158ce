/*!
 * Triangular Strategy
 *
 * Cyclic route on a single chain: the path must return to its starting
 * token (A -> B -> C -> A), otherwise the trade cannot settle flat.
 */

use async_trait::async_trait;

use arbflow_domain::{ExecutionErrorKind, ExecutionResult, Opportunity, OpportunityKind};

use crate::context::StrategyContext;
use crate::strategy::{Strategy, execute_via_rpc, validate_hop_chain};

pub struct TriangularStrategy;

impl TriangularStrategy {
    fn validate(&self, opp: &Opportunity) -> Result<(), String> {
        if opp.swap_path.len() < 3 {
            return Err(format!(
                "triangular route needs at least 3 hops, got {}",
                opp.swap_path.len()
            ));
        }
        validate_hop_chain(&opp.swap_path)?;

        let first = &opp.swap_path[0];
        let last = &opp.swap_path[opp.swap_path.len() - 1];
        if first.token_in != last.token_out {
            return Err(format!(
                "route does not cycle: starts at {} but ends at {}",
                first.token_in, last.token_out
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Strategy for TriangularStrategy {
    fn name(&self) -> &'static str {
        "triangular"
    }

    fn kind(&self) -> OpportunityKind {
        OpportunityKind::Triangular
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

    fn opportunity(path_json: &str) -> Opportunity {
        serde_json::from_str(&format!(
            r#"{{
                "id": "opp-tri",
                "type": "triangular",
                "chain": "bsc",
                "buyVenue": "pancakeswap",
                "sellVenue": "pancakeswap",
                "confidence": 0.8,
                "amountIn": "1000000000000000000",
                "swapPath": {path_json},
                "deadline": 9999999999999,
                "pipelineTimestamps": {{ "detectedAt": 1 }}
            }}"#
        ))
        .unwrap()
    }

    const CYCLE: &str = r#"[
        {"venue":"pancakeswap","tokenIn":"WBNB","tokenOut":"BUSD","minOut":"1"},
        {"venue":"pancakeswap","tokenIn":"BUSD","tokenOut":"CAKE","minOut":"1"},
        {"venue":"pancakeswap","tokenIn":"CAKE","tokenOut":"WBNB","minOut":"1"}
    ]"#;

    const OPEN: &str = r#"[
        {"venue":"pancakeswap","tokenIn":"WBNB","tokenOut":"BUSD","minOut":"1"},
        {"venue":"pancakeswap","tokenIn":"BUSD","tokenOut":"CAKE","minOut":"1"},
        {"venue":"pancakeswap","tokenIn":"CAKE","tokenOut":"USDT","minOut":"1"}
    ]"#;

    #[test]
    fn test_requires_closed_cycle() {
        let strategy = TriangularStrategy;
        assert!(strategy.validate(&opportunity(CYCLE)).is_ok());
        assert!(strategy.validate(&opportunity(OPEN)).is_err());
        assert!(strategy.validate(&opportunity("[]")).is_err());
    }
}
