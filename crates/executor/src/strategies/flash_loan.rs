/*!
 * Flash-Loan Strategy
 *
 * Borrow, swap around, repay — all inside one transaction. The route must
 * start and end on the borrowed token (the pool is repaid in kind) and the
 * borrow amount must be explicit. Atomicity means a failed route simply
 * reverts, so live mode relies on the pre-flight to avoid paying gas for
 * guaranteed reverts.
 */

use async_trait::async_trait;

use arbflow_domain::{ExecutionErrorKind, ExecutionResult, Opportunity, OpportunityKind};

use crate::context::StrategyContext;
use crate::strategy::{Strategy, execute_via_rpc, validate_hop_chain};

pub struct FlashLoanStrategy;

impl FlashLoanStrategy {
    fn validate(&self, opp: &Opportunity) -> Result<(), String> {
        if opp.amount_in == 0 {
            return Err("flash loan requires an explicit borrow amount".into());
        }
        if opp.swap_path.len() < 2 {
            return Err(format!(
                "flash-loan route needs at least 2 hops, got {}",
                opp.swap_path.len()
            ));
        }
        validate_hop_chain(&opp.swap_path)?;

        let borrow_token = &opp.swap_path[0].token_in;
        let repay_token = &opp.swap_path[opp.swap_path.len() - 1].token_out;
        if borrow_token != repay_token {
            return Err(format!(
                "route borrows {borrow_token} but ends holding {repay_token}; cannot repay"
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Strategy for FlashLoanStrategy {
    fn name(&self) -> &'static str {
        "flash-loan"
    }

    fn kind(&self) -> OpportunityKind {
        OpportunityKind::FlashLoan
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

    fn opportunity(amount: &str, path_json: &str) -> Opportunity {
        serde_json::from_str(&format!(
            r#"{{
                "id": "opp-fl",
                "type": "flash-loan",
                "chain": "ethereum",
                "buyVenue": "aave_v3",
                "sellVenue": "uniswap_v3",
                "confidence": 0.85,
                "amountIn": "{amount}",
                "swapPath": {path_json},
                "deadline": 9999999999999,
                "pipelineTimestamps": {{ "detectedAt": 1 }}
            }}"#
        ))
        .unwrap()
    }

    const REPAYABLE: &str = r#"[
        {"venue":"uniswap_v3","tokenIn":"USDC","tokenOut":"WETH","minOut":"1"},
        {"venue":"sushiswap","tokenIn":"WETH","tokenOut":"USDC","minOut":"1"}
    ]"#;

    const UNREPAYABLE: &str = r#"[
        {"venue":"uniswap_v3","tokenIn":"USDC","tokenOut":"WETH","minOut":"1"},
        {"venue":"sushiswap","tokenIn":"WETH","tokenOut":"DAI","minOut":"1"}
    ]"#;

    #[test]
    fn test_route_must_repay_borrow_token() {
        let strategy = FlashLoanStrategy;
        assert!(strategy.validate(&opportunity("1000000000", REPAYABLE)).is_ok());
        assert!(strategy.validate(&opportunity("1000000000", UNREPAYABLE)).is_err());
        assert!(strategy.validate(&opportunity("0", REPAYABLE)).is_err());
    }
}
