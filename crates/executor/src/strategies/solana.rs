/*!
 * Solana Strategy
 *
 * The chain-family catch-all: any opportunity on `chain == "solana"`
 * routes here regardless of its `type` tag (the registry enforces that).
 * No gas-price market on Solana — priority fees ride inside the
 * transaction — so this strategy skips the gas ceiling and relies on the
 * pre-flight (`simulateTransaction` on the RPC side) to filter losers.
 */

use async_trait::async_trait;

use arbflow_domain::{ExecutionErrorKind, ExecutionResult, Opportunity, OpportunityKind};

use crate::context::StrategyContext;
use crate::strategy::{Strategy, validate_hop_chain};

pub struct SolanaStrategy;

impl SolanaStrategy {
    fn validate(&self, opp: &Opportunity) -> Result<(), String> {
        if opp.chain != "solana" && opp.kind != OpportunityKind::Solana {
            return Err(format!(
                "solana strategy received a {} opportunity on {}",
                opp.kind, opp.chain
            ));
        }
        if opp.swap_path.is_empty() && (opp.buy_venue.is_empty() || opp.sell_venue.is_empty()) {
            return Err("solana route needs either a swap path or a venue pair".into());
        }
        if !opp.swap_path.is_empty() {
            validate_hop_chain(&opp.swap_path)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Strategy for SolanaStrategy {
    fn name(&self) -> &'static str {
        "solana"
    }

    fn kind(&self) -> OpportunityKind {
        OpportunityKind::Solana
    }

    async fn execute(&self, opportunity: &Opportunity, ctx: &StrategyContext) -> ExecutionResult {
        if let Err(detail) = self.validate(opportunity) {
            return ExecutionResult::failure(opportunity, ExecutionErrorKind::PathInvalid, detail);
        }

        if let Some(result) = ctx.simulate_if_enabled(opportunity).await {
            return result;
        }

        let request = ctx.swap_execution(opportunity);
        if let Err(e) = ctx.rpc.preflight(&request).await {
            return ExecutionResult::failure(opportunity, e.as_execution_error(), e.to_string());
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_any_type_on_solana() {
        let strategy = SolanaStrategy;

        let opp: Opportunity = serde_json::from_str(
            r#"{
                "id": "opp-sol",
                "type": "cross-dex",
                "chain": "solana",
                "buyVenue": "raydium",
                "sellVenue": "orca",
                "confidence": 0.9,
                "deadline": 9999999999999,
                "pipelineTimestamps": { "detectedAt": 1 }
            }"#,
        )
        .unwrap();
        assert!(strategy.validate(&opp).is_ok());
    }

    #[test]
    fn test_rejects_evm_opportunities() {
        let strategy = SolanaStrategy;

        let opp: Opportunity = serde_json::from_str(
            r#"{
                "id": "opp-evm",
                "type": "cross-dex",
                "chain": "ethereum",
                "buyVenue": "uniswap_v3",
                "sellVenue": "sushiswap",
                "confidence": 0.9,
                "deadline": 9999999999999,
                "pipelineTimestamps": { "detectedAt": 1 }
            }"#,
        )
        .unwrap();
        assert!(strategy.validate(&opp).is_err());
    }

    #[test]
    fn test_needs_route_or_venues() {
        let strategy = SolanaStrategy;

        let opp: Opportunity = serde_json::from_str(
            r#"{
                "id": "opp-sol2",
                "type": "solana",
                "chain": "solana",
                "confidence": 0.9,
                "deadline": 9999999999999,
                "pipelineTimestamps": { "detectedAt": 1 }
            }"#,
        )
        .unwrap();
        assert!(strategy.validate(&opp).is_err());
    }
}
