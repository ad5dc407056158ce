/*!
 * Cross-Chain Strategy
 *
 * Buy on the source chain, bridge, sell on the destination. The `chain`
 * field names the source leg; the destination rides in the sell venue
 * (`{chain}:{venue}` convention from the detectors). Bridge latency makes
 * these the most deadline-sensitive opportunities in the pipeline, so the
 * pre-flight is mandatory in live mode.
 */

use async_trait::async_trait;

use arbflow_domain::{ExecutionErrorKind, ExecutionResult, Opportunity, OpportunityKind};

use crate::context::StrategyContext;
use crate::strategy::{Strategy, execute_via_rpc, validate_hop_chain};

pub struct CrossChainStrategy;

impl CrossChainStrategy {
    fn validate(&self, opp: &Opportunity) -> Result<(), String> {
        if opp.buy_venue.is_empty() || opp.sell_venue.is_empty() {
            return Err("cross-chain requires both buy and sell venues".into());
        }
        let destination = opp.sell_venue.split(':').next().unwrap_or_default();
        if destination == opp.chain {
            return Err(format!(
                "sell leg resolves to the source chain {:?}; not a cross-chain route",
                opp.chain
            ));
        }
        if !opp.swap_path.is_empty() {
            validate_hop_chain(&opp.swap_path)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Strategy for CrossChainStrategy {
    fn name(&self) -> &'static str {
        "cross-chain"
    }

    fn kind(&self) -> OpportunityKind {
        OpportunityKind::CrossChain
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

    fn opportunity(chain: &str, sell_venue: &str) -> Opportunity {
        serde_json::from_str(&format!(
            r#"{{
                "id": "opp-cc",
                "type": "cross-chain",
                "chain": "{chain}",
                "buyVenue": "uniswap_v3",
                "sellVenue": "{sell_venue}",
                "confidence": 0.75,
                "deadline": 9999999999999,
                "pipelineTimestamps": {{ "detectedAt": 1 }}
            }}"#
        ))
        .unwrap()
    }

    #[test]
    fn test_destination_must_differ_from_source() {
        let strategy = CrossChainStrategy;
        assert!(strategy.validate(&opportunity("ethereum", "arbitrum:camelot")).is_ok());
        assert!(strategy.validate(&opportunity("ethereum", "ethereum:sushiswap")).is_err());
        assert!(strategy.validate(&opportunity("ethereum", "")).is_err());
    }
}
