/*!
 * Multi-Leg Strategy
 *
 * Arbitrary N-hop route on a single chain. Unlike the triangular variant
 * the route does not need to cycle; the detector already priced the final
 * leg against the entry token.
 */

use async_trait::async_trait;

use arbflow_domain::{ExecutionErrorKind, ExecutionResult, Opportunity, OpportunityKind};

use crate::context::StrategyContext;
use crate::strategy::{Strategy, execute_via_rpc, validate_hop_chain};

pub struct MultiLegStrategy;

impl MultiLegStrategy {
    fn validate(&self, opp: &Opportunity) -> Result<(), String> {
        if opp.swap_path.len() < 2 {
            return Err(format!(
                "multi-leg route needs at least 2 hops, got {}",
                opp.swap_path.len()
            ));
        }
        if opp.amount_in == 0 {
            return Err("multi-leg route requires a non-zero input amount".into());
        }
        validate_hop_chain(&opp.swap_path)
    }
}

#[async_trait]
impl Strategy for MultiLegStrategy {
    fn name(&self) -> &'static str {
        "multi-leg"
    }

    fn kind(&self) -> OpportunityKind {
        OpportunityKind::MultiLeg
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
