/*!
 * Backrun Strategy
 *
 * Anchored behind an observed pending transaction: the profit exists only
 * in the few blocks after the target lands, so this strategy skips the
 * pre-flight round-trip in live mode and goes straight to submission.
 */

use async_trait::async_trait;

use arbflow_domain::{ExecutionErrorKind, ExecutionResult, Opportunity, OpportunityKind};

use crate::context::StrategyContext;
use crate::strategy::{Strategy, execute_via_rpc, validate_hop_chain};

pub struct BackrunStrategy;

impl BackrunStrategy {
    fn validate(&self, opp: &Opportunity) -> Result<(), String> {
        if opp.buy_venue.is_empty() {
            return Err("backrun requires the venue the target trade moved".into());
        }
        if !opp.swap_path.is_empty() {
            validate_hop_chain(&opp.swap_path)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Strategy for BackrunStrategy {
    fn name(&self) -> &'static str {
        "backrun"
    }

    fn kind(&self) -> OpportunityKind {
        OpportunityKind::Backrun
    }

    async fn execute(&self, opportunity: &Opportunity, ctx: &StrategyContext) -> ExecutionResult {
        if let Err(detail) = self.validate(opportunity) {
            return ExecutionResult::failure(opportunity, ExecutionErrorKind::PathInvalid, detail);
        }

        if let Some(result) = ctx.simulate_if_enabled(opportunity).await {
            return result;
        }

        // No pre-flight: latency is the edge
        execute_via_rpc(opportunity, ctx, false).await
    }
}
