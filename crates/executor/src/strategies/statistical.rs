/*!
 * Statistical Strategy
 *
 * Mean-reversion signals from the statistical engine. These are model
 * output, not observed price gaps, so the confidence score is load-bearing:
 * below the floor the signal is noise and the strategy refuses it rather
 * than paying gas to find out.
 */

use async_trait::async_trait;

use arbflow_domain::{ExecutionErrorKind, ExecutionResult, Opportunity, OpportunityKind};

use crate::context::StrategyContext;
use crate::strategy::{Strategy, execute_via_rpc};

/// Signals under this confidence are treated as noise.
const CONFIDENCE_FLOOR: f64 = 0.55;

pub struct StatisticalStrategy;

impl StatisticalStrategy {
    fn validate(&self, opp: &Opportunity) -> Result<(), String> {
        if opp.buy_venue.is_empty() || opp.sell_venue.is_empty() {
            return Err("statistical signal requires both venues".into());
        }
        if opp.confidence < CONFIDENCE_FLOOR {
            return Err(format!(
                "confidence {:.2} below the {CONFIDENCE_FLOOR} floor",
                opp.confidence
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Strategy for StatisticalStrategy {
    fn name(&self) -> &'static str {
        "statistical"
    }

    fn kind(&self) -> OpportunityKind {
        OpportunityKind::Statistical
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
