/*!
 * Simulation Mode
 *
 * Process-wide short-circuit for staging rehearsals and the integration
 * test suite. Strategies validate the opportunity shape as usual, then
 * synthesize an outcome instead of crossing the RPC boundary:
 *
 * - success with probability `success_rate` (1.0 in tests)
 * - artificial `latency` per execution
 * - realized profit = expected profit ± `profit_variance`
 *
 * The dispatcher lifecycle (distributed lock, deadline check, deferred
 * ack) is unchanged, so pipeline semantics are rehearsed for real.
 */

use rand::Rng;

use arbflow_config::SimulationSettings;
use arbflow_domain::{ExecutionErrorKind, ExecutionResult, Opportunity};

/// Produce a synthetic result for the opportunity.
pub async fn synthesize(settings: &SimulationSettings, opportunity: &Opportunity) -> ExecutionResult {
    if !settings.latency.is_zero() {
        tokio::time::sleep(settings.latency).await;
    }

    let (succeeded, profit_factor, tx_nonce) = {
        let mut rng = rand::thread_rng();
        let roll: f64 = rng.r#gen();
        let variance = settings.profit_variance.abs();
        let factor = if variance > 0.0 {
            rng.gen_range(1.0 - variance..=1.0 + variance)
        } else {
            1.0
        };
        (roll < settings.success_rate || settings.success_rate >= 1.0, factor, rng.r#gen::<u64>())
    };

    if succeeded {
        ExecutionResult::success(
            opportunity,
            format!("0xsim{tx_nonce:016x}"),
            opportunity.expected_profit_usd * profit_factor,
        )
    } else {
        ExecutionResult::failure(
            opportunity,
            ExecutionErrorKind::SimulationReject,
            "synthetic rejection (simulation mode)",
        )
    }
}
