/*!
 * Arbitrage Opportunities
 *
 * The opportunity record is produced by detectors (outside this system),
 * travels as JSON in the `data` field of `stream:opportunities`, and is
 * immutable once created. The coordinator enriches it into an
 * `ExecutionRequest`; the executor consumes it at most once.
 *
 * ## Wire Format
 *
 * Keys are camelCase. Token amounts are integers in the token's smallest
 * unit, carried as decimal strings (detectors written in dynamic languages
 * cannot represent 256-bit amounts as JSON numbers); small legacy producers
 * that emit plain numbers are still accepted on decode.
 */

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Opportunity classification, as tagged by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpportunityKind {
    /// Same-chain, two-venue price gap
    CrossDex,
    /// Cyclic three-token route on a single chain
    Triangular,
    /// Arbitrary N-hop route on a single chain
    MultiLeg,
    /// Buy on one chain, sell on another (bridge in between)
    CrossChain,
    /// Borrow-swap-repay within one transaction
    FlashLoan,
    /// Anchored behind an observed pending transaction
    Backrun,
    /// Mean-reversion signal from the statistical engine
    Statistical,
    /// Solana-native route (Jupiter/Raydium style venues)
    Solana,
}

impl OpportunityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpportunityKind::CrossDex => "cross-dex",
            OpportunityKind::Triangular => "triangular",
            OpportunityKind::MultiLeg => "multi-leg",
            OpportunityKind::CrossChain => "cross-chain",
            OpportunityKind::FlashLoan => "flash-loan",
            OpportunityKind::Backrun => "backrun",
            OpportunityKind::Statistical => "statistical",
            OpportunityKind::Solana => "solana",
        }
    }
}

impl std::fmt::Display for OpportunityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One hop of a swap route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapHop {
    pub venue: String,
    pub token_in: String,
    pub token_out: String,
    /// Minimum acceptable output, smallest unit
    #[serde(with = "amount_string", default)]
    pub min_out: u128,
}

/// Where the opportunity has been in the pipeline, unix millis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineTimestamps {
    /// Stamped by the detector
    #[serde(default)]
    pub detected_at: i64,

    /// Stamped by the coordinator forwarder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinator_at: Option<i64>,

    /// Stamped by the executor when a result is produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<i64>,
}

/// A detected, candidate-profitable trade.
///
/// Identity is the opaque `id`, globally unique per detection. The record is
/// immutable after creation; the only fields ever written downstream are the
/// coordinator/executor entries of `pipeline_timestamps`, and those are
/// written onto *copies* (the enriched `ExecutionRequest` and the result).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    #[validate(length(min = 1, message = "id must be non-empty"))]
    pub id: String,

    #[serde(rename = "type")]
    pub kind: OpportunityKind,

    #[validate(length(min = 1, message = "chain must be non-empty"))]
    pub chain: String,

    #[serde(default)]
    pub buy_venue: String,

    #[serde(default)]
    pub sell_venue: String,

    #[serde(default)]
    pub expected_profit_usd: f64,

    #[validate(range(min = 0.0, max = 1.0, message = "confidence must be within [0, 1]"))]
    #[serde(default)]
    pub confidence: f64,

    /// Input amount, smallest unit of the first token
    #[serde(with = "amount_string", default)]
    pub amount_in: u128,

    #[serde(default)]
    pub swap_path: Vec<SwapHop>,

    /// Absolute unix-millis deadline; the executor rejects past-deadline work
    pub deadline: i64,

    #[serde(default)]
    pub pipeline_timestamps: PipelineTimestamps,
}

impl Opportunity {
    /// True when the deadline has passed at `now` (unix millis).
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.deadline
    }

    /// Route hops for strategies that need one; empty for venue-pair
    /// opportunities that carry only `buy_venue`/`sell_venue`.
    pub fn hop_count(&self) -> usize {
        self.swap_path.len()
    }
}

/// Serde helpers for u128 token amounts: decimal string on the wire,
/// plain JSON numbers accepted on decode for legacy producers.
pub mod amount_string {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        struct AmountVisitor;

        impl Visitor<'_> for AmountVisitor {
            type Value = u128;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a decimal string or non-negative integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
                v.parse::<u128>()
                    .map_err(|_| E::custom(format!("invalid amount: {v:?}")))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
                Ok(v as u128)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<u128, E> {
                u128::try_from(v).map_err(|_| E::custom("negative amount"))
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}
