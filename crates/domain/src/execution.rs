/*!
 * Execution Requests and Results
 *
 * An `ExecutionRequest` is an opportunity annotated with coordinator
 * metadata; it travels on `stream:execution-requests`. An `ExecutionResult`
 * is the terminal record for an opportunity id, published exactly once per
 * outcome on `stream:execution-results`.
 */

use serde::{Deserialize, Serialize};

use crate::opportunity::Opportunity;

/// Tagged executor failure taxonomy (the `error` field of results).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionErrorKind {
    /// Gas price exceeded the configured ceiling at execution time
    GasSpike,
    /// No registered strategy for (type, chain)
    NoStrategy,
    /// Duplicate redelivery of an id this executor already completed
    LockConflict,
    /// Swap path failed validation
    PathInvalid,
    /// Pre-flight simulation returned revert
    SimulationReject,
    /// On-chain execution reverted
    Revert,
    /// Deadline passed before or during execution
    Timeout,
    /// Redis unreachable mid-execution
    SubstrateUnavailable,
    /// Uncategorised strategy failure
    Unknown,
}

impl ExecutionErrorKind {
    /// Only substrate loss is retried, implicitly: the entry stays un-acked
    /// and redelivers after the per-opportunity lock expires.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecutionErrorKind::SubstrateUnavailable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionErrorKind::GasSpike => "gas-spike",
            ExecutionErrorKind::NoStrategy => "no-strategy",
            ExecutionErrorKind::LockConflict => "lock-conflict",
            ExecutionErrorKind::PathInvalid => "path-invalid",
            ExecutionErrorKind::SimulationReject => "simulation-reject",
            ExecutionErrorKind::Revert => "revert",
            ExecutionErrorKind::Timeout => "timeout",
            ExecutionErrorKind::SubstrateUnavailable => "substrate-unavailable",
            ExecutionErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opportunity plus coordinator metadata. Identity is the opportunity id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    #[serde(flatten)]
    pub opportunity: Opportunity,

    /// Coordinator instance that forwarded this request. Defaulted on
    /// decode: requests injected straight onto the stream (tests, manual
    /// replays) carry no coordinator metadata.
    #[serde(default)]
    pub forwarded_by: String,

    /// Unix millis at forwarding time
    #[serde(default)]
    pub forwarded_at: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_hint: Option<String>,
}

impl ExecutionRequest {
    pub fn id(&self) -> &str {
        &self.opportunity.id
    }
}

/// Terminal outcome record for one opportunity id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub opportunity_id: String,
    pub success: bool,
    pub chain: String,

    #[serde(default)]
    pub venue: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionErrorKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realized_profit_usd: Option<f64>,

    /// Unix millis when the executor produced this record
    pub timestamp: i64,
}

impl ExecutionResult {
    /// Successful execution with a landed transaction.
    pub fn success(opp: &Opportunity, tx_hash: String, realized_profit_usd: f64) -> Self {
        Self {
            opportunity_id: opp.id.clone(),
            success: true,
            chain: opp.chain.clone(),
            venue: opp.buy_venue.clone(),
            tx_hash: Some(tx_hash),
            error: None,
            error_detail: None,
            realized_profit_usd: Some(realized_profit_usd),
            timestamp: crate::now_ms(),
        }
    }

    /// Terminal failure tagged with `kind`.
    pub fn failure(opp: &Opportunity, kind: ExecutionErrorKind, detail: impl Into<String>) -> Self {
        Self {
            opportunity_id: opp.id.clone(),
            success: false,
            chain: opp.chain.clone(),
            venue: opp.buy_venue.clone(),
            tx_hash: None,
            error: Some(kind),
            error_detail: Some(detail.into()),
            realized_profit_usd: None,
            timestamp: crate::now_ms(),
        }
    }

    /// Failure for an id whose full opportunity record is unavailable
    /// (e.g. a lock-conflict duplicate seen before parsing completes).
    pub fn failure_for_id(
        opportunity_id: &str,
        chain: &str,
        kind: ExecutionErrorKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            opportunity_id: opportunity_id.to_string(),
            success: false,
            chain: chain.to_string(),
            venue: String::new(),
            tx_hash: None,
            error: Some(kind),
            error_detail: Some(detail.into()),
            realized_profit_usd: None,
            timestamp: crate::now_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opportunity::OpportunityKind;

    fn opportunity() -> Opportunity {
        serde_json::from_str(
            r#"{
                "id": "opp-7",
                "type": "flash-loan",
                "chain": "arbitrum",
                "buyVenue": "camelot",
                "sellVenue": "uniswap_v3",
                "expectedProfitUsd": 11.2,
                "confidence": 0.8,
                "deadline": 1700000060000,
                "pipelineTimestamps": { "detectedAt": 1700000000000 }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_request_flattens_opportunity() {
        let req = ExecutionRequest {
            opportunity: opportunity(),
            forwarded_by: "coordinator-a".into(),
            forwarded_at: 1_700_000_001_000,
            strategy_hint: None,
        };

        let json: serde_json::Value = serde_json::to_value(&req).unwrap();
        // Flattened: opportunity keys sit next to coordinator metadata
        assert_eq!(json["id"], "opp-7");
        assert_eq!(json["type"], "flash-loan");
        assert_eq!(json["forwardedBy"], "coordinator-a");
        assert!(json.get("strategyHint").is_none());

        let back: ExecutionRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back.id(), "opp-7");
        assert_eq!(back.opportunity.kind, OpportunityKind::FlashLoan);
    }

    #[test]
    fn test_error_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&ExecutionErrorKind::LockConflict).unwrap(),
            "\"lock-conflict\""
        );
        assert_eq!(
            serde_json::to_string(&ExecutionErrorKind::SubstrateUnavailable).unwrap(),
            "\"substrate-unavailable\""
        );
        let parsed: ExecutionErrorKind = serde_json::from_str("\"gas-spike\"").unwrap();
        assert_eq!(parsed, ExecutionErrorKind::GasSpike);
    }

    #[test]
    fn test_only_substrate_loss_is_retryable() {
        for kind in [
            ExecutionErrorKind::GasSpike,
            ExecutionErrorKind::NoStrategy,
            ExecutionErrorKind::LockConflict,
            ExecutionErrorKind::PathInvalid,
            ExecutionErrorKind::SimulationReject,
            ExecutionErrorKind::Revert,
            ExecutionErrorKind::Timeout,
            ExecutionErrorKind::Unknown,
        ] {
            assert!(!kind.is_retryable(), "{kind} must not be retryable");
        }
        assert!(ExecutionErrorKind::SubstrateUnavailable.is_retryable());
    }

    #[test]
    fn test_result_constructors() {
        let opp = opportunity();

        let ok = ExecutionResult::success(&opp, "0xabc".into(), 10.4);
        assert!(ok.success);
        assert_eq!(ok.opportunity_id, "opp-7");
        assert_eq!(ok.tx_hash.as_deref(), Some("0xabc"));
        assert!(ok.error.is_none());

        let failed = ExecutionResult::failure(&opp, ExecutionErrorKind::Timeout, "deadline passed");
        assert!(!failed.success);
        assert_eq!(failed.error, Some(ExecutionErrorKind::Timeout));
        assert!(failed.realized_profit_usd.is_none());
    }
}
