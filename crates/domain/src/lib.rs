//! # ArbFlow Domain Types
//!
//! Pipeline entities shared by all ArbFlow services.
//!
//! This crate defines:
//! - Arbitrage opportunities and their wire representation
//! - Execution requests and results (including the error taxonomy)
//! - Service heartbeats, degradation levels, and coordinator events
//!
//! Everything here is plain data: serde-serializable records that travel as
//! the JSON `data` field of Redis Stream entries. Behavior lives in the
//! service crates.

pub mod execution;
pub mod health;
pub mod opportunity;

pub use execution::{ExecutionErrorKind, ExecutionRequest, ExecutionResult};
pub use health::{
    AlertSeverity, CoordinatorEvent, CoordinatorEventKind, DegradationLevel, Heartbeat,
    ReportedState, ServiceCounters, ServiceRole,
};
pub use opportunity::{Opportunity, OpportunityKind, PipelineTimestamps, SwapHop};

/// Current unix time in milliseconds.
///
/// All pipeline timestamps and deadlines are unix epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
