//! # ArbFlow Common Library
//!
//! Shared infrastructure used by all ArbFlow services.
//!
//! This crate provides:
//! - The stream substrate adapter (the only code that talks to Redis Streams)
//! - Distributed locks and leases (set-if-absent + compare-and-set/-delete)
//! - The per-service heartbeat publisher
//! - Retry/backoff policy for transient substrate failures
//! - Custom error types
//! - Structured logging setup

pub mod backoff;
pub mod error;
pub mod heartbeat;
pub mod locks;
pub mod logging;
pub mod streams;

pub use backoff::RetryPolicy;
pub use error::{Error, Result};
pub use heartbeat::{HeartbeatCounters, HeartbeatPublisher};
pub use locks::LockManager;
pub use logging::{init_tracing, init_tracing_from_env, init_tracing_json};
pub use streams::{PendingEntry, PendingSummary, RawEntry, StreamBus};
