//! # ArbFlow Executor
//!
//! Consumes execution requests, executes them safely, publishes results.
//!
//! Safety here means at-most-once: a per-opportunity distributed lock plus a
//! recent-id cache absorb redeliveries and cross-instance races, and the
//! acknowledgement of a source entry is deferred until its result is
//! durably published.
//!
//! The library surface exists so the end-to-end test harness (and embedders
//! wiring a live `ChainRpc`) can run the engine in-process.

pub mod config;
pub mod context;
pub mod dedup;
pub mod dispatcher;
pub mod metrics;
pub mod simulation;
pub mod strategy;
pub mod strategies;

pub use config::ExecutorConfig;
pub use context::{ChainRpc, NullRpc, RpcError, StrategyContext, SubmittedSwap, SwapExecution};
pub use dedup::{RecentIds, SeenState};
pub use dispatcher::{ExecutionDispatcher, Reclaimer, WorkerShared};
pub use strategy::{Strategy, StrategyRegistry};
