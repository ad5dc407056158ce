//! # ArbFlow Coordinator
//!
//! The regional brain of the pipeline. Exactly one coordinator instance per
//! region is *active* at a time (leader lease); the rest are standbys. The
//! active instance:
//!
//! - forwards detected opportunities to the execution-request stream,
//! - observes service heartbeats and classifies regional health,
//! - publishes leadership and degradation events, and dispatches alerts.
//!
//! The library surface exists so the end-to-end test harness can run a
//! coordinator in-process.

pub mod alerts;
pub mod config;
pub mod forwarder;
pub mod health;
pub mod leader;
pub mod metrics;

pub use alerts::EventPublisher;
pub use config::CoordinatorConfig;
pub use forwarder::Forwarder;
pub use health::{DegradationClassifier, HealthMonitor, MonitoredService};
pub use leader::{LeaderElector, LeaderState};
