//! Logging and tracing setup
//!
//! Structured logging via tracing. Services call one of these once at
//! startup; `RUST_LOG` controls filtering (default `info`).

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize compact human-readable tracing output.
///
/// Usage:
/// ```rust
/// // In main.rs
/// arbflow_common::init_tracing();
///
/// // Then in your code:
/// tracing::info!("coordinator starting");
/// let e = "connection reset";
/// tracing::error!(error = %e, "lease renewal failed");
/// ```
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .compact(),
        )
        .init();
}

/// Initialize JSON tracing output for log aggregation (Loki, ELK).
pub fn init_tracing_json() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_level(true)
                .with_current_span(true),
        )
        .init();
}

/// Pick the output format from `LOG_FORMAT` (`compact` default, `json`).
pub fn init_tracing_from_env() {
    match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => init_tracing_json(),
        _ => init_tracing(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{error, info, warn};

    #[test]
    fn test_tracing_init() {
        // May already be initialized by another test in the process
        let _result = std::panic::catch_unwind(|| {
            init_tracing();
        });

        info!("test log message");
        warn!(count = 42, "warning with structured data");
        error!(error = "test error", "error message");
    }
}
