//! Logging setup for command hosts.
//!
//! The pipeline emits `tracing` events and spans; a host installs a
//! subscriber with one of the helpers below. Output goes to **stderr** so it
//! never mixes with the presentation objects written to stdout.
//!
//! # Quick Start
//!
//! ```ignore
//! use resource_pipeline::init_logging;
//!
//! #[tokio::main]
//! async fn main() {
//!     // Reads RUST_LOG, defaults to `info`
//!     init_logging();
//!
//!     tracing::info!("Host starting");
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Controls log levels (e.g., `info`, `resource_pipeline=debug`)
//!
//! # Examples
//!
//! ```bash
//! # Show operation state transitions and poll progress
//! RUST_LOG=resource_pipeline::invoker=debug ./my-host
//!
//! # Show all debug logs from the pipeline
//! RUST_LOG=warn,resource_pipeline=debug ./my-host
//! ```

use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn stderr_layer<S>() -> impl Layer<S> + Send + Sync
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
}

/// Initialize the default logging subscriber.
///
/// Writes to stderr, filters with `RUST_LOG`, and falls back to `info`.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Initialize logging with a custom default level used when `RUST_LOG` is not set.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
///
/// # Example
///
/// ```ignore
/// use resource_pipeline::init_logging_with_default;
///
/// // Default to debug level if RUST_LOG is not set
/// init_logging_with_default("resource_pipeline=debug");
/// ```
pub fn init_logging_with_default(default_level: &str) {
    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(stderr_layer())
        .init();
}

/// Try to initialize logging, returning false if a subscriber is already set.
///
/// Useful in tests and in hosts that may embed several pipelines.
pub fn try_init_logging() -> bool {
    tracing_subscriber::registry()
        .with(env_filter("info"))
        .with(stderr_layer())
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    // The global subscriber can only be set once per process, so only
    // filter construction is tested here.

    use super::*;

    #[test]
    fn test_env_filter_parsing() {
        assert!(EnvFilter::try_new("info").is_ok());
        assert!(EnvFilter::try_new("resource_pipeline=debug").is_ok());
        assert!(EnvFilter::try_new("warn,resource_pipeline::invoker=debug").is_ok());
    }

    #[test]
    fn test_try_init_logging_is_repeatable() {
        let first = try_init_logging();
        let second = try_init_logging();
        assert!(!(first && second));
    }
}
