//! Tracing subscriber setup
//!
//! `RUST_LOG` wins over the configured level when set.

use crate::{Error, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter for a configured level
///
/// Our own crates log at `level`; `tower_http` follows the same level so
/// request traces line up with job logs.
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "slicemetrics_svc={level},slicemetrics_common={level},tower_http={level}"
        ))
    })
}

/// Install the global subscriber
///
/// Fails if a subscriber is already installed.
pub fn init_logging(level: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(build_filter(level))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {}", e)))
}
