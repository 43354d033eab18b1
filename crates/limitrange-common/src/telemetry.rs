//! Logging initialization
//!
//! Text output for people at a terminal, JSON output for CI log collectors.
//! `RUST_LOG` overrides the default filter either way.

use std::str::FromStr;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::{Error, Result};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str =
    "info,limitrange_conformance=debug,limitrange_common=debug,kube=info,tower=warn,hyper=warn";

/// Output format for log lines
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable single-line output
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(Error::config(format!(
                "unknown log format '{}' (expected 'text' or 'json')",
                other
            ))),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Fails if a subscriber is already installed (e.g. called twice).
pub fn init_logging(format: LogFormat) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init(),
    };

    result.map_err(|e| {
        Error::internal_with_context("init_logging", format!("failed to install subscriber: {}", e))
    })
}
