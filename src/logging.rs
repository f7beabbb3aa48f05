//! Tracing subscriber installation.
//!
//! Events go to stderr so stdout stays reserved for command output. The
//! filter comes from `RUST_LOG` when set, otherwise from the configured
//! directive.

use thiserror::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Raised when the filter directive cannot be parsed.
    #[error("invalid log filter {directive:?}: {message}")]
    Filter {
        /// Directive as configured.
        directive: String,
        /// Parser message.
        message: String,
    },
    /// Raised when a global subscriber is already installed.
    #[error("tracing subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

/// Resolves the effective filter from `RUST_LOG` or `fallback`.
///
/// # Errors
///
/// Returns [`LoggingError::Filter`] when `fallback` is not a valid directive
/// and `RUST_LOG` is unset or invalid.
pub fn filter(fallback: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(fallback).map_err(|err| LoggingError::Filter {
            directive: fallback.to_owned(),
            message: err.to_string(),
        })
    })
}

/// Installs the global subscriber with plain or JSON formatting.
///
/// # Errors
///
/// Returns [`LoggingError`] when the filter is invalid or a subscriber is
/// already installed.
pub fn init(fallback: &str, json: bool) -> Result<(), LoggingError> {
    let env_filter = filter(fallback)?;
    let installed = if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    installed.map_err(|err| LoggingError::AlreadyInstalled(err.to_string()))
}
