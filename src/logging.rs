//! Tracing subscriber initialisation.
//!
//! Logs go to stderr so command output on stdout stays machine readable.

use std::env;
use std::io;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Line format of emitted events.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LogFormat {
    /// Human-readable single-line events.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The filter directives could not be parsed.
    #[error("invalid log filter '{directives}': {message}")]
    Filter {
        /// Directives that were rejected.
        directives: String,
        /// Parser error text.
        message: String,
    },
    /// A global subscriber is already installed.
    #[error("logging already initialised: {0}")]
    Install(String),
}

/// Picks the filter directives: a non-empty `RUST_LOG` wins over the
/// configured level.
fn directives(level: &str, from_env: Option<String>) -> String {
    from_env
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| level.to_owned())
}

fn build_filter(level: &str, from_env: Option<String>) -> Result<EnvFilter, LoggingError> {
    let chosen = directives(level, from_env);
    EnvFilter::try_new(&chosen).map_err(|err| LoggingError::Filter {
        message: err.to_string(),
        directives: chosen,
    })
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns [`LoggingError`] when the directives are malformed or a
/// subscriber is already installed.
pub fn init(level: &str, format: LogFormat) -> Result<(), LoggingError> {
    let filter = build_filter(level, env::var(EnvFilter::DEFAULT_ENV).ok())?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr);
    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|err| LoggingError::Install(err.to_string()))
}
