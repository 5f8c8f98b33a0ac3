//! Error types for the Gatekeeper service.

use thiserror::Error;

/// Main error type for Gatekeeper operations.
///
/// Every variant is a setup-time failure. Per-request outcomes such as a
/// missing header or an exhausted window are decisions, not errors, and live
/// in [`crate::ratelimit::Decision`].
#[derive(Error, Debug)]
pub enum GatekeeperError {
    /// A limiter was configured with a zero request limit
    #[error("Invalid limit: must be greater than zero")]
    InvalidLimit,

    /// A limiter was configured with a zero-length window
    #[error("Invalid window: must be greater than zero")]
    InvalidWindow,

    /// A header validation pattern failed to compile
    #[error("Invalid header pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A key header name is not a valid HTTP header name
    #[error("Invalid header name: {0:?}")]
    InvalidHeaderName(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Layered settings could not be loaded
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Gatekeeper operations.
pub type Result<T> = std::result::Result<T, GatekeeperError>;
