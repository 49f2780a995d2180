//! Configuration error types

use thiserror::Error;

/// What went wrong while checking loaded configuration
///
/// Errors name the offending field with its section prefix
/// (e.g. `provider.base_url`) so a bad environment is fixable from the
/// message alone.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A setting is present but failed its runtime check
    #[error("config field `{field}` is invalid: {reason}")]
    BadValue { field: &'static str, reason: String },

    /// A setting that must be non-empty was left blank
    #[error("config field `{field}` must be set")]
    Empty { field: &'static str },
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
