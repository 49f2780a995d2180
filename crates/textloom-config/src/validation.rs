//! Runtime checks applied to loaded configuration
//!
//! Environment parsing never fails (bad values fall back to defaults), so
//! these checks are the one place a hopeless configuration is rejected
//! before any service starts.

use crate::{ConfigError, ConfigResult};
use std::ops::RangeInclusive;

/// A config section that can vet itself after loading
pub trait Validate {
    /// Reject impossible settings, naming the first offending field
    ///
    /// # Errors
    /// Returns the check failure for the first field that is out of
    /// bounds or missing.
    fn validate(&self) -> ConfigResult<()>;
}

/// Require an endpoint reachable over HTTP
///
/// Accepts `http://` or `https://` followed by a non-empty host part with
/// no embedded whitespace. Anything fancier is the URL crate's job at the
/// point of use; this only keeps obvious garbage out of client builders.
///
/// # Errors
/// Returns `ConfigError::BadValue` when the value is not an http(s) URL.
pub fn require_http_url(field: &'static str, value: &str) -> ConfigResult<()> {
    let host = value
        .strip_prefix("http://")
        .or_else(|| value.strip_prefix("https://"));

    match host {
        Some(rest)
            if !rest.is_empty()
                && !rest.starts_with('/')
                && !rest.chars().any(char::is_whitespace) =>
        {
            Ok(())
        }
        _ => Err(ConfigError::BadValue {
            field,
            reason: format!("expected an http(s) URL, got {value:?}"),
        }),
    }
}

/// Require a numeric setting inside its supported range
///
/// # Errors
/// Returns `ConfigError::BadValue` when the value falls outside `range`.
pub fn require_in_range(
    field: &'static str,
    value: u64,
    range: RangeInclusive<u64>,
) -> ConfigResult<()> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::BadValue {
            field,
            reason: format!(
                "{value} is outside the supported range {}..={}",
                range.start(),
                range.end()
            ),
        })
    }
}

/// Require a string setting to carry something other than whitespace
///
/// # Errors
/// Returns `ConfigError::Empty` when the value is blank.
pub fn require_set(field: &'static str, value: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        Err(ConfigError::Empty { field })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_url_check() {
        assert!(require_http_url("f", "http://localhost:6334").is_ok());
        assert!(require_http_url("f", "https://qdrant.example/collections").is_ok());

        assert!(require_http_url("f", "ftp://example.com").is_err());
        assert!(require_http_url("f", "http://").is_err());
        assert!(require_http_url("f", "http:///path-only").is_err());
        assert!(require_http_url("f", "http://bad host").is_err());
        assert!(require_http_url("f", "").is_err());
    }

    #[test]
    fn test_range_check_is_inclusive() {
        assert!(require_in_range("f", 100, 100..=5_000).is_ok());
        assert!(require_in_range("f", 5_000, 100..=5_000).is_ok());
        assert!(require_in_range("f", 99, 100..=5_000).is_err());
        assert!(require_in_range("f", 5_001, 100..=5_000).is_err());
    }

    #[test]
    fn test_required_string_check() {
        assert!(require_set("f", "postgres://somewhere/db").is_ok());
        assert!(require_set("f", "   ").is_err());
        assert!(require_set("f", "").is_err());
    }

    #[test]
    fn test_error_messages_name_the_field() {
        let err = require_in_range("processing.chunk_size", 7, 100..=5_000).unwrap_err();
        assert!(err.to_string().contains("processing.chunk_size"));

        let err = require_set("database.url", "").unwrap_err();
        assert!(err.to_string().contains("database.url"));
    }
}
