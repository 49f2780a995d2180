//! Error classification shared by every pipeline component
//!
//! Retry and propagation policy dispatches on these kinds rather than on
//! error message text. Each crate's error type exposes a `kind()` accessor
//! returning one of these.

use serde::{Deserialize, Serialize};

/// Classification of a pipeline failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input failed validation (bad options, malformed payload)
    Validation,
    /// No parser accepts the content type
    UnsupportedType,
    /// Transient network failure (connect/reset/DNS)
    NetworkTransient,
    /// Provider returned 429 or a rate-limit signal
    ProviderRateLimit,
    /// Provider returned output that does not match the expected schema
    ProviderSchema,
    /// A per-call deadline elapsed
    Timeout,
    /// Vector store unreachable or rejected the write
    VectorStoreUnavailable,
    /// Relational store unreachable or rejected the write
    RelationalStoreUnavailable,
    /// Operation was cancelled cooperatively
    Cancelled,
    /// Everything else
    Internal,
}

impl ErrorKind {
    /// Whether the job-level retry policy applies to this kind
    ///
    /// Only infrastructure-flavored failures are worth retrying; validation
    /// and schema failures will fail identically on every attempt.
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::NetworkTransient
                | Self::ProviderRateLimit
                | Self::Timeout
                | Self::VectorStoreUnavailable
                | Self::RelationalStoreUnavailable
        )
    }

    /// Stable lowercase label used in logs and job results
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::UnsupportedType => "unsupported_type",
            Self::NetworkTransient => "network_transient",
            Self::ProviderRateLimit => "provider_rate_limit",
            Self::ProviderSchema => "provider_schema",
            Self::Timeout => "timeout",
            Self::VectorStoreUnavailable => "vector_store_unavailable",
            Self::RelationalStoreUnavailable => "relational_store_unavailable",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
