//! Store error types
//!
//! Two layers: `TierError` describes a fault inside one backend and is always
//! absorbed by `DualStore`; `StoreError` is what callers of the dual store see.

use super::tier::TierKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised by a single tier (cache or durable)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TierError {
    /// The tier has no usable configuration (missing URL, unknown backend)
    #[error("{tier} tier is not configured: {reason}")]
    NotConfigured { tier: TierKind, reason: String },

    /// Failed to establish a connection to the backend
    #[error("Connection error: {0}")]
    Connection(String),

    /// The operation did not complete within its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The backend answered with an error
    #[error("Backend error: {0}")]
    Backend(String),

    /// The tier is known to be down (circuit open, injected fault)
    #[error("Tier unavailable: {0}")]
    Unavailable(String),
}

impl TierError {
    /// Whether this error means "never set up" rather than "down right now"
    pub fn is_not_configured(&self) -> bool {
        matches!(self, Self::NotConfigured { .. })
    }
}

/// Result type for tier operations
pub type TierResult<T> = Result<T, TierError>;

/// Which part of a dual write failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedTier {
    /// Durable write failed; the cache may still hold the new value
    Durable,
    /// Neither tier accepted the write
    Both,
}

impl fmt::Display for FailedTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Durable => write!(f, "durable"),
            Self::Both => write!(f, "both"),
        }
    }
}

/// A write that was not durably recorded
///
/// Callers must treat this as a failed write even when `tier` is
/// `FailedTier::Durable` and a subsequent read returns the value from cache:
/// visibility is not durability.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("write to '{key}' was not durably recorded (failed tier: {tier}): {reason}")]
pub struct PartialFailureError {
    pub key: String,
    pub tier: FailedTier,
    pub reason: String,
}

impl PartialFailureError {
    /// True when the cache tier accepted the write even though durability failed
    pub fn cache_has_copy(&self) -> bool {
        self.tier == FailedTier::Durable
    }
}

/// Errors surfaced by `DualStore` and `Reconciler`
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    PartialFailure(#[from] PartialFailureError),

    /// A tier required for the operation is down or not configured
    #[error("{tier} tier unavailable: {reason}")]
    TierUnavailable { tier: TierKind, reason: String },

    /// A stored value did not decode into the type bound to its key
    #[error("value stored under '{key}' does not match its schema: {reason}")]
    SchemaMismatch { key: String, reason: String },

    #[error("failed to serialize value for '{key}': {reason}")]
    Serialization { key: String, reason: String },

    #[error("failed to enumerate {tier} tier keys: {source}")]
    Enumeration {
        tier: TierKind,
        #[source]
        source: TierError,
    },

    /// Optimistic read-modify-write kept losing to concurrent writers
    #[error("update of '{key}' did not settle after {attempts} attempts")]
    UpdateConflict { key: String, attempts: u32 },
}

impl StoreError {
    /// The partial failure behind this error, if any
    pub fn as_partial_failure(&self) -> Option<&PartialFailureError> {
        match self {
            Self::PartialFailure(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for dual store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_failure_display_names_tier() {
        let err = PartialFailureError {
            key: "pro_users".to_string(),
            tier: FailedTier::Durable,
            reason: "connection refused".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("pro_users"));
        assert!(msg.contains("durable"));
        assert!(err.cache_has_copy());
    }

    #[test]
    fn test_tier_unavailable_names_tier() {
        let err = StoreError::TierUnavailable {
            tier: TierKind::Durable,
            reason: "probe timed out".to_string(),
        };
        assert_eq!(err.to_string(), "durable tier unavailable: probe timed out");
    }

    #[test]
    fn test_not_configured_detection() {
        let err = TierError::NotConfigured {
            tier: TierKind::Cache,
            reason: "no url".to_string(),
        };
        assert!(err.is_not_configured());
        assert!(!TierError::Timeout("x".to_string()).is_not_configured());
    }
}
