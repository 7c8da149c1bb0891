//! Error taxonomy for the validation/repair loop.
//!
//! Validation failures are recoverable through repair; everything else that
//! reaches the caller is an infrastructure failure and is never retried here.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A query rejected by the existence or compatibility checks.
///
/// `metrics` and `dimensions` are the (normalized) lists of the attempt that
/// failed, so a caller can see exactly which identifiers caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{reason}")]
pub struct ValidationError {
    pub reason: String,
    pub metrics: Vec<String>,
    pub dimensions: Vec<String>,
}

impl ValidationError {
    pub fn new(reason: impl Into<String>, metrics: &[String], dimensions: &[String]) -> Self {
        Self {
            reason: reason.into(),
            metrics: metrics.to_vec(),
            dimensions: dimensions.to_vec(),
        }
    }
}

/// Failure to obtain metadata for a property.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetadataError {
    #[error("property not found: {0}")]
    PropertyNotFound(String),
    #[error("not authorized for property {property_id}: {message}")]
    Unauthorized {
        property_id: String,
        message: String,
    },
    #[error("metadata transport error: {0}")]
    Transport(String),
    #[error("malformed metadata response: {0}")]
    Malformed(String),
}

impl MetadataError {
    /// True for the "property not found / unauthorized" class.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::PropertyNotFound(_) | Self::Unauthorized { .. })
    }
}

/// Failure of a repair oracle call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepairError {
    /// The oracle could not be reached or refused the call.
    #[error("repair oracle unavailable: {0}")]
    Transport(String),
    /// The oracle answered, but not with a usable candidate.
    #[error("repair oracle returned unusable output: {0}")]
    Malformed(String),
}

/// The external call a timeout or cancellation interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Metadata,
    Repair,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Metadata => f.write_str("metadata fetch"),
            Stage::Repair => f.write_str("repair oracle"),
        }
    }
}

/// Everything `QueryValidator` can fail with.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    /// Only transport failures surface here; malformed output is absorbed by
    /// the loop as a spent repair attempt.
    #[error(transparent)]
    Repair(RepairError),
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },
    #[error("validation cancelled")]
    Cancelled,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl GuardError {
    /// Infrastructure failures are everything except a rejected query and a
    /// malformed request.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::Metadata(_) | Self::Repair(_) | Self::Timeout { .. }
        )
    }

    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Validation(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_displays_reason() {
        let err = ValidationError::new(
            "Invalid metric: bogus",
            &["bogus".to_string()],
            &["date".to_string()],
        );
        assert_eq!(err.to_string(), "Invalid metric: bogus");
        assert_eq!(err.metrics, vec!["bogus"]);
        assert_eq!(err.dimensions, vec!["date"]);
    }

    #[test]
    fn infrastructure_classification() {
        let validation: GuardError = ValidationError::new("x", &[], &[]).into();
        assert!(!validation.is_infrastructure());
        assert!(validation.as_validation().is_some());

        let metadata: GuardError = MetadataError::Transport("reset".into()).into();
        assert!(metadata.is_infrastructure());

        let timeout = GuardError::Timeout {
            stage: Stage::Repair,
            after: Duration::from_secs(3),
        };
        assert!(timeout.is_infrastructure());
        assert!(timeout.to_string().contains("repair oracle"));

        assert!(!GuardError::Cancelled.is_infrastructure());
    }

    #[test]
    fn permanent_metadata_errors() {
        assert!(MetadataError::PropertyNotFound("1".into()).is_permanent());
        assert!(MetadataError::Unauthorized {
            property_id: "1".into(),
            message: "denied".into()
        }
        .is_permanent());
        assert!(!MetadataError::Transport("eof".into()).is_permanent());
    }
}
