//! GA4Q Core: Schema-Validated Analytics Queries with LLM Auto-Repair
//!
//! Turns loosely named metric/dimension lists into query parameters the
//! analytics backend will accept, or fails with a precise reason.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                      VALIDATION / REPAIR LOOP                            │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │                                                                          │
//! │  raw candidate                                                           │
//! │       │                                                                  │
//! │  ┌────▼──────┐     ┌────────────┐     ┌─────────────┐                   │
//! │  │  Alias    │────►│ Validating │────►│   Success   │                   │
//! │  │Normalizer │     │ (metadata  │     └─────────────┘                   │
//! │  └────▲──────┘     │  + rules)  │                                       │
//! │       │            └─────┬──────┘                                       │
//! │       │                  │ ValidationError                              │
//! │       │            ┌─────▼──────┐   budget == 0   ┌─────────────┐       │
//! │       └────────────│ Repairing  │────────────────►│  Exhausted  │       │
//! │     new candidate  │  (oracle)  │                 └─────────────┘       │
//! │                    └────────────┘                                       │
//! │                                                                          │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Three sources of truth meet here:
//! - a fixed alias table ([`aliases`]),
//! - live backend schema metadata, fetched fresh on every pass ([`metadata`]),
//! - static domain compatibility rules ([`rules`]).
//!
//! The repair oracle ([`repair`]) is untrusted: its output is parsed
//! strictly and always re-validated. The loop ([`validator`]) is a bounded
//! iteration, so a budget of `N` means at most `N + 1` validation passes and
//! at most `N` oracle calls.

pub mod aliases;
pub mod config;
pub mod error;
pub mod llm;
pub mod metadata;
pub mod repair;
pub mod rules;
pub mod validator;

use serde::{Deserialize, Serialize};

/// Canonical metric identifier, as the metadata service names it.
pub type MetricName = String;

/// Canonical dimension identifier, as the metadata service names it.
pub type DimensionName = String;

/// An ordered metric list plus an ordered dimension list.
///
/// Normalization and repair produce new candidates; nothing mutates one in
/// place once it has entered the loop.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueryCandidate {
    pub metrics: Vec<String>,
    pub dimensions: Vec<String>,
}

impl QueryCandidate {
    pub fn new<M, D>(metrics: M, dimensions: D) -> Self
    where
        M: IntoIterator,
        M::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        Self {
            metrics: metrics.into_iter().map(Into::into).collect(),
            dimensions: dimensions.into_iter().map(Into::into).collect(),
        }
    }
}

// ============================================================================
// Re-exports
// ============================================================================

pub use aliases::AliasTable;
pub use config::{ConfigError, GuardConfig};
pub use error::{GuardError, MetadataError, RepairError, Stage, ValidationError};
pub use metadata::{
    DimensionSet, MetadataProvider, MetricMetadata, PropertyMetadata, RawMetadata, ScopeTag,
    SnapshotFileProvider, StaticMetadataProvider,
};
pub use repair::{
    build_repair_prompt, parse_repair_response, LlmRepairOracle, NoRepairOracle, RepairOracle,
    RepairRequest, RepairedCandidate,
};
pub use rules::RuleSet;
pub use validator::{Cancellation, QueryValidator, ValidatedQuery, ValidationRequest};

#[cfg(feature = "http")]
pub use metadata::http::{Ga4HttpConfig, Ga4HttpMetadataProvider};
