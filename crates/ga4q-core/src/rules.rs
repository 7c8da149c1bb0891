//! Compatibility rule engine.
//!
//! Checks run in a fixed order and stop at the first failure:
//! 1. at least one metric,
//! 2. existence (metrics, then dimensions),
//! 3. scope compatibility (session × event, user × item),
//! 4. optional linkage gating (ads metrics on unlinked properties).
//!
//! One error per call. Category memberships are static sets, not derived
//! from the backend.

use crate::error::ValidationError;
use crate::metadata::{DimensionSet, MetricMetadata, PropertyMetadata, ScopeTag};
use std::collections::BTreeSet;

pub const EVENT_DIMENSIONS: &[&str] = &["eventName", "eventCategory", "eventLabel"];

pub const ITEM_DIMENSIONS: &[&str] = &[
    "itemName",
    "itemBrand",
    "itemCategory",
    "browser",
    "city",
    "cohort",
];

pub const ADS_METRICS: &[&str] = &[
    "advertiserAdClicks",
    "advertiserAdCost",
    "advertiserAdImpressions",
];

pub const REASON_NO_METRICS: &str = "At least one metric is required";
pub const REASON_SESSION_EVENT: &str = "Session metrics cannot be broken down by event dimensions";
pub const REASON_USER_ITEM: &str = "User metrics cannot be broken down by item dimensions";
pub const REASON_ADS_LINK: &str = "Ads metrics require an Ads-linked property";

/// A metric family that needs special backend linkage.
///
/// A metric is gated when its scope is in `scopes` or its name is in
/// `metrics`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkageRule {
    pub scopes: BTreeSet<ScopeTag>,
    pub metrics: BTreeSet<String>,
    pub reason: String,
}

impl LinkageRule {
    pub fn ads() -> Self {
        Self {
            scopes: [ScopeTag::Ads].into_iter().collect(),
            metrics: ADS_METRICS.iter().map(|m| m.to_string()).collect(),
            reason: REASON_ADS_LINK.to_string(),
        }
    }

    fn gates(&self, metric: &str, scope: ScopeTag) -> bool {
        self.scopes.contains(&scope) || self.metrics.contains(metric)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    event_dimensions: BTreeSet<String>,
    item_dimensions: BTreeSet<String>,
    linkage: Vec<LinkageRule>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::standard()
    }
}

impl RuleSet {
    /// Existence + scope rules, no linkage gating.
    pub fn standard() -> Self {
        Self {
            event_dimensions: EVENT_DIMENSIONS.iter().map(|d| d.to_string()).collect(),
            item_dimensions: ITEM_DIMENSIONS.iter().map(|d| d.to_string()).collect(),
            linkage: Vec::new(),
        }
    }

    pub fn with_linkage_rule(mut self, rule: LinkageRule) -> Self {
        self.linkage.push(rule);
        self
    }

    /// Standard rules plus ads gating when `enabled`.
    pub fn with_ads_gating(self, enabled: bool) -> Self {
        if enabled {
            self.with_linkage_rule(LinkageRule::ads())
        } else {
            self
        }
    }

    pub fn is_event_dimension(&self, dimension: &str) -> bool {
        self.event_dimensions.contains(dimension)
    }

    pub fn is_item_dimension(&self, dimension: &str) -> bool {
        self.item_dimensions.contains(dimension)
    }

    pub fn validate(
        &self,
        metrics: &[String],
        dimensions: &[String],
        metadata: &PropertyMetadata,
    ) -> Result<(), ValidationError> {
        self.check(metrics, dimensions, &metadata.metrics, &metadata.dimensions)
    }

    pub fn check(
        &self,
        metrics: &[String],
        dimensions: &[String],
        metric_metadata: &MetricMetadata,
        dimension_set: &DimensionSet,
    ) -> Result<(), ValidationError> {
        let fail = |reason: String| -> Result<(), ValidationError> {
            Err(ValidationError::new(reason, metrics, dimensions))
        };

        if metrics.is_empty() {
            return fail(REASON_NO_METRICS.to_string());
        }

        // ---- existence ----
        for m in metrics {
            if !metric_metadata.contains_key(m) {
                return fail(format!("Invalid metric: {m}"));
            }
        }
        for d in dimensions {
            if !dimension_set.contains(d) {
                return fail(format!("Invalid dimension: {d}"));
            }
        }

        // ---- scope compatibility ----
        let has_event_dim = dimensions.iter().any(|d| self.is_event_dimension(d));
        let has_item_dim = dimensions.iter().any(|d| self.is_item_dimension(d));

        for m in metrics {
            let scope = metric_metadata[m];
            match scope {
                ScopeTag::Session if has_event_dim => {
                    return fail(REASON_SESSION_EVENT.to_string())
                }
                ScopeTag::User if has_item_dim => return fail(REASON_USER_ITEM.to_string()),
                _ => {}
            }
        }

        // ---- linkage gating ----
        for rule in &self.linkage {
            if metrics.iter().any(|m| rule.gates(m, metric_metadata[m])) {
                return fail(rule.reason.clone());
            }
        }

        Ok(())
    }
}
