//! Alias normalization: loose metric/dimension names → canonical identifiers.
//!
//! Lookup per item:
//! 1) lowercase with spaces removed,
//! 2) lowercase with spaces intact,
//! 3) otherwise the original string, unchanged.
//!
//! Unknown terms are never dropped. They flow on to the existence check,
//! which reports them by name.
//!
//! An alias key is never a backend identifier unless it maps to itself:
//! normalization must not turn one valid name into another.

use crate::config::ConfigError;
use crate::QueryCandidate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

const BUILTIN_METRIC_ALIASES: &[(&str, &str)] = &[
    ("page views", "screenPageViews"),
    ("pageviews", "screenPageViews"),
    ("views", "screenPageViews"),
    ("screen views", "screenPageViews"),
    ("users", "totalUsers"),
    ("total users", "totalUsers"),
    ("active users", "activeUsers"),
    ("new users", "newUsers"),
    ("sessions", "sessions"),
    ("visits", "sessions"),
    ("sessions per user", "sessionsPerUser"),
    ("session duration", "averageSessionDuration"),
    ("avg session duration", "averageSessionDuration"),
    ("average session duration", "averageSessionDuration"),
    ("engagement rate", "engagementRate"),
    ("engaged sessions", "engagedSessions"),
    ("bounce rate", "bounceRate"),
    ("events", "eventCount"),
    ("event count", "eventCount"),
    ("conversions", "conversions"),
    ("key events", "keyEvents"),
    ("revenue", "totalRevenue"),
    ("total revenue", "totalRevenue"),
    ("purchase revenue", "purchaseRevenue"),
    ("items viewed", "itemsViewed"),
    ("ad clicks", "advertiserAdClicks"),
    ("ad cost", "advertiserAdCost"),
    ("ad impressions", "advertiserAdImpressions"),
];

const BUILTIN_DIMENSION_ALIASES: &[(&str, &str)] = &[
    ("date", "date"),
    ("date hour", "dateHour"),
    ("hour", "hour"),
    ("week", "week"),
    ("month", "month"),
    ("year", "year"),
    ("page", "pagePath"),
    ("page path", "pagePath"),
    ("url", "pagePath"),
    ("page title", "pageTitle"),
    ("landing page", "landingPage"),
    ("event", "eventName"),
    ("event name", "eventName"),
    ("event category", "eventCategory"),
    ("event label", "eventLabel"),
    ("country", "country"),
    ("city", "city"),
    ("browser", "browser"),
    ("device", "deviceCategory"),
    ("device category", "deviceCategory"),
    ("session source", "sessionSource"),
    ("session medium", "sessionMedium"),
    ("channel", "sessionDefaultChannelGroup"),
    ("item", "itemName"),
    ("item name", "itemName"),
    ("item brand", "itemBrand"),
    ("item category", "itemCategory"),
];

/// Read-only surface-form → canonical lookup tables.
///
/// Built once at startup and shared by reference (`Arc<AliasTable>`); keys are
/// stored lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasTable {
    metrics: HashMap<String, String>,
    dimensions: HashMap<String, String>,
}

/// On-disk alias file shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliasFile {
    #[serde(default)]
    pub metrics: BTreeMap<String, String>,
    #[serde(default)]
    pub dimensions: BTreeMap<String, String>,
}

impl AliasTable {
    /// Empty table: every name passes through unchanged.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The default table shipped with the crate.
    pub fn builtin() -> Self {
        Self::from_pairs(BUILTIN_METRIC_ALIASES, BUILTIN_DIMENSION_ALIASES)
    }

    pub fn from_pairs<K: AsRef<str>, V: AsRef<str>>(
        metrics: &[(K, V)],
        dimensions: &[(K, V)],
    ) -> Self {
        let lower = |pairs: &[(K, V)]| {
            pairs
                .iter()
                .map(|(k, v)| (k.as_ref().to_lowercase(), v.as_ref().to_string()))
                .collect()
        };
        Self {
            metrics: lower(metrics),
            dimensions: lower(dimensions),
        }
    }

    pub fn from_alias_file(file: AliasFile) -> Self {
        Self {
            metrics: file
                .metrics
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect(),
            dimensions: file
                .dimensions
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let file: AliasFile = serde_json::from_str(json)
            .map_err(|e| ConfigError::Invalid(format!("alias table is not valid JSON: {e}")))?;
        Ok(Self::from_alias_file(file))
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json_str(&text)
    }

    /// Add or replace a metric alias.
    pub fn with_metric_alias(mut self, surface: &str, canonical: &str) -> Self {
        self.metrics
            .insert(surface.to_lowercase(), canonical.to_string());
        self
    }

    /// Add or replace a dimension alias.
    pub fn with_dimension_alias(mut self, surface: &str, canonical: &str) -> Self {
        self.dimensions
            .insert(surface.to_lowercase(), canonical.to_string());
        self
    }

    pub fn normalize_metrics(&self, raw: &[String]) -> Vec<String> {
        raw.iter().map(|m| resolve(&self.metrics, m)).collect()
    }

    pub fn normalize_dimensions(&self, raw: &[String]) -> Vec<String> {
        raw.iter().map(|d| resolve(&self.dimensions, d)).collect()
    }

    pub fn normalize(&self, candidate: &QueryCandidate) -> QueryCandidate {
        QueryCandidate {
            metrics: self.normalize_metrics(&candidate.metrics),
            dimensions: self.normalize_dimensions(&candidate.dimensions),
        }
    }

    /// Sorted snapshot of the table, in alias-file shape.
    pub fn to_alias_file(&self) -> AliasFile {
        AliasFile {
            metrics: self
                .metrics
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            dimensions: self
                .dimensions
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.metrics.len() + self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn resolve(table: &HashMap<String, String>, raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let compact = lowered.replace(' ', "");
    table
        .get(&compact)
        .or_else(|| table.get(&lowered))
        .cloned()
        .unwrap_or_else(|| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn spaced_surface_forms_resolve() {
        let table = AliasTable::builtin();
        assert_eq!(
            table.normalize_metrics(&strings(&["Page Views"])),
            strings(&["screenPageViews"])
        );
        assert_eq!(
            table.normalize_dimensions(&strings(&["event name"])),
            strings(&["eventName"])
        );
    }

    #[test]
    fn compact_form_is_tried_first() {
        let table = AliasTable::empty()
            .with_metric_alias("pageviews", "screenPageViews")
            .with_metric_alias("page views", "somethingElse");
        assert_eq!(
            table.normalize_metrics(&strings(&["Page Views"])),
            strings(&["screenPageViews"])
        );
    }

    #[test]
    fn unknown_names_pass_through_unchanged() {
        let table = AliasTable::builtin();
        let raw = strings(&["Totally Bogus", "sessions", "eventName"]);
        let normalized = table.normalize_metrics(&raw);
        assert_eq!(normalized, strings(&["Totally Bogus", "sessions", "eventName"]));
    }

    /// Backend names that look like loose surface forms.
    const BACKEND_DIMENSIONS: &[&str] = &[
        "date", "day", "hour", "week", "month", "year", "dateHour", "source", "medium",
        "sessionSource", "sessionMedium", "country", "city", "browser", "deviceCategory",
        "pagePath", "pageTitle", "landingPage", "eventName", "itemName", "itemBrand",
    ];
    const BACKEND_METRICS: &[&str] = &[
        "sessions", "totalUsers", "activeUsers", "newUsers", "screenPageViews", "eventCount",
        "conversions", "keyEvents", "totalRevenue", "engagementRate", "bounceRate",
    ];

    #[test]
    fn backend_identifiers_pass_through_unchanged() {
        let table = AliasTable::builtin();
        let dims = strings(BACKEND_DIMENSIONS);
        assert_eq!(table.normalize_dimensions(&dims), dims);
        let metrics = strings(BACKEND_METRICS);
        assert_eq!(table.normalize_metrics(&metrics), metrics);
    }

    #[test]
    fn padding_only_survives_the_compact_lookup() {
        let table = AliasTable::builtin();
        assert_eq!(
            table.normalize_metrics(&strings(&[" Page Views "])),
            strings(&["screenPageViews"])
        );
        // "eventname" is not a key, and " event name " only matches with the padding removed.
        assert_eq!(
            table.normalize_dimensions(&strings(&[" event name "])),
            strings(&[" event name "])
        );
    }

    #[test]
    fn canonical_names_are_stable() {
        let table = AliasTable::builtin();
        let once = table.normalize_dimensions(&strings(&["pagePath", "date"]));
        let twice = table.normalize_dimensions(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn json_tables_are_lowercased() {
        let table = AliasTable::from_json_str(
            r#"{"metrics": {"Page Hits": "screenPageViews"}, "dimensions": {}}"#,
        )
        .unwrap();
        assert_eq!(
            table.normalize_metrics(&strings(&["PAGE HITS"])),
            strings(&["screenPageViews"])
        );
        assert_eq!(
            table.to_alias_file().metrics.get("page hits").map(String::as_str),
            Some("screenPageViews")
        );
    }

    #[test]
    fn json_tables_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aliases.json");
        std::fs::write(&path, r#"{"dimensions": {"Country Name": "country"}}"#).unwrap();

        let table = AliasTable::from_json_file(&path).unwrap();
        assert_eq!(
            table.normalize_dimensions(&strings(&["country name"])),
            strings(&["country"])
        );
        assert!(AliasTable::from_json_file(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn bad_json_is_a_config_error() {
        assert!(matches!(
            AliasTable::from_json_str("{not json"),
            Err(ConfigError::Invalid(_))
        ));
    }
}
