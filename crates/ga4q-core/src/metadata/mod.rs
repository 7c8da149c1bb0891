//! Property metadata: which metrics and dimensions exist, and each metric's
//! scope.
//!
//! Metadata is fetched through a [`MetadataProvider`] at the start of every
//! validation pass and owned by that pass. Nothing here caches across calls:
//! the backend schema can change between requests.

#[cfg(feature = "http")]
pub mod http;

use crate::error::MetadataError;
use crate::{DimensionName, MetricName};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

// ============================================================================
// Shaped metadata
// ============================================================================

/// Semantic scope of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScopeTag {
    Session,
    User,
    Event,
    Item,
    Ads,
    Other,
}

impl ScopeTag {
    /// Map a backend metric category onto a scope tag.
    pub fn from_category(category: &str) -> Self {
        match category.trim().to_ascii_lowercase().as_str() {
            "session" => ScopeTag::Session,
            "user" => ScopeTag::User,
            "event" => ScopeTag::Event,
            "ecommerce" | "item" => ScopeTag::Item,
            "advertising" | "ads" => ScopeTag::Ads,
            _ => ScopeTag::Other,
        }
    }
}

/// Metric name → scope tag.
pub type MetricMetadata = HashMap<MetricName, ScopeTag>;

/// Dimension names valid for a property.
pub type DimensionSet = HashSet<DimensionName>;

/// Metadata for one property, as the rule engine consumes it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyMetadata {
    pub metrics: MetricMetadata,
    pub dimensions: DimensionSet,
}

impl PropertyMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metric(mut self, name: &str, scope: ScopeTag) -> Self {
        self.metrics.insert(name.to_string(), scope);
        self
    }

    pub fn with_dimension(mut self, name: &str) -> Self {
        self.dimensions.insert(name.to_string());
        self
    }

    /// Shape a raw backend response. First occurrence of a name wins.
    pub fn from_raw(raw: &RawMetadata) -> Self {
        let mut metrics = MetricMetadata::with_capacity(raw.metrics.len());
        for m in &raw.metrics {
            let scope = m
                .category
                .as_deref()
                .map(ScopeTag::from_category)
                .unwrap_or(ScopeTag::Other);
            metrics.entry(m.api_name.clone()).or_insert(scope);
        }

        let dimensions = raw.dimensions.iter().map(|d| d.api_name.clone()).collect();

        Self {
            metrics,
            dimensions,
        }
    }

    pub fn scope_of(&self, metric: &str) -> Option<ScopeTag> {
        self.metrics.get(metric).copied()
    }

    pub fn has_metric(&self, metric: &str) -> bool {
        self.metrics.contains_key(metric)
    }

    pub fn has_dimension(&self, dimension: &str) -> bool {
        self.dimensions.contains(dimension)
    }

    /// Metric vocabulary, sorted.
    pub fn metric_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.metrics.keys().cloned().collect();
        names.sort();
        names
    }

    /// Dimension vocabulary, sorted.
    pub fn dimension_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.dimensions.iter().cloned().collect();
        names.sort();
        names
    }
}

// ============================================================================
// Raw backend response
// ============================================================================

/// The backend's metadata response (`properties/{id}/metadata`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub metrics: Vec<RawMetric>,
    #[serde(default)]
    pub dimensions: Vec<RawDimension>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMetric {
    pub api_name: String,
    #[serde(default)]
    pub ui_name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDimension {
    pub api_name: String,
    #[serde(default)]
    pub ui_name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl RawMetadata {
    /// Resource name the backend uses for a property's metadata.
    pub fn resource_name(property_id: &str) -> String {
        format!("properties/{property_id}/metadata")
    }
}

// ============================================================================
// Provider interface
// ============================================================================

/// Can fetch authoritative metadata for a property.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn fetch_metadata(&self, property_id: &str) -> Result<PropertyMetadata, MetadataError>;
}

/// In-memory provider with swappable per-property snapshots.
#[derive(Debug, Default)]
pub struct StaticMetadataProvider {
    properties: RwLock<HashMap<String, PropertyMetadata>>,
    fetches: AtomicUsize,
}

impl StaticMetadataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_property(self, property_id: &str, metadata: PropertyMetadata) -> Self {
        self.replace(property_id, metadata);
        self
    }

    /// Install a new schema for a property; later fetches see it.
    pub fn replace(&self, property_id: &str, metadata: PropertyMetadata) {
        self.properties
            .write()
            .insert(property_id.to_string(), metadata);
    }

    pub fn remove(&self, property_id: &str) {
        self.properties.write().remove(property_id);
    }

    /// Number of `fetch_metadata` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataProvider for StaticMetadataProvider {
    async fn fetch_metadata(&self, property_id: &str) -> Result<PropertyMetadata, MetadataError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.properties
            .read()
            .get(property_id)
            .cloned()
            .ok_or_else(|| MetadataError::PropertyNotFound(property_id.to_string()))
    }
}

/// Reads a saved metadata response from disk on every fetch.
///
/// When the snapshot carries a resource `name`, it must belong to the
/// requested property.
#[derive(Debug, Clone)]
pub struct SnapshotFileProvider {
    path: PathBuf,
}

impl SnapshotFileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MetadataProvider for SnapshotFileProvider {
    async fn fetch_metadata(&self, property_id: &str) -> Result<PropertyMetadata, MetadataError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MetadataError::PropertyNotFound(format!(
                    "{property_id} (no snapshot at {})",
                    self.path.display()
                )))
            }
            Err(e) => {
                return Err(MetadataError::Transport(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };

        let raw: RawMetadata = serde_json::from_str(&text).map_err(|e| {
            MetadataError::Malformed(format!("{}: {e}", self.path.display()))
        })?;

        if let Some(name) = raw.name.as_deref() {
            if name != RawMetadata::resource_name(property_id) {
                return Err(MetadataError::PropertyNotFound(format!(
                    "{property_id} (snapshot is for {name})"
                )));
            }
        }

        Ok(PropertyMetadata::from_raw(&raw))
    }
}
