//! Live metadata provider over the analytics Data API.

use super::{MetadataProvider, PropertyMetadata, RawMetadata};
use crate::config::ConfigError;
use crate::error::MetadataError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};

pub const GA4_ACCESS_TOKEN_ENV: &str = "GA4_ACCESS_TOKEN";
pub const GA4_API_BASE_URL_ENV: &str = "GA4_API_BASE_URL";
pub const DEFAULT_GA4_API_BASE_URL: &str = "https://analyticsdata.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct Ga4HttpConfig {
    pub access_token: String,
    pub base_url: String,
}

impl Ga4HttpConfig {
    pub fn new(access_token: &str) -> Self {
        Self {
            access_token: access_token.to_string(),
            base_url: DEFAULT_GA4_API_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let token = std::env::var(GA4_ACCESS_TOKEN_ENV)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "live metadata requires {GA4_ACCESS_TOKEN_ENV} (or pass a metadata snapshot file)"
                ))
            })?;

        let mut config = Self::new(&token);
        if let Ok(base) = std::env::var(GA4_API_BASE_URL_ENV) {
            if !base.trim().is_empty() {
                config = config.with_base_url(base.trim());
            }
        }
        Ok(config)
    }

    pub fn metadata_url(&self, property_id: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            RawMetadata::resource_name(property_id)
        )
    }
}

/// `GET {base}/properties/{id}/metadata` with a bearer token.
///
/// Timeouts are applied by the caller, not by the HTTP client.
pub struct Ga4HttpMetadataProvider {
    client: Client,
    config: Ga4HttpConfig,
}

impl Ga4HttpMetadataProvider {
    pub fn new(config: Ga4HttpConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn with_client(client: Client, config: Ga4HttpConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl MetadataProvider for Ga4HttpMetadataProvider {
    async fn fetch_metadata(&self, property_id: &str) -> Result<PropertyMetadata, MetadataError> {
        let url = self.config.metadata_url(property_id);
        tracing::debug!(%url, "fetching property metadata");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(|e| MetadataError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(property_id, status, &body));
        }

        let raw: RawMetadata = response
            .json()
            .await
            .map_err(|e| MetadataError::Malformed(e.to_string()))?;

        Ok(PropertyMetadata::from_raw(&raw))
    }
}

fn classify_status(property_id: &str, status: StatusCode, body: &str) -> MetadataError {
    match status {
        StatusCode::NOT_FOUND => MetadataError::PropertyNotFound(property_id.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => MetadataError::Unauthorized {
            property_id: property_id.to_string(),
            message: format!("{status}: {}", truncate(body, 300)),
        },
        _ => MetadataError::Transport(format!("{status}: {}", truncate(body, 300))),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push('…');
    out
}
