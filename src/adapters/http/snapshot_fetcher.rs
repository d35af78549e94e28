//! HTTP snapshot fetcher.
//!
//! GETs `{base_url}{path_template}` with `{conversation_id}` substituted and
//! hands the JSON body to the readiness predicate as-is.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client as ReqwestClient};
use tracing::{debug, instrument};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ConversationId, FetcherConfig, StructuredSnapshot};
use crate::domain::ports::SnapshotFetcher;

const CONVERSATION_PLACEHOLDER: &str = "{conversation_id}";

/// Fetches the authoritative conversation from an HTTP API.
#[derive(Debug, Clone)]
pub struct HttpSnapshotFetcher {
    http_client: ReqwestClient,
    base_url: String,
    path_template: String,
}

impl HttpSnapshotFetcher {
    pub fn new(base_url: impl Into<String>, config: &FetcherConfig) -> Result<Self> {
        let http_client = ReqwestClient::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .pool_max_idle_per_host(4)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            path_template: config.path_template.clone(),
        })
    }

    /// Build from config; `None` when no base URL is configured.
    pub fn from_config(config: &FetcherConfig) -> Result<Option<Self>> {
        config
            .base_url
            .as_deref()
            .map(|base| Self::new(base, config))
            .transpose()
    }

    fn url_for(&self, conversation_id: &ConversationId) -> String {
        let path = self
            .path_template
            .replace(CONVERSATION_PLACEHOLDER, conversation_id.as_str());
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }
}

#[async_trait]
impl SnapshotFetcher for HttpSnapshotFetcher {
    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    async fn fetch(&self, conversation_id: &ConversationId) -> DomainResult<StructuredSnapshot> {
        let url = self.url_for(conversation_id);
        let response = self
            .http_client
            .get(&url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| DomainError::fetch_failed(conversation_id.as_str(), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DomainError::fetch_failed(
                conversation_id.as_str(),
                format!("HTTP {}", status.as_u16()),
            ));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            DomainError::fetch_failed(conversation_id.as_str(), format!("invalid JSON body: {e}"))
        })?;
        debug!(url = %url, "Fetched conversation snapshot");
        Ok(StructuredSnapshot::new(body))
    }
}
