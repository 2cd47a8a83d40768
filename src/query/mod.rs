//! Event source queries and per-window plugin fan-out.
//!
//! For each dispatched window the handler runs every registered plugin:
//! the event source is searched with the plugin's term conjunction plus
//! the window's time range, the raw hits are handed to the plugin
//! subprocess, and the validated results are forwarded to the integrator.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde_json::json;
use tokio::sync::mpsc;

use crate::plugins::{Plugin, PluginRequest, PluginResult, PluginTerm};

/// Documents fetched per window query.
const QUERY_PAGE_SIZE: usize = 10000;

/// One bounded time window to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryRequest {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Source of raw event documents.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Returns raw event documents matching every term, with
    /// `utctimestamp` in `[start, end)`.
    async fn search(
        &self,
        terms: &[PluginTerm],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<serde_json::Value>>;
}

/// Event source over the Elasticsearch-compatible search API.
pub struct HttpEventSource {
    client: reqwest::Client,
    endpoint: String,
    index: String,
}

impl HttpEventSource {
    pub fn new(endpoint: &str, index: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            index: index.to_string(),
        }
    }

    /// Replaces the index, for the `-I` override.
    pub fn with_index(mut self, index: &str) -> Self {
        self.index = index.to_string();
        self
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn search(
        &self,
        terms: &[PluginTerm],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<serde_json::Value>> {
        let must: Vec<serde_json::Value> = terms
            .iter()
            .map(|t| json!({ "term": { (t.field.as_str()): t.value } }))
            .collect();
        let body = json!({
            "size": QUERY_PAGE_SIZE,
            "query": {
                "bool": {
                    "must": must,
                    "filter": {
                        "range": {
                            "utctimestamp": {
                                "gte": start.to_rfc3339(),
                                "lt": end.to_rfc3339(),
                            }
                        }
                    }
                }
            }
        });

        let url = format!("{}/{}/_search", self.endpoint, self.index);
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("event source search failed")?;
        if !resp.status().is_success() {
            bail!("event source returned {}", resp.status());
        }

        #[derive(serde::Deserialize)]
        struct Hit {
            #[serde(rename = "_source")]
            source: serde_json::Value,
        }
        #[derive(serde::Deserialize)]
        struct Hits {
            hits: Vec<Hit>,
        }
        #[derive(serde::Deserialize)]
        struct SearchResponse {
            hits: Hits,
        }

        let parsed: SearchResponse = resp
            .json()
            .await
            .context("event source returned malformed response")?;
        Ok(parsed.hits.hits.into_iter().map(|h| h.source).collect())
    }
}

/// Runs a single plugin against one window and returns its results.
pub async fn query_using_plugin(
    plugin: &Plugin,
    source: &dyn EventSource,
    req: &QueryRequest,
) -> Result<Option<PluginResult>> {
    let hits = source
        .search(&plugin.terms, req.start_time, req.end_time)
        .await?;
    info!("plugin {} returned {} hits", plugin.name, hits.len());
    if hits.is_empty() {
        return Ok(None);
    }
    let result = plugin.run(&PluginRequest { events: hits }).await?;
    Ok(Some(result))
}

/// Handles one window: every plugin runs, failures are isolated to the
/// failing plugin, and results flow to the integrator channel.
pub async fn handle_query_request(
    plugins: &[Plugin],
    source: &dyn EventSource,
    req: &QueryRequest,
    results: &mpsc::Sender<PluginResult>,
) {
    for plugin in plugins {
        match query_using_plugin(plugin, source, req).await {
            Ok(Some(result)) => {
                if results.send(result).await.is_err() {
                    warn!("integrator channel closed, dropping plugin results");
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    "plugin {} failed for window {} -> {}: {:#}",
                    plugin.name, req.start_time, req.end_time, e
                );
            }
        }
    }
}
