//! Document-store client for state persistence.
//!
//! Speaks the Elasticsearch-compatible document API: documents live at
//! `<endpoint>/<index>/_doc/<id>`, the index itself at
//! `<endpoint>/<index>`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::info;
use reqwest::StatusCode;
use serde::Deserialize;

use super::StateStore;
use crate::model::PrincipalObject;

pub struct HttpStateStore {
    client: reqwest::Client,
    endpoint: String,
    index: String,
}

#[derive(Deserialize)]
struct DocResponse {
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source")]
    source: Option<PrincipalObject>,
}

impl HttpStateStore {
    pub fn new(endpoint: &str, index: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            index: index.to_string(),
        }
    }

    fn doc_url(&self, object_id: &str) -> String {
        format!("{}/{}/_doc/{}", self.endpoint, self.index, object_id)
    }

    fn index_url(&self) -> String {
        format!("{}/{}", self.endpoint, self.index)
    }
}

#[async_trait]
impl StateStore for HttpStateStore {
    async fn read(&self, object_id: &str) -> Result<Option<PrincipalObject>> {
        let resp = self
            .client
            .get(self.doc_url(object_id))
            .send()
            .await
            .context("state store read failed")?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            bail!("state store read returned {}", resp.status());
        }
        let doc: DocResponse = resp
            .json()
            .await
            .context("state store returned malformed document")?;
        if !doc.found {
            return Ok(None);
        }
        Ok(doc.source)
    }

    async fn write(&self, object: &PrincipalObject) -> Result<()> {
        let resp = self
            .client
            .put(self.doc_url(&object.object_id))
            .json(object)
            .send()
            .await
            .context("state store write failed")?;
        if !resp.status().is_success() {
            bail!("state store write returned {}", resp.status());
        }
        Ok(())
    }

    async fn init(&self, delete_existing: bool) -> Result<()> {
        if delete_existing {
            info!("removing any existing state index");
            let resp = self
                .client
                .delete(self.index_url())
                .send()
                .await
                .context("state index delete failed")?;
            if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
                bail!("state index delete returned {}", resp.status());
            }
        }

        let resp = self
            .client
            .head(self.index_url())
            .send()
            .await
            .context("state index existence check failed")?;
        if resp.status().is_success() {
            info!("state index exists, skipping creation");
            return Ok(());
        }

        info!("state index does not exist, creating");
        let resp = self
            .client
            .put(self.index_url())
            .send()
            .await
            .context("state index creation failed")?;
        if !resp.status().is_success() {
            bail!("state index creation returned {}", resp.status());
        }
        Ok(())
    }
}
