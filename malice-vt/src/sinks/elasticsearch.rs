//! Elasticsearch document store sink
//!
//! Results are upserted into the `malice` index under
//! `plugins.<category>.<name>` of the sample's document, so several plugins
//! can write to the same document without overwriting each other.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value, json};
use url::Url;

use super::{PluginResult, ResultSink};

/// Index holding one document per analysed sample
pub const INDEX: &str = "malice";

pub struct ElasticsearchSink {
    client: Arc<Client>,
    base_url: String,
}

impl ElasticsearchSink {
    pub fn new(client: Arc<Client>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// `{base}/malice/_update/{id}` with `id` as one encoded path segment
    fn update_url(&self, id: &str) -> anyhow::Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid Elasticsearch URL {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Elasticsearch URL {} cannot be a base", self.base_url))?
            .pop_if_empty()
            .extend([INDEX, "_update", id]);
        Ok(url)
    }
}

#[async_trait]
impl ResultSink for ElasticsearchSink {
    fn name(&self) -> &'static str {
        "elasticsearch"
    }

    async fn deliver(&self, result: &PluginResult) -> anyhow::Result<()> {
        let mut plugin = Map::new();
        plugin.insert(result.name.to_string(), serde_json::to_value(&result.data)?);
        let mut category = Map::new();
        category.insert(result.category.to_string(), Value::Object(plugin));

        let body = json!({
            "doc": { "plugins": category },
            "doc_as_upsert": true
        });

        let response = self
            .client
            .post(self.update_url(&result.id)?)
            .json(&body)
            .send()
            .await
            .context("Failed to reach Elasticsearch")?;

        if !response.status().is_success() {
            anyhow::bail!(
                "Elasticsearch upsert for {} failed: {}",
                result.id,
                response.status()
            );
        }
        Ok(())
    }
}
