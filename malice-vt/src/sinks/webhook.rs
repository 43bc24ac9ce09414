//! Webhook sink
//!
//! Posts the report JSON to the Malice endpoint with the sample id in the
//! `X-Malice-ID` header. Proxying is configured on the client passed in,
//! see [`create_proxied_client`](crate::client::http_client::create_proxied_client).

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;

use super::{PluginResult, ResultSink};

/// Header carrying the sample id
pub const MALICE_ID_HEADER: &str = "X-Malice-ID";

pub struct WebhookSink {
    client: Arc<Client>,
    endpoint: String,
}

impl WebhookSink {
    pub fn new(client: Arc<Client>, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ResultSink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, result: &PluginResult) -> anyhow::Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(MALICE_ID_HEADER, result.id.as_str())
            .json(&result.data)
            .send()
            .await
            .with_context(|| format!("Failed to post results to {}", self.endpoint))?;

        let status = response.status();
        match response.text().await {
            Ok(body) => tracing::debug!("Webhook answered {}: {}", status, body),
            Err(e) => tracing::warn!("Webhook answered {} with an unreadable body: {}", status, e),
        }

        if !status.is_success() {
            anyhow::bail!("Webhook {} rejected results: {}", self.endpoint, status);
        }
        Ok(())
    }
}
