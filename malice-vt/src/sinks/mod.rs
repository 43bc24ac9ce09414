//! Downstream collaborators for resolved reports
//!
//! The resolver only produces a [`ScanReport`]; persisting it or notifying
//! another service happens behind [`ResultSink`]. Each sink owns its own
//! transport settings (for example the webhook proxy).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::ScanReport;

pub mod elasticsearch;
pub mod webhook;

/// Plugin name under which results are stored
pub const PLUGIN_NAME: &str = "virustotal";

/// Plugin category under which results are stored
pub const PLUGIN_CATEGORY: &str = "intel";

/// Envelope handed to every sink
#[derive(Debug, Clone, Serialize)]
pub struct PluginResult {
    pub id: String,
    pub name: &'static str,
    pub category: &'static str,
    pub data: ScanReport,
    pub now: DateTime<Utc>,
}

impl PluginResult {
    pub fn new(id: impl Into<String>, data: ScanReport) -> Self {
        Self {
            id: id.into(),
            name: PLUGIN_NAME,
            category: PLUGIN_CATEGORY,
            data,
            now: Utc::now(),
        }
    }
}

/// Destination for resolved reports
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    async fn deliver(&self, result: &PluginResult) -> anyhow::Result<()>;
}

/// Deliver `result` to every sink, stopping at the first failure
pub async fn deliver_all(
    sinks: &[Box<dyn ResultSink>],
    result: &PluginResult,
) -> anyhow::Result<()> {
    for sink in sinks {
        tracing::debug!("Delivering {} to {}", result.id, sink.name());
        sink.deliver(result).await?;
        tracing::info!("Delivered {} to {}", result.id, sink.name());
    }
    Ok(())
}
