//! File submission
//!
//! - **Endpoint**: `POST {base}/file/scan?apikey=...`
//! - **Body**: multipart form with a single `file` part
//! - **Response**: `{response_code, resource, scan_id, permalink, verbose_msg, ...}`
//!
//! A submission only queues the file; the report becomes available
//! asynchronously and must be polled with [`super::report::ReportFetcher`].
//! This client sends exactly one request per call and never retries.

use std::sync::Arc;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::endpoint_url;
use crate::config::ApiKey;
use crate::error::VtError;
use crate::model::{Artifact, SubmissionHandle};

#[derive(Debug, Deserialize)]
struct ScanResponse {
    #[serde(default)]
    resource: Option<String>,
    #[serde(default)]
    scan_id: Option<String>,
    #[serde(default)]
    verbose_msg: Option<String>,
}

/// Client for the file scan endpoint
pub struct SubmissionClient {
    client: Arc<Client>,
    base_url: String,
    api_key: ApiKey,
}

impl SubmissionClient {
    pub fn new(client: Arc<Client>, base_url: impl Into<String>, api_key: ApiKey) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }

    /// Upload a file artifact and return the pending scan handle
    pub async fn submit(&self, artifact: &Artifact) -> Result<SubmissionHandle, VtError> {
        let (path, bytes) = match artifact {
            Artifact::File { path, bytes, .. } => (path, bytes),
            Artifact::Hash(hash) => {
                return Err(VtError::InvalidInput(format!(
                    "cannot upload a bare hash ({hash}); use a report lookup instead"
                )));
            }
        };

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("sample")
            .to_string();
        let form = Form::new().part("file", Part::bytes(bytes.clone()).file_name(file_name));
        let url = endpoint_url(&self.base_url, "file/scan", &self.api_key, &[])?;

        tracing::info!("Uploading {} ({} bytes)", path.display(), bytes.len());

        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VtError::transport("file upload failed", e))?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(VtError::RateLimited { attempts: 1 });
        }
        if !status.is_success() {
            return Err(VtError::HttpStatus {
                context: "file upload failed".to_string(),
                status,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| VtError::transport("failed to read upload response", e))?;
        let decoded: ScanResponse = serde_json::from_slice(&body)?;

        let resource = decoded.resource.filter(|r| !r.is_empty());
        let scan_id = decoded.scan_id.filter(|s| !s.is_empty());
        match (resource, scan_id) {
            (Some(resource), Some(scan_id)) => {
                tracing::info!(
                    "Submission queued: resource={} scan_id={} ({})",
                    resource,
                    scan_id,
                    decoded.verbose_msg.as_deref().unwrap_or("")
                );
                Ok(SubmissionHandle { resource, scan_id })
            }
            _ => Err(VtError::Protocol(
                "upload response lacks resource or scan_id".to_string(),
            )),
        }
    }
}
