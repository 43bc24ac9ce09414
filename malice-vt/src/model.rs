//! Core data model: artifacts, submission handles and normalized reports

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::VtError;

/// The thing being evaluated: file contents or a known hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// Local file to upload (scan path)
    File {
        path: PathBuf,
        bytes: Vec<u8>,
        /// Lowercase hex SHA-256 of `bytes`
        sha256: String,
    },
    /// MD5, SHA-1 or SHA-256 hex digest (lookup path)
    Hash(String),
}

impl Artifact {
    /// Read a file artifact from disk.
    ///
    /// Fails with [`VtError::InvalidInput`] when the path does not reference a
    /// readable regular file. No network traffic happens here.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, VtError> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            VtError::InvalidInput(format!("cannot access {}: {e}", path.display()))
        })?;
        if !metadata.is_file() {
            return Err(VtError::InvalidInput(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            VtError::InvalidInput(format!("cannot read {}: {e}", path.display()))
        })?;
        let sha256 = hex::encode(Sha256::digest(&bytes));

        Ok(Artifact::File {
            path: path.to_path_buf(),
            bytes,
            sha256,
        })
    }

    /// Validate a hash artifact. Accepts MD5, SHA-1 and SHA-256 hex digests.
    pub fn from_hash(hash: &str) -> Result<Self, VtError> {
        let hash = hash.trim();
        if !matches!(hash.len(), 32 | 40 | 64) {
            return Err(VtError::InvalidInput(format!(
                "'{hash}' is not an MD5, SHA-1 or SHA-256 digest (got {} characters)",
                hash.len()
            )));
        }
        if !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(VtError::InvalidInput(format!(
                "'{hash}' contains non-hexadecimal characters"
            )));
        }
        Ok(Artifact::Hash(hash.to_ascii_lowercase()))
    }

    /// Identifier used when persisting results for this artifact
    pub fn default_id(&self) -> &str {
        match self {
            Artifact::File { sha256, .. } => sha256,
            Artifact::Hash(hash) => hash,
        }
    }
}

/// Pending scan job returned by a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionHandle {
    pub resource: String,
    #[serde(rename = "scanID")]
    pub scan_id: String,
}

/// One engine's verdict
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineResult {
    pub engine_name: String,
    pub detected: bool,
    pub signature: String,
    pub engine_version: String,
    pub update_date: String,
}

/// Normalized multi-engine report
///
/// Only [`crate::normalize`] builds populated reports, which keeps
/// `positive_engines` and `total_engines` consistent with `engine_results`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub resource: String,
    pub permalink: String,
    pub response_code: i64,
    #[serde(rename = "scanID")]
    pub scan_id: String,
    pub scan_date: String,
    pub verbose_message: String,
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    pub total_engines: u32,
    pub positive_engines: u32,
    pub engine_results: BTreeMap<String, EngineResult>,
}

impl ScanReport {
    /// Response code of a finished report
    pub const READY: i64 = 1;
    /// Response code of an unknown or not yet available resource
    pub const NOT_FOUND: i64 = 0;
    /// Response code of a file still queued for analysis
    pub const QUEUED: i64 = -2;

    /// Whether this report is a completed verdict
    pub fn is_ready(&self) -> bool {
        self.response_code == Self::READY
    }

    /// Whether the service does not know the resource (yet)
    pub fn is_not_found(&self) -> bool {
        self.response_code == Self::NOT_FOUND
    }

    /// Fraction of engines that flagged the artifact, in `0.0..=1.0`.
    ///
    /// Returns `None` when no engine reported, so callers never divide by zero.
    pub fn detection_ratio(&self) -> Option<f64> {
        if self.total_engines == 0 {
            return None;
        }
        Some(f64::from(self.positive_engines) / f64::from(self.total_engines))
    }
}

/// Render a detection ratio as a whole percentage (`88%`) or `N/A`
pub fn format_ratio(ratio: Option<f64>) -> String {
    match ratio {
        Some(r) => format!("{:.0}%", r * 100.0),
        None => "N/A".to_string(),
    }
}
