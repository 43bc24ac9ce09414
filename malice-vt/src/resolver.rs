//! Report resolution workflow
//!
//! A [`Resolver`] turns an [`Artifact`] into a [`ScanReport`]:
//!
//! - **Scan path**: upload the file, then poll the report for the returned
//!   handle. A rate-limited upload is retried after the limiter's backoff,
//!   within the same retry budget as report requests.
//! - **Lookup path**: fetch the report for a hash once.
//!
//! Both paths share one rate limiter. An optional wall-clock bound covers
//! the whole resolution; when it expires the in-flight request is dropped
//! and [`VtError::Timeout`] is returned.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use crate::client::rate_limit::{RateLimiter, SharedRateLimiter, wait_for_slot};
use crate::client::report::{PollPolicy, ReportFetcher};
use crate::client::submit::SubmissionClient;
use crate::config::{ApiKey, Config, ConfigError};
use crate::error::VtError;
use crate::model::{Artifact, ScanReport, SubmissionHandle};

pub struct Resolver {
    submitter: SubmissionClient,
    fetcher: ReportFetcher,
    limiter: SharedRateLimiter,
    total_timeout: Option<Duration>,
}

impl Resolver {
    pub fn new(
        client: Arc<Client>,
        base_url: &str,
        api_key: ApiKey,
        limiter: SharedRateLimiter,
    ) -> Self {
        Self {
            submitter: SubmissionClient::new(Arc::clone(&client), base_url, api_key.clone()),
            fetcher: ReportFetcher::new(client, base_url, api_key, Arc::clone(&limiter)),
            limiter,
            total_timeout: None,
        }
    }

    /// Build a resolver from configuration with its own rate limiter.
    ///
    /// Fails before any network call when the API key is missing or malformed.
    pub fn from_config(config: &Config, client: Arc<Client>) -> Result<Self, ConfigError> {
        let api_key = config.api_key()?;
        let limiter = RateLimiter::from_config(&config.rate_limit).shared();
        let resolver = Self::new(client, &config.service.base_url, api_key, limiter)
            .with_policy(PollPolicy::from_config(&config.polling))
            .with_total_timeout(config.output.total_timeout_secs.map(Duration::from_secs));
        Ok(resolver)
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.fetcher = self.fetcher.with_policy(policy);
        self
    }

    pub fn with_total_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.total_timeout = timeout;
        self
    }

    /// Resolve a local file (scan path)
    pub async fn resolve_path(&self, path: impl AsRef<Path>) -> Result<ScanReport, VtError> {
        let artifact = Artifact::from_path(path).await?;
        self.resolve(&artifact).await
    }

    /// Resolve a hash (lookup path)
    pub async fn resolve_hash(&self, hash: &str) -> Result<ScanReport, VtError> {
        let artifact = Artifact::from_hash(hash)?;
        self.resolve(&artifact).await
    }

    /// Resolve an artifact into a report, honoring the total timeout
    pub async fn resolve(&self, artifact: &Artifact) -> Result<ScanReport, VtError> {
        match self.total_timeout {
            Some(limit) => tokio::time::timeout(limit, self.run(artifact))
                .await
                .map_err(|_| VtError::Timeout(limit))?,
            None => self.run(artifact).await,
        }
    }

    async fn run(&self, artifact: &Artifact) -> Result<ScanReport, VtError> {
        match artifact {
            Artifact::File { .. } => {
                let handle = self.submit(artifact).await?;
                self.fetcher
                    .fetch_report(&handle.resource, Some(&handle.scan_id))
                    .await
            }
            Artifact::Hash(hash) => self.fetcher.fetch_report(hash, None).await,
        }
    }

    /// Upload through the limiter, backing off on exhaustion signals
    async fn submit(&self, artifact: &Artifact) -> Result<SubmissionHandle, VtError> {
        let max_retries = self.fetcher.policy().max_rate_limited_retries;
        let mut rate_limited = 0u32;

        loop {
            wait_for_slot(&self.limiter).await;
            match self.submitter.submit(artifact).await {
                Ok(handle) => {
                    self.limiter.lock().await.record_success();
                    return Ok(handle);
                }
                Err(VtError::RateLimited { .. }) => {
                    rate_limited += 1;
                    self.limiter.lock().await.record_exhausted();
                    if rate_limited > max_retries {
                        return Err(VtError::RateLimited {
                            attempts: rate_limited,
                        });
                    }
                    tracing::debug!(
                        "Upload rate limited ({}/{} retries)",
                        rate_limited,
                        max_retries
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }
}
