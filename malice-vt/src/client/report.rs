//! File report retrieval
//!
//! - **Endpoint**: `GET {base}/file/report?apikey=...&resource=...&allinfo=1`
//! - **Resource**: an MD5/SHA-1/SHA-256 hash, or the resource of a
//!   [`SubmissionHandle`](crate::model::SubmissionHandle)
//!
//! ## Polling
//!
//! Every attempt goes through the shared rate limiter first. The answer then
//! moves the fetch into one of four states:
//!
//! | Answer | State | Next step |
//! |---|---|---|
//! | `response_code == 1` | Ready | normalize and return |
//! | `response_code == 0` or `-2` | Pending | sleep, doubling up to `max_delay` |
//! | HTTP 204 or 429 | RateLimited | tell the limiter, retry after its backoff |
//! | anything else | Failed | return the error |
//!
//! A plain hash lookup does not poll: `response_code == 0` there means the
//! service has never seen the file, and the not-found report is returned. A
//! queued lookup ends as [`VtError::Pending`] straight away.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use reqwest::{Client, StatusCode};

use super::endpoint_url;
use super::rate_limit::{SharedRateLimiter, wait_for_slot};
use crate::config::{ApiKey, PollingConfig};
use crate::error::VtError;
use crate::model::ScanReport;
use crate::normalize::normalize;

/// Polling budget for a single report
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// First delay after a pending answer
    pub initial_delay: Duration,
    /// Ceiling for the doubling delay
    pub max_delay: Duration,
    /// Total time spent waiting on pending answers before giving up
    pub max_wait: Duration,
    /// Consecutive rate-limited answers tolerated
    pub max_rate_limited_retries: u32,
}

impl PollPolicy {
    pub fn from_config(config: &PollingConfig) -> Self {
        Self {
            initial_delay: Duration::from_secs(config.initial_delay_secs),
            max_delay: Duration::from_secs(config.max_delay_secs),
            max_wait: Duration::from_secs(config.max_wait_secs),
            max_rate_limited_retries: config.max_rate_limited_retries,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_config(&PollingConfig::default())
    }
}

/// Double `delay`, capped at `max`
fn next_delay(delay: Duration, max: Duration) -> Duration {
    delay.saturating_mul(2).min(max)
}

/// Result of a single report request
#[derive(Debug)]
enum Attempt {
    Ready(ScanReport),
    Pending(ScanReport),
    RateLimited,
}

/// Removes the resource from the in-flight set on drop
struct InFlightGuard {
    in_flight: Arc<DashMap<String, ()>>,
    resource: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.resource);
    }
}

/// Client for the file report endpoint
pub struct ReportFetcher {
    client: Arc<Client>,
    base_url: String,
    api_key: ApiKey,
    limiter: SharedRateLimiter,
    policy: PollPolicy,
    in_flight: Arc<DashMap<String, ()>>,
}

impl ReportFetcher {
    pub fn new(
        client: Arc<Client>,
        base_url: impl Into<String>,
        api_key: ApiKey,
        limiter: SharedRateLimiter,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
            limiter,
            policy: PollPolicy::default(),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Fetch the report for `resource`.
    ///
    /// With `scan_id` set (right after a submission) a missing report is
    /// polled until ready or until the policy's `max_wait` is spent, which
    /// yields [`VtError::Pending`]. Without it a missing report is returned
    /// as-is with `response_code == 0`.
    pub async fn fetch_report(
        &self,
        resource: &str,
        scan_id: Option<&str>,
    ) -> Result<ScanReport, VtError> {
        let _guard = self.claim(resource)?;

        let started = Instant::now();
        let mut delay = self.policy.initial_delay;
        let mut rate_limited = 0u32;
        let mut attempt_no = 0u32;

        loop {
            wait_for_slot(&self.limiter).await;
            attempt_no += 1;
            tracing::debug!("Requesting report for {} (attempt {})", resource, attempt_no);

            match self.request_once(resource, scan_id).await? {
                Attempt::Ready(report) => {
                    self.limiter.lock().await.record_success();
                    tracing::info!(
                        "Report ready for {}: {}/{} engines",
                        resource,
                        report.positive_engines,
                        report.total_engines
                    );
                    return Ok(report);
                }
                Attempt::RateLimited => {
                    rate_limited += 1;
                    self.limiter.lock().await.record_exhausted();
                    if rate_limited > self.policy.max_rate_limited_retries {
                        return Err(VtError::RateLimited {
                            attempts: rate_limited,
                        });
                    }
                    tracing::debug!(
                        "Rate limited on {} ({}/{} retries)",
                        resource,
                        rate_limited,
                        self.policy.max_rate_limited_retries
                    );
                }
                Attempt::Pending(report) => {
                    self.limiter.lock().await.record_success();
                    rate_limited = 0;

                    let waited = started.elapsed();
                    if scan_id.is_none() {
                        if report.is_not_found() {
                            tracing::info!("{} not found: {}", resource, report.verbose_message);
                            return Ok(report);
                        }
                        return Err(VtError::Pending {
                            resource: resource.to_string(),
                            waited,
                        });
                    }

                    if waited.saturating_add(delay) > self.policy.max_wait {
                        return Err(VtError::Pending {
                            resource: resource.to_string(),
                            waited,
                        });
                    }
                    tracing::debug!(
                        "Report for {} pending ({}), retrying in {:?}",
                        resource,
                        report.verbose_message,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = next_delay(delay, self.policy.max_delay);
                }
            }
        }
    }

    fn claim(&self, resource: &str) -> Result<InFlightGuard, VtError> {
        match self.in_flight.entry(resource.to_string()) {
            Entry::Occupied(_) => Err(VtError::InFlight {
                resource: resource.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(InFlightGuard {
                    in_flight: Arc::clone(&self.in_flight),
                    resource: resource.to_string(),
                })
            }
        }
    }

    async fn request_once(
        &self,
        resource: &str,
        scan_id: Option<&str>,
    ) -> Result<Attempt, VtError> {
        let mut params = vec![("resource", resource), ("allinfo", "1")];
        if let Some(scan_id) = scan_id {
            params.push(("scan_id", scan_id));
        }
        let url = endpoint_url(&self.base_url, "file/report", &self.api_key, &params)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| VtError::transport("report request failed", e))?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT || status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(Attempt::RateLimited);
        }
        if !status.is_success() {
            return Err(VtError::HttpStatus {
                context: format!("report request for {resource} failed"),
                status,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| VtError::transport("failed to read report body", e))?;
        let report = normalize(&body)?;

        match report.response_code {
            ScanReport::READY => Ok(Attempt::Ready(report)),
            ScanReport::NOT_FOUND => Ok(Attempt::Pending(report)),
            ScanReport::QUEUED => Ok(Attempt::Pending(report)),
            code => Err(VtError::Service {
                code,
                message: report.verbose_message,
            }),
        }
    }
}
