//! VirusTotal v2 API clients
//!
//! [`submit::SubmissionClient`] uploads files, [`report::ReportFetcher`]
//! retrieves reports. Both share one HTTP client and one
//! [`rate_limit::SharedRateLimiter`].

use url::Url;

use crate::config::ApiKey;
use crate::error::VtError;

pub mod http_client;
pub mod rate_limit;
pub mod report;
pub mod submit;

/// Build an endpoint URL carrying the API key and extra query parameters
pub(crate) fn endpoint_url(
    base_url: &str,
    path: &str,
    api_key: &ApiKey,
    params: &[(&str, &str)],
) -> Result<Url, VtError> {
    let raw = format!("{}/{}", base_url.trim_end_matches('/'), path);
    let mut url = Url::parse(&raw)
        .map_err(|e| VtError::InvalidInput(format!("invalid service URL '{raw}': {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("apikey", api_key.expose());
        for (name, value) in params {
            query.append_pair(name, value);
        }
    }
    Ok(url)
}
