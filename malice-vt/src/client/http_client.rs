//! Shared HTTP client for the API clients and sinks.
//!
//! One `reqwest::Client` is built per process and handed to every component
//! that talks to the service, so connections and TLS sessions are reused
//! between submission, polling and storage requests.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Proxy};

const USER_AGENT: &str = concat!(
    "malice-vt/",
    env!("CARGO_PKG_VERSION"),
    " (https://github.com/maliceio/malice-virustotal)"
);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

fn builder(timeout: Duration) -> reqwest::ClientBuilder {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .tcp_keepalive(Duration::from_secs(60))
}

pub fn create_shared_client(timeout: Duration) -> anyhow::Result<Arc<Client>> {
    Ok(Arc::new(builder(timeout).build()?))
}

/// Client routing every request through `proxy_url`
pub fn create_proxied_client(timeout: Duration, proxy_url: &str) -> anyhow::Result<Arc<Client>> {
    let client = builder(timeout).proxy(Proxy::all(proxy_url)?).build()?;
    Ok(Arc::new(client))
}

#[cfg(test)]
mod tests {
    use super::*;

    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_shared_client_sends_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file/report"))
            .and(header("user-agent", USER_AGENT))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = create_shared_client(Duration::from_secs(5)).unwrap();
        let response = client
            .get(format!("{}/file/report", server.uri()))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
    }

    #[tokio::test]
    async fn test_proxied_client_routes_through_proxy() {
        // The stub stands in for the proxy; the target host never resolves
        let proxy = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/malice/results"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&proxy)
            .await;

        let client = create_proxied_client(Duration::from_secs(5), &proxy.uri()).unwrap();
        let response = client
            .post("http://malice.invalid/malice/results")
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
    }
}
