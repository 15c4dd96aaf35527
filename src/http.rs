//! Upstream HTTP client shared by adapters and the manifest rewriter.
//!
//! Features:
//! - HTTP/2 with connection pooling and keep-alive
//! - TLS 1.3 via rustls
//! - Brotli / Gzip / Deflate decompression
//! - Cookie store for providers that set session cookies

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::error::{Error, Result};

pub const DEFAULT_USER_AGENT: &str = concat!("tvmux/", env!("CARGO_PKG_VERSION"));

/// Thin wrapper over [`reqwest::Client`] that turns non-2xx responses into
/// [`Error::Upstream`] carrying a truncated body.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
}

impl UpstreamClient {
    pub fn new() -> Result<Self> {
        Self::with_user_agent(DEFAULT_USER_AGENT)
    }

    pub fn with_user_agent(user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            // Keep connections alive for reuse across playlist refreshes
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .use_rustls_tls()
            .brotli(true)
            .gzip(true)
            .deflate(true)
            // Overall request time is bounded per adapter by the engine
            .connect_timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::limited(10))
            .cookie_store(true)
            .build()?;

        Ok(Self { client })
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    fn get(&self, url: &str, headers: &HashMap<String, String>) -> RequestBuilder {
        let mut req = self.client.get(url);
        for (k, v) in headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req
    }

    /// GET `url`, failing on a non-2xx status.
    #[instrument(skip(self, headers))]
    pub async fn send(&self, url: &str, headers: &HashMap<String, String>) -> Result<Response> {
        let resp = self.get(url, headers).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::upstream(format!(
                "{status} from {url}: {}",
                body.trim()
            )));
        }
        Ok(resp)
    }

    /// GET `url` and return the body as text.
    pub async fn fetch_text(&self, url: &str, headers: &HashMap<String, String>) -> Result<String> {
        let body = self.send(url, headers).await?.text().await?;
        debug!("Fetched {} bytes from {url}", body.len());
        Ok(body)
    }

    /// GET `url` and decode the body as JSON.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<T> {
        let body = self.fetch_text(url, headers).await?;
        serde_json::from_str(&body)
            .map_err(|e| Error::upstream(format!("invalid JSON from {url}: {e}: {body}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MAX_MESSAGE_LEN;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetch_text_sends_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/list.m3u8"))
            .and(header("Referer", "https://tv.example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U\n"))
            .mount(&server)
            .await;

        let client = UpstreamClient::new().unwrap();
        let headers = HashMap::from([("Referer".to_string(), "https://tv.example.com".to_string())]);
        let body = client
            .fetch_text(&format!("{}/list.m3u8", server.uri()), &headers)
            .await
            .unwrap();
        assert_eq!(body, "#EXTM3U\n");
    }

    #[tokio::test]
    async fn non_success_status_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance ".repeat(100)))
            .mount(&server)
            .await;

        let client = UpstreamClient::new().unwrap();
        let err = client
            .fetch_text(&server.uri(), &HashMap::new())
            .await
            .unwrap_err();
        match err {
            Error::Upstream(msg) => {
                assert!(msg.contains("503"));
                assert!(msg.len() <= MAX_MESSAGE_LEN + 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_json_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let client = UpstreamClient::new().unwrap();
        let result: Result<serde_json::Value> =
            client.fetch_json(&server.uri(), &HashMap::new()).await;
        assert!(matches!(result, Err(Error::Upstream(_))));
    }
}
