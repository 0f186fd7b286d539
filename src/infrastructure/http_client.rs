//! HTTP transport with rate limiting
//!
//! [`HttpTransport`] is the seam used by the fetch strategies and the alert
//! notifier. [`HttpClient`] implements it on top of reqwest with a governor
//! rate limiter; tests substitute in-process fakes.

#![allow(clippy::uninlined_format_args)]

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, direct::NotKeyed},
};
use reqwest::{
    Client,
    header::{ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER, USER_AGENT},
};
use thiserror::Error;

use super::retry_manager::parse_retry_after;

/// Desktop Chrome user agent used by default
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Transport-level failures (no HTTP status was obtained)
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Failed to build HTTP client: {0}")]
    Build(String),

    #[error("Request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("Failed to read response body from {url}: {reason}")]
    Body { url: String, reason: String },
}

/// Response reduced to what the retrying callers look at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Parsed `Retry-After` hint, if present
    pub retry_after: Option<Duration>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    #[must_use]
    pub const fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Minimal HTTP surface needed by fetching and alert delivery
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;

    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<HttpResponse, TransportError>;
}

/// HTTP client configuration
#[derive(Debug, Clone, serde::Serialize)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_requests_per_second: u32,
    pub follow_redirects: bool,
    /// Keep cookies between requests (challenge clearance cookies)
    pub cookie_store: bool,
    /// Send the full desktop browser header set
    pub browser_headers: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_seconds: 30,
            max_requests_per_second: 2,
            follow_redirects: true,
            cookie_store: false,
            browser_headers: false,
        }
    }
}

impl HttpClientConfig {
    /// Configuration that mimics a desktop Chrome session
    pub fn browser_mimic(user_agent: &str, timeout_seconds: u64, max_requests_per_second: u32) -> Self {
        Self {
            user_agent: user_agent.to_string(),
            timeout_seconds,
            max_requests_per_second,
            follow_redirects: true,
            cookie_store: true,
            browser_headers: true,
        }
    }
}

fn browser_header_set() -> Vec<(HeaderName, &'static str)> {
    vec![
        (
            ACCEPT,
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
        (ACCEPT_LANGUAGE, "ja-JP,ja;q=0.9,en-US;q=0.8,en;q=0.7"),
        (CACHE_CONTROL, "max-age=0"),
        (HeaderName::from_static("sec-ch-ua"), "\"Chromium\";v=\"124\", \"Google Chrome\";v=\"124\", \"Not-A.Brand\";v=\"99\""),
        (HeaderName::from_static("sec-ch-ua-mobile"), "?0"),
        (HeaderName::from_static("sec-ch-ua-platform"), "\"Windows\""),
        (HeaderName::from_static("sec-fetch-dest"), "document"),
        (HeaderName::from_static("sec-fetch-mode"), "navigate"),
        (HeaderName::from_static("sec-fetch-site"), "none"),
        (HeaderName::from_static("sec-fetch-user"), "?1"),
        (HeaderName::from_static("upgrade-insecure-requests"), "1"),
    ]
}

/// reqwest client with a direct (unkeyed) rate limiter
pub struct HttpClient {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    config: HttpClientConfig,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| TransportError::Build(format!("invalid user agent: {}", e)))?,
        );
        if config.browser_headers {
            for (name, value) in browser_header_set() {
                headers.insert(name, HeaderValue::from_static(value));
            }
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .cookie_store(config.cookie_store)
            .redirect(if config.follow_redirects {
                reqwest::redirect::Policy::limited(10)
            } else {
                reqwest::redirect::Policy::none()
            })
            .build()
            .map_err(|e| TransportError::Build(e.to_string()))?;

        let per_second = NonZeroU32::new(config.max_requests_per_second)
            .ok_or_else(|| TransportError::Build("rate limit must be greater than 0".to_string()))?;
        let rate_limiter = RateLimiter::direct(Quota::per_second(per_second));

        Ok(Self {
            client,
            rate_limiter,
            config,
        })
    }

    pub const fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    async fn read_response(url: &str, response: reqwest::Response) -> Result<HttpResponse, TransportError> {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.map_err(|e| TransportError::Body {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        Ok(HttpResponse {
            status,
            retry_after,
            body,
        })
    }
}

#[async_trait]
impl HttpTransport for HttpClient {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        self.rate_limiter.until_ready().await;
        tracing::debug!("🌐 GET {}", url);

        let response = self.client.get(url).send().await.map_err(|e| TransportError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let response = Self::read_response(url, response).await?;
        tracing::debug!("GET {} -> {} ({} chars)", url, response.status, response.body.len());
        Ok(response)
    }

    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<HttpResponse, TransportError> {
        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        Self::read_response(url, response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_http_client_creation() {
        let client = HttpClient::new(HttpClientConfig::default());
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_zero_rate_limit_rejected() {
        let config = HttpClientConfig {
            max_requests_per_second: 0,
            ..Default::default()
        };
        assert!(matches!(HttpClient::new(config), Err(TransportError::Build(_))));
    }

    #[tokio::test]
    async fn test_browser_mimic_config() {
        let config = HttpClientConfig::browser_mimic(DEFAULT_USER_AGENT, 20, 1);
        assert!(config.cookie_store);
        assert!(config.browser_headers);
        let client = HttpClient::new(config).unwrap();
        assert_eq!(client.config().timeout_seconds, 20);
    }

    #[test]
    fn response_success_range() {
        assert!(HttpResponse::new(204, "").is_success());
        assert!(!HttpResponse::new(429, "").is_success());
        let limited = HttpResponse::new(429, "").with_retry_after(Duration::from_secs(2));
        assert_eq!(limited.retry_after, Some(Duration::from_secs(2)));
    }
}
