//! Fetch strategy chain
//!
//! Strategies are tried in priority order and the first body returned wins:
//! - plain HTTP with connection-level retry
//! - HTTP client mimicking a desktop browser session
//! - headless browser rendering
//!
//! Every strategy outcome is recorded as a [`StrategyAttempt`] so callers can
//! meter them.

#![allow(clippy::uninlined_format_args)]

pub mod browser_mimic;
pub mod browser_render;
pub mod plain_http;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::{FetchError, StrategyAttempt};
use crate::infrastructure::config::FetchConfig;
use crate::infrastructure::http_client::{HttpClient, HttpClientConfig, TransportError};
use crate::infrastructure::retry_manager::{RetrySchedule, TokioSleeper};

pub use browser_mimic::BrowserMimicStrategy;
pub use browser_render::{BrowserRenderStrategy, ChromiumRenderer, PageRenderer};
pub use plain_http::PlainHttpStrategy;

/// Failure of a single strategy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StrategyError {
    #[error("HTTP status {status}")]
    Status { status: u16 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Bot challenge page returned")]
    Challenge,

    #[error("Empty body")]
    EmptyBody,

    #[error("Renderer unavailable: {0}")]
    RendererUnavailable(String),

    #[error("Renderer failed: {0}")]
    Renderer(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// One way of retrieving a page body
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    /// Stable name used in logs and metrics
    fn name(&self) -> &'static str;

    async fn fetch(&self, url: &str) -> Result<String, StrategyError>;
}

/// Successful chain result
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub body: String,
    pub strategy: &'static str,
    /// 1-based index of the strategy that produced the body
    pub strategy_index: usize,
    /// Every attempt made, including the successful one
    pub attempts: Vec<StrategyAttempt>,
}

/// Ordered strategies with a per-strategy timeout
#[derive(Clone)]
pub struct FetchChain {
    strategies: Vec<Arc<dyn FetchStrategy>>,
    timeout: Duration,
}

impl FetchChain {
    pub fn new(strategies: Vec<Arc<dyn FetchStrategy>>, timeout: Duration) -> Self {
        Self { strategies, timeout }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Fetch `url`, stopping at the first strategy that succeeds
    pub async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        validate_url(url)?;
        if self.strategies.is_empty() {
            return Err(FetchError::invalid_input(url, "no fetch strategies configured"));
        }

        let mut attempts = Vec::with_capacity(self.strategies.len());

        for (position, strategy) in self.strategies.iter().enumerate() {
            let index = position + 1;
            let started = Instant::now();
            debug!("🔄 Fetch strategy #{} ({}) for {}", index, strategy.name(), url);

            let outcome = match tokio::time::timeout(self.timeout, strategy.fetch(url)).await {
                Ok(Ok(body)) if body.trim().is_empty() => Err(StrategyError::EmptyBody),
                Ok(result) => result,
                Err(_) => Err(StrategyError::Timeout(self.timeout)),
            };
            let elapsed = started.elapsed();

            match outcome {
                Ok(body) => {
                    attempts.push(StrategyAttempt {
                        strategy: strategy.name(),
                        index,
                        elapsed,
                        error: None,
                    });
                    info!("✅ Fetched {} via {} in {:?} ({} chars)", url, strategy.name(), elapsed, body.len());
                    return Ok(FetchedPage {
                        body,
                        strategy: strategy.name(),
                        strategy_index: index,
                        attempts,
                    });
                }
                Err(err) => {
                    warn!("❌ Fetch strategy {} failed for {} after {:?}: {}", strategy.name(), url, elapsed, err);
                    attempts.push(StrategyAttempt {
                        strategy: strategy.name(),
                        index,
                        elapsed,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        Err(FetchError::Exhausted {
            url: url.to_string(),
            attempts,
        })
    }
}

/// Standard three-strategy chain built from configuration
pub fn build_chain(config: &FetchConfig) -> Result<FetchChain, TransportError> {
    let plain_client = HttpClient::new(HttpClientConfig {
        user_agent: config.user_agent.clone(),
        timeout_seconds: config.request_timeout_seconds,
        max_requests_per_second: config.max_requests_per_second,
        ..HttpClientConfig::default()
    })?;
    let mimic_client = HttpClient::new(HttpClientConfig::browser_mimic(
        &config.user_agent,
        config.request_timeout_seconds,
        config.max_requests_per_second,
    ))?;

    let schedule = RetrySchedule::exponential(Duration::from_secs(config.plain_backoff_seconds), config.plain_retries)
        .with_hint_ceiling(config.max_retry_after());
    let mut strategies: Vec<Arc<dyn FetchStrategy>> = vec![
        Arc::new(PlainHttpStrategy::new(Arc::new(plain_client), schedule, Arc::new(TokioSleeper))),
        Arc::new(BrowserMimicStrategy::new(Arc::new(mimic_client))),
    ];

    if config.browser_enabled {
        let renderer = ChromiumRenderer::new(&config.browser_binary, &config.user_agent);
        strategies.push(Arc::new(BrowserRenderStrategy::new(
            Arc::new(renderer),
            &config.marker_selector,
            Duration::from_secs(config.marker_wait_seconds),
            Duration::from_secs(config.settle_delay_seconds),
        )));
    }

    let chain = FetchChain::new(strategies, config.strategy_timeout());
    info!("🌐 Fetch chain: {}", chain.strategy_names().join(" → "));
    Ok(chain)
}

fn validate_url(url: &str) -> Result<(), FetchError> {
    let parsed = Url::parse(url).map_err(|e| FetchError::invalid_input(url, e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(FetchError::invalid_input(url, format!("unsupported scheme '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        name: &'static str,
        result: Result<String, StrategyError>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn arc(name: &'static str, result: Result<&str, StrategyError>) -> Arc<Self> {
            Arc::new(Self {
                name,
                result: result.map(str::to_string),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl FetchStrategy for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch(&self, _url: &str) -> Result<String, StrategyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    struct Hanging;

    #[async_trait]
    impl FetchStrategy for Hanging {
        fn name(&self) -> &'static str {
            "hanging"
        }

        async fn fetch(&self, _url: &str) -> Result<String, StrategyError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("late".to_string())
        }
    }

    #[tokio::test]
    async fn falls_through_to_third_strategy() {
        let third = Scripted::arc("render", Ok("<html>rendered</html>"));
        let strategies: Vec<Arc<dyn FetchStrategy>> = vec![
            Scripted::arc("plain", Err(StrategyError::Status { status: 503 })),
            Scripted::arc("mimic", Err(StrategyError::Challenge)),
            third.clone(),
        ];
        let chain = FetchChain::new(strategies, Duration::from_secs(5));

        let page = chain.fetch("https://shop.example.jp/list").await.unwrap();
        assert_eq!(page.strategy_index, 3);
        assert_eq!(page.strategy, "render");
        assert_eq!(page.body, "<html>rendered</html>");
        assert_eq!(page.attempts.len(), 3);
        assert!(!page.attempts[0].succeeded());
        assert!(page.attempts[2].succeeded());
        assert_eq!(third.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stops_at_first_success() {
        let second = Scripted::arc("mimic", Ok("never"));
        let strategies: Vec<Arc<dyn FetchStrategy>> = vec![Scripted::arc("plain", Ok("<html>ok</html>")), second.clone()];
        let chain = FetchChain::new(strategies, Duration::from_secs(5));

        let page = chain.fetch("https://shop.example.jp/list").await.unwrap();
        assert_eq!(page.strategy_index, 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exhausted_when_every_strategy_fails() {
        let strategies: Vec<Arc<dyn FetchStrategy>> = vec![
            Scripted::arc("plain", Err(StrategyError::Transport("reset".into()))),
            Scripted::arc("mimic", Ok("   ")),
            Scripted::arc("render", Err(StrategyError::RendererUnavailable("no chromium".into()))),
        ];
        let chain = FetchChain::new(strategies, Duration::from_secs(5));

        match chain.fetch("https://shop.example.jp/list").await {
            Err(FetchError::Exhausted { attempts, .. }) => {
                assert_eq!(attempts.len(), 3);
                assert_eq!(attempts[1].error.as_deref(), Some("Empty body"));
                assert!(attempts.iter().all(|a| !a.succeeded()));
            }
            other => panic!("expected exhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn invalid_url_is_not_attempted() {
        let plain = Scripted::arc("plain", Ok("body"));
        let strategies: Vec<Arc<dyn FetchStrategy>> = vec![plain.clone()];
        let chain = FetchChain::new(strategies, Duration::from_secs(5));

        assert!(matches!(chain.fetch("not a url").await, Err(FetchError::InvalidInput { .. })));
        assert!(matches!(chain.fetch("ftp://shop.example.jp/").await, Err(FetchError::InvalidInput { .. })));
        assert_eq!(plain.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_strategy_times_out() {
        let strategies: Vec<Arc<dyn FetchStrategy>> = vec![Arc::new(Hanging), Scripted::arc("mimic", Ok("<html>fallback</html>"))];
        let chain = FetchChain::new(strategies, Duration::from_secs(10));

        let page = chain.fetch("https://shop.example.jp/list").await.unwrap();
        assert_eq!(page.strategy_index, 2);
        assert!(page.attempts[0].error.as_deref().unwrap_or_default().contains("Timed out"));
    }
}
