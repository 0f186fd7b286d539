//! Browser-fingerprint HTTP fetch for bot-challenge pages

use std::sync::Arc;

use async_trait::async_trait;

use super::{FetchStrategy, StrategyError};
use crate::infrastructure::http_client::HttpTransport;

/// Markers of an interstitial anti-bot challenge
const CHALLENGE_MARKERS: [&str; 4] = ["Just a moment...", "cf-chl", "challenge-platform", "Attention Required!"];

/// Whether a body is a challenge interstitial rather than the real page
pub fn is_challenge_page(body: &str) -> bool {
    CHALLENGE_MARKERS.iter().any(|marker| body.contains(marker))
}

/// Single request through a cookie-keeping client that sends a desktop
/// browser header set
pub struct BrowserMimicStrategy {
    transport: Arc<dyn HttpTransport>,
}

impl BrowserMimicStrategy {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl FetchStrategy for BrowserMimicStrategy {
    fn name(&self) -> &'static str {
        "browser_mimic"
    }

    async fn fetch(&self, url: &str) -> Result<String, StrategyError> {
        let response = self
            .transport
            .get(url)
            .await
            .map_err(|e| StrategyError::Transport(e.to_string()))?;

        if !response.is_success() {
            return Err(StrategyError::Status { status: response.status });
        }
        if is_challenge_page(&response.body) {
            return Err(StrategyError::Challenge);
        }
        Ok(response.body)
    }
}
