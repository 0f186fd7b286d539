//! Headless browser rendering fallback
//!
//! The rendered DOM is treated as an opaque body. The strategy only checks
//! whether the product marker made it into the DOM within the wait budget and
//! otherwise renders once more with a short settle budget.

#![allow(clippy::uninlined_format_args)]

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tokio::process::Command;
use tracing::{debug, info};

use super::{FetchStrategy, StrategyError};

/// Produces the rendered DOM of a page within a time budget
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str, budget: Duration) -> Result<String, StrategyError>;
}

/// Drives an installed Chromium through `--headless --dump-dom`
#[derive(Debug, Clone)]
pub struct ChromiumRenderer {
    binary: PathBuf,
    user_agent: String,
}

impl ChromiumRenderer {
    pub fn new(binary: impl Into<PathBuf>, user_agent: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            user_agent: user_agent.into(),
        }
    }
}

#[async_trait]
impl PageRenderer for ChromiumRenderer {
    async fn render(&self, url: &str, budget: Duration) -> Result<String, StrategyError> {
        let output = Command::new(&self.binary)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--hide-scrollbars")
            .arg(format!("--user-agent={}", self.user_agent))
            .arg(format!("--virtual-time-budget={}", budget.as_millis()))
            .arg("--dump-dom")
            .arg(url)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    StrategyError::RendererUnavailable(format!("{} not found", self.binary.display()))
                }
                _ => StrategyError::Renderer(e.to_string()),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StrategyError::Renderer(format!(
                "exit status {}: {}",
                output.status,
                stderr.lines().last().unwrap_or_default()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Render, wait for the product marker, then settle
pub struct BrowserRenderStrategy {
    renderer: Arc<dyn PageRenderer>,
    marker: String,
    marker_wait: Duration,
    settle_delay: Duration,
}

impl BrowserRenderStrategy {
    pub fn new(renderer: Arc<dyn PageRenderer>, marker: impl Into<String>, marker_wait: Duration, settle_delay: Duration) -> Self {
        Self {
            renderer,
            marker: marker.into(),
            marker_wait,
            settle_delay,
        }
    }

    fn marker_present(&self, dom: &str) -> bool {
        match Selector::parse(&self.marker) {
            Ok(selector) => Html::parse_document(dom).select(&selector).next().is_some(),
            Err(_) => dom.contains(&self.marker),
        }
    }
}

#[async_trait]
impl FetchStrategy for BrowserRenderStrategy {
    fn name(&self) -> &'static str {
        "browser_render"
    }

    async fn fetch(&self, url: &str) -> Result<String, StrategyError> {
        let dom = self.renderer.render(url, self.marker_wait).await?;
        if self.marker_present(&dom) {
            debug!("Product marker '{}' present for {}", self.marker, url);
            return Ok(dom);
        }

        info!("⏳ Marker '{}' missing for {}, rendering with {:?} settle delay", self.marker, url, self.settle_delay);
        self.renderer.render(url, self.settle_delay).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeRenderer {
        doms: Mutex<Vec<String>>,
        budgets: Mutex<Vec<Duration>>,
    }

    impl FakeRenderer {
        fn new(doms: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                doms: Mutex::new(doms.iter().rev().map(ToString::to_string).collect()),
                budgets: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PageRenderer for FakeRenderer {
        async fn render(&self, _url: &str, budget: Duration) -> Result<String, StrategyError> {
            self.budgets.lock().unwrap().push(budget);
            self.doms
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| StrategyError::Renderer("no more doms".into()))
        }
    }

    fn strategy(renderer: Arc<FakeRenderer>) -> BrowserRenderStrategy {
        BrowserRenderStrategy::new(renderer, "a.category_itemnamelink", Duration::from_secs(10), Duration::from_secs(3))
    }

    #[tokio::test]
    async fn returns_first_render_when_marker_present() {
        let renderer = FakeRenderer::new(&["<a class=\"category_itemnamelink\" href=\"/p/1\">One</a>"]);
        let dom = strategy(renderer.clone()).fetch("https://x.jp").await.unwrap();
        assert!(dom.contains("category_itemnamelink"));
        assert_eq!(*renderer.budgets.lock().unwrap(), vec![Duration::from_secs(10)]);
    }

    #[tokio::test]
    async fn settles_when_marker_missing() {
        let renderer = FakeRenderer::new(&["<div>loading</div>", "<div>settled</div>"]);
        let dom = strategy(renderer.clone()).fetch("https://x.jp").await.unwrap();
        assert_eq!(dom, "<div>settled</div>");
        assert_eq!(
            *renderer.budgets.lock().unwrap(),
            vec![Duration::from_secs(10), Duration::from_secs(3)]
        );
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let renderer = ChromiumRenderer::new("/nonexistent/chromium-binary", "ua");
        let err = renderer.render("https://x.jp", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, StrategyError::RendererUnavailable(_)));
    }
}
