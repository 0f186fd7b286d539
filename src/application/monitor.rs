//! Run orchestrator: one fetch → extract → diff → notify cycle
//!
//! Per-URL failures are isolated: they are logged, reported to the metric
//! sink and alerted best-effort, then the next URL proceeds. Alerts for the
//! aggregated diff go out once every URL was processed.

#![allow(clippy::uninlined_format_args)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{Local, NaiveTime};
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

use super::diff_engine::DiffEngine;
use super::notification_pipeline::{DeliveryReport, NotificationPipeline};
use crate::domain::{ConfigurationError, DiffResult, FailureCategory, MonitorError};
use crate::infrastructure::config::{AppConfig, MonitoringWindow};
use crate::infrastructure::fetching::{self, FetchChain};
use crate::infrastructure::http_client::{HttpClient, HttpClientConfig};
use crate::infrastructure::metrics::{MetricSink, log_sink_error};
use crate::infrastructure::notifier::{MessageRenderer, WebhookNotifier};
use crate::infrastructure::parsing::ProductExtractor;
use crate::infrastructure::retry_manager::TokioSleeper;
use crate::infrastructure::state_store::{StateStore, open_backend};

/// Consecutive layout failures after which the metric sink gets a
/// sustained-failure signal
pub const SUSTAINED_FAILURE_THRESHOLD: u32 = 2;

/// Collaborators of the monitor
pub struct MonitorComponents {
    pub fetcher: FetchChain,
    pub extractor: ProductExtractor,
    pub diff: DiffEngine,
    pub notifications: NotificationPipeline,
    pub metrics: Arc<dyn MetricSink>,
}

/// Result of processing one URL
#[derive(Debug)]
pub struct UrlReport {
    pub url: String,
    pub strategy: Option<&'static str>,
    pub items: usize,
    pub changes: usize,
    pub error: Option<MonitorError>,
}

impl UrlReport {
    pub const fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug)]
pub struct CycleReport {
    pub run_id: Uuid,
    pub urls: Vec<UrlReport>,
    pub diff: DiffResult,
    pub delivery: DeliveryReport,
    pub duration: Duration,
}

impl CycleReport {
    pub fn items_processed(&self) -> usize {
        self.urls.iter().map(|u| u.items).sum()
    }

    pub fn changes_found(&self) -> usize {
        self.diff.change_count()
    }

    pub fn failed_urls(&self) -> usize {
        self.urls.iter().filter(|u| !u.succeeded()).count()
    }
}

#[derive(Debug)]
pub enum CycleOutcome {
    /// Outside the monitoring window, nothing was touched
    Skipped,
    Completed(CycleReport),
}

pub struct Monitor {
    urls: Vec<String>,
    window: Option<MonitoringWindow>,
    components: MonitorComponents,
    layout_streaks: Mutex<HashMap<String, u32>>,
}

struct UrlSuccess {
    strategy: &'static str,
    items: usize,
    diff: DiffResult,
}

impl Monitor {
    pub fn new(urls: Vec<String>, window: Option<MonitoringWindow>, components: MonitorComponents) -> Self {
        Self {
            urls,
            window,
            components,
            layout_streaks: Mutex::new(HashMap::new()),
        }
    }

    /// Wire production components from a validated configuration
    pub async fn from_config(config: &AppConfig, metrics: Arc<dyn MetricSink>) -> Result<Self, MonitorError> {
        config.validate()?;
        let window = config.monitoring_window()?;

        let fetcher = fetching::build_chain(&config.fetch)
            .map_err(|e| ConfigurationError::invalid("fetch", e.to_string()))?;
        let extractor = ProductExtractor::with_config(&config.extraction)?;

        let backend = open_backend(&config.storage).await?;
        let store = Arc::new(StateStore::with_config(backend, &config.storage));

        let webhook_client = HttpClient::new(HttpClientConfig {
            timeout_seconds: config.notification.request_timeout_seconds,
            ..HttpClientConfig::default()
        })
        .map_err(|e| ConfigurationError::invalid("notification", e.to_string()))?;
        let notifier = WebhookNotifier::new(
            Arc::new(webhook_client),
            &config.webhook_url,
            &config.notification,
            Arc::new(TokioSleeper),
        );
        let notifications = NotificationPipeline::new(
            Arc::new(notifier),
            MessageRenderer::new(&config.notification.currency_symbol),
            Arc::clone(&metrics),
        );

        let components = MonitorComponents {
            fetcher,
            extractor,
            diff: DiffEngine::new(store),
            notifications,
            metrics,
        };
        Ok(Self::new(config.urls.clone(), window, components))
    }

    pub const fn diff_engine(&self) -> &DiffEngine {
        &self.components.diff
    }

    /// Current consecutive layout failure count for `url`
    pub fn layout_streak(&self, url: &str) -> u32 {
        self.layout_streaks
            .lock()
            .map(|streaks| streaks.get(url).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Run one cycle at the current local time
    pub async fn run_cycle(&self) -> CycleOutcome {
        self.run_cycle_at(Local::now().time()).await
    }

    pub async fn run_cycle_at(&self, local_time: NaiveTime) -> CycleOutcome {
        if let Some(window) = &self.window {
            if !window.contains(local_time) {
                info!(
                    "⏸️ {} is outside the monitoring window {}-{}, skipping cycle",
                    local_time.format("%H:%M"),
                    window.start.format("%H:%M"),
                    window.end.format("%H:%M")
                );
                return CycleOutcome::Skipped;
            }
        }

        let run_id = Uuid::new_v4();
        let span = info_span!("cycle", run_id = %run_id);
        CycleOutcome::Completed(self.execute(run_id).instrument(span).await)
    }

    async fn execute(&self, run_id: Uuid) -> CycleReport {
        let started = Instant::now();
        info!("🔄 Monitoring cycle started for {} URLs", self.urls.len());

        let mut aggregate = DiffResult::default();
        let mut reports = Vec::with_capacity(self.urls.len());

        for url in &self.urls {
            let outcome = self.process_url(url).instrument(info_span!("url", url = %url)).await;

            match outcome {
                Ok(success) => {
                    self.reset_layout_streak(url);
                    reports.push(UrlReport {
                        url: url.clone(),
                        strategy: Some(success.strategy),
                        items: success.items,
                        changes: success.diff.change_count(),
                        error: None,
                    });
                    aggregate.merge(success.diff);
                }
                Err(failure) => {
                    self.handle_failure(url, &failure).await;
                    reports.push(UrlReport {
                        url: url.clone(),
                        strategy: None,
                        items: 0,
                        changes: 0,
                        error: Some(failure),
                    });
                }
            }
        }

        let delivery = self.components.notifications.deliver_diff(&aggregate).await;

        let report = CycleReport {
            run_id,
            urls: reports,
            diff: aggregate,
            delivery,
            duration: started.elapsed(),
        };

        log_sink_error(
            self.components
                .metrics
                .record_run(report.items_processed(), report.changes_found(), report.duration),
            "record_run",
        );
        info!(
            "✅ Cycle finished in {:?}: {} items, {} changes, {} failed URLs",
            report.duration,
            report.items_processed(),
            report.changes_found(),
            report.failed_urls()
        );
        report
    }

    async fn process_url(&self, url: &str) -> Result<UrlSuccess, MonitorError> {
        let fetched = match self.components.fetcher.fetch(url).await {
            Ok(page) => {
                self.record_attempts(&page.attempts);
                page
            }
            Err(err) => {
                if let crate::domain::FetchError::Exhausted { attempts, .. } = &err {
                    self.record_attempts(attempts);
                }
                return Err(err.into());
            }
        };

        let products = self.components.extractor.extract(&fetched.body, url)?;
        let diff = self.components.diff.diff(&products).await?;

        Ok(UrlSuccess {
            strategy: fetched.strategy,
            items: products.len(),
            diff,
        })
    }

    fn record_attempts(&self, attempts: &[crate::domain::StrategyAttempt]) {
        for attempt in attempts {
            log_sink_error(self.components.metrics.record_fetch_attempt(attempt), "record_fetch_attempt");
        }
    }

    async fn handle_failure(&self, url: &str, failure: &MonitorError) {
        let category = failure.category();
        error!("❌ {} failure on {}: {}", category, url, failure);
        log_sink_error(
            self.components.metrics.record_failure(category, &failure.to_string()),
            "record_failure",
        );

        if category == FailureCategory::Layout {
            let consecutive = self.bump_layout_streak(url);
            if consecutive >= SUSTAINED_FAILURE_THRESHOLD {
                log_sink_error(
                    self.components
                        .metrics
                        .record_sustained_failure(category, url, consecutive),
                    "record_sustained_failure",
                );
            }
        }

        self.components.notifications.alert_failure(url, failure).await;
    }

    fn bump_layout_streak(&self, url: &str) -> u32 {
        self.layout_streaks.lock().map_or(1, |mut streaks| {
            let count = streaks.entry(url.to_string()).or_insert(0);
            *count = count.saturating_add(1);
            *count
        })
    }

    fn reset_layout_streak(&self, url: &str) {
        if let Ok(mut streaks) = self.layout_streaks.lock() {
            streaks.remove(url);
        }
    }
}
