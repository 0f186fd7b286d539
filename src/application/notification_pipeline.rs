//! Delivery of diff results and failure alerts

#![allow(clippy::uninlined_format_args)]

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::domain::{DiffResult, ExtractError, FailureCategory, MonitorError};
use crate::infrastructure::metrics::{MetricSink, log_sink_error};
use crate::infrastructure::notifier::{AlertChannel, AlertMessage, MessageRenderer};

/// Outcome of delivering one run's alerts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    /// A "system degraded" alert went out after a majority of failures
    pub degraded_alert_sent: bool,
}

impl DeliveryReport {
    pub const fn majority_failed(&self) -> bool {
        self.attempted > 0 && self.failed * 2 > self.attempted
    }
}

pub struct NotificationPipeline {
    channel: Arc<dyn AlertChannel>,
    renderer: MessageRenderer,
    metrics: Arc<dyn MetricSink>,
}

impl NotificationPipeline {
    pub fn new(channel: Arc<dyn AlertChannel>, renderer: MessageRenderer, metrics: Arc<dyn MetricSink>) -> Self {
        Self {
            channel,
            renderer,
            metrics,
        }
    }

    /// Messages for a diff in delivery order: new, restocked, price changes,
    /// sold out. Restock and price change of one product are two messages.
    pub fn render(&self, diff: &DiffResult) -> Vec<AlertMessage> {
        let mut messages = Vec::with_capacity(diff.change_count());
        messages.extend(diff.new_items.iter().map(|p| self.renderer.new_item(p)));
        messages.extend(diff.restocked.iter().map(|p| self.renderer.restock(p)));
        messages.extend(diff.price_changed.iter().map(|c| self.renderer.price_change(c)));
        messages.extend(diff.out_of_stock.iter().map(|p| self.renderer.sold_out(p)));
        messages
    }

    /// Deliver every message of `diff`. A failed message never blocks the
    /// following ones.
    pub async fn deliver_diff(&self, diff: &DiffResult) -> DeliveryReport {
        let messages = self.render(diff);
        let mut report = DeliveryReport {
            attempted: messages.len(),
            ..DeliveryReport::default()
        };

        for message in &messages {
            match self.channel.deliver(message).await {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    report.failed += 1;
                    error!("❌ Failed to deliver '{}': {}", message.summary(), err);
                    log_sink_error(
                        self.metrics.record_failure(FailureCategory::Notification, &err.to_string()),
                        "record_failure",
                    );
                }
            }
        }

        if report.majority_failed() {
            let degraded = self.renderer.system_degraded(report.failed, report.attempted);
            match self.channel.deliver(&degraded).await {
                Ok(()) => report.degraded_alert_sent = true,
                Err(err) => warn!("Degraded-system alert also failed: {}", err),
            }
        }

        if report.attempted > 0 {
            info!(
                "📨 Alerts: {}/{} delivered, {} failed",
                report.delivered, report.attempted, report.failed
            );
        }
        report
    }

    /// Best-effort alert for a per-URL failure; returns whether it went out
    pub async fn alert_failure(&self, url: &str, failure: &MonitorError) -> bool {
        let message = match failure {
            MonitorError::Extract(err @ ExtractError::LayoutChanged { .. }) => {
                self.renderer.site_structure_changed(url, err)
            }
            other => self.renderer.failure(other.category(), url, &other.to_string()),
        };

        match self.channel.deliver(&message).await {
            Ok(()) => true,
            Err(err) => {
                warn!("Failure alert for {} not delivered: {}", url, err);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NotificationError, PageKind, PriceChange, Product};
    use crate::infrastructure::metrics::RecordingMetricSink;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Channel failing the messages whose position is listed
    #[derive(Default)]
    struct FakeChannel {
        fail_positions: Vec<usize>,
        fail_all: bool,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AlertChannel for FakeChannel {
        async fn deliver(&self, message: &AlertMessage) -> Result<(), NotificationError> {
            let mut seen = self.seen.lock().unwrap();
            let position = seen.len();
            seen.push(message.summary().to_string());
            if self.fail_all || self.fail_positions.contains(&position) {
                return Err(NotificationError::Exhausted {
                    attempts: 4,
                    last_status: Some(500),
                    last_body: "down".into(),
                });
            }
            Ok(())
        }
    }

    fn product(id: &str, price: u64) -> Product {
        Product::observed(id, format!("https://item.example.jp/shop/{}/", id), price, true)
    }

    fn diff() -> DiffResult {
        DiffResult {
            new_items: vec![product("n", 100)],
            restocked: vec![product("r", 200)],
            out_of_stock: vec![product("s", 300)],
            price_changed: vec![PriceChange {
                old: product("r", 150),
                new: product("r", 200),
            }],
            updated: vec![product("r", 200), product("s", 300)],
        }
    }

    fn pipeline(channel: Arc<FakeChannel>, sink: &RecordingMetricSink) -> NotificationPipeline {
        NotificationPipeline::new(channel, MessageRenderer::default(), Arc::new(sink.clone()))
    }

    #[tokio::test]
    async fn delivers_in_category_order() {
        let channel = Arc::new(FakeChannel::default());
        let report = pipeline(channel.clone(), &RecordingMetricSink::new()).deliver_diff(&diff()).await;

        assert_eq!(report.delivered, 4);
        let seen = channel.seen.lock().unwrap().clone();
        assert!(seen[0].contains("新商品"));
        assert!(seen[1].contains("再販"));
        assert!(seen[2].contains("価格変更"));
        assert!(seen[3].contains("売り切れ"));
    }

    #[tokio::test]
    async fn failures_are_independent() {
        let channel = Arc::new(FakeChannel {
            fail_positions: vec![0],
            ..FakeChannel::default()
        });
        let sink = RecordingMetricSink::new();
        let report = pipeline(channel.clone(), &sink).deliver_diff(&diff()).await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 3);
        assert!(!report.degraded_alert_sent);
        assert_eq!(channel.seen.lock().unwrap().len(), 4);
        assert_eq!(sink.snapshot().failures[0].0, FailureCategory::Notification);
    }

    #[tokio::test]
    async fn majority_failure_sends_degraded_alert() {
        let channel = Arc::new(FakeChannel {
            fail_positions: vec![0, 1, 2],
            ..FakeChannel::default()
        });
        let report = pipeline(channel.clone(), &RecordingMetricSink::new()).deliver_diff(&diff()).await;

        assert!(report.majority_failed());
        assert!(report.degraded_alert_sent);
        let seen = channel.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 5);
        assert!(seen[4].contains("通知システム劣化"));
    }

    #[tokio::test]
    async fn degraded_alert_failure_is_swallowed() {
        let channel = Arc::new(FakeChannel {
            fail_all: true,
            ..FakeChannel::default()
        });
        let report = pipeline(channel, &RecordingMetricSink::unavailable()).deliver_diff(&diff()).await;
        assert_eq!(report.failed, 4);
        assert!(!report.degraded_alert_sent);
    }

    #[tokio::test]
    async fn empty_diff_sends_nothing() {
        let channel = Arc::new(FakeChannel::default());
        let report = pipeline(channel.clone(), &RecordingMetricSink::new())
            .deliver_diff(&DiffResult::default())
            .await;
        assert_eq!(report, DeliveryReport::default());
        assert!(channel.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn layout_failure_alert_is_critical() {
        let channel = Arc::new(FakeChannel::default());
        let failure: MonitorError = ExtractError::layout_changed(PageKind::Listing, "no anchors", &[]).into();
        assert!(pipeline(channel.clone(), &RecordingMetricSink::new()).alert_failure("https://x.jp", &failure).await);
        assert!(channel.seen.lock().unwrap()[0].contains("ページ構造"));
    }
}
