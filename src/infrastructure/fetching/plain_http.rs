//! Plain HTTP GET with connection-level retry

#![allow(clippy::uninlined_format_args)]

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{FetchStrategy, StrategyError};
use crate::infrastructure::http_client::HttpTransport;
use crate::infrastructure::retry_manager::{ErrorClassification, RetrySchedule, Sleeper, classify_fetch_status};

/// Retries transport errors, 429 and 5xx along a fixed schedule
pub struct PlainHttpStrategy {
    transport: Arc<dyn HttpTransport>,
    schedule: RetrySchedule,
    sleeper: Arc<dyn Sleeper>,
}

impl PlainHttpStrategy {
    pub fn new(transport: Arc<dyn HttpTransport>, schedule: RetrySchedule, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            transport,
            schedule,
            sleeper,
        }
    }
}

#[async_trait]
impl FetchStrategy for PlainHttpStrategy {
    fn name(&self) -> &'static str {
        "plain_http"
    }

    async fn fetch(&self, url: &str) -> Result<String, StrategyError> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let (last_error, hinted_wait) = match self.transport.get(url).await {
                Ok(response) => match classify_fetch_status(response.status, response.retry_after) {
                    ErrorClassification::Success => return Ok(response.body),
                    ErrorClassification::NonRecoverable => {
                        return Err(StrategyError::Status { status: response.status });
                    }
                    ErrorClassification::RateLimited { retry_after } => {
                        (StrategyError::Status { status: response.status }, retry_after)
                    }
                    ErrorClassification::Recoverable => (StrategyError::Status { status: response.status }, None),
                },
                Err(err) => (StrategyError::Transport(err.to_string()), None),
            };

            let Some(delay) = self.schedule.delay_after(attempt) else {
                warn!("❌ Plain fetch of {} gave up after {} attempts: {}", url, attempt, last_error);
                return Err(last_error);
            };

            let wait = self.schedule.hinted_wait(hinted_wait, delay);
            debug!("🔄 Plain fetch attempt {} for {} failed ({}), retrying in {:?}", attempt, url, last_error, wait);
            self.sleeper.sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::http_client::{HttpResponse, TransportError};
    use crate::infrastructure::retry_manager::RecordingSleeper;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
            })
        }

        fn remaining(&self) -> usize {
            self.responses.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn get(&self, _url: &str) -> Result<HttpResponse, TransportError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::new(500, "script exhausted")))
        }

        async fn post_json(&self, _url: &str, _body: &serde_json::Value) -> Result<HttpResponse, TransportError> {
            unreachable!("fetching never posts")
        }
    }

    fn strategy(transport: Arc<ScriptedTransport>, sleeper: &RecordingSleeper) -> PlainHttpStrategy {
        PlainHttpStrategy::new(
            transport,
            RetrySchedule::exponential(Duration::from_secs(1), 3),
            Arc::new(sleeper.clone()),
        )
    }

    #[tokio::test]
    async fn retries_transient_statuses_with_backoff() {
        let transport = ScriptedTransport::new(vec![
            Ok(HttpResponse::new(503, "busy")),
            Err(TransportError::Request {
                url: "u".into(),
                reason: "reset".into(),
            }),
            Ok(HttpResponse::new(200, "<html>ok</html>")),
        ]);
        let sleeper = RecordingSleeper::new();

        let body = strategy(transport.clone(), &sleeper).fetch("https://x.jp").await.unwrap();
        assert_eq!(body, "<html>ok</html>");
        assert_eq!(sleeper.waits(), vec![Duration::from_secs(1), Duration::from_secs(2)]);
        assert_eq!(transport.remaining(), 0);
    }

    #[tokio::test]
    async fn honours_retry_after_on_429() {
        let transport = ScriptedTransport::new(vec![
            Ok(HttpResponse::new(429, "").with_retry_after(Duration::from_secs(9))),
            Ok(HttpResponse::new(200, "ok")),
        ]);
        let sleeper = RecordingSleeper::new();

        strategy(transport, &sleeper).fetch("https://x.jp").await.unwrap();
        assert_eq!(sleeper.waits(), vec![Duration::from_secs(9)]);
    }

    #[tokio::test]
    async fn oversized_retry_after_is_capped() {
        let transport = ScriptedTransport::new(vec![
            Ok(HttpResponse::new(429, "").with_retry_after(Duration::from_secs(86_400))),
            Ok(HttpResponse::new(200, "ok")),
        ]);
        let sleeper = RecordingSleeper::new();

        strategy(transport, &sleeper).fetch("https://x.jp").await.unwrap();
        assert_eq!(sleeper.waits(), vec![Duration::from_secs(60)]);
    }

    #[tokio::test]
    async fn fatal_status_fails_immediately() {
        let transport = ScriptedTransport::new(vec![Ok(HttpResponse::new(404, "gone"))]);
        let sleeper = RecordingSleeper::new();

        let err = strategy(transport, &sleeper).fetch("https://x.jp").await.unwrap_err();
        assert_eq!(err, StrategyError::Status { status: 404 });
        assert!(sleeper.waits().is_empty());
    }

    #[tokio::test]
    async fn exhausts_budget() {
        let transport = ScriptedTransport::new(vec![]);
        let sleeper = RecordingSleeper::new();

        let err = strategy(transport, &sleeper).fetch("https://x.jp").await.unwrap_err();
        assert_eq!(err, StrategyError::Status { status: 500 });
        assert_eq!(sleeper.waits().len(), 3);
    }
}
