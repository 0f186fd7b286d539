//! Infrastructure layer for fetching, parsing, storage and external integrations
//!
//! Page fetching strategies, HTML extraction, product state backends, the
//! webhook alert channel, metric sinks, configuration and logging.

pub mod config;
pub mod database_connection;
pub mod fetching;
pub mod http_client;
pub mod logging;
pub mod metrics;
pub mod notifier;
pub mod parsing;
pub mod retry_manager;
pub mod state_store;

pub use config::{AppConfig, LoggingConfig, MonitoringWindow};
pub use database_connection::DatabaseConnection;
pub use fetching::{FetchChain, FetchStrategy, FetchedPage, StrategyError};
pub use http_client::{HttpClient, HttpClientConfig, HttpResponse, HttpTransport};
pub use logging::{init_logging, init_logging_with_config};
pub use metrics::{MetricSink, NoopMetricSink, RecordingMetricSink, TracingMetricSink};
pub use notifier::{AlertChannel, AlertMessage, MessageRenderer, RichAlert, Severity, WebhookNotifier};
pub use parsing::{ExtractionSelectors, ProductExtractor};
pub use retry_manager::{RecordingSleeper, RetrySchedule, Sleeper, TokioSleeper};
pub use state_store::{StateBackend, StateStore, open_backend};
