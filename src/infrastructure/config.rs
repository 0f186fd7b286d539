//! Configuration infrastructure
//!
//! Settings are read with the `config` crate from an optional file (JSON,
//! TOML or YAML by extension) and `MONITOR_*` environment variables, using
//! `__` between nested keys (`MONITOR_STORAGE__BACKEND=json`).
//! `DISCORD_WEBHOOK_URL` overrides the alert endpoint when set.
//!
//! Loading always ends with [`AppConfig::validate`], so a returned config is
//! safe to build components from.

#![allow(clippy::uninlined_format_args)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::domain::ConfigurationError;
use crate::infrastructure::parsing::{ExtractionSelectors, ProductExtractor};

/// Environment variable that overrides `webhook_url`
pub const WEBHOOK_ENV_OVERRIDE: &str = "DISCORD_WEBHOOK_URL";

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "MONITOR";

/// Application data directory name under the user data directory
pub const APP_DIR_NAME: &str = "listing-monitor";

/// Default values
pub mod defaults {
    /// Cycle interval (30 minutes)
    pub const INTERVAL_SECONDS: u64 = 1800;

    /// Per-request HTTP timeout
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;

    /// Upper bound for one fetch strategy, retries included
    pub const STRATEGY_TIMEOUT_SECONDS: u64 = 120;

    /// Plain HTTP retries after the first attempt
    pub const PLAIN_RETRIES: u32 = 3;

    /// Plain HTTP backoff factor (1s, 2s, 4s)
    pub const PLAIN_BACKOFF_SECONDS: u64 = 1;

    pub const MAX_REQUESTS_PER_SECOND: u32 = 2;

    pub const BROWSER_BINARY: &str = "chromium";

    /// DOM marker the renderer waits for
    pub const MARKER_SELECTOR: &str = "a.category_itemnamelink";

    pub const MARKER_WAIT_SECONDS: u64 = 10;

    pub const SETTLE_DELAY_SECONDS: u64 = 3;

    pub const STORAGE_RETRY_ATTEMPTS: usize = 3;

    pub const STORAGE_RETRY_DELAYS_SECONDS: [u64; 3] = [1, 2, 4];

    pub const NOTIFICATION_RETRY_DELAYS_SECONDS: [u64; 3] = [5, 15, 60];

    /// Ceiling for a server `Retry-After` hint
    pub const MAX_RETRY_AFTER_SECONDS: u64 = 60;

    pub const NOTIFICATION_TIMEOUT_SECONDS: u64 = 10;

    pub const NOTIFICATION_USERNAME: &str = "Listing Monitor";

    pub const CURRENCY_SYMBOL: &str = "¥";

    pub const LOG_LEVEL: &str = "info";

    pub const LOG_FILE_NAME: &str = "listing-monitor.log";

    pub const LOG_MAX_FILES: u32 = 7;

    /// Timestamps are rendered in the monitored site's local time (JST)
    pub const LOG_UTC_OFFSET_HOURS: i32 = 9;
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Listing URLs to monitor, in processing order
    pub urls: Vec<String>,

    /// Alert channel endpoint
    #[serde(alias = "webhookUrl", alias = "webhookurl")]
    pub webhook_url: String,

    /// Optional local time window outside of which cycles are skipped
    pub monitoring: Option<MonitoringWindowConfig>,

    pub interval_seconds: u64,

    pub fetch: FetchConfig,

    pub storage: StorageConfig,

    pub notification: NotificationConfig,

    pub logging: LoggingConfig,

    pub extraction: ExtractionSelectors,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            webhook_url: String::new(),
            monitoring: None,
            interval_seconds: defaults::INTERVAL_SECONDS,
            fetch: FetchConfig::default(),
            storage: StorageConfig::default(),
            notification: NotificationConfig::default(),
            logging: LoggingConfig::default(),
            extraction: ExtractionSelectors::default(),
        }
    }
}

/// Raw monitoring window, "HH:MM" local time on both ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringWindowConfig {
    #[serde(alias = "startTime", alias = "starttime")]
    pub start_time: String,

    #[serde(alias = "endTime", alias = "endtime")]
    pub end_time: String,
}

/// Parsed monitoring window, inclusive on both ends, minute resolution.
/// A window whose start is after its end wraps midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitoringWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl MonitoringWindow {
    pub fn parse(raw: &MonitoringWindowConfig) -> Result<Self, ConfigurationError> {
        Ok(Self {
            start: parse_hhmm("monitoring.start_time", &raw.start_time)?,
            end: parse_hhmm("monitoring.end_time", &raw.end_time)?,
        })
    }

    pub fn contains(&self, now: NaiveTime) -> bool {
        let now = NaiveTime::from_hms_opt(now.hour(), now.minute(), 0).unwrap_or(now);
        if self.start <= self.end {
            self.start <= now && now <= self.end
        } else {
            now >= self.start || now <= self.end
        }
    }
}

fn parse_hhmm(field: &str, raw: &str) -> Result<NaiveTime, ConfigurationError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|e| ConfigurationError::invalid(field, format!("'{}' is not HH:MM ({})", raw, e)))
}

/// Fetch chain settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub request_timeout_seconds: u64,
    pub strategy_timeout_seconds: u64,
    pub plain_retries: u32,
    pub plain_backoff_seconds: u64,
    pub user_agent: String,
    pub max_requests_per_second: u32,
    /// Disable to run without the headless browser fallback
    pub browser_enabled: bool,
    pub browser_binary: PathBuf,
    pub marker_selector: String,
    pub marker_wait_seconds: u64,
    pub settle_delay_seconds: u64,
    /// Longest `Retry-After` the plain strategy honours
    pub max_retry_after_seconds: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            strategy_timeout_seconds: defaults::STRATEGY_TIMEOUT_SECONDS,
            plain_retries: defaults::PLAIN_RETRIES,
            plain_backoff_seconds: defaults::PLAIN_BACKOFF_SECONDS,
            user_agent: crate::infrastructure::http_client::DEFAULT_USER_AGENT.to_string(),
            max_requests_per_second: defaults::MAX_REQUESTS_PER_SECOND,
            browser_enabled: true,
            browser_binary: PathBuf::from(defaults::BROWSER_BINARY),
            marker_selector: defaults::MARKER_SELECTOR.to_string(),
            marker_wait_seconds: defaults::MARKER_WAIT_SECONDS,
            settle_delay_seconds: defaults::SETTLE_DELAY_SECONDS,
            max_retry_after_seconds: defaults::MAX_RETRY_AFTER_SECONDS,
        }
    }
}

impl FetchConfig {
    pub const fn strategy_timeout(&self) -> Duration {
        Duration::from_secs(self.strategy_timeout_seconds)
    }

    pub const fn max_retry_after(&self) -> Duration {
        Duration::from_secs(self.max_retry_after_seconds)
    }
}

/// State store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    #[default]
    Sqlite,
    Json,
    Memory,
}

/// State store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackendKind,
    /// Database or JSON file; defaults under the user data directory
    pub path: Option<PathBuf>,
    pub retry_attempts: usize,
    pub retry_delays_seconds: Vec<u64>,
    /// Purge states unseen for this many days; `None` keeps everything
    pub retention_days: Option<u32>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::default(),
            path: None,
            retry_attempts: defaults::STORAGE_RETRY_ATTEMPTS,
            retry_delays_seconds: defaults::STORAGE_RETRY_DELAYS_SECONDS.to_vec(),
            retention_days: None,
        }
    }
}

impl StorageConfig {
    /// Configured path or the backend's default file in the data directory
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            let file = match self.backend {
                StorageBackendKind::Json => "state.json",
                StorageBackendKind::Sqlite | StorageBackendKind::Memory => "state.db",
            };
            app_data_dir().join(file)
        })
    }

    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_seconds.iter().copied().map(Duration::from_secs).collect()
    }
}

/// Alert delivery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub retry_delays_seconds: Vec<u64>,
    pub request_timeout_seconds: u64,
    pub username: String,
    pub currency_symbol: String,
    /// Longest `Retry-After` a rate-limited delivery waits
    pub max_retry_after_seconds: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            retry_delays_seconds: defaults::NOTIFICATION_RETRY_DELAYS_SECONDS.to_vec(),
            request_timeout_seconds: defaults::NOTIFICATION_TIMEOUT_SECONDS,
            username: defaults::NOTIFICATION_USERNAME.to_string(),
            currency_symbol: defaults::CURRENCY_SYMBOL.to_string(),
            max_retry_after_seconds: defaults::MAX_RETRY_AFTER_SECONDS,
        }
    }
}

impl NotificationConfig {
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_seconds.iter().copied().map(Duration::from_secs).collect()
    }

    pub const fn max_retry_after(&self) -> Duration {
        Duration::from_secs(self.max_retry_after_seconds)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// JSON formatted file logs
    pub json_format: bool,

    pub console_output: bool,

    pub file_output: bool,

    /// Log directory; defaults to `logs/` under the data directory
    pub log_dir: Option<PathBuf>,

    pub file_name: String,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Fixed UTC offset used for log timestamps
    pub utc_offset_hours: i32,

    /// Module-specific level filters (e.g. "sqlx": "warn")
    pub module_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: true,
            log_dir: None,
            file_name: defaults::LOG_FILE_NAME.to_string(),
            max_files: defaults::LOG_MAX_FILES,
            utc_offset_hours: defaults::LOG_UTC_OFFSET_HOURS,
            module_filters: HashMap::new(),
        }
    }
}

impl LoggingConfig {
    pub fn resolved_log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| app_data_dir().join("logs"))
    }
}

/// User data directory for this application
pub fn app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

fn require_http_url(field: &str, raw: &str) -> Result<(), ConfigurationError> {
    let parsed = Url::parse(raw.trim()).map_err(|e| ConfigurationError::invalid(field, e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigurationError::invalid(field, format!("unsupported scheme '{}'", other))),
    }
}

impl AppConfig {
    /// Load from an optional file plus environment, then validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("urls")
                .try_parsing(true),
        );

        let settings = builder.build().map_err(|e| ConfigurationError::Load(e.to_string()))?;
        let mut config: Self = settings
            .try_deserialize()
            .map_err(|e| ConfigurationError::Load(e.to_string()))?;

        config.apply_webhook_override(std::env::var(WEBHOOK_ENV_OVERRIDE).ok());
        config.validate()?;

        info!(
            "✅ Configuration loaded: {} URLs, {:?} storage, interval {}s",
            config.urls.len(),
            config.storage.backend,
            config.interval_seconds
        );
        Ok(config)
    }

    /// Replace the webhook with a non-empty override
    pub fn apply_webhook_override(&mut self, value: Option<String>) {
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            self.webhook_url = value.trim().to_string();
        }
    }

    /// Parsed monitoring window, `None` when always on
    pub fn monitoring_window(&self) -> Result<Option<MonitoringWindow>, ConfigurationError> {
        self.monitoring.as_ref().map(MonitoringWindow::parse).transpose()
    }

    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    /// Check every required setting
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.urls.is_empty() {
            return Err(ConfigurationError::missing("urls"));
        }
        for (index, url) in self.urls.iter().enumerate() {
            require_http_url(&format!("urls[{}]", index), url)?;
        }

        if self.webhook_url.trim().is_empty() {
            return Err(ConfigurationError::missing("webhook_url"));
        }
        require_http_url("webhook_url", &self.webhook_url)?;

        self.monitoring_window()?;

        if self.interval_seconds == 0 {
            return Err(ConfigurationError::invalid("interval_seconds", "must be greater than 0"));
        }
        if self.fetch.max_requests_per_second == 0 {
            return Err(ConfigurationError::invalid("fetch.max_requests_per_second", "must be greater than 0"));
        }
        if self.fetch.strategy_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid("fetch.strategy_timeout_seconds", "must be greater than 0"));
        }
        if self.storage.retry_attempts == 0 {
            return Err(ConfigurationError::invalid("storage.retry_attempts", "must be at least 1"));
        }

        ProductExtractor::with_config(&self.extraction)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    fn valid() -> AppConfig {
        AppConfig {
            urls: vec!["https://search.example.jp/search/mall/widget/".to_string()],
            webhook_url: "https://discord.example.com/api/webhooks/1/abc".to_string(),
            ..AppConfig::default()
        }
    }

    #[test]
    fn defaults_follow_constants() {
        let config = AppConfig::default();
        assert_eq!(config.interval_seconds, 1800);
        assert_eq!(config.notification.retry_delays_seconds, vec![5, 15, 60]);
        assert_eq!(config.storage.retry_attempts, 3);
        assert_eq!(config.storage.backend, StorageBackendKind::Sqlite);
    }

    #[test]
    fn validation_requires_urls_and_webhook() {
        assert!(valid().validate().is_ok());

        let no_urls = AppConfig { urls: vec![], ..valid() };
        assert!(matches!(no_urls.validate(), Err(ConfigurationError::Missing { field }) if field == "urls"));

        let no_webhook = AppConfig { webhook_url: String::new(), ..valid() };
        assert!(matches!(no_webhook.validate(), Err(ConfigurationError::Missing { .. })));

        let bad_url = AppConfig { urls: vec!["ftp://x".into()], ..valid() };
        assert!(matches!(bad_url.validate(), Err(ConfigurationError::Invalid { field, .. }) if field == "urls[0]"));
    }

    #[test]
    fn validation_rejects_bad_window() {
        let config = AppConfig {
            monitoring: Some(MonitoringWindowConfig {
                start_time: "25:00".into(),
                end_time: "22:00".into(),
            }),
            ..valid()
        };
        assert!(matches!(config.validate(), Err(ConfigurationError::Invalid { .. })));
    }

    #[test]
    fn validation_rejects_uncompilable_selectors() {
        let mut config = valid();
        config.extraction.prices = vec!["[[".into()];
        assert!(matches!(config.validate(), Err(ConfigurationError::Invalid { field, .. }) if field == "extraction.prices"));
    }

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 30).unwrap()
    }

    #[rstest]
    #[case("09:00", "22:00", at(9, 0), true)]
    #[case("09:00", "22:00", at(22, 0), true)]
    #[case("09:00", "22:00", at(22, 1), false)]
    #[case("09:00", "22:00", at(8, 59), false)]
    #[case("22:00", "06:00", at(23, 30), true)]
    #[case("22:00", "06:00", at(3, 0), true)]
    #[case("22:00", "06:00", at(12, 0), false)]
    fn window_membership(#[case] start: &str, #[case] end: &str, #[case] now: NaiveTime, #[case] inside: bool) {
        let window = MonitoringWindow::parse(&MonitoringWindowConfig {
            start_time: start.into(),
            end_time: end.into(),
        })
        .unwrap();
        assert_eq!(window.contains(now), inside);
    }

    #[test]
    fn webhook_override_ignores_blank() {
        let mut config = valid();
        config.apply_webhook_override(Some("   ".into()));
        assert!(config.webhook_url.contains("discord.example.com"));
        config.apply_webhook_override(Some("https://hooks.example.com/x".into()));
        assert_eq!(config.webhook_url, "https://hooks.example.com/x");
    }

    #[test]
    fn loads_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{
                "urls": ["https://search.example.jp/search/mall/widget/"],
                "webhook_url": "https://discord.example.com/api/webhooks/1/abc",
                "interval_seconds": 600,
                "storage": {{ "backend": "json", "retention_days": 30 }}
            }}"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.interval_seconds, 600);
        assert_eq!(config.storage.backend, StorageBackendKind::Json);
        assert_eq!(config.storage.retention_days, Some(30));
        assert_eq!(config.fetch.marker_selector, "a.category_itemnamelink");
    }

    #[test]
    fn missing_file_is_load_error() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/monitor.json"))).unwrap_err();
        assert!(matches!(err, ConfigurationError::Load(_)));
    }
}
