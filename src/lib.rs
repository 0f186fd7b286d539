//! Listing Monitor - resilient e-commerce listing watcher
//!
//! Periodically re-scrapes listing pages and turns snapshots into new-item,
//! restock, price-change and sold-out alerts.
//!
//! Layers:
//! - [`domain`]: products, persisted state, diff results, error taxonomy
//! - [`infrastructure`]: fetching, extraction, storage, alert channel, config, logging
//! - [`application`]: diff engine, notification pipeline, run orchestration

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{CycleOutcome, DiffEngine, Monitor, NotificationPipeline, Scheduler};
pub use domain::{DiffResult, MonitorError, Product, ProductState};
pub use infrastructure::AppConfig;
