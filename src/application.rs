//! Application layer module
//!
//! Diff engine, notification pipeline, the run orchestrator and its
//! scheduler. These coordinate the infrastructure components around the
//! domain types.

pub mod diff_engine;
pub mod monitor;
pub mod notification_pipeline;
pub mod scheduler;

pub use diff_engine::DiffEngine;
pub use monitor::{CycleOutcome, CycleReport, Monitor, MonitorComponents, UrlReport};
pub use notification_pipeline::{DeliveryReport, NotificationPipeline};
pub use scheduler::{Scheduler, SchedulerSummary};
