//! Domain module - Core entities of listing monitoring
//!
//! Products observed in a snapshot, their persisted state, the diff result of
//! one run and the error taxonomy shared by every layer.

pub mod diff;
pub mod errors;
pub mod product;

pub use diff::{DiffResult, PriceChange};
pub use errors::{
    ConfigurationError, ExtractError, FailureCategory, FetchError, MonitorError, NotificationError, PageKind,
    StorageError, StrategyAttempt,
};
pub use product::{MAX_PRICE, Observation, Product, ProductState, clamp_price, derive_identity};
