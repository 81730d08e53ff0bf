//! Persistent storage for weather records.

pub mod store;
pub mod types;

pub use store::{StoreResult, WeatherStore, DEFAULT_BUSY_TIMEOUT, DEFAULT_RETENTION_DAYS};
pub use types::{StoreStatistics, StoredRecord};

/// Failures reported by store operations. `Busy` is the only retryable kind.
pub type StoreError = twmap_core::DatabaseError;
