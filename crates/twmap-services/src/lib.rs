//! Consumer-facing services: the refresh pipeline and the display snapshot.

pub mod refresh;
pub mod snapshot;

pub use refresh::{RefreshFailure, RefreshOutcome, RefreshPipeline, RefreshStage, RefreshSummary};
pub use snapshot::{SnapshotFailure, WeatherSnapshot};
