//! Display-side cache of the latest weather data.
//!
//! A `WeatherSnapshot` belongs to whoever renders the map. It only ever
//! reads from the store; a failed refresh leaves the last known-good records
//! in place and records the failure so the caller can offer a retry.

use chrono::{DateTime, Utc};

use twmap_core::AppError;
use twmap_store::{StoredRecord, WeatherStore};
use twmap_weather::{ForecastTimeline, TemperatureBand};

use crate::refresh::{RefreshOutcome, RefreshPipeline, RefreshStage};

/// Last refresh failure, reduced to what a display needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFailure {
    pub message: &'static str,
    pub detail: String,
    pub retryable: bool,
    pub at: DateTime<Utc>,
}

impl SnapshotFailure {
    fn from_error(stage: Option<RefreshStage>, error: &AppError) -> Self {
        let message = match stage {
            Some(RefreshStage::Parse) => {
                "The weather service returned data in an unexpected format."
            }
            _ => error.user_message(),
        };
        Self {
            message,
            detail: error.to_string(),
            retryable: error.is_retryable(),
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WeatherSnapshot {
    records: Vec<StoredRecord>,
    loaded_at: Option<DateTime<Utc>>,
    last_failure: Option<SnapshotFailure>,
}

impl WeatherSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[StoredRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// When the records were last replaced from the store.
    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }

    pub fn last_failure(&self) -> Option<&SnapshotFailure> {
        self.last_failure.as_ref()
    }

    /// Whether a retry affordance should be shown.
    pub fn can_retry(&self) -> bool {
        self.last_failure.as_ref().is_some_and(|f| f.retryable)
    }

    pub fn find(&self, location_name: &str) -> Option<&StoredRecord> {
        self.records
            .iter()
            .find(|r| r.location_name == location_name)
    }

    /// Number of records in each temperature band, coldest first.
    pub fn band_counts(&self) -> Vec<(TemperatureBand, usize)> {
        TemperatureBand::ALL
            .iter()
            .map(|band| {
                let count = self
                    .records
                    .iter()
                    .filter(|r| r.band() == Some(*band))
                    .count();
                (*band, count)
            })
            .collect()
    }

    pub fn timeline(&self) -> ForecastTimeline {
        ForecastTimeline::from_records(self.records.iter().map(|r| r.record.clone()))
    }

    /// Replace the records with the store's latest-per-location view.
    ///
    /// On a query failure the previous records are kept.
    pub fn reload(&mut self, store: &WeatherStore) -> &Self {
        match store.get_latest() {
            Ok(records) => self.replace(records),
            Err(e) => self.fail(None, &AppError::Database(e)),
        }
        self
    }

    /// Async counterpart of `reload`, reading through the pipeline.
    pub async fn load(&mut self, pipeline: &RefreshPipeline) -> &Self {
        match pipeline.latest().await {
            Ok(records) => self.replace(records),
            Err(e) => self.fail(Some(RefreshStage::Store), &e),
        }
        self
    }

    /// Run a refresh and then reload from the store.
    pub async fn refresh(&mut self, pipeline: &RefreshPipeline) -> RefreshOutcome {
        let outcome = pipeline.fetch_and_store().await;

        match &outcome {
            RefreshOutcome::Refreshed(_) => {
                self.load(pipeline).await;
            }
            RefreshOutcome::Failed(failure) => self.fail(Some(failure.stage), &failure.error),
        }

        outcome
    }

    fn replace(&mut self, records: Vec<StoredRecord>) {
        tracing::debug!("Snapshot now holds {} record(s)", records.len());
        self.records = records;
        self.loaded_at = Some(Utc::now());
        self.last_failure = None;
    }

    fn fail(&mut self, stage: Option<RefreshStage>, error: &AppError) {
        tracing::warn!(
            "Keeping {} cached record(s) after failure: {}",
            self.records.len(),
            error
        );
        self.last_failure = Some(SnapshotFailure::from_error(stage, error));
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use twmap_weather::WeatherRecord;

    fn seeded_store() -> WeatherStore {
        let store = WeatherStore::open_in_memory().unwrap();
        store
            .save(&[
                WeatherRecord::new("玉山", 23.49, 120.96, 2.1, "2024-01-15T14:00:00+08:00"),
                WeatherRecord::new("臺北", 25.04, 121.51, 24.9, "2024-01-15T14:00:00+08:00"),
                WeatherRecord::new("高雄", 22.63, 120.30, 25.0, "2024-01-15T14:00:00+08:00"),
            ])
            .unwrap();
        store
    }

    #[test]
    fn test_new_snapshot_is_empty() {
        let snapshot = WeatherSnapshot::new();
        assert!(snapshot.is_empty());
        assert!(snapshot.loaded_at().is_none());
        assert!(!snapshot.can_retry());
    }

    #[test]
    fn test_reload_populates_from_store() {
        let store = seeded_store();
        let mut snapshot = WeatherSnapshot::new();
        snapshot.reload(&store);

        assert_eq!(snapshot.records().len(), 3);
        assert!(snapshot.loaded_at().is_some());
        assert_eq!(snapshot.find("臺北").map(|r| r.temperature), Some(24.9));
        assert!(snapshot.find("花蓮").is_none());
    }

    #[test]
    fn test_band_counts() {
        let store = seeded_store();
        let mut snapshot = WeatherSnapshot::new();
        snapshot.reload(&store);

        let counts = snapshot.band_counts();
        assert_eq!(counts.len(), TemperatureBand::ALL.len());
        assert_eq!(counts[0], (TemperatureBand::Cold, 1));
        assert_eq!(counts[3], (TemperatureBand::Warm, 1));
        assert_eq!(counts[4], (TemperatureBand::Hot, 1));
        assert_eq!(counts[5], (TemperatureBand::VeryHot, 0));
    }

    #[test]
    fn test_failure_keeps_records() {
        let store = seeded_store();
        let mut snapshot = WeatherSnapshot::new();
        snapshot.reload(&store);

        snapshot.fail(
            Some(RefreshStage::Fetch),
            &AppError::Network(twmap_core::NetworkError::Timeout),
        );

        assert_eq!(snapshot.records().len(), 3);
        assert!(snapshot.can_retry());
        assert!(!snapshot.last_failure().unwrap().message.is_empty());

        snapshot.reload(&store);
        assert!(snapshot.last_failure().is_none());
    }

    #[test]
    fn test_timeline_groups_by_slot() {
        let store = seeded_store();
        let mut snapshot = WeatherSnapshot::new();
        snapshot.reload(&store);

        let timeline = snapshot.timeline();
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline.records_at("2024-01-15 14:00").len(), 3);
    }
}
