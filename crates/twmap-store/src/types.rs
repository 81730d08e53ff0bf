use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use twmap_weather::WeatherRecord;

/// A persisted `WeatherRecord` with store-assigned identity and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Surrogate key; never changes once assigned
    pub id: i64,
    #[serde(flatten)]
    pub record: WeatherRecord,
    /// First insertion
    pub created_at: DateTime<Utc>,
    /// Most recent upsert of this key
    pub updated_at: DateTime<Utc>,
}

impl std::ops::Deref for StoredRecord {
    type Target = WeatherRecord;

    fn deref(&self) -> &Self::Target {
        &self.record
    }
}

/// Summary of what the store currently holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStatistics {
    pub total_records: u64,
    pub unique_locations: u64,
    pub oldest_forecast_time: Option<String>,
    pub newest_forecast_time: Option<String>,
}
