use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default temperature unit label
pub const DEFAULT_UNIT: &str = "C";

/// Rough bounding box around Taiwan and its outlying islands (Kinmen, Matsu, Penghu, Orchid Island).
pub const TAIWAN_LATITUDE: (f64, f64) = (21.5, 26.5);
pub const TAIWAN_LONGITUDE: (f64, f64) = (118.0, 123.0);

/// Offset every forecast time is expressed in (Taiwan, UTC+8).
pub const FORECAST_OFFSET_SECS: i32 = 8 * 3600;

/// Re-express an RFC 3339 timestamp at UTC+8 with whole seconds.
///
/// One instant always yields the same text, so canonical times can be compared
/// and deduplicated as strings. Returns `None` for anything that is not RFC 3339.
pub fn canonical_forecast_time(raw: &str) -> Option<String> {
    let offset = FixedOffset::east_opt(FORECAST_OFFSET_SECS)?;
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| {
            dt.with_timezone(&offset)
                .to_rfc3339_opts(SecondsFormat::Secs, false)
        })
}

/// A normalized weather observation or forecast slot.
///
/// `(location_name, forecast_time)` is the identity of a record once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub location_name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Degrees Celsius
    pub temperature: f64,
    #[serde(default = "default_unit")]
    pub unit: String,
    /// RFC 3339 timestamp; the observation time for station data
    pub forecast_time: String,
    #[serde(default)]
    pub county_name: String,
    #[serde(default)]
    pub town_name: String,
    #[serde(default)]
    pub weather_description: String,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub wind_speed: Option<f64>,
}

fn default_unit() -> String {
    DEFAULT_UNIT.to_string()
}

impl WeatherRecord {
    /// Build a record with the required fields; metadata is left empty.
    pub fn new(
        location_name: impl Into<String>,
        latitude: f64,
        longitude: f64,
        temperature: f64,
        forecast_time: impl Into<String>,
    ) -> Self {
        Self {
            location_name: location_name.into(),
            latitude,
            longitude,
            temperature,
            unit: default_unit(),
            forecast_time: forecast_time.into(),
            county_name: String::new(),
            town_name: String::new(),
            weather_description: String::new(),
            humidity: None,
            wind_speed: None,
        }
    }

    /// Sanity check against Taiwan's bounding region. Not a hard geofence.
    pub fn is_within_taiwan(&self) -> bool {
        (TAIWAN_LATITUDE.0..=TAIWAN_LATITUDE.1).contains(&self.latitude)
            && (TAIWAN_LONGITUDE.0..=TAIWAN_LONGITUDE.1).contains(&self.longitude)
    }

    pub fn band(&self) -> Option<TemperatureBand> {
        TemperatureBand::from_celsius(self.temperature)
    }
}

/// Marker color bands used by the temperature map legend.
///
/// Each band covers `[lower, upper)`; the boundary value belongs to the warmer band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureBand {
    Cold,
    Cool,
    Mild,
    Warm,
    Hot,
    VeryHot,
}

/// Marker color for temperatures that fall in no band (NaN).
pub const UNKNOWN_BAND_HEX: &str = "#808080";

impl TemperatureBand {
    pub const ALL: [TemperatureBand; 6] = [
        Self::Cold,
        Self::Cool,
        Self::Mild,
        Self::Warm,
        Self::Hot,
        Self::VeryHot,
    ];

    pub fn from_celsius(temperature: f64) -> Option<Self> {
        if temperature.is_nan() {
            return None;
        }
        let band = match temperature {
            t if t < 10.0 => Self::Cold,
            t if t < 15.0 => Self::Cool,
            t if t < 20.0 => Self::Mild,
            t if t < 25.0 => Self::Warm,
            t if t < 30.0 => Self::Hot,
            _ => Self::VeryHot,
        };
        Some(band)
    }

    /// Plain color name, as used by marker styling
    pub fn color_name(&self) -> &'static str {
        match self {
            Self::Cold => "blue",
            Self::Cool => "cyan",
            Self::Mild => "green",
            Self::Warm => "yellow",
            Self::Hot => "orange",
            Self::VeryHot => "red",
        }
    }

    pub fn hex(&self) -> &'static str {
        match self {
            Self::Cold => "#0000FF",
            Self::Cool => "#00FFFF",
            Self::Mild => "#00FF00",
            Self::Warm => "#FFFF00",
            Self::Hot => "#FFA500",
            Self::VeryHot => "#FF0000",
        }
    }

    /// Legend label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Cold => "Cold (<10°C)",
            Self::Cool => "Cool (10-15°C)",
            Self::Mild => "Mild (15-20°C)",
            Self::Warm => "Warm (20-25°C)",
            Self::Hot => "Hot (25-30°C)",
            Self::VeryHot => "Very Hot (>30°C)",
        }
    }
}

/// Forecast records grouped by time slot (`YYYY-MM-DD HH:MM`, local time as published).
#[derive(Debug, Clone, Default)]
pub struct ForecastTimeline {
    by_slot: BTreeMap<String, Vec<WeatherRecord>>,
}

impl ForecastTimeline {
    pub fn from_records(records: impl IntoIterator<Item = WeatherRecord>) -> Self {
        let mut by_slot: BTreeMap<String, Vec<WeatherRecord>> = BTreeMap::new();
        for record in records {
            by_slot.entry(slot_key(&record.forecast_time)).or_default().push(record);
        }
        Self { by_slot }
    }

    /// Slot keys in chronological order
    pub fn slots(&self) -> Vec<&str> {
        self.by_slot.keys().map(String::as_str).collect()
    }

    pub fn records_at(&self, slot: &str) -> &[WeatherRecord] {
        self.by_slot.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.by_slot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_slot.is_empty()
    }
}

fn slot_key(forecast_time: &str) -> String {
    match DateTime::parse_from_rfc3339(forecast_time) {
        Ok(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        Err(_) => forecast_time.chars().take(16).collect(),
    }
}
