//! Normalizes CWA OpenData payloads (JSON or XML) into `WeatherRecord`s.
//!
//! Two dataset shapes are understood:
//! - station observations (`records.Station[]`)
//! - the weekly county forecast (`records.Locations[].Location[]`)
//!
//! Entries without coordinates, temperature, name or time are dropped and
//! reported; a payload that cannot be read at all yields no records.

use std::fmt;

use serde::de::{self, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;

use crate::types::{canonical_forecast_time, WeatherRecord, DEFAULT_UNIT};

/// How much of an unreadable payload ends up in the error log.
pub const SNIPPET_CHARS: usize = 200;

const PREFERRED_DATUM: &str = "WGS84";
const AVERAGE_TEMPERATURE: &str = "平均溫度";
const WEATHER_PHENOMENON: &str = "天氣現象";

/// Required field whose absence drops an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingField {
    LocationName,
    Coordinates,
    Temperature,
    ForecastTime,
}

impl fmt::Display for MissingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LocationName => "location_name",
            Self::Coordinates => "latitude/longitude",
            Self::Temperature => "temperature",
            Self::ForecastTime => "forecast_time",
        };
        f.write_str(name)
    }
}

/// An entry dropped during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub location_name: String,
    pub field: MissingField,
}

/// Result of a parse: kept records plus dropped entries.
#[derive(Debug, Clone, Default)]
pub struct ParseReport {
    pub records: Vec<WeatherRecord>,
    pub rejected: Vec<Rejection>,
    /// Set when the payload as a whole could not be read
    pub format_error: Option<String>,
}

impl ParseReport {
    fn format_error(message: String, raw: &str) -> Self {
        tracing::error!(
            "Unreadable weather payload: {} (input starts with: {:?})",
            message,
            snippet(raw)
        );
        Self {
            format_error: Some(message),
            ..Self::default()
        }
    }

    fn reject(&mut self, location_name: Option<&str>, field: MissingField) {
        let location_name = location_name.unwrap_or("<unknown>").to_string();
        tracing::warn!("Dropping entry '{}': missing {}", location_name, field);
        self.rejected.push(Rejection {
            location_name,
            field,
        });
    }
}

/// Parse a raw payload into validated records. Never fails.
pub fn parse(raw: &str) -> Vec<WeatherRecord> {
    parse_with_report(raw).records
}

pub fn parse_with_report(raw: &str) -> ParseReport {
    let trimmed = raw.trim_start_matches('\u{feff}').trim_start();

    let envelope = match trimmed.chars().next() {
        Some('{') => match serde_json::from_str::<JsonEnvelope>(trimmed) {
            Ok(envelope) => {
                if envelope.is_unsuccessful() {
                    return ParseReport::format_error(
                        "provider reported success=false".to_string(),
                        raw,
                    );
                }
                envelope.into_entries()
            }
            Err(e) => return ParseReport::format_error(format!("invalid JSON: {}", e), raw),
        },
        Some('<') => match quick_xml::de::from_str::<XmlEnvelope>(trimmed) {
            Ok(envelope) => envelope.into_entries(),
            Err(e) => return ParseReport::format_error(format!("invalid XML: {}", e), raw),
        },
        Some(_) => {
            return ParseReport::format_error("payload is neither JSON nor XML".to_string(), raw)
        }
        None => return ParseReport::format_error("empty payload".to_string(), raw),
    };

    let mut report = ParseReport::default();
    for station in envelope.stations {
        normalize_station(station, &mut report);
    }
    for location in envelope.locations {
        normalize_forecast_location(location, &mut report);
    }

    let outside = report.records.iter().filter(|r| !r.is_within_taiwan()).count();
    if outside > 0 {
        tracing::warn!("{} record(s) lie outside Taiwan's bounding region", outside);
    }

    tracing::debug!(
        "Parsed {} record(s), dropped {}",
        report.records.len(),
        report.rejected.len()
    );
    report
}

fn snippet(raw: &str) -> String {
    raw.chars().take(SNIPPET_CHARS).collect()
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

fn normalize_station(station: Station, report: &mut ParseReport) {
    let Some(name) = station.station_name else {
        report.reject(None, MissingField::LocationName);
        return;
    };

    let Some((latitude, longitude)) = station.geo_info.coordinates() else {
        report.reject(Some(&name), MissingField::Coordinates);
        return;
    };

    let Some(temperature) = station.weather_element.air_temperature else {
        report.reject(Some(&name), MissingField::Temperature);
        return;
    };

    let Some(forecast_time) = station
        .obs_time
        .and_then(|t| t.date_time)
        .and_then(|t| canonical_forecast_time(&t))
    else {
        report.reject(Some(&name), MissingField::ForecastTime);
        return;
    };

    report.records.push(WeatherRecord {
        location_name: name,
        latitude,
        longitude,
        temperature,
        unit: DEFAULT_UNIT.to_string(),
        forecast_time,
        county_name: station.geo_info.county_name.unwrap_or_default(),
        town_name: station.geo_info.town_name.unwrap_or_default(),
        weather_description: station.weather_element.weather.unwrap_or_default(),
        humidity: station.weather_element.relative_humidity,
        wind_speed: station.weather_element.wind_speed,
    });
}

fn normalize_forecast_location(location: ForecastLocation, report: &mut ParseReport) {
    let Some(name) = location.location_name.as_deref() else {
        report.reject(None, MissingField::LocationName);
        return;
    };

    let (Some(latitude), Some(longitude)) = (location.latitude, location.longitude) else {
        report.reject(Some(name), MissingField::Coordinates);
        return;
    };

    let Some(temperatures) = location.element(AVERAGE_TEMPERATURE) else {
        report.reject(Some(name), MissingField::Temperature);
        return;
    };
    let descriptions = location.element(WEATHER_PHENOMENON);

    for (index, slot) in temperatures.time.iter().enumerate() {
        let Some(forecast_time) = slot.start_time.as_deref().and_then(canonical_forecast_time) else {
            report.reject(Some(name), MissingField::ForecastTime);
            continue;
        };

        let Some(temperature) = slot.element_value.iter().find_map(|v| v.temperature) else {
            report.reject(Some(name), MissingField::Temperature);
            continue;
        };

        let weather_description = descriptions
            .and_then(|d| d.time.get(index))
            .and_then(|t| t.element_value.iter().find_map(|v| v.weather.clone()))
            .unwrap_or_default();

        report.records.push(WeatherRecord {
            location_name: name.to_string(),
            latitude,
            longitude,
            temperature,
            unit: DEFAULT_UNIT.to_string(),
            forecast_time,
            county_name: name.to_string(),
            town_name: String::new(),
            weather_description,
            humidity: None,
            wind_speed: None,
        });
    }
}


/// Numeric coercion: blanks, CWA sentinels and non-numeric text are missing.
fn coerce_number(value: f64) -> Option<f64> {
    if !value.is_finite() || value == -99.0 || value == -999.0 {
        None
    } else {
        Some(value)
    }
}

fn coerce_text_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().and_then(coerce_number)
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Entries {
    stations: Vec<Station>,
    locations: Vec<ForecastLocation>,
}

#[derive(Debug, Deserialize)]
struct JsonEnvelope {
    #[serde(default, deserialize_with = "lenient_text")]
    success: Option<String>,
    #[serde(default)]
    records: Option<JsonRecords>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonRecords {
    #[serde(rename = "Station")]
    station: Vec<serde_json::Value>,
    #[serde(rename = "Locations")]
    locations: Vec<JsonLocations>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonLocations {
    #[serde(rename = "Location")]
    location: Vec<serde_json::Value>,
}

impl JsonEnvelope {
    fn is_unsuccessful(&self) -> bool {
        self.success.as_deref().is_some_and(|s| s.eq_ignore_ascii_case("false"))
    }

    /// JSON entries are decoded one by one so a single odd entry can't sink the batch.
    fn into_entries(self) -> Entries {
        let records = self.records.unwrap_or_default();
        let mut entries = Entries::default();

        for value in records.station {
            match serde_json::from_value::<Station>(value) {
                Ok(station) => entries.stations.push(station),
                Err(e) => tracing::warn!("Skipping malformed station entry: {}", e),
            }
        }

        for value in records.locations.into_iter().flat_map(|l| l.location) {
            match serde_json::from_value::<ForecastLocation>(value) {
                Ok(location) => entries.locations.push(location),
                Err(e) => tracing::warn!("Skipping malformed forecast entry: {}", e),
            }
        }

        entries
    }
}

/// XML documents carry the same elements under `<records>` or `<dataset>`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct XmlEnvelope {
    #[serde(alias = "dataset")]
    records: XmlRecords,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct XmlRecords {
    #[serde(rename = "Station")]
    station: Vec<Station>,
    #[serde(rename = "Locations")]
    locations: Vec<XmlLocations>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct XmlLocations {
    #[serde(rename = "Location")]
    location: Vec<ForecastLocation>,
}

impl XmlEnvelope {
    fn into_entries(self) -> Entries {
        Entries {
            stations: self.records.station,
            locations: self
                .records
                .locations
                .into_iter()
                .flat_map(|l| l.location)
                .collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Station {
    #[serde(rename = "StationName", deserialize_with = "lenient_text")]
    station_name: Option<String>,
    #[serde(rename = "ObsTime")]
    obs_time: Option<ObsTime>,
    #[serde(rename = "GeoInfo")]
    geo_info: GeoInfo,
    #[serde(rename = "WeatherElement")]
    weather_element: StationElements,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ObsTime {
    #[serde(rename = "DateTime", deserialize_with = "lenient_text")]
    date_time: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GeoInfo {
    #[serde(rename = "Coordinates")]
    coordinates: Vec<Coordinate>,
    #[serde(rename = "CountyName", deserialize_with = "lenient_text")]
    county_name: Option<String>,
    #[serde(rename = "TownName", deserialize_with = "lenient_text")]
    town_name: Option<String>,
}

impl GeoInfo {
    /// WGS84 coordinates when published, otherwise the first datum listed.
    fn coordinates(&self) -> Option<(f64, f64)> {
        let preferred = self
            .coordinates
            .iter()
            .find(|c| c.coordinate_name.as_deref() == Some(PREFERRED_DATUM));

        preferred
            .and_then(Coordinate::pair)
            .or_else(|| self.coordinates.first().and_then(Coordinate::pair))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Coordinate {
    #[serde(rename = "CoordinateName", deserialize_with = "lenient_text")]
    coordinate_name: Option<String>,
    #[serde(rename = "StationLatitude", deserialize_with = "lenient_number")]
    station_latitude: Option<f64>,
    #[serde(rename = "StationLongitude", deserialize_with = "lenient_number")]
    station_longitude: Option<f64>,
}

impl Coordinate {
    fn pair(&self) -> Option<(f64, f64)> {
        Some((self.station_latitude?, self.station_longitude?))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StationElements {
    #[serde(rename = "AirTemperature", deserialize_with = "lenient_number")]
    air_temperature: Option<f64>,
    #[serde(rename = "RelativeHumidity", deserialize_with = "lenient_number")]
    relative_humidity: Option<f64>,
    #[serde(rename = "WindSpeed", deserialize_with = "lenient_number")]
    wind_speed: Option<f64>,
    #[serde(rename = "Weather", deserialize_with = "lenient_text")]
    weather: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ForecastLocation {
    #[serde(rename = "LocationName", deserialize_with = "lenient_text")]
    location_name: Option<String>,
    #[serde(rename = "Latitude", deserialize_with = "lenient_number")]
    latitude: Option<f64>,
    #[serde(rename = "Longitude", deserialize_with = "lenient_number")]
    longitude: Option<f64>,
    #[serde(rename = "WeatherElement")]
    weather_element: Vec<ForecastElement>,
}

impl ForecastLocation {
    fn element(&self, name: &str) -> Option<&ForecastElement> {
        self.weather_element
            .iter()
            .find(|e| e.element_name.as_deref() == Some(name))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ForecastElement {
    #[serde(rename = "ElementName", deserialize_with = "lenient_text")]
    element_name: Option<String>,
    #[serde(rename = "Time")]
    time: Vec<ForecastSlot>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ForecastSlot {
    #[serde(rename = "StartTime", alias = "DataTime", deserialize_with = "lenient_text")]
    start_time: Option<String>,
    #[serde(rename = "ElementValue")]
    element_value: Vec<ElementValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ElementValue {
    #[serde(rename = "Temperature", deserialize_with = "lenient_number")]
    temperature: Option<f64>,
    #[serde(rename = "Weather", deserialize_with = "lenient_text")]
    weather: Option<String>,
}

// ---------------------------------------------------------------------------
// Lenient scalars: the provider mixes numbers, numeric strings and blanks.
// ---------------------------------------------------------------------------

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(NumberVisitor)
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(TextVisitor)
}

/// quick-xml hands text-only elements to `deserialize_any` as `{"$text": ..}`.
fn is_text_key(key: &str) -> bool {
    key == "$text" || key == "$value"
}

struct NumberField(Option<f64>);

impl<'de> Deserialize<'de> for NumberField {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        lenient_number(deserializer).map(NumberField)
    }
}

struct TextField(Option<String>);

impl<'de> Deserialize<'de> for TextField {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        lenient_text(deserializer).map(TextField)
    }
}

struct NumberVisitor;

impl<'de> Visitor<'de> for NumberVisitor {
    type Value = Option<f64>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a number or numeric string")
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Ok(coerce_number(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(coerce_number(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(coerce_number(v as f64))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(coerce_text_number(v))
    }

    fn visit_bool<E: de::Error>(self, _: bool) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
        d.deserialize_any(self)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(None)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut value = None;
        while let Some(key) = map.next_key::<String>()? {
            if is_text_key(&key) {
                value = map.next_value::<NumberField>()?.0;
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(value)
    }
}

struct TextVisitor;

impl<'de> Visitor<'de> for TextVisitor {
    type Value = Option<String>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string or scalar")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        let trimmed = v.trim();
        Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Ok(Some(v.to_string()))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Some(v.to_string()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Some(v.to_string()))
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
        Ok(Some(v.to_string()))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
        d.deserialize_any(self)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(None)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut value = None;
        while let Some(key) = map.next_key::<String>()? {
            if is_text_key(&key) {
                value = map.next_value::<TextField>()?.0;
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use serde_json::json;

    fn station(
        name: &str,
        lat: serde_json::Value,
        lon: serde_json::Value,
        temp: serde_json::Value,
    ) -> serde_json::Value {
        json!({
            "StationName": name,
            "StationId": "C0A520",
            "ObsTime": { "DateTime": "2024-01-15T14:00:00+08:00" },
            "GeoInfo": {
                "Coordinates": [
                    { "CoordinateName": "WGS84", "StationLatitude": lat, "StationLongitude": lon }
                ],
                "CountyName": "新北市",
                "TownName": "樹林區"
            },
            "WeatherElement": {
                "Weather": "多雲",
                "AirTemperature": temp,
                "RelativeHumidity": 72,
                "WindSpeed": "1.8"
            }
        })
    }

    fn observation_payload(stations: Vec<serde_json::Value>) -> String {
        json!({ "success": "true", "records": { "Station": stations } }).to_string()
    }

    #[test]
    fn test_parse_station_observation() {
        let raw = observation_payload(vec![station("山佳", json!("24.97"), json!(121.39), json!(18.3))]);
        let records = parse(&raw);

        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.location_name, "山佳");
        assert_eq!(r.latitude, 24.97);
        assert_eq!(r.longitude, 121.39);
        assert_eq!(r.temperature, 18.3);
        assert_eq!(r.unit, "C");
        assert_eq!(r.forecast_time, "2024-01-15T14:00:00+08:00");
        assert_eq!(r.county_name, "新北市");
        assert_eq!(r.weather_description, "多雲");
        assert_eq!(r.humidity, Some(72.0));
        assert_eq!(r.wind_speed, Some(1.8));
    }

    #[test]
    fn test_missing_coordinates_are_dropped_and_counted() {
        let raw = observation_payload(vec![
            station("A", json!(25.0), json!(121.5), json!(20.0)),
            station("B", json!(null), json!(121.5), json!(20.0)),
            station("C", json!(25.0), json!(""), json!(20.0)),
            station("D", json!("n/a"), json!("n/a"), json!(20.0)),
        ]);

        let report = parse_with_report(&raw);
        assert_eq!(report.records.len(), 1);
        let coordinate_rejections = report
            .rejected
            .iter()
            .filter(|r| r.field == MissingField::Coordinates)
            .count();
        assert_eq!(coordinate_rejections, 3);
        assert!(report.rejected.iter().any(|r| r.location_name == "C"));
    }

    #[test]
    fn test_missing_temperature_is_dropped_and_counted() {
        let raw = observation_payload(vec![
            station("A", json!(25.0), json!(121.5), json!(20.0)),
            station("B", json!(25.0), json!(121.5), json!("-99")),
            station("C", json!(25.0), json!(121.5), json!(-99)),
            station("D", json!(25.0), json!(121.5), json!(null)),
        ]);

        let report = parse_with_report(&raw);
        assert_eq!(report.records.len(), 1);
        assert_eq!(
            report.rejected.iter().filter(|r| r.field == MissingField::Temperature).count(),
            3
        );
    }

    #[test]
    fn test_prefers_wgs84_then_falls_back() {
        let mut entry = station("F", json!(0), json!(0), json!(21.0));
        entry["GeoInfo"]["Coordinates"] = json!([
            { "CoordinateName": "TWD67", "StationLatitude": 24.99, "StationLongitude": 121.41 },
            { "CoordinateName": "WGS84", "StationLatitude": 25.01, "StationLongitude": 121.42 }
        ]);
        let records = parse(&observation_payload(vec![entry.clone()]));
        assert_eq!(records[0].latitude, 25.01);

        entry["GeoInfo"]["Coordinates"][1]["StationLatitude"] = json!("");
        let records = parse(&observation_payload(vec![entry]));
        assert_eq!(records[0].latitude, 24.99);
    }

    #[test]
    fn test_falls_back_to_first_datum_without_wgs84() {
        let mut entry = station("E", json!(0), json!(0), json!(21.0));
        entry["GeoInfo"]["Coordinates"] = json!([
            { "CoordinateName": "TWD97", "StationLatitude": "23.5", "StationLongitude": "121.0" }
        ]);
        let records = parse(&observation_payload(vec![entry]));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].latitude, 23.5);
    }

    #[test]
    fn test_malformed_json_yields_empty() {
        let report = parse_with_report("{\"success\": \"true\", \"records\": ");
        assert!(report.records.is_empty());
        assert!(report.format_error.unwrap().contains("invalid JSON"));
    }

    #[test]
    fn test_unsuccessful_response_yields_empty() {
        let raw = json!({ "success": "false", "records": { "Station": [] } }).to_string();
        let report = parse_with_report(&raw);
        assert!(report.records.is_empty());
        assert!(report.format_error.is_some());
    }

    #[test]
    fn test_garbage_and_empty_input() {
        assert!(parse("").is_empty());
        assert!(parse("   \n").is_empty());
        assert!(parse("Service Temporarily Unavailable").is_empty());
    }

    #[test]
    fn test_snippet_is_bounded() {
        let long = "x".repeat(10_000);
        assert_eq!(snippet(&long).len(), SNIPPET_CHARS);
        assert_eq!(snippet("短"), "短");
    }

    #[test]
    fn test_malformed_station_does_not_sink_batch() {
        let raw = observation_payload(vec![
            json!("not an object"),
            station("ok", json!(25.0), json!(121.5), json!(20.0)),
        ]);
        let records = parse(&raw);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].location_name, "ok");
    }

    #[test]
    fn test_bad_observation_time_is_dropped() {
        let mut entry = station("T", json!(25.0), json!(121.5), json!(20.0));
        entry["ObsTime"]["DateTime"] = json!("yesterday");
        let report = parse_with_report(&observation_payload(vec![entry]));
        assert!(report.records.is_empty());
        assert_eq!(report.rejected[0].field, MissingField::ForecastTime);
    }

    #[test]
    fn test_observation_time_is_expressed_at_utc_plus_8() {
        let mut utc = station("U", json!(25.0), json!(121.5), json!(20.0));
        utc["ObsTime"]["DateTime"] = json!("2024-01-15T02:00:00Z");
        let mut fractional = station("F", json!(25.0), json!(121.5), json!(20.0));
        fractional["ObsTime"]["DateTime"] = json!("2024-01-15T10:00:00.000+08:00");

        let records = parse(&observation_payload(vec![utc, fractional]));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].forecast_time, "2024-01-15T10:00:00+08:00");
        assert_eq!(records[1].forecast_time, "2024-01-15T10:00:00+08:00");
    }

    #[test]
    fn test_parse_weekly_forecast() {
        let raw = json!({
            "success": "true",
            "records": {
                "Locations": [{
                    "DatasetDescription": "臺灣各縣市鄉鎮未來1週天氣預報",
                    "Location": [{
                        "LocationName": "臺北市",
                        "Geocode": "63",
                        "Latitude": "25.03",
                        "Longitude": "121.56",
                        "WeatherElement": [
                            {
                                "ElementName": "平均溫度",
                                "Time": [
                                    { "StartTime": "2024-01-15T06:00:00+08:00", "EndTime": "2024-01-15T18:00:00+08:00",
                                      "ElementValue": [{ "Temperature": "19" }] },
                                    { "StartTime": "2024-01-15T18:00:00+08:00", "EndTime": "2024-01-16T06:00:00+08:00",
                                      "ElementValue": [{ "Temperature": "" }] }
                                ]
                            },
                            {
                                "ElementName": "天氣現象",
                                "Time": [
                                    { "StartTime": "2024-01-15T06:00:00+08:00",
                                      "ElementValue": [{ "Weather": "多雲時陰", "WeatherCode": "05" }] }
                                ]
                            }
                        ]
                    }, {
                        "LocationName": "連江縣",
                        "WeatherElement": []
                    }]
                }]
            }
        })
        .to_string();

        let report = parse_with_report(&raw);
        assert_eq!(report.records.len(), 1);
        let r = &report.records[0];
        assert_eq!(r.location_name, "臺北市");
        assert_eq!(r.temperature, 19.0);
        assert_eq!(r.forecast_time, "2024-01-15T06:00:00+08:00");
        assert_eq!(r.weather_description, "多雲時陰");

        assert_eq!(report.rejected.len(), 2);
        assert!(report
            .rejected
            .iter()
            .any(|r| r.location_name == "連江縣" && r.field == MissingField::Coordinates));
        assert!(report
            .rejected
            .iter()
            .any(|r| r.location_name == "臺北市" && r.field == MissingField::Temperature));
    }

    #[test]
    fn test_parse_station_xml() {
        let raw = r#"<?xml version="1.0" encoding="UTF-8"?>
<cwaopendata xmlns="urn:cwa:gov:tw:cwacommon:0.1">
  <identifier>abc</identifier>
  <dataset>
    <Station>
      <StationName>板橋</StationName>
      <ObsTime><DateTime>2024-01-15T14:00:00+08:00</DateTime></ObsTime>
      <GeoInfo>
        <Coordinates>
          <CoordinateName>TWD67</CoordinateName>
          <StationLatitude>25.00</StationLatitude>
          <StationLongitude>121.43</StationLongitude>
        </Coordinates>
        <Coordinates>
          <CoordinateName>WGS84</CoordinateName>
          <StationLatitude>25.01</StationLatitude>
          <StationLongitude>121.44</StationLongitude>
        </Coordinates>
        <CountyName>新北市</CountyName>
      </GeoInfo>
      <WeatherElement>
        <Weather>晴</Weather>
        <AirTemperature>21.5</AirTemperature>
      </WeatherElement>
    </Station>
    <Station>
      <StationName>無溫度</StationName>
      <ObsTime><DateTime>2024-01-15T14:00:00+08:00</DateTime></ObsTime>
      <GeoInfo>
        <Coordinates>
          <CoordinateName>WGS84</CoordinateName>
          <StationLatitude>24.00</StationLatitude>
          <StationLongitude>121.00</StationLongitude>
        </Coordinates>
      </GeoInfo>
      <WeatherElement>
        <AirTemperature>-99</AirTemperature>
      </WeatherElement>
    </Station>
  </dataset>
</cwaopendata>"#;

        let report = parse_with_report(raw);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].location_name, "板橋");
        assert_eq!(report.records[0].latitude, 25.01);
        assert_eq!(report.records[0].temperature, 21.5);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].field, MissingField::Temperature);
    }

    #[test]
    fn test_malformed_xml_yields_empty() {
        let report = parse_with_report("<cwaopendata><dataset><Station>");
        assert!(report.records.is_empty());
        assert!(report.format_error.is_some());
    }
}
