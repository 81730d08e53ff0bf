//! End-to-end refresh tests: wiremock endpoint, real parser, on-disk store.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use twmap_services::{RefreshOutcome, RefreshPipeline, RefreshStage, WeatherSnapshot};
use twmap_store::WeatherStore;
use twmap_weather::{Fetcher, FetcherSettings, RetryPolicy};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DATASET_PATH: &str = "/O-A0003-001";

fn station(name: &str, lat: &str, lon: &str, temperature: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "StationName": name,
        "ObsTime": { "DateTime": "2024-01-15T14:00:00+08:00" },
        "GeoInfo": {
            "Coordinates": [{
                "CoordinateName": "WGS84",
                "StationLatitude": lat,
                "StationLongitude": lon
            }],
            "CountyName": "",
            "TownName": ""
        },
        "WeatherElement": { "AirTemperature": temperature }
    })
}

fn body(stations: Vec<serde_json::Value>) -> serde_json::Value {
    serde_json::json!({ "success": "true", "records": { "Station": stations } })
}

fn pipeline(server: &MockServer, dir: &TempDir, min_interval: Duration) -> RefreshPipeline {
    let settings = FetcherSettings {
        timeout: Duration::from_millis(200),
        min_interval,
        retry: RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(100)),
    };
    let fetcher = Fetcher::new(format!("{}{}", server.uri(), DATASET_PATH), None, settings).unwrap();
    let store = WeatherStore::open(dir.path().join("weather.db"), Duration::from_secs(5)).unwrap();
    RefreshPipeline::new(Arc::new(fetcher), Arc::new(store))
}

#[tokio::test]
async fn test_fetch_and_store_saves_valid_records() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path(DATASET_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(body(vec![
            station("臺北", "25.0377", "121.5149", serde_json::json!(19.6)),
            station("淡水", "", "121.4489", serde_json::json!(18.2)),
            station("基隆", "25.1333", "121.7405", serde_json::json!(-99)),
        ])))
        .mount(&server)
        .await;

    let pipeline = pipeline(&server, &dir, Duration::from_secs(60));
    let outcome = pipeline.fetch_and_store().await;

    let summary = outcome.summary().expect("refresh should succeed");
    assert_eq!(summary.parsed, 1);
    assert_eq!(summary.rejected, 2);
    assert_eq!(summary.saved, 1);

    let rows = pipeline.store().get_by_location("臺北").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].temperature, 19.6);
}

#[tokio::test]
async fn test_repeated_refresh_is_idempotent() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path(DATASET_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(body(vec![station(
            "臺北",
            "25.0377",
            "121.5149",
            serde_json::json!(19.6),
        )])))
        .mount(&server)
        .await;

    let pipeline = pipeline(&server, &dir, Duration::ZERO);
    assert!(pipeline.fetch_and_store().await.is_refreshed());
    assert!(pipeline.fetch_and_store().await.is_refreshed());

    assert_eq!(pipeline.store().count().unwrap(), 1);
}

#[tokio::test]
async fn test_unavailable_source_reports_retryable_failure() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path(DATASET_PATH))
        .respond_with(ResponseTemplate::new(503))
        .expect(4)
        .mount(&server)
        .await;

    let pipeline = pipeline(&server, &dir, Duration::from_secs(60));

    match pipeline.fetch_and_store().await {
        RefreshOutcome::Failed(failure) => {
            assert_eq!(failure.stage, RefreshStage::Fetch);
            assert!(failure.is_retryable());
        }
        RefreshOutcome::Refreshed(_) => panic!("503 should fail the refresh"),
    }
    assert_eq!(pipeline.store().count().unwrap(), 0);
}

#[tokio::test]
async fn test_malformed_payload_is_a_parse_failure() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path(DATASET_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("Service temporarily unavailable"))
        .mount(&server)
        .await;

    let pipeline = pipeline(&server, &dir, Duration::from_secs(60));
    let outcome = pipeline.fetch_and_store().await;

    let failure = outcome.failure().expect("malformed payload should fail");
    assert_eq!(failure.stage, RefreshStage::Parse);
    assert!(!failure.is_retryable());
}

#[tokio::test]
async fn test_snapshot_keeps_known_good_data_on_failure() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path(DATASET_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(body(vec![
            station("臺北", "25.0377", "121.5149", serde_json::json!(19.6)),
            station("高雄", "22.6273", "120.3014", serde_json::json!(25.0)),
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(DATASET_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let pipeline = pipeline(&server, &dir, Duration::ZERO);
    let mut snapshot = WeatherSnapshot::new();

    assert!(snapshot.refresh(&pipeline).await.is_refreshed());
    assert_eq!(snapshot.records().len(), 2);
    assert!(snapshot.last_failure().is_none());

    let outcome = snapshot.refresh(&pipeline).await;
    assert!(!outcome.is_refreshed());
    assert_eq!(snapshot.records().len(), 2);
    assert!(snapshot.can_retry());
    assert_eq!(
        snapshot.find("高雄").and_then(|r| r.band()).map(|b| b.color_name()),
        Some("orange")
    );
}

#[tokio::test]
async fn test_cleanup_uses_configured_retention() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path(DATASET_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(body(vec![station(
            "臺北",
            "25.0377",
            "121.5149",
            serde_json::json!(19.6),
        )])))
        .mount(&server)
        .await;

    let pipeline = pipeline(&server, &dir, Duration::from_secs(60));
    pipeline.fetch_and_store().await;

    assert_eq!(pipeline.cleanup().await.unwrap(), 0);
    assert_eq!(pipeline.clone().with_retention_days(0).cleanup().await.unwrap(), 1);
}
