//! Weather data acquisition for twmap
//!
//! Fetches CWA OpenData payloads with retry and rate limiting, and
//! normalizes them into `WeatherRecord`s.

pub mod fetcher;
pub mod parser;
pub mod retry;
pub mod types;

pub use fetcher::{FetchOutcome, Fetcher, FetcherSettings, RawPayload};
pub use parser::{parse, parse_with_report, MissingField, ParseReport, Rejection};
pub use retry::{RetryPolicy, RetryState};
pub use types::*;

/// Transport failures seen by the Fetcher.
pub type FetchError = twmap_core::NetworkError;
