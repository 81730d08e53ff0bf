//! CWA OpenData fetcher with retry, a minimum fetch interval, and single-flight.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::instrument;

use twmap_core::{Config, CwaDataset, NetworkError, ReqwestErrorExt};

use crate::retry::{with_retry, RetryPolicy};

const USER_AGENT: &str = concat!("twmap/", env!("CARGO_PKG_VERSION"));
/// Error bodies longer than this are truncated before logging.
const ERROR_BODY_LIMIT: usize = 200;

/// Raw response body of a successful fetch.
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub status: u16,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

/// Result of a fetch. Never an error: exhausted retries become `Unavailable`.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Fetched(Arc<RawPayload>),
    Unavailable {
        cause: NetworkError,
        at: DateTime<Utc>,
    },
}

impl FetchOutcome {
    pub fn payload(&self) -> Option<&RawPayload> {
        match self {
            Self::Fetched(payload) => Some(payload),
            Self::Unavailable { .. } => None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

#[derive(Debug, Clone)]
pub struct FetcherSettings {
    pub timeout: Duration,
    pub min_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for FetcherSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            min_interval: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Default)]
struct FetchState {
    last: Option<(Instant, FetchOutcome)>,
}

/// Fetches the raw payload of one CWA dataset.
///
/// The state lock is held for the whole fetch, so concurrent callers queue
/// behind the in-flight request and then see its outcome as "recent".
#[derive(Debug)]
pub struct Fetcher {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    settings: FetcherSettings,
    state: Mutex<FetchState>,
    requests_sent: AtomicU64,
}

impl Fetcher {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        settings: FetcherSettings,
    ) -> Result<Self, NetworkError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| e.into_network_error())?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            settings,
            state: Mutex::new(FetchState::default()),
            requests_sent: AtomicU64::new(0),
        })
    }

    /// Fetcher for one CWA dataset served under `base_url`.
    pub fn for_dataset(
        base_url: &str,
        dataset: CwaDataset,
        api_key: Option<String>,
        settings: FetcherSettings,
    ) -> Result<Self, NetworkError> {
        let endpoint = format!("{}/{}", base_url.trim_end_matches('/'), dataset.id());
        Self::new(endpoint, api_key, settings)
    }

    pub fn from_config(config: &Config) -> Result<Self, NetworkError> {
        let settings = FetcherSettings {
            timeout: Duration::from_secs(config.fetch.timeout_secs),
            min_interval: Duration::from_secs(config.fetch.min_interval_secs),
            retry: RetryPolicy::from_config(&config.fetch),
        };
        Self::for_dataset(
            &config.cwa.base_url,
            config.cwa.dataset,
            config.cwa.resolved_api_key(),
            settings,
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Number of HTTP requests issued so far, retries included.
    pub fn requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    /// Fetch the current payload.
    ///
    /// Within `min_interval` of the previous fetch, returns that fetch's outcome
    /// without touching the network.
    #[instrument(skip(self), fields(endpoint = %self.endpoint), level = "info")]
    pub async fn fetch(&self) -> FetchOutcome {
        let mut state = self.state.lock().await;

        if let Some((at, outcome)) = &state.last {
            if at.elapsed() < self.settings.min_interval {
                tracing::debug!(
                    "Last fetch was {:?} ago (minimum interval {:?}), reusing its result",
                    at.elapsed(),
                    self.settings.min_interval
                );
                return outcome.clone();
            }
        }

        let outcome = match with_retry(&self.settings.retry, |attempt| self.attempt(attempt)).await
        {
            Ok(payload) => {
                tracing::info!(
                    "Fetched {} bytes (status {})",
                    payload.body.len(),
                    payload.status
                );
                FetchOutcome::Fetched(Arc::new(payload))
            }
            Err(failure) => {
                let at = Utc::now();
                let cause = failure.into_network_error();
                tracing::error!("Weather data unavailable at {}: {}", at.to_rfc3339(), cause);
                FetchOutcome::Unavailable { cause, at }
            }
        };

        state.last = Some((Instant::now(), outcome.clone()));
        outcome
    }

    async fn attempt(&self, attempt: u32) -> Result<RawPayload, NetworkError> {
        tracing::debug!(
            "Fetching {} (attempt {}/{})",
            self.endpoint,
            attempt,
            self.settings.retry.max_attempts()
        );

        let mut request = self.client.get(&self.endpoint).query(&[("format", "JSON")]);
        if let Some(key) = &self.api_key {
            request = request.query(&[("Authorization", key.as_str())]);
        }

        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        let response = request.send().await.map_err(|e| e.into_network_error())?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(NetworkError::ServerError {
                status: status.as_u16(),
                message: text.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }

        let body = response.text().await.map_err(|e| e.into_network_error())?;

        Ok(RawPayload {
            status: status.as_u16(),
            body,
            fetched_at: Utc::now(),
        })
    }
}
