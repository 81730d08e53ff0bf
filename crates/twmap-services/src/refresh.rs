//! Fetch → parse → store refresh pipeline.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::instrument;

use twmap_core::{AppError, Config, ConfigError};
use twmap_store::{StoreStatistics, StoredRecord, WeatherStore};
use twmap_weather::{parse_with_report, FetchOutcome, Fetcher};

/// Which step of a refresh failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStage {
    Fetch,
    Parse,
    Store,
}

impl fmt::Display for RefreshStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshStage::Fetch => write!(f, "fetch"),
            RefreshStage::Parse => write!(f, "parse"),
            RefreshStage::Store => write!(f, "store"),
        }
    }
}

/// Counts from a completed refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Valid records produced by the parser
    pub parsed: usize,
    /// Entries dropped for missing required fields
    pub rejected: usize,
    /// Rows inserted or updated
    pub saved: usize,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct RefreshFailure {
    pub stage: RefreshStage,
    pub error: AppError,
}

impl RefreshFailure {
    pub fn user_message(&self) -> &'static str {
        match self.stage {
            RefreshStage::Parse => "The weather service returned data in an unexpected format.",
            RefreshStage::Fetch | RefreshStage::Store => self.error.user_message(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.error.is_retryable()
    }
}

impl fmt::Display for RefreshFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.error)
    }
}

/// Result of `fetch_and_store`. Failures are values, never panics or errors.
#[derive(Debug)]
pub enum RefreshOutcome {
    Refreshed(RefreshSummary),
    Failed(RefreshFailure),
}

impl RefreshOutcome {
    pub fn is_refreshed(&self) -> bool {
        matches!(self, RefreshOutcome::Refreshed(_))
    }

    pub fn summary(&self) -> Option<&RefreshSummary> {
        match self {
            RefreshOutcome::Refreshed(summary) => Some(summary),
            RefreshOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&RefreshFailure> {
        match self {
            RefreshOutcome::Refreshed(_) => None,
            RefreshOutcome::Failed(failure) => Some(failure),
        }
    }

    fn failed(stage: RefreshStage, error: impl Into<AppError>) -> Self {
        let failure = RefreshFailure {
            stage,
            error: error.into(),
        };
        tracing::warn!(
            "Refresh {} (retryable: {})",
            failure,
            failure.is_retryable()
        );
        RefreshOutcome::Failed(failure)
    }
}

/// Drives Fetcher → Parser → Store for the presentation layer.
///
/// Cheap to clone; clones share the fetcher (and its rate limit) and the store.
#[derive(Debug, Clone)]
pub struct RefreshPipeline {
    fetcher: Arc<Fetcher>,
    store: Arc<WeatherStore>,
    retention_days: u32,
}

impl RefreshPipeline {
    pub fn new(fetcher: Arc<Fetcher>, store: Arc<WeatherStore>) -> Self {
        Self {
            fetcher,
            store,
            retention_days: twmap_store::DEFAULT_RETENTION_DAYS,
        }
    }

    /// Build from configuration. Fails on a configuration that does not validate.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let validation = config.validate();
        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        let fetcher = Fetcher::from_config(config)?;
        let store = WeatherStore::from_config(&config.storage)?;
        Ok(Self::new(Arc::new(fetcher), Arc::new(store))
            .with_retention_days(config.storage.retention_days))
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn fetcher(&self) -> &Arc<Fetcher> {
        &self.fetcher
    }

    pub fn store(&self) -> &Arc<WeatherStore> {
        &self.store
    }

    /// Fetch the dataset, parse it and upsert the valid records.
    #[instrument(skip(self), level = "info")]
    pub async fn fetch_and_store(&self) -> RefreshOutcome {
        let payload = match self.fetcher.fetch().await {
            FetchOutcome::Fetched(payload) => payload,
            FetchOutcome::Unavailable { cause, .. } => {
                return RefreshOutcome::failed(RefreshStage::Fetch, cause);
            }
        };

        let report = parse_with_report(&payload.body);
        if let Some(message) = report.format_error {
            return RefreshOutcome::failed(
                RefreshStage::Parse,
                anyhow::anyhow!("unreadable payload: {}", message),
            );
        }

        let parsed = report.records.len();
        let rejected = report.rejected.len();

        let store = Arc::clone(&self.store);
        let records = report.records;
        let saved = match tokio::task::spawn_blocking(move || store.save(&records)).await {
            Ok(Ok(saved)) => saved,
            Ok(Err(e)) => return RefreshOutcome::failed(RefreshStage::Store, e),
            Err(e) => {
                return RefreshOutcome::failed(
                    RefreshStage::Store,
                    anyhow::anyhow!("save task failed: {}", e),
                )
            }
        };

        tracing::info!(
            "Refresh complete: {} parsed, {} rejected, {} saved",
            parsed,
            rejected,
            saved
        );

        RefreshOutcome::Refreshed(RefreshSummary {
            parsed,
            rejected,
            saved,
            fetched_at: payload.fetched_at,
        })
    }

    /// Latest record per location, read off the async runtime.
    pub async fn latest(&self) -> Result<Vec<StoredRecord>, AppError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.get_latest())
            .await
            .map_err(|e| anyhow::anyhow!("query task failed: {}", e))?
            .map_err(AppError::from)
    }

    pub async fn statistics(&self) -> Result<StoreStatistics, AppError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.statistics())
            .await
            .map_err(|e| anyhow::anyhow!("statistics task failed: {}", e))?
            .map_err(AppError::from)
    }

    /// Apply the configured retention window, off the async runtime.
    pub async fn cleanup(&self) -> Result<usize, AppError> {
        let store = Arc::clone(&self.store);
        let days = self.retention_days;
        tokio::task::spawn_blocking(move || store.cleanup(days))
            .await
            .map_err(|e| anyhow::anyhow!("cleanup task failed: {}", e))?
            .map_err(AppError::from)
    }
}
