//! Retry with exponential backoff, modeled as an explicit state machine.
//!
//! Retried:
//! - Timeouts and connection failures
//! - 5xx server errors, 408 and 429
//!
//! Not retried:
//! - Other 4xx client errors (bad key, unknown dataset)
//! - Malformed responses

use std::future::Future;
use std::time::Duration;

use twmap_core::{FetchConfig, NetworkError};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_DELAY_SECS: u64 = 2;
pub const DEFAULT_MAX_DELAY_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt
    pub max_retries: u32,
    /// Delay before the first retry (doubles each retry)
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_secs(DEFAULT_INITIAL_DELAY_SECS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_secs(config.initial_backoff_secs),
            ..Self::default()
        }
    }

    /// Total attempts including the first one
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay after the given failed attempt (1-based): initial_delay * 2^(attempt-1), capped.
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    NoRetry,
}

impl RetryDecision {
    pub fn for_error(error: &NetworkError) -> Self {
        if error.is_retryable() {
            Self::Retry
        } else {
            Self::NoRetry
        }
    }
}

/// Where a fetch stands in its retry sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Idle,
    /// Attempt number, starting at 1
    Attempting(u32),
    /// Waiting `delay` after failed attempt `attempt`
    Backoff { attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    Failed { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryEvent {
    Start,
    AttemptSucceeded,
    AttemptFailed(RetryDecision),
    BackoffElapsed,
}

impl RetryState {
    /// Apply an event. Events that make no sense in the current state leave it unchanged.
    pub fn advance(self, event: RetryEvent, policy: &RetryPolicy) -> RetryState {
        match (self, event) {
            (Self::Idle, RetryEvent::Start) => Self::Attempting(1),
            (Self::Attempting(n), RetryEvent::AttemptSucceeded) => Self::Succeeded { attempts: n },
            (Self::Attempting(n), RetryEvent::AttemptFailed(RetryDecision::Retry))
                if n < policy.max_attempts() =>
            {
                Self::Backoff {
                    attempt: n,
                    delay: policy.delay_after_attempt(n),
                }
            }
            (Self::Attempting(n), RetryEvent::AttemptFailed(_)) => Self::Failed { attempts: n },
            (Self::Backoff { attempt, .. }, RetryEvent::BackoffElapsed) => {
                Self::Attempting(attempt + 1)
            }
            (state, _) => state,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. })
    }
}

/// Retries exhausted, or a non-retryable error.
#[derive(Debug, Clone)]
pub struct RetryFailure {
    pub attempts: u32,
    pub last_error: NetworkError,
}

impl RetryFailure {
    pub fn into_network_error(self) -> NetworkError {
        NetworkError::Unavailable {
            attempts: self.attempts,
            last: Box::new(self.last_error),
        }
    }
}

/// Run `operation` under `policy`, sleeping between attempts.
///
/// `operation` receives the 1-based attempt number.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, RetryFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, NetworkError>>,
{
    let mut state = RetryState::Idle.advance(RetryEvent::Start, policy);
    let mut last_error: Option<NetworkError> = None;

    loop {
        match state {
            RetryState::Attempting(attempt) => match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!("Request succeeded on attempt {}", attempt);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    let decision = RetryDecision::for_error(&e);
                    tracing::warn!(
                        "Attempt {} of {} failed: {}",
                        attempt,
                        policy.max_attempts(),
                        e
                    );
                    state = state.advance(RetryEvent::AttemptFailed(decision), policy);
                    last_error = Some(e);
                }
            },
            RetryState::Backoff { delay, .. } => {
                tracing::info!("Retrying in {:?}", delay);
                tokio::time::sleep(delay).await;
                state = state.advance(RetryEvent::BackoffElapsed, policy);
            }
            RetryState::Failed { attempts } => {
                tracing::error!("Giving up after {} attempt(s)", attempts);
                return Err(RetryFailure {
                    attempts,
                    last_error: last_error.unwrap_or_else(|| {
                        NetworkError::ConnectionFailed("no attempt completed".to_string())
                    }),
                });
            }
            RetryState::Idle | RetryState::Succeeded { .. } => {
                return Err(RetryFailure {
                    attempts: 0,
                    last_error: NetworkError::InvalidResponse(format!(
                        "retry loop reached unexpected state {:?}",
                        state
                    )),
                });
            }
        }
    }
}
