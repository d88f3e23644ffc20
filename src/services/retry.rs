// src/services/retry.rs

//! Retry, backoff and fallback for a single URL.
//!
//! Every fetch walks a small state machine:
//!
//! ```text
//! Pending ──ok──────────────────────────────────────► Success
//!    │ transient                                        ▲
//!    ▼                                                  │
//! Retrying(n) ──budget spent──► FallbackAttempt ──ok────┘
//!    │ fatal status                    │ any error
//!    ▼                                 ▼
//!  Failed ◄────────────────────────── Failed
//! ```

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::error::TransportError;
use crate::models::{FailureKind, RetryConfig};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::transport::{FetchResponse, Headers, Transport};

/// Backoff settings for the primary transport.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
        }
    }

    /// Primary transport attempts per URL.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `retry` (0-based): `min(base * 2^retry, cap)`
    /// plus up to 20% jitter.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(16));
        let backoff = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if self.jitter && !backoff.is_zero() {
            backoff + backoff.mul_f64(fastrand::f64() * 0.2)
        } else {
            backoff
        }
    }
}

/// Why a URL could not be fetched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("HTTP status {0}")]
    Status(u16),
}

impl FetchFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Transport(_) => FailureKind::Network,
            Self::Status(status) if is_retriable_status(*status) => FailureKind::Network,
            Self::Status(_) => FailureKind::HttpStatus,
        }
    }
}

/// Result of one transport attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Success(String),
    RetriableFailure(FetchFailure),
    FatalFailure(FetchFailure),
}

/// 5xx, request timeout and rate limiting are worth another try.
pub fn is_retriable_status(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429
}

impl FetchOutcome {
    pub fn classify(result: Result<FetchResponse, TransportError>) -> Self {
        match result {
            Ok(response) if response.is_success() => Self::Success(response.body),
            Ok(response) if is_retriable_status(response.status) => {
                Self::RetriableFailure(FetchFailure::Status(response.status))
            }
            Ok(response) => Self::FatalFailure(FetchFailure::Status(response.status)),
            Err(err) => Self::RetriableFailure(FetchFailure::Transport(err)),
        }
    }
}

/// Where a fetch currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchState {
    Pending,
    /// `attempt` primary attempts have failed; wait `delay` then try again
    Retrying { attempt: u32, delay: Duration },
    /// Primary budget spent; one go on the secondary transport
    FallbackAttempt(FetchFailure),
    Success(String),
    Failed(FetchFailure),
}

/// Fetches one URL through the primary transport, with retries, and then
/// the secondary transport if one is configured.
#[derive(Clone)]
pub struct ResilientFetcher {
    primary: Arc<dyn Transport>,
    secondary: Option<Arc<dyn Transport>>,
    policy: RetryPolicy,
    headers: Arc<Headers>,
    progress: Arc<dyn ProgressSink>,
}

impl ResilientFetcher {
    pub fn new(
        primary: Arc<dyn Transport>,
        policy: RetryPolicy,
        headers: Headers,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            primary,
            secondary: None,
            policy,
            headers: Arc::new(headers),
            progress,
        }
    }

    /// Use `secondary` once after the primary budget is spent.
    pub fn with_fallback(mut self, secondary: Arc<dyn Transport>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    /// Same transports and policy, no fallback.
    pub fn without_fallback(&self) -> Self {
        Self {
            secondary: None,
            ..self.clone()
        }
    }

    pub async fn fetch(&self, url: &str) -> Result<String, FetchFailure> {
        let mut state = FetchState::Pending;
        loop {
            state = match self.advance(url, state).await {
                FetchState::Success(body) => return Ok(body),
                FetchState::Failed(failure) => return Err(failure),
                next => next,
            };
        }
    }

    async fn advance(&self, url: &str, state: FetchState) -> FetchState {
        match state {
            FetchState::Pending => self.primary_attempt(url, 0).await,
            FetchState::Retrying { attempt, delay } => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                self.primary_attempt(url, attempt).await
            }
            FetchState::FallbackAttempt(cause) => self.fallback_attempt(url, cause).await,
            terminal => terminal,
        }
    }

    async fn primary_attempt(&self, url: &str, failed_so_far: u32) -> FetchState {
        let outcome = FetchOutcome::classify(self.primary.fetch(url, &self.headers).await);
        match outcome {
            FetchOutcome::Success(body) => FetchState::Success(body),
            FetchOutcome::FatalFailure(failure) => FetchState::Failed(failure),
            FetchOutcome::RetriableFailure(failure) => {
                let attempt = failed_so_far + 1;
                if attempt < self.policy.max_attempts() {
                    let delay = self.policy.delay_for(attempt - 1);
                    self.progress.on_event(&ProgressEvent::Retry {
                        url: url.to_string(),
                        attempt,
                        delay,
                        reason: failure.to_string(),
                    });
                    FetchState::Retrying { attempt, delay }
                } else if self.secondary.is_some() {
                    FetchState::FallbackAttempt(failure)
                } else {
                    FetchState::Failed(failure)
                }
            }
        }
    }

    async fn fallback_attempt(&self, url: &str, cause: FetchFailure) -> FetchState {
        let Some(secondary) = &self.secondary else {
            return FetchState::Failed(cause);
        };

        self.progress.on_event(&ProgressEvent::Fallback {
            url: url.to_string(),
        });

        match FetchOutcome::classify(secondary.fetch(url, &self.headers).await) {
            FetchOutcome::Success(body) => FetchState::Success(body),
            FetchOutcome::RetriableFailure(failure) | FetchOutcome::FatalFailure(failure) => {
                log::debug!("Fallback for {url} failed after primary error ({cause}): {failure}");
                FetchState::Failed(failure)
            }
        }
    }
}
