//! AI completion capability.
//!
//! The pipeline only ever asks one question of a language model: "given this
//! prompt, what is the answer and how sure are you?". [`CompletionService`]
//! captures that single capability so the HTTP client and the deterministic
//! test double are interchangeable.

mod fake;
mod http;

pub use fake::FakeCompletion;
pub use http::HttpCompletionService;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::FailureReason;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    /// Self-reported confidence, clamped to `[0, 1]` by [`Completion::new`].
    pub confidence: f64,
}

impl Completion {
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            text: text.into(),
            confidence,
        }
    }

    pub fn not_found() -> Self {
        Self::new("", 0.0)
    }
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, CompletionError>;

    /// Service name used in logs and failure reasons.
    fn name(&self) -> &str;
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Unauthorized: API key required or invalid")]
    Unauthorized,

    #[error("No response from completion service")]
    NoResponse,

    #[error("Completion service unavailable: {0}")]
    Unavailable(String),
}

impl CompletionError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::NoResponse | Self::Unavailable(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Unauthorized => false,
        }
    }
}

/// Timeout and retry budget for one external call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Upper bound for each individual attempt.
    pub timeout: Duration,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            timeout: Duration::from_secs(60),
            initial_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let millis =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(millis.min(self.max_backoff.as_millis() as f64) as u64)
    }
}

/// Call the service under `policy`, mapping an exhausted budget to the
/// item-level failure it causes.
pub async fn complete_with_retry(
    service: &dyn CompletionService,
    request: &CompletionRequest,
    policy: &RetryPolicy,
) -> Result<Completion, FailureReason> {
    let attempts = policy.max_retries.saturating_add(1);
    let mut last_timed_out = false;
    let mut last_message = String::new();

    for attempt in 1..=attempts {
        if attempt > 1 {
            tokio::time::sleep(policy.backoff_for(attempt - 1)).await;
        }

        match tokio::time::timeout(policy.timeout, service.complete(request)).await {
            Ok(Ok(completion)) => return Ok(completion),
            Ok(Err(e)) => {
                tracing::warn!(
                    service = service.name(),
                    attempt,
                    error = %e,
                    "Completion call failed"
                );
                last_timed_out = false;
                last_message = e.to_string();
                if !e.is_retryable() {
                    break;
                }
            }
            Err(_) => {
                tracing::warn!(
                    service = service.name(),
                    attempt,
                    timeout_secs = policy.timeout.as_secs(),
                    "Completion call timed out"
                );
                last_timed_out = true;
            }
        }
    }

    if last_timed_out {
        Err(FailureReason::ExternalServiceTimeout {
            service: service.name().to_string(),
            attempts,
        })
    } else {
        Err(FailureReason::ExternalServiceError {
            service: service.name().to_string(),
            message: last_message,
        })
    }
}
