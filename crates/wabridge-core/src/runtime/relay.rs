//! Backend relay with a bounded retry budget.
//!
//! Attempt `n` that fails waits `base_delay * n` before the next one (linear,
//! not exponential). Timeouts, connection errors, non-2xx statuses and
//! unparsable bodies all spend the same budget.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::backend::{BackendClient, ForwardRequest};
use crate::config::BridgeConfig;
use crate::error::{BackendError, RelayError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayPolicy {
    /// Total attempts, first call included
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RelayPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay after the `attempt`-th failed call (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

impl From<&BridgeConfig> for RelayPolicy {
    fn from(config: &BridgeConfig) -> Self {
        Self::new(config.max_forward_attempts, config.forward_retry_base_delay())
    }
}

/// What the user will be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardResult {
    /// Backend-reported success flag
    pub success: bool,
    pub reply: String,
    /// Whether `reply` is the fallback text rather than the backend's
    pub fallback: bool,
}

#[derive(Debug, Default)]
struct RetryState {
    attempt: u32,
    last_error: Option<BackendError>,
}

pub struct BackendRelay {
    backend: Arc<dyn BackendClient>,
    policy: RelayPolicy,
    fallback_reply: String,
}

impl BackendRelay {
    pub fn new(
        backend: Arc<dyn BackendClient>,
        policy: RelayPolicy,
        fallback_reply: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            policy,
            fallback_reply: fallback_reply.into(),
        }
    }

    pub fn fallback_reply(&self) -> &str {
        &self.fallback_reply
    }

    pub async fn forward(&self, request: ForwardRequest) -> Result<ForwardResult, RelayError> {
        let mut state = RetryState::default();

        while state.attempt < self.policy.max_attempts {
            state.attempt += 1;

            match self.backend.call(&request).await {
                Ok(reply) => {
                    debug!(
                        message_id = %request.message_id,
                        attempt = state.attempt,
                        success = reply.success,
                        "Backend replied"
                    );
                    let text = reply
                        .reply_text
                        .filter(|text| reply.success && !text.trim().is_empty());
                    return Ok(match text {
                        Some(reply_text) => ForwardResult {
                            success: reply.success,
                            reply: reply_text,
                            fallback: false,
                        },
                        None => ForwardResult {
                            success: reply.success,
                            reply: self.fallback_reply.clone(),
                            fallback: true,
                        },
                    });
                }
                Err(error) => {
                    if state.attempt < self.policy.max_attempts {
                        let delay = self.policy.delay_for(state.attempt);
                        warn!(
                            message_id = %request.message_id,
                            attempt = state.attempt,
                            max_attempts = self.policy.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "Backend call failed, retrying"
                        );
                        state.last_error = Some(error);
                        tokio::time::sleep(delay).await;
                    } else {
                        state.last_error = Some(error);
                    }
                }
            }
        }

        let last_error = state
            .last_error
            .unwrap_or_else(|| BackendError::Decode("no attempt was made".to_string()));
        Err(RelayError::Exhausted {
            attempts: state.attempt,
            last_error,
        })
    }
}
