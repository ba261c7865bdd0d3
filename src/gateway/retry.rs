//! Retry state machine for a single logical chat call.
//!
//! ```text
//! Idle -> Calling{attempt} -> Success
//!                          -> Backoff{reason, wait} -> Calling{attempt + 1}
//!                          -> Fatal(error)
//! ```
//!
//! [`RetryPolicy::on_failure`] is the only place that decides between
//! `Backoff` and `Fatal`. It takes the clock as an argument and owns its RNG,
//! so the whole policy can be driven without a network or a runtime.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::error::ProviderError;
use super::rate_limit::{decide, exponential_backoff, RateLimitDecision};
use super::types::ChatResponse;
use super::GatewayConfig;

/// Why the gateway is waiting before the next attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffReason {
    RateLimited(RateLimitDecision),
    Network { error_code: &'static str },
}

/// State of one logical call.
#[derive(Debug)]
pub enum CallState {
    Idle,
    Calling {
        attempt: u32,
    },
    Backoff {
        attempt: u32,
        reason: BackoffReason,
        wait: Duration,
    },
    Success(ChatResponse),
    Fatal(ProviderError),
}

/// What follows a failed attempt.
#[derive(Debug)]
pub enum Transition {
    Retry { reason: BackoffReason, wait: Duration },
    Fail(ProviderError),
}

pub struct RetryPolicy<'a> {
    config: &'a GatewayConfig,
    rate_limited: u32,
    network_backoffs: u32,
    rng: StdRng,
}

impl<'a> RetryPolicy<'a> {
    pub fn new(config: &'a GatewayConfig) -> Self {
        let rng = match config.jitter_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            rate_limited: 0,
            network_backoffs: 0,
            rng,
        }
    }

    /// Decide what follows failed attempt number `attempt` (1-based).
    pub fn on_failure(&mut self, attempt: u32, err: ProviderError, now_epoch_secs: f64) -> Transition {
        match err {
            ProviderError::RateLimited { ref signal, .. } => {
                let decision = decide(
                    signal,
                    self.rate_limited,
                    self.config,
                    now_epoch_secs,
                    &mut self.rng,
                );
                self.rate_limited += 1;

                if decision.daily_quota_exhausted {
                    return Transition::Fail(ProviderError::DailyQuotaExhausted {
                        diagnostic_wait: decision.wait,
                        message: signal.body_excerpt.clone(),
                    });
                }
                if decision.wait > self.config.fail_fast_wait {
                    return Transition::Fail(ProviderError::RateLimitWaitTooLong {
                        wait: decision.wait,
                        limit: self.config.fail_fast_wait,
                    });
                }
                if attempt >= self.config.max_attempts {
                    return self.exhausted(attempt, err);
                }
                Transition::Retry {
                    wait: decision.wait,
                    reason: BackoffReason::RateLimited(decision),
                }
            }
            err if err.is_retryable() => {
                if attempt >= self.config.max_attempts {
                    return self.exhausted(attempt, err);
                }
                let wait = exponential_backoff(
                    self.config.network_base_delay,
                    self.config.network_max_delay,
                    self.network_backoffs,
                );
                self.network_backoffs += 1;
                Transition::Retry {
                    reason: BackoffReason::Network {
                        error_code: err.code(),
                    },
                    wait,
                }
            }
            err => Transition::Fail(err),
        }
    }

    fn exhausted(&self, attempts: u32, last: ProviderError) -> Transition {
        Transition::Fail(ProviderError::RetriesExhausted {
            attempts,
            last: Box::new(last),
        })
    }
}
