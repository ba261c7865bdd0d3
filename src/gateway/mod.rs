//! Resilient gateway to the chat-completions service.

pub mod completions;
pub mod error;
pub mod rate_limit;
pub mod retry;
pub mod types;
pub mod usage;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, warn};

use completions::{ChatProvider, CompletionsAdapter};
use retry::{BackoffReason, CallState, RetryPolicy, Transition};
use usage::{ProviderCallRecord, UsageSink as UsageSinkTrait};

pub use error::{ErrorContext, ProviderError};
pub use rate_limit::{RateLimitDecision, RateLimitSignal, RateLimitSource};
pub use types::*;
pub use usage::{NoopUsageSink, TracingUsageSink, UsageSink};

#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

/// Retry and backoff settings for one logical call.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Total HTTP attempts per logical call, including the first.
    pub max_attempts: u32,
    pub rate_limit_base_delay: Duration,
    pub rate_limit_max_delay: Duration,
    pub network_base_delay: Duration,
    pub network_max_delay: Duration,
    /// Relative jitter applied to every 429 wait (0.15 = ±15%).
    pub jitter_ratio: f64,
    /// A 429 wait longer than this aborts the call instead of sleeping.
    pub fail_fast_wait: Duration,
    /// Fixed RNG seed for reproducible jitter.
    pub jitter_seed: Option<u64>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            rate_limit_base_delay: Duration::from_secs(2),
            rate_limit_max_delay: Duration::from_secs(90),
            network_base_delay: Duration::from_secs(2),
            network_max_delay: Duration::from_secs(30),
            jitter_ratio: 0.15,
            fail_fast_wait: Duration::from_secs(900),
            jitter_seed: None,
        }
    }
}

pub struct ProviderGateway<U: UsageSinkTrait, P: ChatProvider = CompletionsAdapter> {
    provider: P,
    usage_sink: Arc<U>,
    config: GatewayConfig,
}

#[async_trait::async_trait]
impl<U: UsageSinkTrait, P: ChatProvider> ChatGateway for ProviderGateway<U, P> {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        ProviderGateway::chat(self, req).await
    }
}

impl<U: UsageSinkTrait, P: ChatProvider> ProviderGateway<U, P> {
    pub fn with_config(provider: P, usage_sink: Arc<U>, config: GatewayConfig) -> Self {
        Self {
            provider,
            usage_sink,
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Run one logical call through the retry state machine.
    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut policy = RetryPolicy::new(&self.config);
        let mut state = CallState::Idle;

        loop {
            state = match state {
                CallState::Idle => CallState::Calling { attempt: 1 },
                CallState::Calling { attempt } => {
                    debug!(
                        caller = req.attribution.caller,
                        attempt,
                        max_attempts = self.config.max_attempts,
                        "calling generative service"
                    );
                    let started = Instant::now();
                    match self.provider.chat(&req).await {
                        Ok(mut resp) => {
                            resp.attempts = attempt;
                            self.record_success(&req, &resp, attempt).await;
                            CallState::Success(resp)
                        }
                        Err(err) => {
                            self.record_failure(&req, &err, attempt, started.elapsed())
                                .await;
                            let now = Utc::now().timestamp_millis() as f64 / 1_000.0;
                            match policy.on_failure(attempt, err, now) {
                                Transition::Retry { reason, wait } => CallState::Backoff {
                                    attempt,
                                    reason,
                                    wait,
                                },
                                Transition::Fail(err) => CallState::Fatal(err),
                            }
                        }
                    }
                }
                CallState::Backoff {
                    attempt,
                    reason,
                    wait,
                } => {
                    match &reason {
                        BackoffReason::RateLimited(decision) => warn!(
                            caller = req.attribution.caller,
                            attempt,
                            wait_ms = wait.as_millis() as u64,
                            source = ?decision.source,
                            "rate limited (429), backing off"
                        ),
                        BackoffReason::Network { error_code } => warn!(
                            caller = req.attribution.caller,
                            attempt,
                            wait_ms = wait.as_millis() as u64,
                            error_code,
                            "network failure, backing off"
                        ),
                    }
                    sleep(wait).await;
                    CallState::Calling {
                        attempt: attempt + 1,
                    }
                }
                CallState::Success(resp) => return Ok(resp),
                CallState::Fatal(err) => {
                    warn!(
                        caller = req.attribution.caller,
                        code = err.code(),
                        "generative call failed: {err}"
                    );
                    return Err(err);
                }
            };
        }
    }

    async fn record_success(&self, req: &ChatRequest, resp: &ChatResponse, attempt: u32) {
        let record = ProviderCallRecord::new(
            "chat/completions",
            req.model.as_str(),
            req.attribution.caller,
            attempt,
        )
        .tokens(resp.input_tokens, resp.output_tokens)
        .run(req.attribution.run_id)
        .latency(resp.latency.as_millis() as u64);
        self.usage_sink.record(record).await;
    }

    async fn record_failure(
        &self,
        req: &ChatRequest,
        err: &ProviderError,
        attempt: u32,
        elapsed: Duration,
    ) {
        let record = ProviderCallRecord::new(
            "chat/completions",
            req.model.as_str(),
            req.attribution.caller,
            attempt,
        )
        .run(req.attribution.run_id)
        .latency(elapsed.as_millis() as u64)
        .request_id(err.request_id().map(str::to_string))
        .error(err.code());
        self.usage_sink.record(record).await;
    }
}

impl<U: UsageSinkTrait> ProviderGateway<U, CompletionsAdapter> {
    /// Build a gateway over the HTTP adapter.
    pub fn connect(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        client_timeout: Duration,
        usage_sink: Arc<U>,
        config: GatewayConfig,
    ) -> Result<Self, ProviderError> {
        let adapter = CompletionsAdapter::with_config(api_key, base_url, client_timeout)?;
        Ok(Self::with_config(adapter, usage_sink, config))
    }
}
