//! Error types for the chat-completions gateway.

use std::time::Duration;
use thiserror::Error;

use super::rate_limit::RateLimitSignal;

/// Additional context from provider errors for debugging.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// HTTP status code from the provider.
    pub http_status: Option<u16>,
    /// Provider-specific error code (e.g. "RateLimitReached").
    pub provider_code: Option<String>,
    /// Request ID from provider (x-request-id header).
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// Errors that can occur when calling the generative service.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP 429 on a single attempt. The gateway decides whether to wait.
    #[error("rate limited (HTTP 429)")]
    RateLimited {
        signal: RateLimitSignal,
        context: Option<ErrorContext>,
    },

    /// The per-day quota is spent; waiting inside this run cannot help.
    #[error("daily rate-limit quota exhausted (provider suggests waiting {diagnostic_wait:?})")]
    DailyQuotaExhausted {
        diagnostic_wait: Duration,
        message: String,
    },

    /// The computed 429 wait exceeds the fail-fast threshold.
    #[error("rate-limit wait of {wait:?} exceeds fail-fast limit of {limit:?}")]
    RateLimitWaitTooLong { wait: Duration, limit: Duration },

    /// HTTP 413 or local pre-flight rejection. Indicates a budgeting defect.
    #[error("request too large: {message}")]
    RequestTooLarge {
        message: String,
        context: Option<ErrorContext>,
    },

    /// Non-transient HTTP status or malformed success body.
    #[error("provider error: {message}")]
    Provider {
        message: String,
        retryable: bool,
        context: Option<ErrorContext>,
    },

    /// HTTP/network error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The attempt budget ran out while the service kept failing transiently.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<ProviderError>,
    },

    /// Configuration error (missing API key, etc.).
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// Create a rate limited error from a parsed 429 response.
    pub fn rate_limited(signal: RateLimitSignal, context: ErrorContext) -> Self {
        Self::RateLimited {
            signal,
            context: Some(context),
        }
    }

    /// Create a request-too-large error.
    pub fn too_large(message: impl Into<String>, context: Option<ErrorContext>) -> Self {
        Self::RequestTooLarge {
            message: message.into(),
            context,
        }
    }

    /// Create a provider error.
    pub fn provider(message: impl Into<String>, retryable: bool) -> Self {
        Self::Provider {
            message: message.into(),
            retryable,
            context: None,
        }
    }

    /// Create a provider error with context.
    pub fn provider_with_context(
        message: impl Into<String>,
        retryable: bool,
        context: ErrorContext,
    ) -> Self {
        Self::Provider {
            message: message.into(),
            retryable,
            context: Some(context),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            Self::Provider { retryable, .. } => *retryable,
            Self::DailyQuotaExhausted { .. }
            | Self::RateLimitWaitTooLong { .. }
            | Self::RequestTooLarge { .. }
            | Self::RetriesExhausted { .. }
            | Self::Config(_) => false,
        }
    }

    /// Get a short error code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::DailyQuotaExhausted { .. } => "daily_quota_exhausted",
            Self::RateLimitWaitTooLong { .. } => "rate_limit_wait_too_long",
            Self::RequestTooLarge { .. } => "request_too_large",
            Self::Provider { .. } => "provider_error",
            Self::Http(_) => "http_error",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::Config(_) => "config_error",
        }
    }

    /// Get the error context if available.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::RateLimited { context, .. } => context.as_ref(),
            Self::RequestTooLarge { context, .. } => context.as_ref(),
            Self::Provider { context, .. } => context.as_ref(),
            Self::RetriesExhausted { last, .. } => last.context(),
            Self::DailyQuotaExhausted { .. }
            | Self::RateLimitWaitTooLong { .. }
            | Self::Http(_)
            | Self::Config(_) => None,
        }
    }

    /// Get the request ID if available.
    pub fn request_id(&self) -> Option<&str> {
        self.context().and_then(|c| c.request_id.as_deref())
    }
}
