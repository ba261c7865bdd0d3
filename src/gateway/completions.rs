//! OpenAI-compatible chat-completions adapter (GitHub Models / Azure inference).
//!
//! One call here is one HTTP attempt. Retrying is the gateway's job; this
//! module only classifies what a single response means.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::rate_limit::RateLimitSignal;
use super::types::*;

// =============================================================================
// TRAIT
// =============================================================================

/// Trait for chat completion providers.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

// =============================================================================
// ADAPTER
// =============================================================================

pub const DEFAULT_BASE_URL: &str = "https://models.inference.ai.azure.com";

/// Maximum allowed response body length (4MB).
const MAX_RESPONSE_LEN: usize = 4 * 1_024 * 1_024;

/// Pre-flight ceiling on input characters. Anything above this would be
/// rejected with a 413 anyway.
const MAX_INPUT_CHARS: usize = 500_000;

/// Chat-completions adapter.
#[derive(Debug, Clone)]
pub struct CompletionsAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl CompletionsAdapter {
    /// Create with custom configuration.
    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(ProviderError::config("API token is empty"));
        }
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| ProviderError::config("Invalid API key format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Extract request ID from response headers.
    fn extract_request_id(headers: &HeaderMap) -> Option<String> {
        headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }

    fn classify_failure(
        status: StatusCode,
        headers: &HeaderMap,
        body: &str,
        ctx: ErrorContext,
    ) -> ProviderError {
        let parsed = serde_json::from_str::<ChatApiResponse>(body)
            .ok()
            .and_then(|r| r.error);
        let ctx = match parsed.as_ref().and_then(|e| e.code.clone()) {
            Some(code) => ctx.with_code(code),
            None => ctx,
        };
        let message = parsed
            .and_then(|e| e.message)
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| format!("HTTP {}: {}", status.as_u16(), preview(body)));

        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                ProviderError::rate_limited(RateLimitSignal::from_response(headers, body), ctx)
            }
            StatusCode::PAYLOAD_TOO_LARGE => ProviderError::too_large(message, Some(ctx)),
            _ => ProviderError::provider_with_context(message, false, ctx),
        }
    }
}

fn preview(body: &str) -> String {
    body.chars().take(300).collect()
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a Message> for ApiMessage<'a> {
    fn from(m: &'a Message) -> Self {
        Self {
            role: m.role.as_str(),
            content: &m.content,
        }
    }
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
    usage: Option<Usage>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    code: Option<String>,
}

// =============================================================================
// CHAT PROVIDER IMPL
// =============================================================================

#[async_trait]
impl ChatProvider for CompletionsAdapter {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let total_chars = req.input_chars();
        if total_chars > MAX_INPUT_CHARS {
            return Err(ProviderError::too_large(
                format!("Input too large: {total_chars} chars (max {MAX_INPUT_CHARS})"),
                None,
            ));
        }

        let start = Instant::now();

        let api_req = ChatApiRequest {
            model: &req.model,
            messages: req.messages.iter().map(ApiMessage::from).collect(),
            temperature: req.temperature,
        };

        let mut builder = self.client.post(self.chat_url()).json(&api_req);
        if let Some(timeout) = req.timeout {
            builder = builder.timeout(timeout);
        }
        let mut response = builder.send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        let request_id = Self::extract_request_id(&headers);

        // Stream response to enforce size limit
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let new_len = bytes.len() + chunk.len();
            if new_len > MAX_RESPONSE_LEN {
                return Err(ProviderError::provider(
                    format!("Response too large: {new_len} bytes"),
                    false,
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        let body = String::from_utf8_lossy(&bytes).to_string();

        let ctx = ErrorContext::new().with_status(status.as_u16());
        let ctx = match &request_id {
            Some(id) => ctx.with_request_id(id),
            None => ctx,
        };

        if status != StatusCode::OK {
            return Err(Self::classify_failure(status, &headers, &body, ctx));
        }

        let parsed: ChatApiResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::provider_with_context(format!("Invalid JSON: {e}"), false, ctx.clone())
        })?;

        if let Some(error) = parsed.error {
            let message = error.message.unwrap_or_default();
            return Err(ProviderError::provider_with_context(message, false, ctx));
        }

        let choice = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| {
                ProviderError::provider_with_context("No choices in response", false, ctx.clone())
            })?;

        let content = choice
            .message
            .and_then(|m| m.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                ProviderError::provider_with_context(
                    "Empty content in choices[0].message",
                    false,
                    ctx.clone(),
                )
            })?;

        let (input_tokens, output_tokens) = parsed
            .usage
            .map(|u| {
                (
                    u.prompt_tokens.unwrap_or(0),
                    u.completion_tokens.unwrap_or(0),
                )
            })
            .unwrap_or((0, 0));

        Ok(ChatResponse {
            content,
            input_tokens,
            output_tokens,
            latency: start.elapsed(),
            finish_reason: FinishReason::from(choice.finish_reason),
            attempts: 1,
        })
    }
}
