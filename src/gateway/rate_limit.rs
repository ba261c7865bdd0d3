//! Rate-limit signal parsing and wait-time decisions for HTTP 429 responses.
//!
//! A 429 is reduced to a [`RateLimitSignal`] by the adapter (headers + body),
//! and the gateway turns the signal into a [`RateLimitDecision`] once it knows
//! how many rate-limit backoffs this call has already taken. Decisions are
//! pure apart from the injected clock and RNG.

use std::time::Duration;

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use reqwest::header::HeaderMap;
use serde::Serialize;

use super::GatewayConfig;

static PLEASE_WAIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)please wait\s+(\d+)\s+seconds").expect("Invalid please-wait regex")
});

/// Body substrings that mark a per-day quota rather than a per-minute one.
pub const DAILY_QUOTA_MARKERS: &[&str] = &["per 86400s", "userbymodelbyday", "per day"];

/// Reset headers, checked in order.
const RESET_HEADERS: &[&str] = &[
    "x-ratelimit-reset",
    "x-ratelimit-reset-requests",
    "x-ratelimit-reset-tokens",
    "ratelimit-reset",
];

/// Where the chosen wait came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitSource {
    Header,
    BodyHint,
    Backoff,
}

/// Everything a 429 response told us, before any policy is applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitSignal {
    /// `Retry-After` in seconds.
    pub retry_after: Option<f64>,
    /// Raw reset header value: an epoch timestamp or a seconds delta.
    pub reset: Option<f64>,
    /// "please wait N seconds" from the body.
    pub body_wait_hint: Option<u64>,
    /// The body names a per-day limit.
    pub daily_quota: bool,
    /// Leading part of the body, kept for diagnostics.
    pub body_excerpt: String,
}

impl RateLimitSignal {
    pub fn from_response(headers: &HeaderMap, body: &str) -> Self {
        let retry_after = header_f64(headers, "retry-after");
        let reset = RESET_HEADERS
            .iter()
            .find_map(|name| header_f64(headers, name));

        Self {
            retry_after,
            reset,
            body_wait_hint: extract_wait_seconds(body),
            daily_quota: is_daily_quota_message(body),
            body_excerpt: body.chars().take(300).collect(),
        }
    }
}

/// Per-attempt outcome of a 429.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateLimitDecision {
    pub wait: Duration,
    pub daily_quota_exhausted: bool,
    pub source: RateLimitSource,
}

fn header_f64(headers: &HeaderMap, name: &str) -> Option<f64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
}

/// Extract N from "please wait N seconds", if present.
pub fn extract_wait_seconds(text: &str) -> Option<u64> {
    PLEASE_WAIT
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

pub fn is_daily_quota_message(text: &str) -> bool {
    let lower = text.to_lowercase();
    DAILY_QUOTA_MARKERS.iter().any(|m| lower.contains(m))
}

/// Seconds from the wire as a `Duration`, saturating at `Duration::MAX` so an
/// absurd value still lands in the fail-fast branch.
fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

/// Capped exponential backoff: `base * 2^step`, never above `cap`.
pub fn exponential_backoff(base: Duration, cap: Duration, step: u32) -> Duration {
    let secs = base.as_secs_f64() * 2f64.powi(step.min(16) as i32);
    saturating_secs(secs.min(cap.as_secs_f64()))
}

/// Scale `wait` by a uniform factor in `[1 - ratio, 1 + ratio]`.
pub fn apply_jitter<R: Rng + ?Sized>(wait: Duration, ratio: f64, rng: &mut R) -> Duration {
    if ratio <= 0.0 || wait.is_zero() {
        return wait;
    }
    let factor = rng.gen_range((1.0 - ratio)..=(1.0 + ratio));
    saturating_secs(wait.as_secs_f64() * factor)
}

/// Compute the wait for this 429.
///
/// Priority: `Retry-After`, then the reset header (epoch when not in the past,
/// otherwise a delta), then the body hint, then capped exponential backoff
/// keyed on `prior_backoffs`. Jitter applies to every source.
pub fn decide<R: Rng + ?Sized>(
    signal: &RateLimitSignal,
    prior_backoffs: u32,
    config: &GatewayConfig,
    now_epoch_secs: f64,
    rng: &mut R,
) -> RateLimitDecision {
    let (base, source) = if let Some(secs) = signal.retry_after {
        (saturating_secs(secs), RateLimitSource::Header)
    } else if let Some(reset) = signal.reset {
        let secs = if reset >= now_epoch_secs {
            reset - now_epoch_secs
        } else {
            reset
        };
        (saturating_secs(secs), RateLimitSource::Header)
    } else if let Some(secs) = signal.body_wait_hint {
        (Duration::from_secs(secs), RateLimitSource::BodyHint)
    } else {
        (
            exponential_backoff(
                config.rate_limit_base_delay,
                config.rate_limit_max_delay,
                prior_backoffs,
            ),
            RateLimitSource::Backoff,
        )
    };

    RateLimitDecision {
        wait: apply_jitter(base, config.jitter_ratio, rng),
        daily_quota_exhausted: signal.daily_quota,
        source,
    }
}
