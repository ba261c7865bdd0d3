//! Context budgeting: fit truth, context and wiki text under the model ceiling.
//!
//! The service rejects oversized requests outright (HTTP 413), so the user
//! payload is sized here before any call is made. Degradation order:
//!
//! 1. **Per-block caps**: clip each block to its static character cap,
//!    keeping head and tail.
//! 2. **Drop wiki**: if the estimate is still over the available tokens,
//!    drop the confluence block entirely.
//! 3. **Hard clip**: split the remaining character budget 70/30 between
//!    truth and context.

use serde::{Deserialize, Serialize};
use tracing::info;

/// Reserve for role wrappers, serialization and chars→tokens variance.
pub const SAFETY_OVERHEAD_TOKENS: usize = 450;
/// Characters added to the system prompt estimate for message wrappers.
const SYSTEM_PROMPT_MARGIN_CHARS: usize = 200;
/// Sentinels, section headers and instructions around the three blocks.
pub const STRUCTURAL_OVERHEAD_CHARS: usize = 900;
/// Share of the remaining character budget used by the hard clip.
const HARD_CLIP_FILL: f64 = 0.92;
const HARD_CLIP_TRUTH_SHARE: f64 = 0.70;
const HARD_CLIP_CONTEXT_SHARE: f64 = 0.30;

const CLIP_HEAD_SHARE: f64 = 0.70;
const CLIP_TAIL_SHARE: f64 = 0.25;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Hard token ceiling of the model, system prompt included.
    pub max_tokens: usize,
    pub chars_per_token: f64,
    pub max_truth_chars: i64,
    pub max_context_chars: i64,
    pub max_confluence_chars: i64,
    pub safety_overhead_tokens: usize,
    pub drop_confluence_if_too_large: bool,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_tokens: 7_800,
            chars_per_token: 4.0,
            max_truth_chars: 20_000,
            max_context_chars: 8_000,
            max_confluence_chars: 3_000,
            safety_overhead_tokens: SAFETY_OVERHEAD_TOKENS,
            drop_confluence_if_too_large: true,
        }
    }
}

impl BudgetConfig {
    /// Token estimate for a character count.
    pub fn approx_tokens(&self, chars: usize) -> usize {
        if self.chars_per_token <= 0.0 {
            return chars;
        }
        (chars as f64 / self.chars_per_token) as usize
    }

    fn tokens_to_chars(&self, tokens: usize) -> usize {
        if self.chars_per_token <= 0.0 {
            return tokens;
        }
        (tokens as f64 * self.chars_per_token) as usize
    }
}

/// Budgeted generation input. Built once per run, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextPayload {
    pub truth: String,
    pub context: String,
    pub confluence: String,
    pub dropped_confluence: bool,
    pub approx_tokens_user_payload: usize,
    pub system_tokens_est: usize,
    pub available_user_tokens: usize,
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn head_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn tail_chars(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match s.char_indices().rev().nth(n - 1) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// Clip `text` to at most `max_chars` characters, keeping the head and the
/// tail around a marker that names the block.
///
/// A cap of zero or less yields an empty string. The marker is counted
/// against the cap.
pub fn clip_text(label: &str, text: &str, max_chars: i64) -> String {
    if text.is_empty() || max_chars <= 0 {
        return String::new();
    }
    let max_chars = max_chars as usize;
    let len = char_len(text);
    if len <= max_chars {
        return text.to_string();
    }

    let marker = format!("\n\n[... TRUNCATED ({label}) ...]\n\n");
    let marker_len = char_len(&marker);
    if max_chars <= marker_len {
        return head_chars(text, max_chars).to_string();
    }

    let mut head = (max_chars as f64 * CLIP_HEAD_SHARE) as usize;
    let mut tail = (max_chars as f64 * CLIP_TAIL_SHARE) as usize;
    if head + tail + marker_len > max_chars {
        let room = (max_chars - marker_len) as f64;
        let total_share = CLIP_HEAD_SHARE + CLIP_TAIL_SHARE;
        head = (room * CLIP_HEAD_SHARE / total_share) as usize;
        tail = (room * CLIP_TAIL_SHARE / total_share) as usize;
    }

    format!("{}{}{}", head_chars(text, head), marker, tail_chars(text, tail))
}

/// Token estimate of the instructional prompt plus wrapper margin.
pub fn estimate_system_tokens(config: &BudgetConfig, system_prompt: &str) -> usize {
    config.approx_tokens(char_len(system_prompt) + SYSTEM_PROMPT_MARGIN_CHARS)
}

fn user_tokens(config: &BudgetConfig, truth: &str, context: &str, confluence: &str) -> usize {
    config.approx_tokens(
        char_len(truth) + char_len(context) + char_len(confluence) + STRUCTURAL_OVERHEAD_CHARS,
    )
}

/// Build the budgeted payload for one run.
pub fn build_payload(
    config: &BudgetConfig,
    system_prompt: &str,
    truth_text: &str,
    context_text: &str,
    confluence_text: &str,
) -> ContextPayload {
    let mut truth = clip_text("truth", truth_text, config.max_truth_chars);
    let mut context = clip_text("context", context_text, config.max_context_chars);
    let mut confluence = clip_text("confluence", confluence_text, config.max_confluence_chars);

    let system_tokens_est = estimate_system_tokens(config, system_prompt);
    let available_user_tokens = config
        .max_tokens
        .saturating_sub(system_tokens_est)
        .saturating_sub(config.safety_overhead_tokens);

    info!(
        max_tokens = config.max_tokens,
        system_tokens_est,
        overhead_tokens = config.safety_overhead_tokens,
        available_user_tokens,
        "context budget"
    );

    let mut tokens = user_tokens(config, &truth, &context, &confluence);
    info!(tokens, "initial user payload estimate");

    let mut dropped_confluence = false;
    if tokens > available_user_tokens
        && config.drop_confluence_if_too_large
        && !confluence.is_empty()
    {
        confluence.clear();
        dropped_confluence = true;
        tokens = user_tokens(config, &truth, &context, &confluence);
        info!(tokens, "dropped confluence block to fit budget");
    }

    if tokens > available_user_tokens {
        let remaining_chars = config
            .tokens_to_chars(available_user_tokens)
            .saturating_sub(STRUCTURAL_OVERHEAD_CHARS);
        let target_chars = (remaining_chars as f64 * HARD_CLIP_FILL) as i64;

        let truth_budget = config
            .max_truth_chars
            .min((target_chars as f64 * HARD_CLIP_TRUTH_SHARE) as i64);
        let mut context_budget = config
            .max_context_chars
            .min((target_chars as f64 * HARD_CLIP_CONTEXT_SHARE) as i64);

        let truth_len = char_len(&truth) as i64;
        if truth_len < truth_budget {
            context_budget = config
                .max_context_chars
                .min(context_budget + (truth_budget - truth_len));
        }

        truth = clip_text("truth_hard", &truth, truth_budget);
        context = clip_text("context_hard", &context, context_budget);
        tokens = user_tokens(config, &truth, &context, &confluence);
        info!(
            truth_budget,
            context_budget, tokens, "hard clip applied to truth and context"
        );
    }

    ContextPayload {
        truth,
        context,
        confluence,
        dropped_confluence,
        approx_tokens_user_payload: tokens,
        system_tokens_est,
        available_user_tokens,
    }
}
