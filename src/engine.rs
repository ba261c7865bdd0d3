//! Generation orchestrator.
//!
//! Sequences one run: initial request, parse, total check, repair loop, final
//! coverage validation. Calls are strictly sequential; the running scenario
//! set is owned by [`ScenarioEngine::generate`] for the whole run.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::budget::ContextPayload;
use crate::coverage::{self, CoverageError};
use crate::gap_fill::{self, GapFillConfig, RepairRequester};
use crate::gateway::{Attribution, ChatGateway, ChatRequest, FinishReason, ProviderError};
use crate::merge::merge;
use crate::parse;
use crate::prompts::{self, PromptInstance};
use crate::scenario::ScenarioRecord;
use crate::trace::{ResponseSink, ResponseTrace, Stage, TraceError};

// =============================================================================
// Exit codes
// =============================================================================

pub const EXIT_OK: i32 = 0;
pub const EXIT_DAILY_QUOTA: i32 = 10;
pub const EXIT_RETRIES_EXHAUSTED: i32 = 11;
pub const EXIT_REQUEST_TOO_LARGE: i32 = 12;
pub const EXIT_COVERAGE_FAILED: i32 = 20;
pub const EXIT_MISSING_TOTAL: i32 = 21;
pub const EXIT_IO: i32 = 30;

// =============================================================================
// Config and results
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f32,
    /// Deadline for each generative call.
    pub timeout: Duration,
    /// Language the service writes scenarios in.
    pub output_language: String,
    /// Largest inventory total accepted from the service.
    pub max_inventory_total: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            temperature: 0.2,
            timeout: Duration::from_secs(180),
            output_language: "Spanish".to_string(),
            max_inventory_total: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOutcome {
    pub run_id: Uuid,
    pub inventory_text: String,
    pub n_total: usize,
    /// Sorted by `inventory_id`.
    pub scenarios: Vec<ScenarioRecord>,
    pub analysis: String,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("daily rate-limit quota exhausted: {0}")]
    DailyQuotaExhausted(ProviderError),
    #[error("generative service kept failing: {0}")]
    RetriesExhausted(ProviderError),
    #[error("request too large: {0}")]
    RequestTooLarge(ProviderError),
    #[error("generative call failed: {0}")]
    Provider(ProviderError),
    #[error("no TOTAL_INVENTARIO line in the initial response")]
    MissingInventoryTotal,
    #[error("inventory total {n} exceeds the limit of {limit}")]
    InventoryTooLarge { n: usize, limit: usize },
    #[error("coverage validation failed: {reason}")]
    CoverageMismatch {
        reason: CoverageError,
        partial: Box<GenerationOutcome>,
    },
    #[error("response capture failed: {0}")]
    Trace(#[from] TraceError),
}

impl From<ProviderError> for EngineError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::DailyQuotaExhausted { .. } => EngineError::DailyQuotaExhausted(err),
            ProviderError::RetriesExhausted { .. } | ProviderError::RateLimitWaitTooLong { .. } => {
                EngineError::RetriesExhausted(err)
            }
            ProviderError::RequestTooLarge { .. } => EngineError::RequestTooLarge(err),
            other => EngineError::Provider(other),
        }
    }
}

impl EngineError {
    /// Stable process exit code for this failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::DailyQuotaExhausted(_) => EXIT_DAILY_QUOTA,
            EngineError::RetriesExhausted(_) => EXIT_RETRIES_EXHAUSTED,
            EngineError::RequestTooLarge(_) => EXIT_REQUEST_TOO_LARGE,
            EngineError::CoverageMismatch { .. } => EXIT_COVERAGE_FAILED,
            EngineError::MissingInventoryTotal | EngineError::InventoryTooLarge { .. } => {
                EXIT_MISSING_TOTAL
            }
            EngineError::Provider(_) | EngineError::Trace(_) => EXIT_IO,
        }
    }

    /// Partial data of a run that failed final validation.
    pub fn partial(&self) -> Option<&GenerationOutcome> {
        match self {
            EngineError::CoverageMismatch { partial, .. } => Some(partial.as_ref()),
            _ => None,
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

pub struct ScenarioEngine {
    gateway: Arc<dyn ChatGateway>,
    generation: GenerationConfig,
    gap_fill: GapFillConfig,
    responses: Option<Arc<dyn ResponseSink>>,
}

impl ScenarioEngine {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        generation: GenerationConfig,
        gap_fill: GapFillConfig,
    ) -> Self {
        Self {
            gateway,
            generation,
            gap_fill,
            responses: None,
        }
    }

    /// Record every raw response to `sink`.
    pub fn with_response_sink(mut self, sink: Arc<dyn ResponseSink>) -> Self {
        self.responses = Some(sink);
        self
    }

    /// Run one generation over a budgeted payload.
    pub async fn generate(&self, payload: &ContextPayload) -> Result<GenerationOutcome, EngineError> {
        let run_id = Uuid::new_v4();
        info!(
            %run_id,
            model = %self.generation.model,
            payload_tokens = payload.approx_tokens_user_payload,
            dropped_confluence = payload.dropped_confluence,
            "starting scenario generation"
        );

        let prompt = prompts::initial_prompt(payload, &self.generation.output_language);
        let text = self.ask(run_id, Stage::Initial, &[], &prompt).await?;

        let (analysis, raw) = parse::analysis_and_scenarios(&text);
        let inventory_text = parse::inventory_block(&text).to_string();
        let n_total = parse::total(&text).ok_or(EngineError::MissingInventoryTotal)?;
        let limit = self.generation.max_inventory_total;
        if n_total > limit {
            warn!(%run_id, n_total, limit, "inventory total out of bounds, not repairing");
            return Err(EngineError::InventoryTooLarge { n: n_total, limit });
        }

        let initial = gap_fill::retain_in_range(n_total, parse::scenario_records(&raw));
        let records = merge(Vec::new(), initial);
        info!(
            %run_id,
            n_total,
            covered = records.len(),
            "initial response parsed"
        );

        let report = {
            let repair = Repair {
                engine: self,
                run_id,
                inventory: &inventory_text,
                compact: prompts::compact_context(
                    payload,
                    self.gap_fill.max_completion_context_chars,
                ),
            };
            gap_fill::fill_gaps(&repair, &self.gap_fill, n_total, records).await?
        };

        let outcome = GenerationOutcome {
            run_id,
            inventory_text,
            n_total,
            scenarios: report.records,
            analysis,
        };

        match coverage::validate_records(n_total, &outcome.scenarios) {
            Ok(()) => {
                info!(%run_id, n_total, repair_attempts = report.attempts, "coverage ok");
                Ok(outcome)
            }
            Err(reason) => {
                warn!(%run_id, %reason, "coverage validation failed, nothing will be published");
                Err(EngineError::CoverageMismatch {
                    reason,
                    partial: Box::new(outcome),
                })
            }
        }
    }

    async fn ask(
        &self,
        run_id: Uuid,
        stage: Stage,
        requested_ids: &[i64],
        prompt: &PromptInstance,
    ) -> Result<String, EngineError> {
        let req = ChatRequest::new(
            self.generation.model.as_str(),
            prompt.to_messages(),
            Attribution::new(stage.caller()).with_run(run_id),
        )
        .temperature(self.generation.temperature)
        .timeout(self.generation.timeout);

        let resp = self.gateway.chat(req).await?;
        if resp.finish_reason == FinishReason::Length {
            warn!(%run_id, stage = %stage.label(), "response cut at the output token limit");
        }
        if let Some(sink) = &self.responses {
            sink.record(
                ResponseTrace::new(run_id, stage, requested_ids, &resp.content)
                    .attempts(resp.attempts),
            )?;
        }
        Ok(resp.content)
    }
}

struct Repair<'a> {
    engine: &'a ScenarioEngine,
    run_id: Uuid,
    inventory: &'a str,
    compact: String,
}

#[async_trait]
impl RepairRequester for Repair<'_> {
    async fn request_missing(&self, ids: &[i64], stage: Stage) -> Result<String, EngineError> {
        let prompt = prompts::gap_fill_prompt(
            self.inventory,
            &self.compact,
            ids,
            &self.engine.generation.output_language,
        );
        self.engine.ask(self.run_id, stage, ids, &prompt).await
    }
}
