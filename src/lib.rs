#![forbid(unsafe_code)]

//! # scenario-harness
//!
//! Coverage-checked test scenario synthesis.
//!
//! A chat-completions service is asked for a numbered technical inventory of a
//! requirements ticket plus one test scenario per inventory point. Nothing is
//! trusted: the response is parsed at sentinel lines, validated for an exact
//! one-to-one mapping between inventory ids and scenarios, and repaired with
//! small batched follow-up requests until the mapping holds or the repair
//! budget runs out. Only a fully covered set is handed to a publisher.
//!
//! The pieces, in pipeline order:
//!
//! - [`context`]: gather truth, supporting context and anchor documentation
//! - [`budget`]: clip all of it under a hard token ceiling
//! - [`gateway`]: call the service with rate-limit aware retries
//! - [`parse`], [`coverage`], [`gap_fill`], [`merge`]: turn responses into a
//!   complete scenario set
//! - [`quality`]: label each scenario's automation code
//! - [`publish`]: create one test-case ticket per scenario

pub mod budget;
pub mod config;
pub mod context;
pub mod coverage;
pub mod engine;
pub mod gap_fill;
pub mod gateway;
pub mod merge;
pub mod parse;
pub mod prompts;
pub mod publish;
pub mod quality;
pub mod scenario;
pub mod trace;

pub use budget::{build_payload, clip_text, BudgetConfig, ContextPayload};
pub use config::{ConfigError, EngineConfig};
pub use context::{
    gather_context, ContextConfig, ContextError, DocumentSource, GatheredContext, Issue,
    IssueSource, Provenance, StaticSources,
};
pub use coverage::CoverageError;
pub use engine::{EngineError, GenerationConfig, GenerationOutcome, ScenarioEngine};
pub use gap_fill::GapFillConfig;
pub use gateway::{Attribution, ChatGateway, ProviderError, ProviderGateway, UsageSink};
pub use publish::{publish_scenarios, DraftPublisher, PublishError, PublishTarget, Publisher};
pub use quality::{AutomationLabel, QualityGate};
pub use scenario::{AutomationType, ScenarioRecord, Scope};
pub use trace::{JsonlResponseSink, ResponseSink, ResponseTrace, ResponseWorker, TraceError};
