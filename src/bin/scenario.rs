#![forbid(unsafe_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use scenario_harness::engine::{EXIT_IO, EXIT_OK};
use scenario_harness::gateway::TracingUsageSink;
use scenario_harness::{
    build_payload, gather_context, parse, prompts, publish_scenarios, AutomationLabel,
    ConfigError, ContextError, ContextPayload, DraftPublisher, EngineConfig, EngineError,
    GenerationOutcome, JsonlResponseSink, ProviderError, ProviderGateway, Provenance,
    PublishError, PublishTarget, ResponseSink, ScenarioEngine, StaticSources, TraceError,
};

const EXIT_USAGE: u8 = 2;

#[derive(Parser)]
#[command(name = "scenario", version, about = "Coverage-checked test scenario generation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a fully covered scenario set (LLM calls)
    Generate {
        #[command(flatten)]
        input: InputArgs,
        /// Where to write the outcome JSON
        #[arg(long)]
        out: PathBuf,
        /// Record every raw response as JSONL
        #[arg(long)]
        trace: Option<PathBuf>,
        /// Write the test-case tickets that would be published
        #[arg(long, requires = "story")]
        drafts: Option<PathBuf>,
        /// Project prefix for draft ticket keys
        #[arg(long, default_value = "QA")]
        project: String,
    },
    /// Print the budgeted payload without calling the service
    Budget {
        #[command(flatten)]
        input: InputArgs,
    },
    /// Print automation labels for a scenario array or a generate outcome
    Label {
        #[arg(long)]
        input: PathBuf,
    },
}

#[derive(Args)]
struct InputArgs {
    /// Truth text file
    #[arg(long, conflicts_with = "sources")]
    truth: Option<PathBuf>,
    /// Supporting context text file
    #[arg(long, conflicts_with = "sources")]
    context: Option<PathBuf>,
    /// Anchor documentation text file
    #[arg(long, conflicts_with = "sources")]
    confluence: Option<PathBuf>,
    /// JSON bundle of issues and documents to gather context from
    #[arg(long, requires = "story")]
    sources: Option<PathBuf>,
    /// Story key: the context root with --sources, the link target for drafts
    #[arg(long)]
    story: Option<String>,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Trace(#[from] TraceError),
    #[error("{}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("{}: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{0}")]
    Usage(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        let code = match self {
            CliError::Engine(e) => e.exit_code(),
            CliError::Config(_) | CliError::Usage(_) => return EXIT_USAGE,
            _ => EXIT_IO,
        };
        u8::try_from(code).unwrap_or(1)
    }
}

/// One inputs-to-payload resolution: either files or gathered context.
struct Resolved {
    truth: String,
    context: String,
    confluence: String,
    story_key: Option<String>,
    anchor_key: Option<String>,
    provenance: Option<Provenance>,
}

#[derive(Serialize)]
struct GenerateReport<'a> {
    #[serde(flatten)]
    outcome: &'a GenerationOutcome,
    labels: Vec<LabelRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    provenance: Option<&'a Provenance>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LabelRow {
    inventory_id: i64,
    label: AutomationLabel,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("scenario_harness=info,scenario=info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::from(EXIT_OK as u8),
        Err(e) => {
            error!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Budget { input } => {
            let config = EngineConfig::from_env()?;
            let resolved = resolve_input(&config, &input).await?;
            let payload = payload_for(&config, &resolved);
            let json = serde_json::to_string_pretty(&payload).map_err(|source| CliError::Json {
                path: PathBuf::from("<stdout>"),
                source,
            })?;
            println!("{json}");
        }
        Commands::Label { input } => {
            let config = EngineConfig::from_env()?;
            let raw: Value = read_json(&input)?;
            let values = match raw {
                Value::Array(items) => items,
                Value::Object(mut obj) => match obj.remove("scenarios") {
                    Some(Value::Array(items)) => items,
                    _ => {
                        return Err(CliError::Usage(format!(
                            "{}: expected an array or an object with \"scenarios\"",
                            input.display()
                        )))
                    }
                },
                _ => {
                    return Err(CliError::Usage(format!(
                        "{}: expected a JSON array of scenarios",
                        input.display()
                    )))
                }
            };
            let rows = label_rows(&config, &parse::scenario_records(&values));
            let json = serde_json::to_string_pretty(&rows).map_err(|source| CliError::Json {
                path: PathBuf::from("<stdout>"),
                source,
            })?;
            println!("{json}");
        }
        Commands::Generate {
            input,
            out,
            trace,
            drafts,
            project,
        } => {
            let config = EngineConfig::from_env()?;
            let resolved = resolve_input(&config, &input).await?;
            let payload = payload_for(&config, &resolved);

            let gateway = ProviderGateway::connect(
                config.require_api_key()?,
                config.endpoint.base_url.as_str(),
                config.generation.timeout,
                Arc::new(TracingUsageSink),
                config.gateway.clone(),
            )?;
            let mut engine = ScenarioEngine::new(
                Arc::new(gateway),
                config.generation.clone(),
                config.gap_fill.clone(),
            );

            let mut worker = None;
            if let Some(path) = &trace {
                let (sink, w) = JsonlResponseSink::new(path)?;
                engine = engine.with_response_sink(Arc::new(sink) as Arc<dyn ResponseSink>);
                worker = Some(w);
            }

            let result = engine.generate(&payload).await;
            // The engine owns the last sink clone; drop it so the writer drains.
            drop(engine);
            if let Some(w) = worker {
                w.join()?;
            }

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    if let Some(partial) = e.partial() {
                        let path = out.with_extension("partial.json");
                        write_json(&path, partial)?;
                        warn!(path = %path.display(), "partial outcome written");
                    }
                    return Err(e.into());
                }
            };

            let report = GenerateReport {
                outcome: &outcome,
                labels: label_rows(&config, &outcome.scenarios),
                provenance: resolved.provenance.as_ref(),
            };
            write_json(&out, &report)?;
            info!(
                path = %out.display(),
                scenarios = outcome.scenarios.len(),
                "outcome written"
            );

            if let (Some(path), Some(story_key)) = (drafts, resolved.story_key.clone()) {
                let target = PublishTarget {
                    anchor_key: resolved.anchor_key.clone().unwrap_or_else(|| story_key.clone()),
                    story_key,
                };
                let publisher = DraftPublisher::new(project);
                publish_scenarios(&publisher, &config.gate, &target, &outcome.scenarios).await?;
                write_json(&path, &publisher.into_drafts())?;
            }
        }
    }

    Ok(())
}

async fn resolve_input(config: &EngineConfig, input: &InputArgs) -> Result<Resolved, CliError> {
    if let Some(path) = &input.sources {
        let story = input
            .story
            .as_deref()
            .ok_or_else(|| CliError::Usage("--sources requires --story".to_string()))?;
        let sources: StaticSources = read_json(path)?;
        let gathered = gather_context(&sources, &sources, &config.context, story).await?;
        return Ok(Resolved {
            truth: gathered.truth_text,
            context: gathered.context_text,
            confluence: gathered.confluence_text,
            story_key: Some(gathered.story_key),
            anchor_key: Some(gathered.anchor_key),
            provenance: Some(gathered.provenance),
        });
    }

    let truth_path = input
        .truth
        .as_ref()
        .ok_or_else(|| CliError::Usage("either --truth or --sources is required".to_string()))?;
    Ok(Resolved {
        truth: read_text(truth_path)?,
        context: read_optional(input.context.as_deref())?,
        confluence: read_optional(input.confluence.as_deref())?,
        story_key: input.story.clone(),
        anchor_key: None,
        provenance: None,
    })
}

fn payload_for(config: &EngineConfig, resolved: &Resolved) -> ContextPayload {
    build_payload(
        &config.budget,
        &prompts::initial_system(),
        &resolved.truth,
        &resolved.context,
        &resolved.confluence,
    )
}

fn label_rows(
    config: &EngineConfig,
    scenarios: &[scenario_harness::ScenarioRecord],
) -> Vec<LabelRow> {
    scenarios
        .iter()
        .map(|rec| LabelRow {
            inventory_id: rec.inventory_id,
            label: config.gate.label(rec),
        })
        .collect()
}

fn read_text(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_optional(path: Option<&Path>) -> Result<String, CliError> {
    path.map(read_text).transpose().map(Option::unwrap_or_default)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let raw = read_text(path)?;
    serde_json::from_str(&raw).map_err(|source| CliError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(value).map_err(|source| CliError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, json).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}
