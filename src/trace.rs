//! Raw-response capture for generation runs.
//!
//! Every response body the engine receives (initial, each repair attempt and
//! the final best-effort request) can be appended to a JSONL file for later
//! debugging. Writing happens on a background thread; [`ResponseWorker::join`]
//! flushes.

use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Which request of a run produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Initial,
    GapFill { attempt: u32 },
    Final,
}

impl Stage {
    pub fn label(&self) -> String {
        match self {
            Stage::Initial => "initial".to_string(),
            Stage::GapFill { attempt } => format!("missing_attempt_{attempt}"),
            Stage::Final => "missing_last".to_string(),
        }
    }

    pub fn caller(&self) -> &'static str {
        match self {
            Stage::Initial => "engine::initial",
            Stage::GapFill { .. } => "engine::gap_fill",
            Stage::Final => "engine::gap_fill_final",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseTrace {
    pub timestamp_ms: i64,
    pub run_id: Uuid,
    pub stage: String,
    /// Ids the request asked for; empty for the initial request.
    pub requested_ids: Vec<i64>,
    pub attempts: u32,
    pub content: String,
}

impl ResponseTrace {
    pub fn new(run_id: Uuid, stage: Stage, requested_ids: &[i64], content: &str) -> Self {
        Self {
            timestamp_ms: now_epoch_ms(),
            run_id,
            stage: stage.label(),
            requested_ids: requested_ids.to_vec(),
            attempts: 1,
            content: content.to_string(),
        }
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("trace channel closed")]
    Closed,
    #[error("trace worker failed: {0}")]
    Join(String),
}

pub trait ResponseSink: Send + Sync {
    fn record(&self, event: ResponseTrace) -> Result<(), TraceError>;
}

#[derive(Clone)]
pub struct JsonlResponseSink {
    sender: mpsc::Sender<ResponseTrace>,
}

pub struct ResponseWorker {
    handle: Option<std::thread::JoinHandle<Result<(), TraceError>>>,
}

impl ResponseWorker {
    /// Wait for the writer to drain. Drop every sink clone first.
    pub fn join(mut self) -> Result<(), TraceError> {
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(TraceError::Join("response writer panicked".to_string())),
            },
            None => Ok(()),
        }
    }
}

impl JsonlResponseSink {
    pub fn new(path: impl AsRef<Path>) -> Result<(Self, ResponseWorker), TraceError> {
        let file = std::fs::File::create(path)?;
        let (sender, receiver) = mpsc::channel::<ResponseTrace>();
        let handle = std::thread::spawn(move || write_loop(file, receiver));
        Ok((
            Self { sender },
            ResponseWorker {
                handle: Some(handle),
            },
        ))
    }
}

impl ResponseSink for JsonlResponseSink {
    fn record(&self, event: ResponseTrace) -> Result<(), TraceError> {
        self.sender.send(event).map_err(|_| TraceError::Closed)
    }
}

fn write_loop(file: std::fs::File, receiver: mpsc::Receiver<ResponseTrace>) -> Result<(), TraceError> {
    let mut writer = BufWriter::new(file);
    for event in receiver {
        let line = serde_json::to_string(&event).map_err(|e| TraceError::Serde(e.to_string()))?;
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
