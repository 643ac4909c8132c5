//! Ingestion report: terminal outcome of one pipeline run

use std::time::Duration;

use serde::Serialize;

use crate::parser::ParseError;
use crate::pipeline::PipelineState;
use crate::sink::{BatchWriteError, BatchWriteOutcome};

/// Category of a recorded error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The input could not be opened or read
    Source,
    /// Malformed row
    Parse,
    /// A batch was refused as a whole
    BatchWrite,
    /// A single record was refused in a lenient write
    PartialRecord,
    Cancelled,
}

impl ErrorKind {
    pub fn is_fatal(self) -> bool {
        self != Self::PartialRecord
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDescriptor {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<u64>,
}

impl From<&ParseError> for ErrorDescriptor {
    fn from(e: &ParseError) -> Self {
        let kind = match e {
            ParseError::Io(_) => ErrorKind::Source,
            _ => ErrorKind::Parse,
        };
        Self {
            kind,
            message: e.to_string(),
            row: e.row(),
            batch: None,
        }
    }
}

impl From<&BatchWriteError> for ErrorDescriptor {
    fn from(e: &BatchWriteError) -> Self {
        Self {
            kind: ErrorKind::BatchWrite,
            message: e.to_string(),
            row: e.row(),
            batch: Some(e.batch),
        }
    }
}

impl ErrorDescriptor {
    pub fn cancelled() -> Self {
        Self {
            kind: ErrorKind::Cancelled,
            message: "ingestion cancelled".to_string(),
            row: None,
            batch: None,
        }
    }
}

/// Accumulates batch outcomes; read once by the caller after a terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    pub records_written: u64,
    pub records_failed: u64,
    pub errors: Vec<ErrorDescriptor>,
    pub finished: bool,
    /// Data rows decoded by the parser
    pub rows_parsed: u64,
    pub batches_written: u64,
    /// Most records held in memory at any point (buffered + in flight)
    pub peak_buffered: usize,
    pub state: PipelineState,
    pub elapsed_ms: u64,
}

impl Default for IngestionReport {
    fn default() -> Self {
        Self {
            records_written: 0,
            records_failed: 0,
            errors: Vec::new(),
            finished: false,
            rows_parsed: 0,
            batches_written: 0,
            peak_buffered: 0,
            state: PipelineState::Idle,
            elapsed_ms: 0,
        }
    }
}

impl IngestionReport {
    pub fn record_batch(&mut self, outcome: &BatchWriteOutcome) {
        self.batches_written += 1;
        self.records_written += outcome.written as u64;
        self.records_failed += outcome.failures.len() as u64;
        self.errors
            .extend(outcome.failures.iter().map(|f| ErrorDescriptor {
                kind: ErrorKind::PartialRecord,
                message: f.reason.clone(),
                row: Some(f.row),
                batch: Some(outcome.batch),
            }));
    }

    pub fn record_error(&mut self, error: ErrorDescriptor) {
        self.errors.push(error);
    }

    pub fn observe_buffered(&mut self, n: usize) {
        self.peak_buffered = self.peak_buffered.max(n);
    }

    pub fn finalize(&mut self, state: PipelineState, elapsed: Duration) {
        debug_assert!(state.is_terminal(), "finalize in non-terminal state {state}");
        self.state = state;
        self.elapsed_ms = elapsed.as_millis() as u64;
        self.finished = true;
    }

    pub fn first_error(&self) -> Option<&ErrorDescriptor> {
        self.errors.first()
    }

    /// The error that moved the pipeline to `FAILED`, if any
    pub fn fatal_error(&self) -> Option<&ErrorDescriptor> {
        self.errors.iter().find(|e| e.kind.is_fatal())
    }

    pub fn is_success(&self) -> bool {
        self.state == PipelineState::Done
    }
}
