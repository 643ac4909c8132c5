//! Backpressure coordinator: the Parser → Batcher → Sink control loop.
//!
//! ```text
//! IDLE → STREAMING → (PAUSED ⇄ STREAMING)* → DRAINING → DONE
//!            └────────────┴──────────────────────┴────→ FAILED
//! ```
//!
//! Records are pulled only while `STREAMING`. Sealing a batch moves the
//! machine to `PAUSED`, and the batch is fully written before the next pull,
//! so at most one batch is ever in flight and the batcher is empty while it
//! is. Memory therefore stays at one batch of records regardless of input
//! size.

use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};

use crate::batch::{Batch, Batcher, DEFAULT_BATCH_SIZE};
use crate::cancel::CancelToken;
use crate::parser::{ByteCounter, ParseError, ParserOptions, RecordParser};
use crate::progress::{fmt_num, upgrade_to_bar};
use crate::record::RawRecord;
use crate::report::{ErrorDescriptor, IngestionReport};
use crate::sink::SinkWriter;
use crate::store::{DocumentStore, WriteMode};

/// Progress update interval (every N records to avoid overhead)
const UPDATE_INTERVAL: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Streaming,
    Paused,
    Draining,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Streaming => "STREAMING",
            Self::Paused => "PAUSED",
            Self::Draining => "DRAINING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Chooses the write mode for each batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrictPolicy {
    /// Strict for every batch except the trailing one written while draining
    #[default]
    AllButFinal,
    Always,
    Never,
}

impl StrictPolicy {
    pub fn mode_for(self, is_final: bool) -> WriteMode {
        match self {
            Self::AllButFinal if is_final => WriteMode::Lenient,
            Self::AllButFinal | Self::Always => WriteMode::Strict,
            Self::Never => WriteMode::Lenient,
        }
    }
}

impl fmt::Display for StrictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllButFinal => f.write_str("all-but-final"),
            Self::Always => f.write_str("always"),
            Self::Never => f.write_str("never"),
        }
    }
}

impl FromStr for StrictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all-but-final" => Ok(Self::AllButFinal),
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            other => Err(format!(
                "unknown strict policy {other:?} (expected all-but-final, always or never)"
            )),
        }
    }
}

/// Runtime configuration for one pipeline
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub batch_size: NonZeroUsize,
    pub strict: StrictPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: NonZeroUsize::new(DEFAULT_BATCH_SIZE).expect("non-zero default"),
            strict: StrictPolicy::default(),
        }
    }
}

/// One ingestion run against a caller-supplied store.
///
/// Consumed by [`run`](Pipeline::run) / [`ingest_file`](Pipeline::ingest_file),
/// which always return a finalized [`IngestionReport`].
pub struct Pipeline<'a, S: ?Sized> {
    store: &'a S,
    config: PipelineConfig,
    cancel: CancelToken,
    pb: ProgressBar,
    label: String,
    bytes: Option<ByteCounter>,
    state: PipelineState,
}

impl<'a, S: DocumentStore + ?Sized> Pipeline<'a, S> {
    pub fn new(store: &'a S, config: PipelineConfig) -> Self {
        Self {
            store,
            config,
            cancel: CancelToken::new(),
            pb: ProgressBar::hidden(),
            label: "ingest".to_string(),
            bytes: None,
            state: PipelineState::Idle,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, pb: ProgressBar) -> Self {
        self.pb = pb;
        self
    }

    /// Name used in log lines
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Open `path` and run it to completion
    pub fn ingest_file(mut self, path: &Path, options: ParserOptions) -> IngestionReport {
        match RecordParser::open(path, options) {
            Ok((parser, counter)) => {
                if let Ok(meta) = std::fs::metadata(path) {
                    upgrade_to_bar(&self.pb, meta.len());
                }
                self.bytes = Some(counter);
                self.run(parser)
            }
            Err(e) => self.abort(ErrorDescriptor::from(&e)),
        }
    }

    /// Drive `records` through batching and the sink until a terminal state
    pub fn run<I>(mut self, records: I) -> IngestionReport
    where
        I: IntoIterator<Item = Result<RawRecord, ParseError>>,
    {
        let start = Instant::now();
        let mut records = records.into_iter();
        let mut batcher = Batcher::new(self.config.batch_size);
        let mut sink = SinkWriter::new(self.store);
        let mut report = IngestionReport::default();

        self.transition(PipelineState::Streaming);
        while self.state == PipelineState::Streaming {
            if self.cancel.is_cancelled() {
                self.fail(&mut report, &mut batcher, ErrorDescriptor::cancelled());
                break;
            }
            match records.next() {
                Some(Ok(record)) => {
                    report.rows_parsed += 1;
                    match batcher.push(record) {
                        Some(batch) => {
                            self.transition(PipelineState::Paused);
                            report.observe_buffered(batch.len() + batcher.len());
                            self.write(&mut sink, batch, &mut report);
                            if self.state == PipelineState::Paused {
                                self.transition(PipelineState::Streaming);
                            }
                        }
                        None => report.observe_buffered(batcher.len()),
                    }
                    if report.rows_parsed % UPDATE_INTERVAL == 0 {
                        self.tick(&report);
                    }
                }
                Some(Err(e)) => self.fail(&mut report, &mut batcher, ErrorDescriptor::from(&e)),
                None => self.transition(PipelineState::Draining),
            }
        }

        if self.state == PipelineState::Draining {
            if self.cancel.is_cancelled() {
                self.fail(&mut report, &mut batcher, ErrorDescriptor::cancelled());
            } else {
                if let Some(batch) = batcher.finish() {
                    report.observe_buffered(batch.len());
                    self.write(&mut sink, batch, &mut report);
                }
                if self.state == PipelineState::Draining {
                    self.transition(PipelineState::Done);
                }
            }
        }

        // Release the source before handing the report back
        drop(records);
        report.finalize(self.state, start.elapsed());
        self.tick(&report);
        self.pb.finish_and_clear();
        self.log_summary(&report);
        report
    }

    fn write(&mut self, sink: &mut SinkWriter<'_, S>, batch: Batch, report: &mut IngestionReport) {
        let mode = self
            .config
            .strict
            .mode_for(self.state == PipelineState::Draining);
        log::debug!(
            "{}: writing batch {} ({} records, rows {}.., {mode})",
            self.label,
            batch.seq(),
            batch.len(),
            batch.first_row()
        );

        match sink.write(batch, mode) {
            Ok(outcome) => {
                for failure in &outcome.failures {
                    log::warn!(
                        "{}: row {} rejected: {}",
                        self.label,
                        failure.row,
                        failure.reason
                    );
                }
                report.record_batch(&outcome);
            }
            Err(e) => {
                log::error!("{}: {e}", self.label);
                report.record_error(ErrorDescriptor::from(&e));
                self.transition(PipelineState::Failed);
            }
        }
    }

    /// Stop intake for good; the unsealed partial batch is never written
    fn fail(
        &mut self,
        report: &mut IngestionReport,
        batcher: &mut Batcher,
        error: ErrorDescriptor,
    ) {
        let dropped = batcher.discard();
        if dropped > 0 {
            log::debug!("{}: discarding {dropped} unsealed records", self.label);
        }
        log::error!("{}: {}", self.label, error.message);
        report.record_error(error);
        self.transition(PipelineState::Failed);
    }

    /// Fail before any I/O started
    fn abort(mut self, error: ErrorDescriptor) -> IngestionReport {
        log::error!("{}: {}", self.label, error.message);
        let mut report = IngestionReport::default();
        report.record_error(error);
        self.transition(PipelineState::Failed);
        report.finalize(self.state, Duration::ZERO);
        report
    }

    fn transition(&mut self, to: PipelineState) {
        match (self.state, to) {
            (PipelineState::Streaming, PipelineState::Paused)
            | (PipelineState::Paused, PipelineState::Streaming) => {
                log::trace!("{}: {} -> {to}", self.label, self.state);
            }
            _ => log::debug!("{}: {} -> {to}", self.label, self.state),
        }
        self.state = to;
    }

    fn tick(&self, report: &IngestionReport) {
        if let Some(bytes) = &self.bytes {
            self.pb.set_position(bytes.load(Ordering::Relaxed));
        }
        self.pb.set_message(format!(
            "{} rows written",
            fmt_num(report.records_written)
        ));
    }

    fn log_summary(&self, report: &IngestionReport) {
        let secs = Duration::from_millis(report.elapsed_ms).as_secs_f64();
        log::info!(
            "{}: {}, {} written, {} failed, {} batches, {:.1}s",
            self.label,
            report.state,
            fmt_num(report.records_written),
            fmt_num(report.records_failed),
            report.batches_written,
            secs
        );
        if report.records_written > 0 && secs > 0.0 {
            log::debug!(
                "{}: throughput {:.0} records/sec",
                self.label,
                report.records_written as f64 / secs
            );
        }
    }
}
