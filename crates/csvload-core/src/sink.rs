//! Sink writer: one store write per sealed batch

use std::fmt;

use crate::batch::Batch;
use crate::store::{DocumentStore, StoreError, WriteMode};

/// A single record refused during a lenient batch write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    /// Data row number in the input file
    pub row: u64,
    pub reason: String,
}

/// Result of a completed batch write
#[derive(Debug, Clone)]
pub struct BatchWriteOutcome {
    pub batch: u64,
    pub mode: WriteMode,
    pub written: usize,
    pub failures: Vec<RecordFailure>,
}

impl BatchWriteOutcome {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// A batch the store refused as a whole
#[derive(Debug)]
pub struct BatchWriteError {
    pub batch: u64,
    pub first_row: u64,
    pub mode: WriteMode,
    pub cause: StoreError,
}

impl BatchWriteError {
    /// Input row of the record that caused a strict rejection
    pub fn row(&self) -> Option<u64> {
        match &self.cause {
            StoreError::Rejected(r) => Some(self.first_row + r.index as u64),
            _ => None,
        }
    }
}

impl fmt::Display for BatchWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch {} ({} write", self.batch, self.mode)?;
        if let Some(row) = self.row() {
            write!(f, ", row {row}")?;
        }
        write!(f, "): {}", self.cause)
    }
}

impl std::error::Error for BatchWriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// Writes sealed batches to a caller-supplied store, one call per batch.
///
/// Takes each batch by value; nothing upstream can touch it once handed over.
/// Never retries.
pub struct SinkWriter<'a, S: ?Sized> {
    store: &'a S,
    batches_written: u64,
    records_written: u64,
}

impl<'a, S: DocumentStore + ?Sized> SinkWriter<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            batches_written: 0,
            records_written: 0,
        }
    }

    pub fn write(
        &mut self,
        batch: Batch,
        mode: WriteMode,
    ) -> Result<BatchWriteOutcome, BatchWriteError> {
        let seq = batch.seq();
        let first_row = batch.first_row();

        let outcome = self
            .store
            .insert_many(batch.into_records(), mode)
            .map_err(|cause| BatchWriteError {
                batch: seq,
                first_row,
                mode,
                cause,
            })?;

        self.batches_written += 1;
        self.records_written += outcome.inserted as u64;

        let failures = outcome
            .rejected
            .into_iter()
            .map(|r| RecordFailure {
                row: first_row + r.index as u64,
                reason: r.reason,
            })
            .collect();

        Ok(BatchWriteOutcome {
            batch: seq,
            mode,
            written: outcome.inserted,
            failures,
        })
    }

    pub fn batches_written(&self) -> u64 {
        self.batches_written
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }
}
