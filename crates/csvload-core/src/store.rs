//! Document store boundary and an in-memory implementation

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::record::RawRecord;

/// Default per-document size limit (16 MiB)
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 16 * 1024 * 1024;

/// How a store handles a rejected document inside one `insert_many` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Any rejection fails the whole call; nothing from it is persisted
    Strict,
    /// Rejected documents are skipped, the rest are persisted
    Lenient,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => f.write_str("strict"),
            Self::Lenient => f.write_str("lenient"),
        }
    }
}

/// A persisted record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Store-assigned, increasing in insertion order
    pub id: u64,
    pub inserted_at: DateTime<Utc>,
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn from_record(id: u64, inserted_at: DateTime<Utc>, record: &RawRecord) -> Self {
        Self {
            id,
            inserted_at,
            fields: record.to_json_map(),
        }
    }
}

/// Document refused by the store's validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Position within the `insert_many` call
    pub index: usize,
    pub reason: String,
}

/// Result of one `insert_many` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: usize,
    /// Only populated in [`WriteMode::Lenient`]
    pub rejected: Vec<Rejection>,
}

#[derive(Debug)]
pub enum StoreError {
    /// Strict-mode rejection; nothing from the call was persisted
    Rejected(Rejection),
    Io(io::Error),
    /// Persisted data could not be decoded
    Corrupt { path: PathBuf, message: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(r) => write!(f, "document {} rejected: {}", r.index, r.reason),
            Self::Io(e) => write!(f, "IO: {e}"),
            Self::Corrupt { path, message } => {
                write!(f, "corrupt data in {}: {message}", path.display())
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Persistent document store, supplied to the pipeline by the caller.
pub trait DocumentStore: Send + Sync {
    /// Persist `docs` in order as one write.
    fn insert_many(
        &self,
        docs: Vec<RawRecord>,
        mode: WriteMode,
    ) -> Result<InsertOutcome, StoreError>;

    /// Most recently inserted documents, newest first
    fn recent(&self, limit: usize) -> Result<Vec<Document>, StoreError>;
}

/// Store-side document validation
#[derive(Debug, Clone, Copy)]
pub struct DocumentLimits {
    pub max_document_bytes: usize,
}

impl Default for DocumentLimits {
    fn default() -> Self {
        Self {
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
        }
    }
}

impl DocumentLimits {
    /// Reason the store would refuse `record`, if any
    pub fn check(&self, record: &RawRecord) -> Result<(), String> {
        if let Some((name, _)) = record
            .iter()
            .find(|(name, _)| name.starts_with('$') || name.contains('\0'))
        {
            return Err(format!("invalid field name {name:?}"));
        }
        let size = serde_json::to_vec(record).map_or(usize::MAX, |v| v.len());
        if size > self.max_document_bytes {
            return Err(format!(
                "document is {size} bytes, limit is {}",
                self.max_document_bytes
            ));
        }
        Ok(())
    }

    /// Split `docs` into accepted documents and lenient-mode rejections.
    ///
    /// In strict mode the first rejection is returned as an error.
    pub fn partition(
        &self,
        docs: Vec<RawRecord>,
        mode: WriteMode,
    ) -> Result<(Vec<RawRecord>, Vec<Rejection>), StoreError> {
        let mut accepted = Vec::with_capacity(docs.len());
        let mut rejected = Vec::new();
        for (index, doc) in docs.into_iter().enumerate() {
            match self.check(&doc) {
                Ok(()) => accepted.push(doc),
                Err(reason) => {
                    let rejection = Rejection { index, reason };
                    if mode == WriteMode::Strict {
                        return Err(StoreError::Rejected(rejection));
                    }
                    rejected.push(rejection);
                }
            }
        }
        Ok((accepted, rejected))
    }
}

/// In-process store. Not durable; used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    limits: DocumentLimits,
    docs: Mutex<Vec<Document>>,
}

impl MemoryStore {
    pub fn new(limits: DocumentLimits) -> Self {
        Self {
            limits,
            docs: Mutex::default(),
        }
    }

    /// Total documents stored
    pub fn len(&self) -> usize {
        self.docs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All documents in insertion order
    pub fn snapshot(&self) -> Vec<Document> {
        self.docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DocumentStore for MemoryStore {
    fn insert_many(
        &self,
        docs: Vec<RawRecord>,
        mode: WriteMode,
    ) -> Result<InsertOutcome, StoreError> {
        let (accepted, rejected) = self.limits.partition(docs, mode)?;
        let now = Utc::now();
        let mut stored = self.docs.lock().unwrap_or_else(PoisonError::into_inner);
        let first_id = stored.last().map_or(1, |d| d.id + 1);
        stored.extend(
            accepted
                .iter()
                .zip(first_id..)
                .map(|(record, id)| Document::from_record(id, now, record)),
        );
        Ok(InsertOutcome {
            inserted: accepted.len(),
            rejected,
        })
    }

    fn recent(&self, limit: usize) -> Result<Vec<Document>, StoreError> {
        let stored = self.docs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(stored.iter().rev().take(limit).cloned().collect())
    }
}
