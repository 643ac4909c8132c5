//! Append-only segment store
//!
//! Directory layout:
//! ```text
//! {base}/
//! ├── store.json                   # format version, creation time
//! ├── store.lock                   # held exclusively while a segment is written
//! └── segments/
//!     ├── 0000000000000001.jsonl   # one segment per insert_many, named by first id
//!     ├── 0000000000001001.jsonl
//!     └── ...
//! ```
//!
//! Each segment is written to `.tmp`, synced, then hard-linked into place, so a
//! batch is either fully visible or absent and a committed segment is never
//! replaced. Ids inside a segment are contiguous, starting at the id in its
//! name.
//!
//! Any number of handles, in one process or several, may share a directory.
//! Writers take `store.lock` and re-derive the next id from the newest segment
//! before each write.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use fs4::fs_std::FileExt;
use serde::Serialize;

use csvload_core::{
    Document, DocumentLimits, DocumentStore, InsertOutcome, RawRecord, StoreError, WriteMode,
};

use crate::manifest::StoreManifest;

const SEGMENT_EXT: &str = "jsonl";
const TMP_SUFFIX: &str = ".tmp";
const LOCK_FILE: &str = "store.lock";

/// Verification result for one segment
#[derive(Debug, Serialize)]
pub struct SegmentCheck {
    pub name: String,
    pub documents: usize,
    pub error: Option<String>,
}

impl SegmentCheck {
    pub fn ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Durable document store backed by JSON-lines segment files.
pub struct SegmentStore {
    base: PathBuf,
    limits: DocumentLimits,
    manifest: StoreManifest,
    /// Orders writers on this handle; `store.lock` orders everyone else
    writer: Mutex<()>,
}

impl SegmentStore {
    /// Open (or initialize) the store rooted at `base`.
    pub fn open(base: &Path, limits: DocumentLimits) -> Result<Self> {
        let segments = base.join("segments");
        fs::create_dir_all(&segments)
            .with_context(|| format!("failed to create segments dir: {}", segments.display()))?;
        let _lock = lock_writers(base)
            .with_context(|| format!("failed to lock store {}", base.display()))?;
        let manifest = StoreManifest::load_or_init(base)?;

        let store = Self::with_manifest(base, limits, manifest);
        // No writer holds a tmp while we have the lock
        let removed = store.cleanup_tmp()?;
        if removed > 0 {
            log::warn!("store: removed {removed} interrupted segment write(s)");
        }

        let next = store.next_id()?;
        log::debug!("store: opened {} (next id {next})", base.display());
        Ok(store)
    }

    /// Open a store that already exists, creating nothing.
    ///
    /// Read commands use this so a mistyped `data_dir` fails instead of
    /// initializing an empty store.
    pub fn open_existing(base: &Path, limits: DocumentLimits) -> Result<Self> {
        let manifest = StoreManifest::load(base)
            .with_context(|| format!("no store at {}", base.display()))?;
        let segments = base.join("segments");
        if !segments.is_dir() {
            bail!("{}: missing segments directory", base.display());
        }
        Ok(Self::with_manifest(base, limits, manifest))
    }

    fn with_manifest(base: &Path, limits: DocumentLimits, manifest: StoreManifest) -> Self {
        Self {
            base: base.to_path_buf(),
            limits,
            manifest,
            writer: Mutex::new(()),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn segments_dir(&self) -> PathBuf {
        self.base.join("segments")
    }

    pub fn manifest(&self) -> &StoreManifest {
        &self.manifest
    }

    fn segment_path(&self, first_id: u64) -> PathBuf {
        self.segments_dir()
            .join(format!("{first_id:016}.{SEGMENT_EXT}"))
    }

    /// Committed segment files, oldest first
    pub fn segment_paths(&self) -> io::Result<Vec<PathBuf>> {
        let dir = glob::Pattern::escape(&self.segments_dir().to_string_lossy());
        let pattern = format!("{dir}/*.{SEGMENT_EXT}");
        let mut paths: Vec<_> = glob::glob(&pattern)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?
            .filter_map(|e| e.ok())
            .filter(|p| p.is_file())
            .collect();
        // Zero-padded names: lexical order is id order
        paths.sort();
        Ok(paths)
    }

    /// Remove segment files left behind by an interrupted write.
    pub fn cleanup_tmp(&self) -> Result<usize> {
        let dir = self.segments_dir();
        let mut count = 0;

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(TMP_SUFFIX) && entry.path().is_file() {
                log::warn!("store: removing stale tmp {name}");
                fs::remove_file(entry.path())
                    .with_context(|| format!("failed to remove {}", entry.path().display()))?;
                count += 1;
            }
        }

        Ok(count)
    }

    /// One past the last committed id, read from the newest segment
    fn next_id(&self) -> Result<u64, StoreError> {
        let paths = self.segment_paths()?;
        let Some(last) = paths.last() else {
            return Ok(1);
        };
        let first_id = segment_first_id(last).ok_or_else(|| StoreError::Corrupt {
            path: last.clone(),
            message: "name is not a document id".to_string(),
        })?;
        let docs = read_segment(last)?;
        Ok(docs.last().map_or(first_id, |d| d.id + 1))
    }

    /// Re-read every segment and check it decodes with contiguous ids.
    pub fn verify(&self) -> Result<Vec<SegmentCheck>> {
        let mut results = Vec::new();
        let mut expected_min = 1;

        for path in self.segment_paths()? {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let check = match check_segment(&path, expected_min) {
                Ok((documents, next)) => {
                    expected_min = next;
                    SegmentCheck {
                        name,
                        documents,
                        error: None,
                    }
                }
                Err(message) => {
                    log::warn!("verify {name}: {message}");
                    SegmentCheck {
                        name,
                        documents: 0,
                        error: Some(message),
                    }
                }
            };
            results.push(check);
        }

        Ok(results)
    }
}

impl DocumentStore for SegmentStore {
    fn insert_many(
        &self,
        docs: Vec<RawRecord>,
        mode: WriteMode,
    ) -> Result<InsertOutcome, StoreError> {
        let (accepted, rejected) = self.limits.partition(docs, mode)?;
        if accepted.is_empty() {
            return Ok(InsertOutcome {
                inserted: 0,
                rejected,
            });
        }

        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let _lock = lock_writers(&self.base)?;
        // Other handles may have committed since this one last wrote
        let first_id = self.next_id()?;
        let now = Utc::now();
        let documents: Vec<_> = accepted
            .iter()
            .zip(first_id..)
            .map(|(record, id)| Document::from_record(id, now, record))
            .collect();

        let path = self.segment_path(first_id);
        let tmp = path.with_extension(format!("{SEGMENT_EXT}{TMP_SUFFIX}"));
        if let Err(e) = write_jsonl(&tmp, &documents) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        commit_segment(&tmp, &path)?;

        log::trace!(
            "store: committed {} ({} documents)",
            path.display(),
            documents.len()
        );
        Ok(InsertOutcome {
            inserted: documents.len(),
            rejected,
        })
    }

    fn recent(&self, limit: usize) -> Result<Vec<Document>, StoreError> {
        let mut out = Vec::new();
        if limit == 0 {
            return Ok(out);
        }
        for path in self.segment_paths()?.iter().rev() {
            let docs = read_segment(path)?;
            let want = limit - out.len();
            out.extend(docs.into_iter().rev().take(want));
            if out.len() == limit {
                break;
            }
        }
        Ok(out)
    }
}

/// Exclusive lock on `{base}/store.lock`, released when the file is dropped
fn lock_writers(base: &Path) -> io::Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(base.join(LOCK_FILE))?;
    file.lock_exclusive()?;
    Ok(file)
}

/// Link `tmp` into place as `path`, then drop the tmp name.
///
/// Fails with `AlreadyExists` instead of replacing a committed segment.
fn commit_segment(tmp: &Path, path: &Path) -> io::Result<()> {
    let linked = fs::hard_link(tmp, path);
    if let Err(e) = fs::remove_file(tmp) {
        if linked.is_ok() {
            // Committed anyway; the next open sweeps it
            log::warn!("store: could not remove {}: {e}", tmp.display());
        }
    }
    linked
}

fn segment_first_id(path: &Path) -> Option<u64> {
    path.file_stem()?.to_str()?.parse().ok()
}

fn write_jsonl(path: &Path, docs: &[Document]) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for doc in docs {
        serde_json::to_writer(&mut out, doc)?;
        out.write_all(b"\n")?;
    }
    let file = out.into_inner().map_err(io::IntoInnerError::into_error)?;
    file.sync_all()
}

fn read_segment(path: &Path) -> Result<Vec<Document>, StoreError> {
    let reader = BufReader::new(File::open(path)?);
    let mut docs = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        let doc = serde_json::from_str(&line).map_err(|e| StoreError::Corrupt {
            path: path.to_path_buf(),
            message: format!("line {}: {e}", n + 1),
        })?;
        docs.push(doc);
    }
    Ok(docs)
}

/// Returns (document count, next expected id) or a description of the problem
fn check_segment(path: &Path, expected_min: u64) -> std::result::Result<(usize, u64), String> {
    let first_id = segment_first_id(path).ok_or("name is not a document id")?;
    if first_id < expected_min {
        return Err(format!(
            "first id {first_id} overlaps previous segment (expected >= {expected_min})"
        ));
    }
    let docs = read_segment(path).map_err(|e| e.to_string())?;
    if docs.is_empty() {
        return Err("empty segment".to_string());
    }
    for (doc, expected) in docs.iter().zip(first_id..) {
        if doc.id != expected {
            return Err(format!("id {} where {expected} was expected", doc.id));
        }
    }
    Ok((docs.len(), first_id + docs.len() as u64))
}
