//! Upload staging: size limit and temporary-file lifecycle.
//!
//! An accepted upload is copied into the configured temp directory under a
//! unique `{unix-millis}-{original-name}` and handed to the pipeline as a
//! path. The [`StagedUpload`] guard deletes that file when dropped.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

/// Default upload size limit (200 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 200 * MIB;

const MIB: u64 = 1024 * 1024;

/// Default staging directory
pub const DEFAULT_TEMP_DIR: &str = "./_temp";

/// Attempts at finding a free staging name before giving up
const MAX_NAME_ATTEMPTS: u32 = 100;

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub max_bytes: u64,
    pub temp_dir: PathBuf,
    /// Leave staged files behind for external cleanup
    pub keep_temp: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            temp_dir: PathBuf::from(DEFAULT_TEMP_DIR),
            keep_temp: false,
        }
    }
}

#[derive(Debug)]
pub enum UploadError {
    /// No file was supplied
    Missing,
    TooLarge { limit: u64 },
    Io(io::Error),
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("No file was uploaded"),
            Self::TooLarge { limit } if *limit < MIB => write!(
                f,
                "File exceeds the maximum allowed size ({limit} bytes)"
            ),
            Self::TooLarge { limit } => write!(
                f,
                "File exceeds the maximum allowed size ({}MB)",
                limit / MIB
            ),
            Self::Io(e) => write!(f, "IO: {e}"),
        }
    }
}

impl std::error::Error for UploadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for UploadError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl UploadError {
    /// Client-side problem (as opposed to a server-side I/O failure)
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Missing | Self::TooLarge { .. })
    }
}

/// A staged upload on disk. Deleted on drop unless kept.
#[derive(Debug)]
pub struct StagedUpload {
    path: PathBuf,
    original_name: String,
    size: u64,
    keep: bool,
}

impl StagedUpload {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => log::debug!("removed staged upload {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("failed to remove {}: {e}", self.path.display()),
        }
    }
}

/// `{unix-millis}-{file name}`, with any directory part of `original` dropped
pub fn unique_name(original: &str, now: DateTime<Utc>) -> String {
    let name = Path::new(original)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    format!("{}-{name}", now.timestamp_millis())
}

/// Copy `source` into the temp directory, enforcing the size limit.
///
/// A known `size_hint` over the limit is rejected before anything is written;
/// otherwise the copy stops at `limit + 1` bytes and the partial file is removed.
pub fn stage_upload(
    mut source: impl Read,
    name: &str,
    size_hint: Option<u64>,
    config: &UploadConfig,
) -> Result<StagedUpload, UploadError> {
    let limit = config.max_bytes;
    if size_hint.is_some_and(|len| len > limit) {
        return Err(UploadError::TooLarge { limit });
    }

    fs::create_dir_all(&config.temp_dir)?;
    let (mut file, path) = create_unique(&config.temp_dir, &unique_name(name, Utc::now()))?;
    // keep=false until the copy succeeds, so failures never leave partial files
    let mut staged = StagedUpload {
        path,
        original_name: name.to_string(),
        size: 0,
        keep: false,
    };

    // One byte past the limit tells "at the limit" from "over it"
    let copied = io::copy(&mut (&mut source).take(limit.saturating_add(1)), &mut file)?;
    if copied > limit {
        log::warn!("{name}: upload exceeds {limit} bytes, discarding");
        return Err(UploadError::TooLarge { limit });
    }

    staged.size = copied;
    staged.keep = config.keep_temp;
    log::debug!("{name}: staged {copied} bytes at {}", staged.path.display());
    Ok(staged)
}

/// Stage a local file. A missing path is treated as a missing upload.
pub fn stage_file(path: &Path, config: &UploadConfig) -> Result<StagedUpload, UploadError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(UploadError::Missing),
        Err(e) => return Err(e.into()),
    };
    let meta = file.metadata()?;
    if !meta.is_file() {
        return Err(UploadError::Missing);
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    stage_upload(file, &name, Some(meta.len()), config)
}

/// Create `dir/name`, or `dir/name.N` if taken
fn create_unique(dir: &Path, name: &str) -> io::Result<(File, PathBuf)> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let path = if attempt == 0 {
            dir.join(name)
        } else {
            dir.join(format!("{name}.{attempt}"))
        };
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => return Ok((f, path)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free staging name for {name}"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn config(dir: &TempDir, max_bytes: u64) -> UploadConfig {
        UploadConfig {
            max_bytes,
            temp_dir: dir.path().join("_temp"),
            keep_temp: false,
        }
    }

    fn staged_files(dir: &TempDir) -> usize {
        fs::read_dir(dir.path().join("_temp"))
            .map(|rd| rd.count())
            .unwrap_or(0)
    }

    #[test]
    fn unique_name_uses_millis_and_file_name() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(unique_name("rows.csv", now), "1700000000123-rows.csv");
        assert_eq!(unique_name("../../etc/rows.csv", now), "1700000000123-rows.csv");
    }

    #[test]
    fn stages_and_removes_on_drop() {
        let dir = TempDir::new().unwrap();
        let staged = stage_upload(Cursor::new(b"a,b\n1,2\n"), "rows.csv", None, &config(&dir, 1024))
            .unwrap();
        assert_eq!(staged.size(), 8);
        assert_eq!(fs::read(staged.path()).unwrap(), b"a,b\n1,2\n");
        assert!(staged.path().file_name().unwrap().to_string_lossy().ends_with("-rows.csv"));

        let path = staged.path().to_path_buf();
        drop(staged);
        assert!(!path.exists());
    }

    #[test]
    fn keep_temp_leaves_file() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir, 1024);
        cfg.keep_temp = true;
        let staged = stage_upload(Cursor::new(b"a\n1\n"), "rows.csv", None, &cfg).unwrap();
        let path = staged.path().to_path_buf();
        drop(staged);
        assert!(path.exists());
    }

    #[test]
    fn known_oversize_rejected_before_copy() {
        let dir = TempDir::new().unwrap();
        let err = stage_upload(Cursor::new(Vec::new()), "big.csv", Some(2048), &config(&dir, 1024))
            .unwrap_err();
        assert!(matches!(err, UploadError::TooLarge { limit: 1024 }));
        assert!(err.is_rejection());
        assert_eq!(staged_files(&dir), 0);
    }

    #[test]
    fn streamed_oversize_discards_partial_file() {
        let dir = TempDir::new().unwrap();
        let data = vec![b'x'; 4096];
        let err = stage_upload(Cursor::new(data), "big.csv", None, &config(&dir, 1024)).unwrap_err();
        assert!(matches!(err, UploadError::TooLarge { .. }));
        assert_eq!(staged_files(&dir), 0);
    }

    #[test]
    fn exactly_at_limit_is_accepted() {
        let dir = TempDir::new().unwrap();
        let staged =
            stage_upload(Cursor::new(vec![b'x'; 1024]), "edge.csv", None, &config(&dir, 1024))
                .unwrap();
        assert_eq!(staged.size(), 1024);
    }

    #[test]
    fn same_millisecond_names_do_not_collide() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("_temp")).unwrap();
        let (_, first) = create_unique(&dir.path().join("_temp"), "1-rows.csv").unwrap();
        let (_, second) = create_unique(&dir.path().join("_temp"), "1-rows.csv").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn missing_file_is_missing_upload() {
        let dir = TempDir::new().unwrap();
        let err = stage_file(&dir.path().join("nope.csv"), &config(&dir, 1024)).unwrap_err();
        assert!(matches!(err, UploadError::Missing));
        assert_eq!(err.to_string(), "No file was uploaded");
    }

    #[test]
    fn unbounded_limit_stages_whole_file() {
        let dir = TempDir::new().unwrap();
        let staged =
            stage_upload(Cursor::new(b"a\n1\n"), "rows.csv", None, &config(&dir, u64::MAX))
                .unwrap();
        assert_eq!(staged.size(), 4);
        assert_eq!(fs::read(staged.path()).unwrap(), b"a\n1\n");
    }

    #[test]
    fn too_large_message_in_bytes_below_one_mib() {
        let err = UploadError::TooLarge { limit: 1024 };
        assert_eq!(
            err.to_string(),
            "File exceeds the maximum allowed size (1024 bytes)"
        );
        let err = UploadError::TooLarge { limit: MIB - 1 };
        assert!(err.to_string().ends_with("(1048575 bytes)"));
        let err = UploadError::TooLarge { limit: MIB };
        assert!(err.to_string().ends_with("(1MB)"));
    }

    #[test]
    fn too_large_message_in_megabytes() {
        let err = UploadError::TooLarge {
            limit: DEFAULT_MAX_UPLOAD_BYTES,
        };
        assert_eq!(
            err.to_string(),
            "File exceeds the maximum allowed size (200MB)"
        );
    }
}
