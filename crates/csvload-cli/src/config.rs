//! Configuration loading from TOML files

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use csvload_core::{
    DEFAULT_BATCH_SIZE, DEFAULT_MAX_DOCUMENT_BYTES, DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_TEMP_DIR,
    DocumentLimits, ParserOptions, PipelineConfig, StrictPolicy, UploadConfig,
};

/// Global configuration for csvload
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub ingest: IngestConfig,
    pub upload: UploadSettings,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub batch_size: usize,
    pub strict: StrictPolicy,
    pub delimiter: String,
    pub trim: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            strict: StrictPolicy::default(),
            delimiter: ",".to_string(),
            trim: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    pub max_bytes: u64,
    pub temp_dir: PathBuf,
    pub keep_temp: bool,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            temp_dir: PathBuf::from(DEFAULT_TEMP_DIR),
            keep_temp: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub max_document_bytes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./csvload.toml (current directory)
    /// 2. ~/.config/csvload/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("csvload.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "csvload") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.ingest.batch_size == 0 {
            bail!("ingest.batch_size must be at least 1");
        }
        delimiter_byte(&self.ingest.delimiter)?;
        if self.upload.max_bytes == 0 {
            bail!("upload.max_bytes must be at least 1");
        }
        if self.store.max_document_bytes == 0 {
            bail!("store.max_document_bytes must be at least 1");
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let batch_size = NonZeroUsize::new(self.ingest.batch_size)
            .context("ingest.batch_size must be at least 1")?;
        Ok(PipelineConfig {
            batch_size,
            strict: self.ingest.strict,
        })
    }

    pub fn parser_options(&self) -> Result<ParserOptions> {
        Ok(ParserOptions {
            delimiter: delimiter_byte(&self.ingest.delimiter)?,
            trim: self.ingest.trim,
        })
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            max_bytes: self.upload.max_bytes,
            temp_dir: self.upload.temp_dir.clone(),
            keep_temp: self.upload.keep_temp,
        }
    }

    pub fn document_limits(&self) -> DocumentLimits {
        DocumentLimits {
            max_document_bytes: self.store.max_document_bytes,
        }
    }
}

/// Delimiter must be exactly one ASCII character; `\t` is accepted for tab
fn delimiter_byte(s: &str) -> Result<u8> {
    match s.as_bytes() {
        [b] if b.is_ascii() => Ok(*b),
        b"\\t" => Ok(b'\t'),
        _ => bail!("ingest.delimiter must be a single ASCII character, got {s:?}"),
    }
}
