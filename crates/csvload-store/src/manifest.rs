//! Store manifest: `{data_dir}/store.json`

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Bumped when the on-disk segment format changes incompatibly
pub const CURRENT_FORMAT_VERSION: u32 = 1;

const MANIFEST_FILE: &str = "store.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreManifest {
    pub format_version: u32,
    /// When the data directory was first initialized
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl StoreManifest {
    pub fn new() -> Self {
        Self {
            format_version: CURRENT_FORMAT_VERSION,
            created_at: chrono::Utc::now(),
        }
    }

    /// Write manifest to dir/store.json
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        let path = dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self).context("failed to serialize manifest")?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Read manifest from dir/store.json
    pub fn read_from(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Read the manifest in `dir`, creating it on first use.
    ///
    /// Fails on a format version this build does not understand.
    pub fn load_or_init(dir: &Path) -> Result<Self> {
        if !dir.join(MANIFEST_FILE).exists() {
            let manifest = Self::new();
            manifest.write_to(dir)?;
            log::debug!("initialized store at {}", dir.display());
            return Ok(manifest);
        }

        Self::load(dir)
    }

    /// Read an existing manifest; fails if it is missing or from another format.
    pub fn load(dir: &Path) -> Result<Self> {
        let manifest = Self::read_from(dir)?;
        if manifest.format_version != CURRENT_FORMAT_VERSION {
            bail!(
                "{}: format_version {} != supported {}",
                dir.display(),
                manifest.format_version,
                CURRENT_FORMAT_VERSION
            );
        }
        Ok(manifest)
    }
}

impl Default for StoreManifest {
    fn default() -> Self {
        Self::new()
    }
}
