use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};

pub const ENV_BASE_URL: &str = "CITEVIEW_BASE_URL";
pub const ENV_FILES_DIR: &str = "CITEVIEW_FILES_DIR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Files and page lookups come from the chat backend's API.
    Http { base_url: String },
    /// Files are read from a local folder.
    Directory { root: PathBuf },
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Http {
            base_url: "http://127.0.0.1:8000/api".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceMode {
    /// Ask the backend's relevant-page endpoint.
    #[default]
    Remote,
    /// Score extracted page texts in-process.
    Local,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub source: SourceConfig,
    pub relevance: RelevanceMode,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
    pub pdfium_library_path: Option<PathBuf>,
    /// Files fetched into the cache at startup.
    pub preload: Vec<String>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            relevance: RelevanceMode::default(),
            request_timeout: Duration::from_secs(30),
            pdfium_library_path: None,
            preload: Vec::new(),
        }
    }
}

impl ViewerConfig {
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("invalid viewer configuration")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        Self::from_toml(&raw).with_context(|| format!("failed to parse config file {:?}", path))
    }

    /// Like [`ViewerConfig::load`], but a missing file means defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// A files directory wins over a base URL when both are set.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(base_url) = lookup(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
            self.source = SourceConfig::Http { base_url };
        }
        if let Some(root) = lookup(ENV_FILES_DIR).filter(|v| !v.trim().is_empty()) {
            self.source = SourceConfig::Directory {
                root: PathBuf::from(root),
            };
        }
    }
}
