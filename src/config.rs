use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::authority::Bucket;
use crate::listener::ReportFormat;

/// Engine id of the legacy compatibility runner, which has its own execution path
pub const LEGACY_ENGINE_ID: &str = "libtest-compat";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub roots: RootsConfig,
    pub bucketing: BucketingConfig,
    pub engine: EngineConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RootsConfig {
    /// Class roots to scan; absent means fall back to the engine search path
    pub paths: Option<Vec<String>>,
    /// Path-list variable consulted before `paths`
    pub env: Option<String>,
}

impl Default for RootsConfig {
    fn default() -> Self {
        Self {
            paths: None,
            env: Some(DEFAULT_ROOTS_ENV.to_string()),
        }
    }
}

pub const DEFAULT_ROOTS_ENV: &str = "RUNX_CLASS_ROOTS";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BucketingConfig {
    /// Glob patterns a name must match (empty matches everything)
    pub include: Vec<String>,
    /// Glob patterns that reject a name
    pub exclude: Vec<String>,
    /// Accept compiler-generated names
    pub include_synthetic: bool,
    pub bucket_index: usize,
    pub bucket_count: usize,
}

impl BucketingConfig {
    pub fn bucket(&self) -> Bucket {
        Bucket {
            index: self.bucket_index,
            count: self.bucket_count,
        }
    }
}

impl Default for BucketingConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            include_synthetic: false,
            bucket_index: 0,
            bucket_count: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory walked when no class roots are known
    pub search_path: PathBuf,
    /// Engine ids that never take part in discovery
    pub exclude: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            search_path: PathBuf::from("target/debug/deps"),
            exclude: vec![LEGACY_ENGINE_ID.to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub format: ReportFormat,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load `path` if it exists. A missing file is only an error when it was
    /// asked for explicitly.
    pub fn load_or_default(path: &Path, explicit: bool) -> Result<Self> {
        if !explicit && !path.exists() {
            return Ok(Config::default());
        }
        Self::load(path)
    }

    pub fn validate(&self) -> Result<()> {
        self.bucketing
            .bucket()
            .validate()
            .context("Invalid [bucketing] section")?;

        for id in &self.engine.exclude {
            if id.trim().is_empty() {
                anyhow::bail!("Excluded engine ids must not be empty");
            }
        }

        Ok(())
    }
}
