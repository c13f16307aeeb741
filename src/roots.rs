//! Class root resolution
//!
//! Determines the directories eligible for test discovery. Archives and
//! other non-directory entries are skipped so that tests bundled inside
//! dependencies are never picked up.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::debug;

/// Supplies candidate class roots.
///
/// `Ok(None)` means the source cannot tell, and discovery should fall back
/// to scanning everything the engine knows about.
pub trait ClassRootSource: Send + Sync {
    fn class_roots(&self) -> Result<Option<Vec<PathBuf>>>;
}

/// Roots given in configuration or on the command line
#[derive(Debug, Clone, Default)]
pub struct StaticRoots {
    paths: Option<Vec<String>>,
}

impl StaticRoots {
    pub fn new(paths: Option<Vec<String>>) -> Self {
        Self { paths }
    }
}

impl ClassRootSource for StaticRoots {
    fn class_roots(&self) -> Result<Option<Vec<PathBuf>>> {
        let Some(paths) = &self.paths else {
            return Ok(None);
        };

        let mut roots = Vec::with_capacity(paths.len());
        for path in paths {
            let expanded = shellexpand::full(path)
                .with_context(|| format!("Failed to expand class root '{}'", path))?;
            roots.push(PathBuf::from(expanded.into_owned()));
        }
        Ok(Some(roots))
    }
}

/// Roots from a path-list environment variable
#[derive(Debug, Clone)]
pub struct EnvRoots {
    var: String,
}

impl EnvRoots {
    pub fn new(var: &str) -> Self {
        Self { var: var.to_string() }
    }
}

impl ClassRootSource for EnvRoots {
    fn class_roots(&self) -> Result<Option<Vec<PathBuf>>> {
        match std::env::var_os(&self.var) {
            Some(value) => Ok(Some(std::env::split_paths(&value).collect())),
            None => Ok(None),
        }
    }
}

/// Asks each source in turn; the first one that knows its roots wins
#[derive(Default)]
pub struct ChainedRoots {
    sources: Vec<Box<dyn ClassRootSource>>,
}

impl ChainedRoots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, source: impl ClassRootSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }
}

impl ClassRootSource for ChainedRoots {
    fn class_roots(&self) -> Result<Option<Vec<PathBuf>>> {
        for source in &self.sources {
            if let Some(roots) = source.class_roots()? {
                return Ok(Some(roots));
            }
        }
        Ok(None)
    }
}

/// Turns the raw roots of a source into the set discovery will walk
pub struct ClassRootResolver<'a> {
    source: &'a dyn ClassRootSource,
}

impl<'a> ClassRootResolver<'a> {
    pub fn new(source: &'a dyn ClassRootSource) -> Self {
        Self { source }
    }

    pub fn resolve(&self) -> Result<Option<BTreeSet<PathBuf>>> {
        let Some(paths) = self
            .source
            .class_roots()
            .context("Failed to resolve class roots")?
        else {
            debug!("class root source has no roots, scanning everything");
            return Ok(None);
        };

        let roots: BTreeSet<PathBuf> = paths
            .into_iter()
            .filter(|path| {
                let keep = path.is_dir();
                if !keep {
                    debug!(path = %path.display(), "skipping class root that is not a directory");
                }
                keep
            })
            .collect();

        Ok(Some(roots))
    }
}
