//! Bucketing authority
//!
//! Decides whether a test identity belongs to the current execution shard.
//! Discovery consults it twice: once per candidate name with a cheap
//! name-only check, and once per discovered descriptor with the full
//! class-level decision.

use glob::Pattern;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::BucketingConfig;

/// Errors raised by a bucketing authority
#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("invalid class name {0:?}")]
    InvalidName(String),

    #[error("invalid bucket: index {index} is not below count {count}")]
    InvalidBucket { index: usize, count: usize },

    #[error("invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("bucketing authority unavailable: {0}")]
    Unavailable(String),
}

/// Decision-maker for shard membership of test identities.
///
/// Implementations are shared between discovery workers and must not rely on
/// call ordering.
pub trait BucketingAuthority: Send + Sync {
    /// Checked once when filters are constructed
    fn validate(&self) -> Result<(), AuthorityError> {
        Ok(())
    }

    /// Cheap name-only check, called for every candidate seen on the roots
    fn is_name_included(&self, class_name: &str) -> Result<bool, AuthorityError>;

    /// Authoritative check, called for discovered classes and methods
    fn is_class_included(&self, class_name: &str) -> Result<bool, AuthorityError>;
}

/// Position of this process among parallel CI workers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    pub index: usize,
    pub count: usize,
}

impl Bucket {
    pub fn validate(&self) -> Result<(), AuthorityError> {
        if self.count == 0 || self.index >= self.count {
            return Err(AuthorityError::InvalidBucket {
                index: self.index,
                count: self.count,
            });
        }
        Ok(())
    }

    /// Bucket a name hashes to, stable across platforms and runs
    pub fn bucket_of(name: &str, count: usize) -> usize {
        let digest = Sha256::digest(name.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(prefix) % count as u64) as usize
    }

    pub fn contains(&self, name: &str) -> bool {
        self.count <= 1 || Self::bucket_of(name, self.count) == self.index
    }
}

/// Default authority: glob include/exclude lists plus hash sharding
#[derive(Debug, Clone)]
pub struct ShardAuthority {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
    include_synthetic: bool,
    bucket: Bucket,
}

impl ShardAuthority {
    pub fn from_config(config: &BucketingConfig) -> Result<Self, AuthorityError> {
        Ok(Self {
            include: compile_patterns(&config.include)?,
            exclude: compile_patterns(&config.exclude)?,
            include_synthetic: config.include_synthetic,
            bucket: config.bucket(),
        })
    }

    pub fn bucket(&self) -> Bucket {
        self.bucket
    }
}

impl BucketingAuthority for ShardAuthority {
    fn validate(&self) -> Result<(), AuthorityError> {
        self.bucket.validate()
    }

    fn is_name_included(&self, class_name: &str) -> Result<bool, AuthorityError> {
        if class_name.is_empty() || class_name.contains('\0') {
            return Err(AuthorityError::InvalidName(class_name.to_string()));
        }

        if !self.include_synthetic && is_synthetic(class_name) {
            return Ok(false);
        }

        if !self.include.is_empty() && !self.include.iter().any(|p| p.matches(class_name)) {
            return Ok(false);
        }

        Ok(!self.exclude.iter().any(|p| p.matches(class_name)))
    }

    fn is_class_included(&self, class_name: &str) -> Result<bool, AuthorityError> {
        if !self.is_name_included(class_name)? {
            return Ok(false);
        }
        self.bucket.validate()?;
        Ok(self.bucket.contains(class_name))
    }
}

/// Compiler-generated names: nested/anonymous classes and closures
fn is_synthetic(class_name: &str) -> bool {
    class_name.contains('$') || class_name.contains("{{")
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Pattern>, AuthorityError> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|source| AuthorityError::Pattern {
                pattern: p.clone(),
                source,
            })
        })
        .collect()
}
