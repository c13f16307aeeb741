//! Discovery filters
//!
//! Two stages gate which tests reach an engine:
//! - [`NameFilter`] runs on every candidate name found while walking the class
//!   roots, before anything is loaded. It sits on the hot path of the walk.
//! - [`StructuralFilter`] runs on materialised descriptors after discovery and
//!   can use the owning class of a method to make shard decisions.
//!
//! Neither filter ever propagates an error: each call is coerced to a
//! [`FilterResult`].

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::authority::{AuthorityError, BucketingAuthority};
use crate::descriptor::{TestDescriptor, TestSource};

/// Outcome of applying a filter, with an optional diagnostic reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterResult {
    Included(Option<String>),
    Excluded(Option<String>),
}

impl FilterResult {
    pub fn included() -> Self {
        FilterResult::Included(None)
    }

    pub fn included_because(reason: impl Into<String>) -> Self {
        FilterResult::Included(Some(reason.into()))
    }

    pub fn excluded() -> Self {
        FilterResult::Excluded(None)
    }

    pub fn excluded_because(reason: impl Into<String>) -> Self {
        FilterResult::Excluded(Some(reason.into()))
    }

    pub fn is_included(&self) -> bool {
        matches!(self, FilterResult::Included(_))
    }

    pub fn is_excluded(&self) -> bool {
        !self.is_included()
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            FilterResult::Included(reason) | FilterResult::Excluded(reason) => reason.as_deref(),
        }
    }
}

/// Filter over bare candidate names, applied before loading
pub trait ClassNameFilter: Send + Sync {
    fn apply(&self, class_name: &str) -> FilterResult;
}

/// Filter over discovered descriptors
pub trait PostDiscoveryFilter: Send + Sync {
    fn apply(&self, descriptor: &TestDescriptor) -> FilterResult;
}

/// Name filter backed by the authority's cheap name check
#[derive(Clone)]
pub struct NameFilter {
    authority: Arc<dyn BucketingAuthority>,
}

impl NameFilter {
    pub fn try_new(authority: Arc<dyn BucketingAuthority>) -> Result<Self, AuthorityError> {
        authority.validate()?;
        Ok(Self { authority })
    }

    pub fn matches(&self, class_name: &str) -> FilterResult {
        ask(|| self.authority.is_name_included(class_name))
    }
}

impl ClassNameFilter for NameFilter {
    fn apply(&self, class_name: &str) -> FilterResult {
        self.matches(class_name)
    }
}

/// Descriptor filter that re-queries the authority with the owning class
#[derive(Clone)]
pub struct StructuralFilter {
    authority: Arc<dyn BucketingAuthority>,
}

impl StructuralFilter {
    pub fn try_new(authority: Arc<dyn BucketingAuthority>) -> Result<Self, AuthorityError> {
        authority.validate()?;
        Ok(Self { authority })
    }

    pub fn matches(&self, descriptor: &TestDescriptor) -> FilterResult {
        if descriptor.is_root() {
            return FilterResult::included();
        }

        let Some(source) = &descriptor.source else {
            return FilterResult::included_because("No source for descriptor");
        };

        match source {
            TestSource::Method { class_name, .. } => self.is_class_included(class_name),
            TestSource::Class { class_name } => self.is_class_included(class_name),
            // Unrecognised structure is let through rather than dropped
            other => FilterResult::included_because(format!(
                "Unknown source type {}",
                other.kind_name()
            )),
        }
    }

    fn is_class_included(&self, class_name: &str) -> FilterResult {
        ask(|| self.authority.is_class_included(class_name))
    }
}

impl PostDiscoveryFilter for StructuralFilter {
    fn apply(&self, descriptor: &TestDescriptor) -> FilterResult {
        self.matches(descriptor)
    }
}

/// Run one authority query, mapping errors and panics to exclusion
fn ask<F>(query: F) -> FilterResult
where
    F: FnOnce() -> Result<bool, AuthorityError>,
{
    match catch_unwind(AssertUnwindSafe(query)) {
        Ok(Ok(true)) => FilterResult::included(),
        Ok(Ok(false)) => FilterResult::excluded(),
        Ok(Err(e)) => FilterResult::excluded_because(e.to_string()),
        Err(panic) => FilterResult::excluded_because(panic_message(panic.as_ref())),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "bucketing authority panicked".to_string()
    }
}
