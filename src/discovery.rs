//! Discovery orchestration
//!
//! Builds the discovery request from the resolved class roots and the two
//! filters, then asks the launcher for a plan. Nothing is executed here.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::filter::{NameFilter, StructuralFilter};
use crate::launcher::{DiscoveryRequest, DiscoveryRequestBuilder, EngineFilter, Launcher, Selector};
use crate::plan::TestPlan;

/// Lets engines pick up registered extensions without explicit configuration
pub const EXTENSION_AUTODETECTION: &str = "runx.extensions.autodetection.enabled";

pub struct DiscoveryOrchestrator {
    roots: Option<BTreeSet<PathBuf>>,
    name_filter: Arc<NameFilter>,
    structural_filter: Arc<StructuralFilter>,
    excluded_engines: BTreeSet<String>,
}

impl DiscoveryOrchestrator {
    pub fn new(
        roots: Option<BTreeSet<PathBuf>>,
        name_filter: NameFilter,
        structural_filter: StructuralFilter,
    ) -> Self {
        Self {
            roots,
            name_filter: Arc::new(name_filter),
            structural_filter: Arc::new(structural_filter),
            excluded_engines: BTreeSet::new(),
        }
    }

    pub fn with_excluded_engines<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_engines = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Selector for the resolved roots, or everything when roots are unknown
    pub fn selector(&self) -> Selector {
        match &self.roots {
            Some(roots) => Selector::ClassRoots(roots.clone()),
            None => Selector::Package(String::new()),
        }
    }

    pub fn request(&self) -> DiscoveryRequest {
        DiscoveryRequestBuilder::request()
            .configuration_parameter(EXTENSION_AUTODETECTION, "true")
            .selectors([self.selector()])
            .name_filter(self.name_filter.clone())
            .post_discovery_filter(self.structural_filter.clone())
            .engine_filter(EngineFilter::exclude(self.excluded_engines.iter().cloned()))
            .build()
    }

    pub fn discover(&self, launcher: &Launcher) -> TestPlan {
        let request = self.request();
        debug!(selector = ?self.selector(), excluded = ?self.excluded_engines, "starting discovery");
        launcher.discover(&request)
    }
}
