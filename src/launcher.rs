//! Launcher
//!
//! Holds the registered engines, builds test plans from discovery requests
//! and hands plans back to the engines for execution.

use colored::Colorize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::descriptor::{TestDescriptor, UniqueId};
use crate::engine::TestEngine;
use crate::filter::{ClassNameFilter, FilterResult, PostDiscoveryFilter};
use crate::listener::{ExecutionListener, TestExecutionResult};
use crate::plan::TestPlan;

/// What an engine should look at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Walk these directories
    ClassRoots(BTreeSet<PathBuf>),
    /// Everything under a name prefix; the empty prefix selects everything
    Package(String),
}

/// Keeps engines with the given ids out of discovery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineFilter {
    excluded: BTreeSet<String>,
}

impl EngineFilter {
    pub fn exclude<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn includes(&self, engine_id: &str) -> bool {
        !self.excluded.contains(engine_id)
    }
}

/// Everything an engine needs to know to discover tests
#[derive(Clone, Default)]
pub struct DiscoveryRequest {
    selectors: Vec<Selector>,
    configuration: BTreeMap<String, String>,
    name_filters: Vec<Arc<dyn ClassNameFilter>>,
    post_discovery_filters: Vec<Arc<dyn PostDiscoveryFilter>>,
    engine_filters: Vec<EngineFilter>,
}

impl DiscoveryRequest {
    pub fn selectors(&self) -> &[Selector] {
        &self.selectors
    }

    pub fn configuration_parameter(&self, key: &str) -> Option<&str> {
        self.configuration.get(key).map(|s| s.as_str())
    }

    /// Run all name filters; the first exclusion wins
    pub fn accepts_class_name(&self, class_name: &str) -> FilterResult {
        for filter in &self.name_filters {
            let result = filter.apply(class_name);
            if result.is_excluded() {
                return result;
            }
        }
        FilterResult::included()
    }

    /// Run all post-discovery filters; the first exclusion wins
    pub fn accepts_descriptor(&self, descriptor: &TestDescriptor) -> FilterResult {
        for filter in &self.post_discovery_filters {
            let result = filter.apply(descriptor);
            if result.is_excluded() {
                return result;
            }
            if let Some(reason) = result.reason() {
                debug!(id = %descriptor.id, reason, "descriptor included");
            }
        }
        FilterResult::included()
    }

    pub fn includes_engine(&self, engine_id: &str) -> bool {
        self.engine_filters.iter().all(|f| f.includes(engine_id))
    }
}

/// Builder for [`DiscoveryRequest`]
#[derive(Default)]
pub struct DiscoveryRequestBuilder {
    request: DiscoveryRequest,
}

impl DiscoveryRequestBuilder {
    pub fn request() -> Self {
        Self::default()
    }

    pub fn configuration_parameter(mut self, key: &str, value: &str) -> Self {
        self.request
            .configuration
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn selectors(mut self, selectors: impl IntoIterator<Item = Selector>) -> Self {
        self.request.selectors.extend(selectors);
        self
    }

    pub fn name_filter(mut self, filter: Arc<dyn ClassNameFilter>) -> Self {
        self.request.name_filters.push(filter);
        self
    }

    pub fn post_discovery_filter(mut self, filter: Arc<dyn PostDiscoveryFilter>) -> Self {
        self.request.post_discovery_filters.push(filter);
        self
    }

    pub fn engine_filter(mut self, filter: EngineFilter) -> Self {
        self.request.engine_filters.push(filter);
        self
    }

    pub fn build(self) -> DiscoveryRequest {
        self.request
    }
}

/// Registry of engines plus the discover/execute protocol
#[derive(Default)]
pub struct Launcher {
    engines: Vec<Box<dyn TestEngine>>,
}

impl Launcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, engine: impl TestEngine + 'static) -> Self {
        self.engines.push(Box::new(engine));
        self
    }

    pub fn engine_count(&self) -> usize {
        self.engines.len()
    }

    fn engine(&self, engine_id: &str) -> Option<&dyn TestEngine> {
        self.engines
            .iter()
            .find(|e| e.id() == engine_id)
            .map(|e| e.as_ref())
    }

    /// Discover and filter tests across all included engines.
    ///
    /// An engine whose discovery fails is left out of the plan.
    pub fn discover(&self, request: &DiscoveryRequest) -> TestPlan {
        let mut roots = Vec::new();

        for engine in &self.engines {
            if !request.includes_engine(engine.id()) {
                debug!(engine = engine.id(), "engine excluded from discovery");
                continue;
            }

            let mut root = match engine.discover(request, UniqueId::for_engine(engine.id())) {
                Ok(root) => root,
                Err(e) => {
                    warn!(engine = engine.id(), error = %e, "test discovery failed");
                    eprintln!(
                        "{} Discovery failed for engine '{}': {:#}",
                        "⚠".yellow(),
                        engine.id(),
                        e
                    );
                    continue;
                }
            };

            root.retain_descendants(&mut |descriptor: &TestDescriptor| {
                let result = request.accepts_descriptor(descriptor);
                if result.is_excluded() {
                    trace!(id = %descriptor.id, reason = result.reason(), "descriptor excluded");
                }
                result.is_included()
            });
            root.prune();

            debug!(engine = engine.id(), tests = root.count_tests(), "engine discovered tests");
            roots.push(root);
        }

        TestPlan::new(roots)
    }

    /// Execute every engine root of `plan` that holds tests
    pub fn execute(&self, plan: &TestPlan, listener: &mut dyn ExecutionListener) {
        listener.test_plan_execution_started(plan);

        for root in plan.roots().iter().filter(|r| r.contains_tests()) {
            listener.execution_started(root);

            let result = match self.engine(root.id.engine_id()) {
                Some(engine) => match engine.execute(root, listener) {
                    Ok(()) => TestExecutionResult::Successful,
                    Err(e) => {
                        warn!(engine = engine.id(), error = %e, "test execution failed");
                        TestExecutionResult::Aborted(Some(format!("{:#}", e)))
                    }
                },
                None => TestExecutionResult::Aborted(Some(format!(
                    "No engine registered for {}",
                    root.id
                ))),
            };

            listener.execution_finished(root, &result);
        }

        listener.test_plan_execution_finished(plan);
    }
}
