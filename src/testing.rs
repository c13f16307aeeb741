//! Test doubles shared by the unit tests

use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::authority::{AuthorityError, BucketingAuthority};
use crate::descriptor::{TestDescriptor, TestSource, UniqueId};
use crate::engine::TestEngine;
use crate::launcher::{DiscoveryRequest, Selector};
use crate::listener::{ExecutionListener, TestExecutionResult};
use crate::plan::TestPlan;
use crate::roots::ClassRootSource;

enum Script {
    EndsWith(String),
    Fail(String),
    Panic,
    Invalid,
}

/// Authority with canned answers that records every query
pub struct ScriptedAuthority {
    script: Script,
    name_queries: Mutex<Vec<String>>,
    class_queries: Mutex<Vec<String>>,
}

impl ScriptedAuthority {
    fn with(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            name_queries: Mutex::new(Vec::new()),
            class_queries: Mutex::new(Vec::new()),
        })
    }

    /// Includes every name with the given suffix
    pub fn ends_with(suffix: &str) -> Arc<Self> {
        Self::with(Script::EndsWith(suffix.to_string()))
    }

    /// Fails every query with `message`
    pub fn failing(message: &str) -> Arc<Self> {
        Self::with(Script::Fail(message.to_string()))
    }

    pub fn panicking() -> Arc<Self> {
        Self::with(Script::Panic)
    }

    /// Refuses validation, as a misconfigured bucket would
    pub fn invalid() -> Arc<Self> {
        Self::with(Script::Invalid)
    }

    pub fn name_queries(&self) -> Vec<String> {
        self.name_queries.lock().unwrap().clone()
    }

    pub fn class_queries(&self) -> Vec<String> {
        self.class_queries.lock().unwrap().clone()
    }

    fn answer(&self, class_name: &str) -> Result<bool, AuthorityError> {
        match &self.script {
            Script::EndsWith(suffix) => Ok(class_name.ends_with(suffix.as_str())),
            Script::Invalid => Ok(true),
            Script::Fail(message) => Err(AuthorityError::Unavailable(message.clone())),
            Script::Panic => panic!("authority exploded on {}", class_name),
        }
    }
}

impl BucketingAuthority for ScriptedAuthority {
    fn validate(&self) -> Result<(), AuthorityError> {
        match self.script {
            Script::Invalid => Err(AuthorityError::InvalidBucket { index: 3, count: 2 }),
            _ => Ok(()),
        }
    }

    fn is_name_included(&self, class_name: &str) -> Result<bool, AuthorityError> {
        self.name_queries.lock().unwrap().push(class_name.to_string());
        self.answer(class_name)
    }

    fn is_class_included(&self, class_name: &str) -> Result<bool, AuthorityError> {
        self.class_queries.lock().unwrap().push(class_name.to_string());
        self.answer(class_name)
    }
}

/// Root source that always fails
pub struct FailingRoots;

impl ClassRootSource for FailingRoots {
    fn class_roots(&self) -> Result<Option<Vec<PathBuf>>> {
        anyhow::bail!("class root lookup is not available")
    }
}

#[derive(Default)]
struct EngineState {
    discover_calls: AtomicUsize,
    execute_calls: AtomicUsize,
    loaded: Mutex<Vec<String>>,
    selectors: Mutex<Vec<Selector>>,
}

/// Engine over a fixed set of classes and methods.
///
/// Clones share their call counters, so a test can keep one handle while the
/// launcher owns another.
#[derive(Clone)]
pub struct FakeEngine {
    id: String,
    classes: Vec<(String, Vec<String>)>,
    name_filtering: bool,
    fail_discovery: bool,
    fail_execution: bool,
    fail_tests: bool,
    state: Arc<EngineState>,
}

impl FakeEngine {
    pub fn new(id: &str, classes: &[(&str, &[&str])]) -> Self {
        Self {
            id: id.to_string(),
            classes: classes
                .iter()
                .map(|(c, ms)| (c.to_string(), ms.iter().map(|m| m.to_string()).collect()))
                .collect(),
            name_filtering: true,
            fail_discovery: false,
            fail_execution: false,
            fail_tests: false,
            state: Arc::new(EngineState::default()),
        }
    }

    /// Load every class, leaving all filtering to the structural filter
    pub fn without_name_filtering(mut self) -> Self {
        self.name_filtering = false;
        self
    }

    pub fn failing_discovery(mut self) -> Self {
        self.fail_discovery = true;
        self
    }

    pub fn failing_execution(mut self) -> Self {
        self.fail_execution = true;
        self
    }

    pub fn failing_tests(mut self) -> Self {
        self.fail_tests = true;
        self
    }

    pub fn discover_calls(&self) -> usize {
        self.state.discover_calls.load(Ordering::SeqCst)
    }

    pub fn execute_calls(&self) -> usize {
        self.state.execute_calls.load(Ordering::SeqCst)
    }

    /// Classes that passed name filtering and were "loaded"
    pub fn loaded(&self) -> Vec<String> {
        self.state.loaded.lock().unwrap().clone()
    }

    pub fn selectors(&self) -> Vec<Selector> {
        self.state.selectors.lock().unwrap().clone()
    }
}

impl TestEngine for FakeEngine {
    fn id(&self) -> &str {
        &self.id
    }

    fn discover(&self, request: &DiscoveryRequest, unique_id: UniqueId) -> Result<TestDescriptor> {
        self.state.discover_calls.fetch_add(1, Ordering::SeqCst);
        self.state
            .selectors
            .lock()
            .unwrap()
            .extend(request.selectors().iter().cloned());

        if self.fail_discovery {
            anyhow::bail!("cannot read test index");
        }

        let mut root = TestDescriptor::new_container(unique_id, &self.id, None);

        let has_scope = request.selectors().iter().any(|s| match s {
            Selector::ClassRoots(roots) => !roots.is_empty(),
            Selector::Package(_) => true,
        }) || request.selectors().is_empty();
        if !has_scope {
            return Ok(root);
        }

        for (class, methods) in &self.classes {
            if self.name_filtering && request.accepts_class_name(class).is_excluded() {
                continue;
            }
            self.state.loaded.lock().unwrap().push(class.clone());

            let class_id = root.id.append("class", class);
            let mut container =
                TestDescriptor::new_container(class_id.clone(), class, Some(TestSource::class(class)));
            for method in methods {
                container.add_child(TestDescriptor::new_test(
                    class_id.append("method", method),
                    method,
                    Some(TestSource::method(class, method)),
                ));
            }
            root.add_child(container);
        }

        Ok(root)
    }

    fn execute(&self, root: &TestDescriptor, listener: &mut dyn ExecutionListener) -> Result<()> {
        self.state.execute_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_execution {
            anyhow::bail!("engine crashed");
        }

        for container in &root.children {
            listener.execution_started(container);
            for test in &container.children {
                listener.execution_started(test);
                let result = if self.fail_tests {
                    TestExecutionResult::Failed(Some("assertion failed".to_string()))
                } else {
                    TestExecutionResult::Successful
                };
                listener.execution_finished(test, &result);
            }
            listener.execution_finished(container, &TestExecutionResult::Successful);
        }

        Ok(())
    }
}

/// Listener that records events as short strings
#[derive(Debug, Default)]
pub struct RecordingListener {
    pub events: Vec<String>,
    finished_tests: usize,
}

impl RecordingListener {
    /// Number of finish events with the given result label
    pub fn count(&self, label: &str) -> usize {
        let suffix = format!(" {}", label);
        self.events
            .iter()
            .filter(|e| e.starts_with("finished ") && e.ends_with(&suffix))
            .count()
    }

    pub fn tests_finished(&self) -> usize {
        self.finished_tests
    }
}

impl ExecutionListener for RecordingListener {
    fn test_plan_execution_started(&mut self, _plan: &TestPlan) {
        self.events.push("plan_started".to_string());
    }

    fn test_plan_execution_finished(&mut self, _plan: &TestPlan) {
        self.events.push("plan_finished".to_string());
    }

    fn execution_started(&mut self, descriptor: &TestDescriptor) {
        self.events.push(format!("started {}", descriptor.id));
    }

    fn execution_skipped(&mut self, descriptor: &TestDescriptor, reason: &str) {
        self.events.push(format!("skipped {} {}", descriptor.id, reason));
    }

    fn execution_finished(&mut self, descriptor: &TestDescriptor, result: &TestExecutionResult) {
        if descriptor.is_test() {
            self.finished_tests += 1;
        }
        self.events
            .push(format!("finished {} {}", descriptor.id, result.label()));
    }
}
