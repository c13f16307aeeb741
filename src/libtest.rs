//! Libtest engine
//!
//! Finds compiled Rust test binaries on the class roots, lists their tests
//! with `<binary> --list`, and runs them, parsing results from libtest's
//! output. A binary whose tests were all selected runs unfiltered; otherwise
//! the selected names are passed with `--exact`, in batches that stay well
//! below the platform's command line limit.
//!
//! Binaries are named after their path below the root, so
//! `<root>/com/x/FooTest` is the candidate `com.x.FooTest`.

use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::thread;
use tracing::{debug, trace, warn};

use crate::descriptor::{TestDescriptor, TestSource, UniqueId};
use crate::engine::TestEngine;
use crate::launcher::{DiscoveryRequest, Selector};
use crate::listener::{ExecutionListener, TestExecutionResult};

pub const ENGINE_ID: &str = "libtest";

/// Build artifacts that live next to test binaries but are never tests
const SKIPPED_EXTENSIONS: &[&str] = &[
    "d", "rlib", "rmeta", "so", "dylib", "dll", "pdb", "o", "a", "lib", "exp", "json", "txt",
];

/// Upper bound on the bytes of test names passed to one process
const MAX_FILTER_BYTES: usize = 16 * 1024;

pub struct LibtestEngine {
    search_path: PathBuf,
    workers: usize,
    /// Number of tests each binary listed during discovery
    listed: Mutex<HashMap<PathBuf, usize>>,
}

/// A binary that passed the name filter
#[derive(Debug, Clone)]
struct Candidate {
    name: String,
    path: PathBuf,
}

impl LibtestEngine {
    pub fn new(search_path: &Path) -> Self {
        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            search_path: search_path.to_path_buf(),
            workers,
            listed: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Walk the selected directories and name-filter every binary found
    fn scan(&self, request: &DiscoveryRequest) -> Result<Vec<Candidate>> {
        let mut accepted: BTreeMap<String, PathBuf> = BTreeMap::new();

        for selector in request.selectors() {
            match selector {
                Selector::ClassRoots(roots) => {
                    for root in roots {
                        self.scan_root(request, root, "", &mut accepted)?;
                    }
                }
                Selector::Package(prefix) => {
                    if !self.search_path.is_dir() {
                        debug!(path = %self.search_path.display(), "search path does not exist");
                        continue;
                    }
                    self.scan_root(request, &self.search_path, prefix, &mut accepted)?;
                }
            }
        }

        Ok(accepted
            .into_iter()
            .map(|(name, path)| Candidate { name, path })
            .collect())
    }

    fn scan_root(
        &self,
        request: &DiscoveryRequest,
        root: &Path,
        prefix: &str,
        accepted: &mut BTreeMap<String, PathBuf>,
    ) -> Result<()> {
        for path in find_binaries(root)? {
            let Some(name) = candidate_name(root, &path) else {
                continue;
            };

            if !prefix.is_empty() && name != prefix && !name.starts_with(&format!("{}.", prefix)) {
                continue;
            }

            let result = request.accepts_class_name(&name);
            if result.is_excluded() {
                trace!(name = %name, reason = result.reason(), "candidate excluded");
                continue;
            }

            accepted.entry(name).or_insert(path);
        }
        Ok(())
    }

    /// List the tests of every candidate, spreading binaries over the workers
    fn load_all(&self, candidates: Vec<Candidate>) -> Vec<(Candidate, Result<Vec<String>>)> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let chunk_size = candidates.len().div_ceil(self.workers);
        let listings: Vec<Result<Vec<String>>> = thread::scope(|scope| {
            let handles: Vec<_> = candidates
                .chunks(chunk_size)
                .map(|batch| {
                    let handle = scope.spawn(move || {
                        batch.iter().map(|c| list_tests(&c.path)).collect::<Vec<_>>()
                    });
                    (batch.len(), handle)
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|(len, handle)| match handle.join() {
                    Ok(listings) => listings,
                    Err(_) => (0..len)
                        .map(|_| Err(anyhow::anyhow!("test listing worker panicked")))
                        .collect(),
                })
                .collect()
        });

        candidates.into_iter().zip(listings).collect()
    }

    fn record_listing(&self, binary: &Path, count: usize) {
        if let Ok(mut listed) = self.listed.lock() {
            listed.insert(binary.to_path_buf(), count);
        }
    }

    fn listed_count(&self, binary: &Path) -> Option<usize> {
        self.listed.lock().ok()?.get(binary).copied()
    }

    /// Run one binary container, reporting every one of its tests.
    ///
    /// Returns the result of the container itself: aborted when a process
    /// could not be spawned or read.
    fn run_binary(
        &self,
        container: &TestDescriptor,
        listener: &mut dyn ExecutionListener,
    ) -> TestExecutionResult {
        let tests = container.all_tests();

        let Some(binary) = container.location.as_deref() else {
            let message = format!("No test binary recorded for {}", container.id);
            for test in tests {
                listener.execution_started(test);
                listener.execution_finished(test, &TestExecutionResult::Aborted(Some(message.clone())));
            }
            return TestExecutionResult::Aborted(Some(message));
        };

        let run_everything = self.listed_count(binary) == Some(tests.len());
        let mut failure = None;

        for batch in plan_batches(tests, run_everything, MAX_FILTER_BYTES) {
            let mut output = BatchOutput::default();
            let unreported = match run_batch(binary, &batch, &mut output) {
                Ok(status) => format!(
                    "{} exited with {} before reporting a result",
                    binary.display(),
                    status
                ),
                Err(e) => {
                    let message = format!("{:#}", e);
                    warn!(binary = %binary.display(), error = %message, "test binary failed to run");
                    failure = Some(message.clone());
                    message
                }
            };
            output.report(&batch.tests, &unreported, listener);
        }

        match failure {
            Some(message) => TestExecutionResult::Aborted(Some(message)),
            None => TestExecutionResult::Successful,
        }
    }
}

impl TestEngine for LibtestEngine {
    fn id(&self) -> &str {
        ENGINE_ID
    }

    fn discover(&self, request: &DiscoveryRequest, unique_id: UniqueId) -> Result<TestDescriptor> {
        let candidates = self.scan(request)?;
        debug!(candidates = candidates.len(), "test binaries accepted by name");

        let mut root = TestDescriptor::new_container(unique_id, "Rust libtest", None);

        for (candidate, listing) in self.load_all(candidates) {
            let tests = match listing {
                Ok(tests) => {
                    self.record_listing(&candidate.path, tests.len());
                    tests
                }
                Err(e) => {
                    warn!(binary = %candidate.path.display(), error = %e, "failed to list tests");
                    continue;
                }
            };

            let class_id = root.id.append("class", &candidate.name);
            let mut container = TestDescriptor::new_container(
                class_id.clone(),
                &candidate.name,
                Some(TestSource::class(&candidate.name)),
            )
            .with_location(&candidate.path);

            for test in tests {
                container.add_child(TestDescriptor::new_test(
                    class_id.append("method", &test),
                    &test,
                    Some(TestSource::method(&candidate.name, &test)),
                ));
            }
            root.add_child(container);
        }

        root.sort_children();
        Ok(root)
    }

    fn execute(&self, root: &TestDescriptor, listener: &mut dyn ExecutionListener) -> Result<()> {
        for container in root.children.iter().filter(|c| c.contains_tests()) {
            listener.execution_started(container);

            let result = self.run_binary(container, listener);
            listener.execution_finished(container, &result);
        }
        Ok(())
    }
}

/// Name libtest knows a test by
fn test_name(test: &TestDescriptor) -> &str {
    match &test.source {
        Some(TestSource::Method { method_name, .. }) => method_name,
        _ => &test.display_name,
    }
}

/// One process invocation over part of a binary's tests
struct Batch<'a> {
    /// Pass the test names on the command line; false runs the whole binary
    filtered: bool,
    tests: Vec<&'a TestDescriptor>,
}

/// Split `tests` into invocations whose name arguments fit in `budget` bytes
fn plan_batches(tests: Vec<&TestDescriptor>, run_everything: bool, budget: usize) -> Vec<Batch<'_>> {
    if run_everything {
        return vec![Batch {
            filtered: false,
            tests,
        }];
    }

    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut bytes = 0;
    for test in tests {
        let cost = test_name(test).len() + 1;
        if !current.is_empty() && bytes + cost > budget {
            batches.push(Batch {
                filtered: true,
                tests: std::mem::take(&mut current),
            });
            bytes = 0;
        }
        bytes += cost;
        current.push(test);
    }
    if !current.is_empty() {
        batches.push(Batch {
            filtered: true,
            tests: current,
        });
    }
    batches
}

/// Run one process over `batch`, collecting whatever it reported into `output`
fn run_batch(binary: &Path, batch: &Batch<'_>, output: &mut BatchOutput) -> Result<ExitStatus> {
    let mut command = Command::new(binary);
    command.arg("--test-threads=1");
    if batch.filtered {
        command
            .arg("--exact")
            .args(batch.tests.iter().copied().map(test_name));
    }

    let mut child = command
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .with_context(|| format!("Failed to spawn {}", binary.display()))?;

    let read = match child.stdout.take() {
        Some(stdout) => read_lines(stdout, |line| output.feed(line)),
        None => Err(io::Error::new(io::ErrorKind::Other, "stdout was not captured")),
    };
    if read.is_err() {
        let _ = child.kill();
    }

    let status = child
        .wait()
        .with_context(|| format!("Failed to wait for {}", binary.display()))?;
    read.with_context(|| format!("Failed to read output of {}", binary.display()))?;
    Ok(status)
}

/// Feed each line of `source` to `on_line`, replacing invalid UTF-8
fn read_lines(source: impl Read, mut on_line: impl FnMut(&str)) -> io::Result<()> {
    let mut reader = BufReader::new(source);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        on_line(line.trim_end_matches(&['\n', '\r'][..]));
    }
}

/// Results and captured output of one process
#[derive(Debug, Default)]
struct BatchOutput {
    results: HashMap<String, LineStatus>,
    captured: HashMap<String, Vec<String>>,
    section: Option<String>,
}

impl BatchOutput {
    fn feed(&mut self, line: &str) {
        if let Some(name) = parse_section_header(line) {
            self.section = Some(name.to_string());
            return;
        }

        if line == "failures:" || line.starts_with("test result:") {
            self.section = None;
            return;
        }

        if let Some(name) = &self.section {
            self.captured
                .entry(name.clone())
                .or_default()
                .push(line.to_string());
            return;
        }

        if let Some(info) = parse_test_line(line) {
            if info.status != LineStatus::Running {
                self.results.insert(info.name, info.status);
            }
        }
    }

    /// Emit a complete started/finished pair per test, in `tests` order
    fn report(mut self, tests: &[&TestDescriptor], unreported: &str, listener: &mut dyn ExecutionListener) {
        for &test in tests {
            let name = test_name(test);
            let result = match self.results.remove(name) {
                Some(LineStatus::Ignored(reason)) => {
                    listener.execution_skipped(test, reason.as_deref().unwrap_or("ignored"));
                    continue;
                }
                Some(LineStatus::Passed) => TestExecutionResult::Successful,
                Some(LineStatus::Failed) => {
                    let message = self
                        .captured
                        .remove(name)
                        .map(|lines| lines.join("\n").trim().to_string())
                        .filter(|m| !m.is_empty());
                    TestExecutionResult::Failed(message)
                }
                Some(LineStatus::Running) | None => {
                    TestExecutionResult::Aborted(Some(unreported.to_string()))
                }
            };
            listener.execution_started(test);
            listener.execution_finished(test, &result);
        }
    }
}

/// Find every file under `root` that looks like a test binary
pub fn find_binaries(root: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}/**/*", glob::Pattern::escape(&root.to_string_lossy()));

    let mut binaries = Vec::new();
    for entry in glob::glob(&pattern).with_context(|| format!("Invalid class root: {}", root.display()))? {
        match entry {
            Ok(path) => {
                if is_test_binary(&path) {
                    binaries.push(path);
                }
            }
            Err(e) => debug!(error = %e, "unreadable entry under class root"),
        }
    }

    binaries.sort();
    Ok(binaries)
}

fn is_test_binary(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }

    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if SKIPPED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
            return false;
        }
    }

    is_executable(path)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case("exe"))
        .unwrap_or(false)
}

/// Fully-qualified candidate name of a binary below `root`.
///
/// Directories become dotted segments and Cargo's `-<hash>` suffix is dropped:
/// `deps/parser-0123456789abcdef` becomes `deps.parser`.
pub fn candidate_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;

    let mut parts: Vec<&str> = Vec::new();
    if let Some(parent) = relative.parent() {
        for component in parent.components() {
            parts.push(component.as_os_str().to_str()?);
        }
    }

    let stem = strip_hash_suffix(relative.file_stem()?.to_str()?);
    if stem.is_empty() {
        return None;
    }
    parts.push(stem);

    Some(parts.join("."))
}

fn strip_hash_suffix(stem: &str) -> &str {
    if let Some((base, hash)) = stem.rsplit_once('-') {
        if !base.is_empty() && hash.len() == 16 && hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return base;
        }
    }
    stem
}

/// Run `<binary> --list` and parse its output
fn list_tests(binary: &Path) -> Result<Vec<String>> {
    let output = Command::new(binary)
        .arg("--list")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .with_context(|| format!("Failed to execute {} --list", binary.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("{} --list failed: {}", binary.display(), stderr.trim());
    }

    Ok(parse_test_list(&String::from_utf8_lossy(&output.stdout)))
}

/// Parse the output of `<binary> --list`
///
/// Output format:
/// ```text
/// module::submodule::test_name: test
/// other::bench_name: bench
///
/// 1 test, 1 benchmark
/// ```
pub fn parse_test_list(output: &str) -> Vec<String> {
    let mut tests = Vec::new();

    for line in output.lines() {
        let line = line.trim();

        if line.is_empty() {
            continue;
        }

        // Skip summary line "X tests, Y benchmarks"
        if line.contains(" tests,") || line.contains(" test,") {
            continue;
        }

        if let Some((name, suffix)) = line.rsplit_once(": ") {
            // Benchmarks are not run by this engine
            if suffix.trim() == "test" {
                tests.push(name.to_string());
            }
        }
    }

    tests
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LineStatus {
    Running,
    Passed,
    Failed,
    Ignored(Option<String>),
}

/// Information parsed from a test line
#[derive(Debug)]
struct TestLineInfo {
    name: String,
    status: LineStatus,
}

/// Parse a line like "test module::test_name ... ok"
fn parse_test_line(line: &str) -> Option<TestLineInfo> {
    let rest = line.strip_prefix("test ")?;
    if line.starts_with("test result:") {
        return None;
    }

    let (name, status_part) = if let Some(idx) = rest.find(" ... ") {
        (&rest[..idx], rest[idx + 5..].trim())
    } else if let Some(name) = rest.strip_suffix(" ...") {
        (name, "")
    } else {
        return None;
    };

    let status = if status_part.is_empty() {
        LineStatus::Running
    } else if status_part == "ok" {
        LineStatus::Passed
    } else if status_part.starts_with("FAILED") {
        LineStatus::Failed
    } else if let Some(reason) = status_part.strip_prefix("ignored") {
        let reason = reason.trim_start_matches(',').trim();
        LineStatus::Ignored((!reason.is_empty()).then(|| reason.to_string()))
    } else {
        LineStatus::Running
    };

    Some(TestLineInfo {
        name: name.to_string(),
        status,
    })
}

/// Parse a captured-output header like "---- module::test stdout ----"
fn parse_section_header(line: &str) -> Option<&str> {
    line.strip_prefix("---- ")?.strip_suffix(" stdout ----")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingListener;
    use std::sync::MutexGuard;

    // Writing a script while another test forks can leave the script busy
    // for exec, so tests that spawn processes run one at a time.
    static SPAWNING: Mutex<()> = Mutex::new(());

    fn exclusive() -> MutexGuard<'static, ()> {
        SPAWNING.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[test]
    fn test_parse_test_list() {
        let output = r#"
module::tests::test_one: test
module::tests::test_two: test
benches::bench_parse: bench
other::test_three: test

3 tests, 1 benchmark
"#;

        let tests = parse_test_list(output);
        assert_eq!(
            tests,
            vec!["module::tests::test_one", "module::tests::test_two", "other::test_three"]
        );
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_test_list("").is_empty());
        assert!(parse_test_list("0 tests, 0 benchmarks\n").is_empty());
    }

    #[test]
    fn test_parse_test_line() {
        let info = parse_test_line("test module::tests::test_one ... ok").unwrap();
        assert_eq!(info.name, "module::tests::test_one");
        assert_eq!(info.status, LineStatus::Passed);

        let info = parse_test_line("test my_test ... FAILED").unwrap();
        assert_eq!(info.name, "my_test");
        assert_eq!(info.status, LineStatus::Failed);

        let info = parse_test_line("test ignored_test ... ignored").unwrap();
        assert_eq!(info.status, LineStatus::Ignored(None));

        let info = parse_test_line("test slow_test ... ignored, needs network").unwrap();
        assert_eq!(info.status, LineStatus::Ignored(Some("needs network".to_string())));
    }

    #[test]
    fn test_parse_running_test() {
        let info = parse_test_line("test long_test ...").unwrap();
        assert_eq!(info.name, "long_test");
        assert_eq!(info.status, LineStatus::Running);

        assert!(parse_test_line("test result: ok. 2 passed; 0 failed").is_none());
        assert!(parse_test_line("running 2 tests").is_none());
    }

    #[test]
    fn test_parse_section_header() {
        assert_eq!(parse_section_header("---- a::b stdout ----"), Some("a::b"));
        assert_eq!(parse_section_header("failures:"), None);
    }

    #[test]
    fn test_candidate_name() {
        let root = Path::new("/proj/out/test-classes");
        assert_eq!(
            candidate_name(root, Path::new("/proj/out/test-classes/com/x/FooTest")).as_deref(),
            Some("com.x.FooTest")
        );
        assert_eq!(
            candidate_name(root, Path::new("/proj/out/test-classes/deps/parser-0123456789abcdef"))
                .as_deref(),
            Some("deps.parser")
        );
        assert_eq!(
            candidate_name(root, Path::new("/proj/out/test-classes/smoke.exe")).as_deref(),
            Some("smoke")
        );
        assert_eq!(candidate_name(root, Path::new("/elsewhere/FooTest")), None);
    }

    #[test]
    fn test_strip_hash_suffix() {
        assert_eq!(strip_hash_suffix("integration-9f8e7d6c5b4a3210"), "integration");
        assert_eq!(strip_hash_suffix("integration-tests"), "integration-tests");
        assert_eq!(strip_hash_suffix("x-0123"), "x-0123");
        assert_eq!(strip_hash_suffix("-0123456789abcdef"), "-0123456789abcdef");
    }

    fn descriptor_with(names: &[&str]) -> TestDescriptor {
        let class_id = UniqueId::for_engine(ENGINE_ID).append("class", "com.x.FooTest");
        let mut container = TestDescriptor::new_container(
            class_id.clone(),
            "com.x.FooTest",
            Some(TestSource::class("com.x.FooTest")),
        );
        for name in names {
            container.add_child(TestDescriptor::new_test(
                class_id.append("method", name),
                name,
                Some(TestSource::method("com.x.FooTest", name)),
            ));
        }
        container
    }

    #[test]
    fn test_plan_batches_respects_budget() {
        let container = descriptor_with(&["aaaa", "bbbb", "cccc", "ddd", "e"]);

        let batches = plan_batches(container.all_tests(), false, 10);
        let names: Vec<Vec<&str>> = batches
            .iter()
            .map(|b| b.tests.iter().map(|t| t.display_name.as_str()).collect())
            .collect();
        assert_eq!(names, vec![vec!["aaaa", "bbbb"], vec!["cccc", "ddd"], vec!["e"]]);
        assert!(batches.iter().all(|b| b.filtered));

        // A single name longer than the budget still gets its own batch
        let container = descriptor_with(&["a_very_long_test_name"]);
        assert_eq!(plan_batches(container.all_tests(), false, 4).len(), 1);

        let batches = plan_batches(container.all_tests(), true, 4);
        assert_eq!(batches.len(), 1);
        assert!(!batches[0].filtered);
    }

    #[test]
    fn test_batch_output_keeps_captured_failures() {
        let mut output = BatchOutput::default();
        for line in [
            "running 2 tests",
            "test a ... FAILED",
            "test b ... ok",
            "",
            "failures:",
            "",
            "---- a stdout ----",
            "test c ... ok",
            "left != right",
            "",
            "failures:",
            "    a",
            "test result: FAILED. 1 passed; 1 failed",
        ] {
            output.feed(line);
        }

        assert_eq!(output.results.get("a"), Some(&LineStatus::Failed));
        assert_eq!(output.results.get("b"), Some(&LineStatus::Passed));
        // Output of a failed test is never read as a result line
        assert!(output.results.get("c").is_none());
        assert_eq!(output.captured["a"].join("\n").trim(), "test c ... ok\nleft != right");
    }

    #[test]
    fn test_missing_binary_aborts_every_test() {
        let mut container = descriptor_with(&["a", "b"]);
        container.location = Some(PathBuf::from("/definitely/not/a/test/binary"));

        let _guard = exclusive();
        let engine = LibtestEngine::new(Path::new("/nonexistent"));
        let mut listener = RecordingListener::default();
        let result = engine.run_binary(&container, &mut listener);

        assert!(matches!(result, TestExecutionResult::Aborted(Some(ref m)) if m.contains("Failed to spawn")));
        assert_eq!(listener.tests_finished(), 2);
        assert_eq!(listener.count("aborted"), 2);
    }

    #[cfg(unix)]
    mod binaries {
        use super::super::*;
        use crate::filter::NameFilter;
        use crate::launcher::DiscoveryRequestBuilder;
        use crate::testing::{RecordingListener, ScriptedAuthority};
        use std::collections::BTreeSet;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use super::exclusive;
        use std::sync::Arc;

        fn write_executable(path: &Path, content: &str) {
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
            fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
        }

        fn discover_all(root: &Path) -> (LibtestEngine, TestDescriptor) {
            let roots: BTreeSet<PathBuf> = [root.to_path_buf()].into_iter().collect();
            let request = DiscoveryRequestBuilder::request()
                .selectors([Selector::ClassRoots(roots)])
                .build();
            let engine = LibtestEngine::new(Path::new("/nonexistent"));
            let tree = engine.discover(&request, UniqueId::for_engine(ENGINE_ID)).unwrap();
            (engine, tree)
        }

        fn method_event(tree: &TestDescriptor, kind: &str, method: &str, label: &str) -> String {
            let id = tree.id.append("class", "com.x.FooTest").append("method", method);
            if label.is_empty() {
                format!("{} {}", kind, id)
            } else {
                format!("{} {} {}", kind, id, label)
            }
        }

        #[test]
        fn test_find_binaries_skips_artifacts() {
            let _guard = exclusive();
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path();
            write_executable(&root.join("deps/parser-0123456789abcdef"), "");
            write_executable(&root.join("deps/libparser.so"), "");
            fs::write(root.join("deps/parser-0123456789abcdef.d"), "").unwrap();
            fs::write(root.join("deps/notes"), "").unwrap();

            let found = find_binaries(root).unwrap();
            assert_eq!(found, vec![root.join("deps/parser-0123456789abcdef")]);
        }

        #[test]
        fn test_discover_and_execute_scripts() {
            let _guard = exclusive();
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().join("test-classes");
            let helper_marker = dir.path().join("helper-was-loaded");

            write_executable(
                &root.join("com/x/FooTest"),
                r#"#!/bin/sh
if [ "$1" = "--list" ]; then
  printf 'tests::passes: test\ntests::fails: test\ntests::skipped: test\ntests::vanishes: test\n\n4 tests, 0 benchmarks\n'
  exit 0
fi
printf 'running 4 tests\n'
printf 'test tests::passes ... ok\n'
printf 'test tests::fails ... FAILED\n'
printf 'test tests::skipped ... ignored, slow\n'
printf '\nfailures:\n\n---- tests::fails stdout ----\nassertion failed: 1 == 2\n\nfailures:\n    tests::fails\n\n'
printf 'test result: FAILED. 1 passed; 1 failed; 1 ignored\n'
exit 101
"#,
            );
            write_executable(
                &root.join("com/x/Helper"),
                &format!("#!/bin/sh\ntouch '{}'\nexit 0\n", helper_marker.display()),
            );

            let authority = ScriptedAuthority::ends_with("Test");
            let roots: BTreeSet<PathBuf> = [root.clone()].into_iter().collect();
            let request = DiscoveryRequestBuilder::request()
                .selectors([Selector::ClassRoots(roots)])
                .name_filter(Arc::new(NameFilter::try_new(authority).unwrap()))
                .build();

            let engine = LibtestEngine::new(Path::new("/nonexistent")).with_workers(2);
            let tree = engine.discover(&request, UniqueId::for_engine(ENGINE_ID)).unwrap();

            assert!(!helper_marker.exists(), "Helper must not be listed");
            assert_eq!(tree.children.len(), 1);
            let container = &tree.children[0];
            assert_eq!(container.display_name, "com.x.FooTest");
            assert_eq!(container.source, Some(TestSource::class("com.x.FooTest")));
            assert_eq!(container.count_tests(), 4);

            let mut listener = RecordingListener::default();
            engine.execute(&tree, &mut listener).unwrap();

            let events = &listener.events;
            assert!(events.contains(&method_event(&tree, "finished", "tests::passes", "successful")));
            assert!(events.contains(&method_event(&tree, "finished", "tests::fails", "failed")));
            assert!(events.contains(&method_event(&tree, "skipped", "tests::skipped", "slow")));
            assert!(events.contains(&method_event(&tree, "finished", "tests::vanishes", "aborted")));
            assert!(events.contains(&format!("finished {} successful", container.id)));
        }

        #[test]
        fn test_invalid_utf8_output_keeps_results() {
            let _guard = exclusive();
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().join("test-classes");
            write_executable(
                &root.join("com/x/FooTest"),
                r#"#!/bin/sh
if [ "$1" = "--list" ]; then
  printf 'a: test\nb: test\nc: test\n'
  exit 0
fi
printf 'test a ... FAILED\n'
printf 'test b ... ok\n'
printf '\nfailures:\n\n---- a stdout ----\nbytes \377\376 here\n\nfailures:\n    a\n\n'
printf 'test result: FAILED. 1 passed; 1 failed\n'
exit 101
"#,
            );

            let (engine, tree) = discover_all(&root);
            let mut listener = RecordingListener::default();
            engine.execute(&tree, &mut listener).unwrap();

            assert!(listener.events.contains(&method_event(&tree, "finished", "a", "failed")));
            assert!(listener.events.contains(&method_event(&tree, "finished", "b", "successful")));
            assert!(listener.events.contains(&method_event(&tree, "finished", "c", "aborted")));
            assert_eq!(listener.tests_finished(), 3);
            assert!(listener
                .events
                .contains(&format!("finished {} successful", tree.children[0].id)));
        }

        #[test]
        fn test_test_events_are_sequential() {
            let _guard = exclusive();
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().join("test-classes");
            write_executable(
                &root.join("com/x/FooTest"),
                r#"#!/bin/sh
if [ "$1" = "--list" ]; then
  printf 'a: test\nb: test\n'
  exit 0
fi
printf 'test a ... FAILED\n'
printf 'test b ... ok\n'
printf '\nfailures:\n\n---- a stdout ----\nboom\n\nfailures:\n    a\n\n'
exit 101
"#,
            );

            let (engine, tree) = discover_all(&root);
            let mut listener = RecordingListener::default();
            engine.execute(&tree, &mut listener).unwrap();

            let per_test: Vec<&String> = listener
                .events
                .iter()
                .filter(|e| e.contains("[method:"))
                .collect();
            assert_eq!(
                per_test,
                vec![
                    &method_event(&tree, "started", "a", ""),
                    &method_event(&tree, "finished", "a", "failed"),
                    &method_event(&tree, "started", "b", ""),
                    &method_event(&tree, "finished", "b", "successful"),
                ]
            );
        }

        const HUGE_SCRIPT: &str = r#"#!/bin/sh
if [ "$1" = "--list" ]; then
  awk 'BEGIN { for (i = 0; i < 40000; i++) printf "module::submodule::deeply::nested::generated_case_number_%d: test\n", i }'
  exit 0
fi
filtered=0
for arg in "$@"; do
  case "$arg" in
    --*) ;;
    *) filtered=1; printf 'test %s ... ok\n' "$arg" ;;
  esac
done
if [ "$filtered" = 0 ]; then
  awk 'BEGIN { for (i = 0; i < 40000; i++) printf "test module::submodule::deeply::nested::generated_case_number_%d ... ok\n", i }'
fi
exit 0
"#;

        #[test]
        fn test_large_binary_runs_unfiltered() {
            let _guard = exclusive();
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().join("test-classes");
            write_executable(&root.join("com/x/FooTest"), HUGE_SCRIPT);

            let (engine, tree) = discover_all(&root);
            assert_eq!(tree.count_tests(), 40_000);

            let mut listener = RecordingListener::default();
            engine.execute(&tree, &mut listener).unwrap();

            assert_eq!(listener.tests_finished(), 40_000);
            assert_eq!(listener.count("successful"), 40_001);
            assert_eq!(listener.count("aborted"), 0);
        }

        #[test]
        fn test_large_selection_is_batched() {
            let _guard = exclusive();
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().join("test-classes");
            write_executable(&root.join("com/x/FooTest"), HUGE_SCRIPT);

            let (engine, mut tree) = discover_all(&root);
            let dropped = "module::submodule::deeply::nested::generated_case_number_7";
            tree.retain_descendants(&mut |d: &TestDescriptor| d.display_name != dropped);
            assert_eq!(tree.count_tests(), 39_999);

            let mut listener = RecordingListener::default();
            engine.execute(&tree, &mut listener).unwrap();

            assert_eq!(listener.tests_finished(), 39_999);
            assert_eq!(listener.count("successful"), 40_000);
            assert_eq!(listener.count("aborted"), 0);
            let dropped_id = format!("[method:{}]", dropped);
            assert!(!listener.events.iter().any(|e| e.contains(&dropped_id)));
        }

        #[test]
        fn test_missing_search_path_discovers_nothing() {
            let request = DiscoveryRequestBuilder::request()
                .selectors([Selector::Package(String::new())])
                .build();
            let engine = LibtestEngine::new(Path::new("/definitely/not/here"));
            let tree = engine.discover(&request, UniqueId::for_engine(ENGINE_ID)).unwrap();
            assert!(tree.is_root());
            assert!(!tree.contains_tests());
        }
    }
}
