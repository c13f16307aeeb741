//! Execution listeners
//!
//! Receive start/finish/skip events for every descriptor while a plan runs.
//! Individual test failures are reported here, never through the exit code.

use chrono::Local;
use colored::Colorize;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::io::Write;
use std::time::Instant;
use uuid::Uuid;

use crate::descriptor::{TestDescriptor, UniqueId};
use crate::plan::TestPlan;

/// Final state of an executed descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestExecutionResult {
    Successful,
    Failed(Option<String>),
    Aborted(Option<String>),
}

impl TestExecutionResult {
    pub fn label(&self) -> &'static str {
        match self {
            TestExecutionResult::Successful => "successful",
            TestExecutionResult::Failed(_) => "failed",
            TestExecutionResult::Aborted(_) => "aborted",
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            TestExecutionResult::Successful => None,
            TestExecutionResult::Failed(m) | TestExecutionResult::Aborted(m) => m.as_deref(),
        }
    }
}

/// Receives progress while a test plan executes
pub trait ExecutionListener {
    fn test_plan_execution_started(&mut self, _plan: &TestPlan) {}

    fn test_plan_execution_finished(&mut self, _plan: &TestPlan) {}

    fn execution_started(&mut self, _descriptor: &TestDescriptor) {}

    fn execution_skipped(&mut self, _descriptor: &TestDescriptor, _reason: &str) {}

    fn execution_finished(&mut self, _descriptor: &TestDescriptor, _result: &TestExecutionResult) {}
}

/// Output format of the progress stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Console,
    #[value(name = "teamcity")]
    TeamCity,
    Json,
}

impl ReportFormat {
    /// Build a listener writing to stdout
    pub fn listener(&self) -> Box<dyn ExecutionListener> {
        match self {
            ReportFormat::Console => Box::new(ConsoleListener::new()),
            ReportFormat::TeamCity => Box::new(TeamCityListener::new(std::io::stdout())),
            ReportFormat::Json => Box::new(JsonListener::new(std::io::stdout())),
        }
    }
}

/// Human readable, coloured output with a summary
#[derive(Debug, Default)]
pub struct ConsoleListener {
    passed: usize,
    failed: usize,
    skipped: usize,
    aborted: usize,
    started_at: Option<Instant>,
}

impl ConsoleListener {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionListener for ConsoleListener {
    fn test_plan_execution_started(&mut self, plan: &TestPlan) {
        self.started_at = Some(Instant::now());
        println!(
            "\n{} {} test(s) to run\n",
            "→".blue(),
            plan.count_tests()
        );
    }

    fn test_plan_execution_finished(&mut self, _plan: &TestPlan) {
        let duration_ms = self
            .started_at
            .map(|s| s.elapsed().as_millis())
            .unwrap_or(0);

        println!("\n{}", "─".repeat(50).dimmed());
        println!(
            "  {} passed, {} failed, {} skipped, {} aborted {}",
            self.passed.to_string().green(),
            self.failed.to_string().red(),
            self.skipped.to_string().yellow(),
            self.aborted.to_string().red(),
            format!("({}ms)", duration_ms).dimmed()
        );
    }

    fn execution_started(&mut self, descriptor: &TestDescriptor) {
        if descriptor.is_container() && !descriptor.is_root() {
            println!("{} {}", "▸".cyan(), descriptor.display_name.bold());
        }
    }

    fn execution_skipped(&mut self, descriptor: &TestDescriptor, reason: &str) {
        if descriptor.is_test() {
            self.skipped += 1;
            println!(
                "  {} {} {}",
                "⊘".yellow(),
                descriptor.display_name,
                reason.dimmed()
            );
        }
    }

    fn execution_finished(&mut self, descriptor: &TestDescriptor, result: &TestExecutionResult) {
        if !descriptor.is_test() {
            if let TestExecutionResult::Aborted(message) = result {
                println!(
                    "{} {} {}",
                    "!".red(),
                    descriptor.display_name.red(),
                    message.as_deref().unwrap_or("aborted").dimmed()
                );
            }
            return;
        }

        match result {
            TestExecutionResult::Successful => {
                self.passed += 1;
                println!("  {} {}", "✓".green(), descriptor.display_name);
            }
            TestExecutionResult::Failed(message) => {
                self.failed += 1;
                println!("  {} {}", "✗".red(), descriptor.display_name.red());
                if let Some(message) = message {
                    for line in message.lines() {
                        println!("      {}", line.dimmed());
                    }
                }
            }
            TestExecutionResult::Aborted(message) => {
                self.aborted += 1;
                println!(
                    "  {} {} {}",
                    "!".red(),
                    descriptor.display_name,
                    message.as_deref().unwrap_or("").dimmed()
                );
            }
        }
    }
}

/// TeamCity service messages, one per line
pub struct TeamCityListener<W: Write> {
    out: W,
    flow_id: String,
    started: HashMap<UniqueId, Instant>,
}

impl<W: Write> TeamCityListener<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            flow_id: Uuid::new_v4().to_string(),
            started: HashMap::new(),
        }
    }

    pub fn with_flow_id(mut self, flow_id: &str) -> Self {
        self.flow_id = flow_id.to_string();
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn message(&mut self, name: &str, attributes: &[(&str, &str)]) {
        let mut line = format!("##teamcity[{}", name);
        for (key, value) in attributes {
            line.push_str(&format!(" {}='{}'", key, escape_teamcity(value)));
        }
        line.push_str(&format!(" flowId='{}'", escape_teamcity(&self.flow_id)));
        line.push_str(&format!(" timestamp='{}'", timestamp()));
        line.push(']');
        let _ = writeln!(self.out, "{}", line);
    }
}

impl<W: Write> ExecutionListener for TeamCityListener<W> {
    fn execution_started(&mut self, descriptor: &TestDescriptor) {
        self.started.insert(descriptor.id.clone(), Instant::now());
        if descriptor.is_test() {
            self.message("testStarted", &[("name", descriptor.display_name.as_str())]);
        } else if !descriptor.is_root() {
            self.message("testSuiteStarted", &[("name", descriptor.display_name.as_str())]);
        }
    }

    fn execution_skipped(&mut self, descriptor: &TestDescriptor, reason: &str) {
        if descriptor.is_test() {
            self.message("testIgnored", &[("name", descriptor.display_name.as_str()), ("message", reason)]);
        }
    }

    fn execution_finished(&mut self, descriptor: &TestDescriptor, result: &TestExecutionResult) {
        let duration_ms = self
            .started
            .remove(&descriptor.id)
            .map(|s| s.elapsed().as_millis())
            .unwrap_or(0)
            .to_string();
        let name = descriptor.display_name.as_str();

        if descriptor.is_test() {
            if let TestExecutionResult::Failed(message) | TestExecutionResult::Aborted(message) = result {
                let message = message.as_deref().unwrap_or(result.label());
                self.message("testFailed", &[("name", name), ("message", message)]);
            }
            self.message("testFinished", &[("name", name), ("duration", duration_ms.as_str())]);
        } else if !descriptor.is_root() {
            if let TestExecutionResult::Aborted(message) = result {
                let text = message.as_deref().unwrap_or("aborted");
                self.message("message", &[("text", text), ("status", "ERROR")]);
            }
            self.message("testSuiteFinished", &[("name", name)]);
        } else if let TestExecutionResult::Aborted(message) = result {
            let text = message.as_deref().unwrap_or("engine aborted");
            self.message("message", &[("text", text), ("status", "ERROR")]);
        }
    }
}

/// Escape a value for use inside a TeamCity service message attribute
pub fn escape_teamcity(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '|' => escaped.push_str("||"),
            '\'' => escaped.push_str("|'"),
            '\n' => escaped.push_str("|n"),
            '\r' => escaped.push_str("|r"),
            '[' => escaped.push_str("|["),
            ']' => escaped.push_str("|]"),
            '\u{0085}' => escaped.push_str("|x"),
            '\u{2028}' => escaped.push_str("|l"),
            '\u{2029}' => escaped.push_str("|p"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%z").to_string()
}

/// One JSON object per event, for machine consumption
pub struct JsonListener<W: Write> {
    out: W,
    run_id: String,
}

impl<W: Write> JsonListener<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            run_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, event: serde_json::Value) {
        let _ = writeln!(self.out, "{}", event);
    }
}

impl<W: Write> ExecutionListener for JsonListener<W> {
    fn test_plan_execution_started(&mut self, plan: &TestPlan) {
        let event = json!({
            "event": "plan_started",
            "run_id": self.run_id,
            "tests": plan.count_tests(),
        });
        self.emit(event);
    }

    fn test_plan_execution_finished(&mut self, plan: &TestPlan) {
        let event = json!({
            "event": "plan_finished",
            "run_id": self.run_id,
            "tests": plan.count_tests(),
        });
        self.emit(event);
    }

    fn execution_started(&mut self, descriptor: &TestDescriptor) {
        let event = json!({
            "event": "started",
            "run_id": self.run_id,
            "id": descriptor.id.to_string(),
            "name": descriptor.display_name,
            "test": descriptor.is_test(),
        });
        self.emit(event);
    }

    fn execution_skipped(&mut self, descriptor: &TestDescriptor, reason: &str) {
        let event = json!({
            "event": "skipped",
            "run_id": self.run_id,
            "id": descriptor.id.to_string(),
            "name": descriptor.display_name,
            "reason": reason,
        });
        self.emit(event);
    }

    fn execution_finished(&mut self, descriptor: &TestDescriptor, result: &TestExecutionResult) {
        let event = json!({
            "event": "finished",
            "run_id": self.run_id,
            "id": descriptor.id.to_string(),
            "name": descriptor.display_name,
            "test": descriptor.is_test(),
            "result": result.label(),
            "message": result.message(),
        });
        self.emit(event);
    }
}
