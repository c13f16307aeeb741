//! Execution driver
//!
//! Hands a non-empty plan to the launcher. Pass/fail of individual tests is
//! the listener's business.

use tracing::info;

use crate::launcher::Launcher;
use crate::listener::ExecutionListener;
use crate::plan::TestPlan;

/// What happened to a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The plan held no tests; no engine was invoked
    NoTests,
    /// The plan was handed to the engines
    Executed,
}

pub struct ExecutionDriver<'a> {
    launcher: &'a Launcher,
}

impl<'a> ExecutionDriver<'a> {
    pub fn new(launcher: &'a Launcher) -> Self {
        Self { launcher }
    }

    pub fn run(&self, plan: &TestPlan, listener: &mut dyn ExecutionListener) -> RunOutcome {
        if !plan.contains_tests() {
            info!("test plan is empty");
            return RunOutcome::NoTests;
        }

        info!(tests = plan.count_tests(), "executing test plan");
        self.launcher.execute(plan, listener);
        RunOutcome::Executed
    }
}
