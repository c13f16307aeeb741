//! Process exit control
//!
//! Wires root resolution, filters, discovery and execution into a single
//! run that ends in one of three outcomes. The caller turns the outcome into
//! a process exit code exactly once.

use anyhow::{Context, Result};
use colored::Colorize;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::authority::BucketingAuthority;
use crate::config::LEGACY_ENGINE_ID;
use crate::discovery::DiscoveryOrchestrator;
use crate::driver::{ExecutionDriver, RunOutcome};
use crate::filter::{NameFilter, StructuralFilter};
use crate::launcher::Launcher;
use crate::listener::ExecutionListener;
use crate::roots::{ClassRootResolver, ClassRootSource};

pub const EXIT_NORMAL: i32 = 0;
pub const EXIT_SETUP_FAILURE: i32 = 1;
/// Tells the build that nothing matched the current bucket
pub const EXIT_NO_TESTS: i32 = 42;

/// Terminal state of a bootstrap run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Tests ran (some may have failed) or the run completed normally
    Normal,
    /// Roots, filters or configuration could not be set up
    SetupFailure,
    /// Discovery produced no tests
    NoTests,
}

impl ExitOutcome {
    pub fn code(&self) -> i32 {
        match self {
            ExitOutcome::Normal => EXIT_NORMAL,
            ExitOutcome::SetupFailure => EXIT_SETUP_FAILURE,
            ExitOutcome::NoTests => EXIT_NO_TESTS,
        }
    }
}

/// Print a setup error with its full cause chain (and backtrace, if captured)
pub fn report_setup_failure(err: &anyhow::Error) -> ExitOutcome {
    eprintln!("{} {:?}", "Error:".red().bold(), err);
    ExitOutcome::SetupFailure
}

pub struct Bootstrap {
    root_source: Box<dyn ClassRootSource>,
    authority: Arc<dyn BucketingAuthority>,
    launcher: Launcher,
    excluded_engines: BTreeSet<String>,
}

impl Bootstrap {
    pub fn new(
        root_source: Box<dyn ClassRootSource>,
        authority: Arc<dyn BucketingAuthority>,
        launcher: Launcher,
    ) -> Self {
        Self {
            root_source,
            authority,
            launcher,
            excluded_engines: [LEGACY_ENGINE_ID.to_string()].into_iter().collect(),
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

    /// Filters and roots, in that order; any failure aborts the run
    fn setup(&self) -> Result<DiscoveryOrchestrator> {
        let name_filter = NameFilter::try_new(self.authority.clone())
            .context("Failed to create class name filter")?;
        let structural_filter = StructuralFilter::try_new(self.authority.clone())
            .context("Failed to create post-discovery filter")?;
        let roots = ClassRootResolver::new(self.root_source.as_ref()).resolve()?;

        Ok(DiscoveryOrchestrator::new(roots, name_filter, structural_filter)
            .with_excluded_engines(self.excluded_engines.iter().cloned()))
    }

    pub fn run(&self, listener: &mut dyn ExecutionListener) -> ExitOutcome {
        let orchestrator = match self.setup() {
            Ok(orchestrator) => orchestrator,
            Err(e) => return report_setup_failure(&e),
        };

        eprintln!(
            "{} Number of test engines: {}",
            "🔍".cyan(),
            self.launcher.engine_count()
        );

        let plan = orchestrator.discover(&self.launcher);

        match ExecutionDriver::new(&self.launcher).run(&plan, listener) {
            RunOutcome::NoTests => ExitOutcome::NoTests,
            RunOutcome::Executed => ExitOutcome::Normal,
        }
    }
}
