//! Runx Bootstrap - sharded test discovery and execution
//!
//! A library for running the tests found on a set of class roots with:
//! - A cheap name filter applied to every candidate before it is loaded
//! - A structural filter applied to discovered classes and methods
//! - Bucketing of test classes across parallel CI workers
//! - Pluggable test engines and progress listeners (console, TeamCity, JSON)
//! - Exit codes CI can act on: 0 ran, 1 setup failed, 42 no tests matched

pub mod authority;
pub mod bootstrap;
pub mod config;
pub mod descriptor;
pub mod discovery;
pub mod driver;
pub mod engine;
pub mod filter;
pub mod launcher;
pub mod libtest;
pub mod listener;
pub mod plan;
pub mod roots;

#[cfg(test)]
mod testing;

pub use authority::{AuthorityError, Bucket, BucketingAuthority, ShardAuthority};
pub use bootstrap::{Bootstrap, ExitOutcome};
pub use config::Config;
pub use descriptor::{DescriptorKind, TestDescriptor, TestSource, UniqueId};
pub use discovery::DiscoveryOrchestrator;
pub use driver::{ExecutionDriver, RunOutcome};
pub use engine::TestEngine;
pub use filter::{FilterResult, NameFilter, StructuralFilter};
pub use launcher::{DiscoveryRequest, DiscoveryRequestBuilder, EngineFilter, Launcher, Selector};
pub use libtest::LibtestEngine;
pub use listener::{ExecutionListener, ReportFormat, TestExecutionResult};
pub use plan::TestPlan;
pub use roots::{ChainedRoots, ClassRootResolver, ClassRootSource, EnvRoots, StaticRoots};
