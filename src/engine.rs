//! Test engine boundary
//!
//! An engine turns a discovery request into a descriptor tree and later runs
//! that tree, streaming events to a listener.

use anyhow::Result;

use crate::descriptor::{TestDescriptor, UniqueId};
use crate::launcher::DiscoveryRequest;
use crate::listener::ExecutionListener;

pub trait TestEngine: Send + Sync {
    /// Stable identifier, used for engine filtering and unique ids
    fn id(&self) -> &str;

    /// Discover tests for `request`, returning a tree rooted at `unique_id`.
    ///
    /// Engines must consult [`DiscoveryRequest::accepts_class_name`] for every
    /// candidate before loading it.
    fn discover(&self, request: &DiscoveryRequest, unique_id: UniqueId) -> Result<TestDescriptor>;

    /// Run the tests under `root`, reporting each descriptor below the root.
    fn execute(&self, root: &TestDescriptor, listener: &mut dyn ExecutionListener) -> Result<()>;
}
