//! Test plan
//!
//! The discovered and filtered descriptor trees, one per participating engine.

use crate::descriptor::TestDescriptor;

#[derive(Debug, Clone, Default)]
pub struct TestPlan {
    roots: Vec<TestDescriptor>,
}

impl TestPlan {
    pub fn new(roots: Vec<TestDescriptor>) -> Self {
        Self { roots }
    }

    /// Engine roots of the plan
    pub fn roots(&self) -> &[TestDescriptor] {
        &self.roots
    }

    /// True if any engine contributed at least one test
    pub fn contains_tests(&self) -> bool {
        self.roots.iter().any(|r| r.contains_tests())
    }

    pub fn count_tests(&self) -> usize {
        self.roots.iter().map(|r| r.count_tests()).sum()
    }

    pub fn engine_ids(&self) -> Vec<&str> {
        self.roots.iter().map(|r| r.id.engine_id()).collect()
    }
}
