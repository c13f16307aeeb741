//! Test descriptor model
//!
//! Core data structures for representing discovered tests: unique ids,
//! descriptor kinds, the source a descriptor was discovered from, and
//! the hierarchical descriptor tree rooted at an engine.

use std::fmt;
use std::path::{Path, PathBuf};

/// Segment kind used for the first segment of every unique id
pub const ENGINE_SEGMENT: &str = "engine";

/// One `[kind:value]` part of a unique id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Segment {
    pub kind: String,
    pub value: String,
}

/// Hierarchical identifier of a descriptor, e.g.
/// `[engine:libtest]/[class:com.x.FooTest]/[method:it_works]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UniqueId {
    segments: Vec<Segment>,
}

impl UniqueId {
    /// Create the id of an engine root
    pub fn for_engine(engine_id: &str) -> Self {
        Self {
            segments: vec![Segment {
                kind: ENGINE_SEGMENT.to_string(),
                value: engine_id.to_string(),
            }],
        }
    }

    /// Create a child id by appending a segment
    pub fn append(&self, kind: &str, value: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment {
            kind: kind.to_string(),
            value: value.to_string(),
        });
        Self { segments }
    }

    /// Id of the engine this descriptor belongs to
    pub fn engine_id(&self) -> &str {
        &self.segments[0].value
    }

    /// True when this id has only the engine segment
    pub fn is_engine(&self) -> bool {
        self.segments.len() == 1 && self.segments[0].kind == ENGINE_SEGMENT
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "[{}:{}]", segment.kind, segment.value)?;
        }
        Ok(())
    }
}

/// Kind of a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    /// Groups other descriptors (engine root, test binary, class)
    Container,
    /// A single runnable test
    Test,
}

/// Where a descriptor was discovered from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestSource {
    /// A whole test class / unit
    Class { class_name: String },
    /// A single test method owned by a class
    Method {
        class_name: String,
        method_name: String,
    },
    /// A file that is not a class (scripts, data driven suites)
    File { path: PathBuf },
    /// Any source kind this crate does not model
    Other { kind: String },
}

impl TestSource {
    pub fn class(class_name: &str) -> Self {
        TestSource::Class {
            class_name: class_name.to_string(),
        }
    }

    pub fn method(class_name: &str, method_name: &str) -> Self {
        TestSource::Method {
            class_name: class_name.to_string(),
            method_name: method_name.to_string(),
        }
    }

    /// Short name of the source kind, used in diagnostics
    pub fn kind_name(&self) -> &str {
        match self {
            TestSource::Class { .. } => "class",
            TestSource::Method { .. } => "method",
            TestSource::File { .. } => "file",
            TestSource::Other { kind } => kind,
        }
    }
}

/// A node in the discovered test tree
#[derive(Debug, Clone)]
pub struct TestDescriptor {
    pub id: UniqueId,
    pub display_name: String,
    pub kind: DescriptorKind,
    pub source: Option<TestSource>,
    /// Artifact the engine materialised this node from (e.g. a test binary)
    pub location: Option<PathBuf>,
    pub children: Vec<TestDescriptor>,
}

impl TestDescriptor {
    /// Create an engine root
    pub fn new_engine(engine_id: &str, display_name: &str) -> Self {
        Self::new_container(UniqueId::for_engine(engine_id), display_name, None)
    }

    /// Create a container node
    pub fn new_container(id: UniqueId, display_name: &str, source: Option<TestSource>) -> Self {
        Self {
            id,
            display_name: display_name.to_string(),
            kind: DescriptorKind::Container,
            source,
            location: None,
            children: Vec::new(),
        }
    }

    /// Create a test node (leaf)
    pub fn new_test(id: UniqueId, display_name: &str, source: Option<TestSource>) -> Self {
        Self {
            id,
            display_name: display_name.to_string(),
            kind: DescriptorKind::Test,
            source,
            location: None,
            children: Vec::new(),
        }
    }

    pub fn with_location(mut self, location: &Path) -> Self {
        self.location = Some(location.to_path_buf());
        self
    }

    /// Check if this is the engine root
    pub fn is_root(&self) -> bool {
        self.id.is_engine()
    }

    /// Check if this is a leaf node (test)
    pub fn is_test(&self) -> bool {
        self.kind == DescriptorKind::Test
    }

    pub fn is_container(&self) -> bool {
        self.kind == DescriptorKind::Container
    }

    pub fn add_child(&mut self, child: TestDescriptor) {
        self.children.push(child);
    }

    /// True if this node or any descendant is a test
    pub fn contains_tests(&self) -> bool {
        self.is_test() || self.children.iter().any(|c| c.contains_tests())
    }

    /// Count of tests in this subtree
    pub fn count_tests(&self) -> usize {
        let own = if self.is_test() { 1 } else { 0 };
        own + self.children.iter().map(|c| c.count_tests()).sum::<usize>()
    }

    /// Get all tests as a flat list
    pub fn all_tests(&self) -> Vec<&TestDescriptor> {
        let mut tests = Vec::new();
        self.collect_tests(&mut tests);
        tests
    }

    fn collect_tests<'a>(&'a self, tests: &mut Vec<&'a TestDescriptor>) {
        if self.is_test() {
            tests.push(self);
        }
        for child in &self.children {
            child.collect_tests(tests);
        }
    }

    /// Remove every descendant rejected by `keep`, together with its subtree.
    ///
    /// Parents are visited before their children; this node itself is never removed.
    pub fn retain_descendants<F>(&mut self, keep: &mut F)
    where
        F: FnMut(&TestDescriptor) -> bool,
    {
        self.children.retain(|child| keep(child));
        for child in &mut self.children {
            child.retain_descendants(keep);
        }
    }

    /// Remove containers that no longer hold any test
    pub fn prune(&mut self) {
        for child in &mut self.children {
            child.prune();
        }
        self.children.retain(|c| c.contains_tests());
    }

    /// Sort children by display name (containers first, then tests)
    pub fn sort_children(&mut self) {
        self.children.sort_by(|a, b| match (a.is_container(), b.is_container()) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => a.display_name.cmp(&b.display_name),
        });

        for child in &mut self.children {
            child.sort_children();
        }
    }
}
