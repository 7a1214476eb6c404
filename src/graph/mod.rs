pub mod analysis;
pub mod builder;
pub mod dynamic;

use std::fmt;

pub use builder::{DependencyMode, build};
pub use dynamic::{DependencyGraph, GraphNode, NodeStatus};

/// An error raised while building or mutating a dependency graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphError {
    pub kind: GraphErrorKind,
    pub message: String,
    pub detail: Option<String>,
}

impl GraphError {
    pub(crate) fn new(kind: GraphErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    #[must_use]
    pub(crate) fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for GraphError {}

/// Classification of graph errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphErrorKind {
    /// A declared dependency matched no unit in hard mode.
    UnresolvedDependency,
    /// Declared dependencies form a cycle.
    CyclicDependency,
    /// A node status change other than READY -> RUNNING -> FINISHED.
    IllegalTransition,
    /// A node index that does not belong to this graph.
    UnknownNode,
}

impl fmt::Display for GraphErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnresolvedDependency => write!(f, "unresolved dependency"),
            Self::CyclicDependency => write!(f, "cyclic dependency"),
            Self::IllegalTransition => write!(f, "illegal status transition"),
            Self::UnknownNode => write!(f, "unknown node"),
        }
    }
}
