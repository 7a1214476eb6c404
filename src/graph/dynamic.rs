use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::graph::{GraphError, GraphErrorKind};
use crate::unit::{TestUnit, UnitId};

/// Scheduling status of a graph node. Says nothing about pass/fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeStatus {
    Ready,
    Running,
    Finished,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "READY"),
            Self::Running => write!(f, "RUNNING"),
            Self::Finished => write!(f, "FINISHED"),
        }
    }
}

/// Node weight: the unit plus its run-state.
#[derive(Debug)]
pub struct GraphNode {
    pub unit: Arc<TestUnit>,
    pub status: NodeStatus,
    /// Position in the intercepted unit list; the declaration-order tie-break.
    pub order: usize,
}

/// Directed graph over test units. An edge `a -> b` means `a` depends on `b`:
/// `b` must be FINISHED before `a` may start.
///
/// The graph owns the units; everything else refers to them by `NodeIndex`.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraph<GraphNode, ()>,
    by_unit: HashMap<UnitId, NodeIndex>,
    finished: usize,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_node(&mut self, unit: Arc<TestUnit>) -> NodeIndex {
        let order = self.graph.node_count();
        let id = unit.id();
        let idx = self.graph.add_node(GraphNode {
            unit,
            status: NodeStatus::Ready,
            order,
        });
        self.by_unit.insert(id, idx);
        idx
    }

    /// Record that `from` depends on `to`. Duplicate and self edges are ignored.
    pub(crate) fn add_dependency(&mut self, from: NodeIndex, to: NodeIndex) -> bool {
        if from == to || self.graph.contains_edge(from, to) {
            return false;
        }
        self.graph.add_edge(from, to, ());
        true
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn node(&self, idx: NodeIndex) -> &GraphNode {
        &self.graph[idx]
    }

    pub fn unit(&self, idx: NodeIndex) -> &Arc<TestUnit> {
        &self.graph[idx].unit
    }

    pub fn status(&self, idx: NodeIndex) -> NodeStatus {
        self.graph[idx].status
    }

    pub fn index_of(&self, unit: UnitId) -> Option<NodeIndex> {
        self.by_unit.get(&unit).copied()
    }

    /// All node indices in insertion order.
    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    /// Nodes this node depends on.
    pub fn dependencies(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut deps: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .collect();
        deps.sort_by_key(|d| self.graph[*d].order);
        deps
    }

    /// READY nodes whose dependencies are all FINISHED, ordered by ascending
    /// priority and then declaration order.
    pub fn free_nodes(&self) -> Vec<NodeIndex> {
        let mut free: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&idx| self.graph[idx].status == NodeStatus::Ready)
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .all(|dep| self.graph[dep].status == NodeStatus::Finished)
            })
            .collect();
        free.sort_by_key(|&idx| {
            let node = &self.graph[idx];
            (node.unit.priority, node.order)
        });
        free
    }

    /// Move a node forward. Legal moves are READY -> RUNNING,
    /// READY -> FINISHED and RUNNING -> FINISHED.
    ///
    /// # Errors
    ///
    /// Returns [`GraphErrorKind::IllegalTransition`] for any other move and
    /// [`GraphErrorKind::UnknownNode`] for an index outside this graph.
    pub fn set_status(&mut self, idx: NodeIndex, status: NodeStatus) -> Result<(), GraphError> {
        let Some(node) = self.graph.node_weight_mut(idx) else {
            return Err(GraphError::new(
                GraphErrorKind::UnknownNode,
                format!("node {} is not in the graph", idx.index()),
            ));
        };
        let legal = matches!(
            (node.status, status),
            (NodeStatus::Ready, NodeStatus::Running)
                | (NodeStatus::Ready, NodeStatus::Finished)
                | (NodeStatus::Running, NodeStatus::Finished)
        );
        if !legal {
            return Err(GraphError::new(
                GraphErrorKind::IllegalTransition,
                format!("{} cannot move from {} to {}", node.unit, node.status, status),
            ));
        }
        node.status = status;
        if status == NodeStatus::Finished {
            self.finished += 1;
        }
        Ok(())
    }

    /// Apply [`set_status`](Self::set_status) to every node in `nodes`.
    ///
    /// # Errors
    ///
    /// Stops at the first illegal transition.
    pub fn set_statuses(&mut self, nodes: &[NodeIndex], status: NodeStatus) -> Result<(), GraphError> {
        for &idx in nodes {
            self.set_status(idx, status)?;
        }
        Ok(())
    }

    /// Every node has reached FINISHED.
    pub fn is_finished(&self) -> bool {
        self.finished == self.graph.node_count()
    }

    pub fn remaining(&self) -> usize {
        self.graph.node_count() - self.finished
    }

    /// Nodes not yet FINISHED, in declaration order.
    pub fn unfinished(&self) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&idx| self.graph[idx].status != NodeStatus::Finished)
            .collect()
    }

    pub(crate) fn inner(&self) -> &DiGraph<GraphNode, ()> {
        &self.graph
    }
}

impl fmt::Display for DependencyGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[DependencyGraph]")?;
        for idx in self.graph.node_indices() {
            let node = &self.graph[idx];
            let deps: Vec<String> = self
                .dependencies(idx)
                .into_iter()
                .map(|d| self.graph[d].unit.to_string())
                .collect();
            if deps.is_empty() {
                writeln!(f, "  {} [{}]", node.unit, node.status)?;
            } else {
                writeln!(f, "  {} [{}] <- {}", node.unit, node.status, deps.join(", "))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(name: &str, priority: i32) -> Arc<TestUnit> {
        Arc::new(TestUnit::passing("C", name).with_priority(priority))
    }

    fn chain() -> (DependencyGraph, NodeIndex, NodeIndex, NodeIndex) {
        let mut g = DependencyGraph::new();
        let a = g.add_node(unit("a", 0));
        let b = g.add_node(unit("b", 0));
        let c = g.add_node(unit("c", 0));
        g.add_dependency(b, a);
        g.add_dependency(c, b);
        (g, a, b, c)
    }

    #[test]
    fn all_nodes_start_ready() {
        let (g, a, b, c) = chain();
        assert_eq!(g.status(a), NodeStatus::Ready);
        assert_eq!(g.status(b), NodeStatus::Ready);
        assert_eq!(g.status(c), NodeStatus::Ready);
        assert_eq!(g.remaining(), 3);
    }

    #[test]
    fn free_nodes_wait_for_dependencies() {
        let (mut g, a, b, c) = chain();
        assert_eq!(g.free_nodes(), vec![a]);
        g.set_status(a, NodeStatus::Running).unwrap();
        assert!(g.free_nodes().is_empty());
        g.set_status(a, NodeStatus::Finished).unwrap();
        assert_eq!(g.free_nodes(), vec![b]);
        g.set_status(b, NodeStatus::Finished).unwrap();
        assert_eq!(g.free_nodes(), vec![c]);
        g.set_status(c, NodeStatus::Finished).unwrap();
        assert!(g.is_finished());
        assert!(g.free_nodes().is_empty());
    }

    #[test]
    fn free_nodes_sorted_by_priority_then_order() {
        let mut g = DependencyGraph::new();
        let late = g.add_node(unit("late", 5));
        let first = g.add_node(unit("first", -1));
        let plain = g.add_node(unit("plain", 0));
        let plain2 = g.add_node(unit("plain2", 0));
        assert_eq!(g.free_nodes(), vec![first, plain, plain2, late]);
    }

    #[test]
    fn finished_is_terminal() {
        let (mut g, a, _, _) = chain();
        g.set_status(a, NodeStatus::Finished).unwrap();
        let err = g.set_status(a, NodeStatus::Running).unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::IllegalTransition);
        let err = g.set_status(a, NodeStatus::Finished).unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::IllegalTransition);
    }

    #[test]
    fn unknown_node_is_rejected() {
        let (mut g, _, _, _) = chain();
        let err = g
            .set_status(NodeIndex::new(99), NodeStatus::Finished)
            .unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::UnknownNode);
    }

    #[test]
    fn running_cannot_go_back_to_ready() {
        let (mut g, a, _, _) = chain();
        g.set_status(a, NodeStatus::Running).unwrap();
        assert!(g.set_status(a, NodeStatus::Ready).is_err());
    }

    #[test]
    fn self_and_duplicate_edges_ignored() {
        let mut g = DependencyGraph::new();
        let a = g.add_node(unit("a", 0));
        let b = g.add_node(unit("b", 0));
        assert!(!g.add_dependency(a, a));
        assert!(g.add_dependency(b, a));
        assert!(!g.add_dependency(b, a));
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn dependencies_follow_edges() {
        let (g, a, b, c) = chain();
        assert_eq!(g.dependencies(b), vec![a]);
        assert_eq!(g.dependencies(c), vec![b]);
        assert_eq!(g.index_of(g.unit(c).id()), Some(c));
    }

    #[test]
    fn unfinished_lists_remaining_nodes() {
        let (mut g, a, b, c) = chain();
        g.set_statuses(&[a, b], NodeStatus::Finished).unwrap();
        assert_eq!(g.unfinished(), vec![c]);
        assert_eq!(g.remaining(), 1);
    }

    #[test]
    fn display_lists_dependencies() {
        let (g, _, _, _) = chain();
        let text = g.to_string();
        assert!(text.contains("C.b [READY] <- C.a"));
        assert!(text.contains("C.a [READY]\n"));
    }
}
