use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use petgraph::graph::NodeIndex;

use crate::graph::DependencyGraph;
use crate::runner::config::{GroupingPrecedence, ParallelMode};
use crate::unit::{ClassId, ClassKey, TestUnit, UnitId};

/// One unit scheduled inside a worker.
#[derive(Debug, Clone)]
pub struct WorkerTask {
    pub node: NodeIndex,
    pub unit: Arc<TestUnit>,
    /// Units this one depends on; consulted for dependency skips.
    pub upstream: Vec<UnitId>,
    /// Declaration position, used for ordering workers.
    pub order: usize,
}

/// Units that run one after another on a single thread.
#[derive(Debug, Clone)]
pub struct Worker {
    pub tasks: Vec<WorkerTask>,
}

impl Worker {
    pub fn nodes(&self) -> Vec<NodeIndex> {
        self.tasks.iter().map(|t| t.node).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn first_order(&self) -> usize {
        self.tasks.iter().map(|t| t.order).min().unwrap_or(usize::MAX)
    }
}

impl fmt::Display for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.tasks.iter().map(|t| t.unit.to_string()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GroupKey {
    Node(NodeIndex),
    Class(ClassId),
    Instance(ClassKey),
}

/// Decides which free nodes share a worker.
#[derive(Debug, Clone, Copy)]
pub struct WorkerGroupingPolicy {
    mode: ParallelMode,
    precedence: GroupingPrecedence,
}

impl WorkerGroupingPolicy {
    pub fn new(mode: ParallelMode, precedence: GroupingPrecedence) -> Self {
        Self { mode, precedence }
    }

    fn key(&self, node: NodeIndex, unit: &TestUnit) -> GroupKey {
        match self.mode {
            ParallelMode::Classes => GroupKey::Class(unit.class.clone()),
            ParallelMode::Instances => GroupKey::Instance(unit.class_key()),
            ParallelMode::None | ParallelMode::Methods if unit.sequential => {
                GroupKey::Class(unit.class.clone())
            }
            ParallelMode::None | ParallelMode::Methods => GroupKey::Node(node),
        }
    }

    /// Bundle `free` into workers. `free` is expected in the graph's
    /// priority-then-declaration order; tasks inside a worker keep it.
    pub fn group(&self, graph: &DependencyGraph, free: &[NodeIndex]) -> Vec<Worker> {
        let mut workers: Vec<Worker> = Vec::new();
        let mut slots: HashMap<GroupKey, usize> = HashMap::new();

        for &node in free {
            let graph_node = graph.node(node);
            let unit = Arc::clone(&graph_node.unit);
            let task = WorkerTask {
                node,
                upstream: graph
                    .dependencies(node)
                    .into_iter()
                    .map(|d| graph.unit(d).id())
                    .collect(),
                order: graph_node.order,
                unit,
            };
            let key = self.key(node, &task.unit);
            match slots.get(&key) {
                Some(&i) => workers[i].tasks.push(task),
                None => {
                    slots.insert(key, workers.len());
                    workers.push(Worker { tasks: vec![task] });
                }
            }
        }

        // Workers are created in priority order already; class precedence
        // falls back to where each class first appears.
        if self.precedence == GroupingPrecedence::Class {
            workers.sort_by_key(Worker::first_order);
        }
        workers
    }
}
