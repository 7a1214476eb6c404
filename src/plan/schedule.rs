use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::graph::{DependencyGraph, NodeStatus};
use crate::plan::membership::Membership;
use crate::plan::worker::WorkerGroupingPolicy;
use crate::runner::executor::{RunError, RunErrorKind};
use crate::unit::ClassKey;

/// The batch order a run would follow, computed without invoking anything.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schedule {
    pub test: String,
    pub units_total: usize,
    pub edges_total: usize,
    pub batches: Vec<Batch>,
}

/// One free-node set and the workers built from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Batch {
    pub batch: usize,
    pub workers: Vec<ScheduledWorker>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledWorker {
    pub units: Vec<String>,
    /// Class instances whose before-class methods run ahead of this worker.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub opens: Vec<String>,
    /// Class instances whose last unit is in this worker.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub closes: Vec<String>,
}

impl Schedule {
    /// Unit names in the order a sequential run would start them.
    pub fn flatten(&self) -> Vec<String> {
        self.batches
            .iter()
            .flat_map(|b| b.workers.iter())
            .flat_map(|w| w.units.iter().cloned())
            .collect()
    }
}

/// Drain `graph` batch by batch, finishing every worker of a batch before
/// computing the next free-node set.
///
/// # Errors
///
/// Returns [`RunErrorKind::NoFreeNodes`] if nodes remain but none is free.
pub fn compile(
    test: &str,
    mut graph: DependencyGraph,
    policy: &WorkerGroupingPolicy,
    membership: &Membership,
) -> Result<Schedule, RunError> {
    let units_total = graph.node_count();
    let edges_total = graph.edge_count();
    let mut remaining: HashMap<ClassKey, usize> = membership.classes().iter().cloned().collect();
    let mut opened: HashSet<ClassKey> = HashSet::new();
    let mut batches = Vec::new();

    while !graph.is_finished() {
        let free = graph.free_nodes();
        if free.is_empty() {
            return Err(RunError::new(
                RunErrorKind::NoFreeNodes,
                format!("{} units remain but none is free", graph.remaining()),
            ));
        }
        let mut scheduled = Vec::new();
        for worker in policy.group(&graph, &free) {
            let mut opens = Vec::new();
            let mut closes = Vec::new();
            for task in &worker.tasks {
                let key = task.unit.class_key();
                if opened.insert(key.clone()) {
                    opens.push(key.to_string());
                }
                if let Some(left) = remaining.get_mut(&key) {
                    *left = left.saturating_sub(1);
                    if *left == 0 {
                        closes.push(key.to_string());
                    }
                }
            }
            graph.set_statuses(&worker.nodes(), NodeStatus::Finished)?;
            scheduled.push(ScheduledWorker {
                units: worker.tasks.iter().map(|t| t.unit.to_string()).collect(),
                opens,
                closes,
            });
        }
        batches.push(Batch {
            batch: batches.len() + 1,
            workers: scheduled,
        });
    }

    Ok(Schedule {
        test: test.to_owned(),
        units_total,
        edges_total,
        batches,
    })
}
