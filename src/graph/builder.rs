use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

use crate::graph::analysis::find_cycle;
use crate::graph::dynamic::DependencyGraph;
use crate::graph::{GraphError, GraphErrorKind};
use crate::unit::TestUnit;

/// How unresolvable dependency targets are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyMode {
    /// A dependency that matches nothing fails construction.
    #[default]
    Hard,
    /// A dependency that matches nothing is dropped.
    Soft,
}

impl fmt::Display for DependencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hard => write!(f, "hard"),
            Self::Soft => write!(f, "soft"),
        }
    }
}

/// Build a dependency graph over `units`, in the given order.
///
/// Method entries containing a `.` match a unit's qualified `Class.method`
/// name. Bare method names only match within the depending unit's own class.
/// Group entries match every unit in the group.
///
/// # Errors
///
/// Fails with [`GraphErrorKind::UnresolvedDependency`] when a target matches
/// nothing in hard mode, or [`GraphErrorKind::CyclicDependency`] when the
/// resolved edges form a cycle.
pub fn build(units: &[Arc<TestUnit>], mode: DependencyMode) -> Result<DependencyGraph, GraphError> {
    let mut graph = DependencyGraph::new();
    let indices: Vec<NodeIndex> = units
        .iter()
        .map(|u| graph.add_node(Arc::clone(u)))
        .collect();
    let lookup = Lookup::new(units);

    for (i, unit) in units.iter().enumerate() {
        let from = indices[i];

        for entry in &unit.depends_on_methods {
            let targets = lookup.method(unit, entry);
            if targets.is_empty() {
                unresolved(mode, unit, "method", entry)?;
                continue;
            }
            for &t in targets {
                graph.add_dependency(from, indices[t]);
            }
        }

        for group in &unit.depends_on_groups {
            let targets = lookup.group(group);
            if targets.is_empty() {
                unresolved(mode, unit, "group", group)?;
                continue;
            }
            for &t in targets {
                graph.add_dependency(from, indices[t]);
            }
        }
    }

    if let Some(cycle) = find_cycle(&graph) {
        let mut path = cycle.clone();
        if let Some(first) = cycle.first() {
            path.push(first.clone());
        }
        return Err(GraphError::new(GraphErrorKind::CyclicDependency, path.join(" -> "))
            .with_detail(format!("{} units in cycle", cycle.len())));
    }

    tracing::debug!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        %mode,
        "dependency graph built"
    );
    Ok(graph)
}

/// Unit positions by qualified name, by class and method, and by group.
struct Lookup<'a> {
    qualified: HashMap<String, Vec<usize>>,
    by_class: HashMap<&'a str, HashMap<&'a str, Vec<usize>>>,
    groups: HashMap<&'a str, Vec<usize>>,
}

impl<'a> Lookup<'a> {
    fn new(units: &'a [Arc<TestUnit>]) -> Self {
        let mut lookup = Self {
            qualified: HashMap::new(),
            by_class: HashMap::new(),
            groups: HashMap::new(),
        };
        for (j, u) in units.iter().enumerate() {
            lookup.qualified.entry(u.qualified_name()).or_default().push(j);
            lookup
                .by_class
                .entry(u.class.as_str())
                .or_default()
                .entry(u.method.as_str())
                .or_default()
                .push(j);
            for g in &u.groups {
                let slot = lookup.groups.entry(g.as_str()).or_default();
                if slot.last() != Some(&j) {
                    slot.push(j);
                }
            }
        }
        lookup
    }

    fn method(&self, unit: &TestUnit, entry: &str) -> &[usize] {
        let found = if entry.contains('.') {
            self.qualified.get(entry)
        } else {
            self.by_class
                .get(unit.class.as_str())
                .and_then(|methods| methods.get(entry))
        };
        found.map(Vec::as_slice).unwrap_or(&[])
    }

    fn group(&self, group: &str) -> &[usize] {
        self.groups.get(group).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn unresolved(
    mode: DependencyMode,
    unit: &TestUnit,
    what: &str,
    target: &str,
) -> Result<(), GraphError> {
    match mode {
        DependencyMode::Soft => {
            tracing::debug!(unit = %unit, target, what, "ignoring missing soft dependency");
            Ok(())
        }
        DependencyMode::Hard => Err(GraphError::new(
            GraphErrorKind::UnresolvedDependency,
            format!("{unit} depends on {what} '{target}', which matches no unit"),
        )),
    }
}
