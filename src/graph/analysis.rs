use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::NodeIndex;

use crate::graph::dynamic::DependencyGraph;

/// Find a cycle in the graph, returning the unit names along the cycle path,
/// starting from the earliest-added unit on it. Returns `None` if the graph
/// is acyclic.
///
/// Neither the check nor the path search recurses, so long dependency chains
/// are safe.
pub fn find_cycle(graph: &DependencyGraph) -> Option<Vec<String>> {
    let start = toposort(graph.inner(), None).err()?.node_id();
    let mut path = cycle_through(graph, start).unwrap_or_else(|| vec![start]);

    let lowest = path
        .iter()
        .enumerate()
        .min_by_key(|(_, n)| n.index())
        .map_or(0, |(i, _)| i);
    path.rotate_left(lowest);
    Some(path.iter().map(|&idx| graph.unit(idx).to_string()).collect())
}

/// Shortest path that leaves `start` along dependency edges and returns to it.
fn cycle_through(graph: &DependencyGraph, start: NodeIndex) -> Option<Vec<NodeIndex>> {
    let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut queue = VecDeque::from([start]);

    while let Some(node) = queue.pop_front() {
        for next in graph.inner().neighbors_directed(node, Direction::Outgoing) {
            if next == start {
                let mut path = vec![node];
                let mut at = node;
                while at != start {
                    at = *parent.get(&at)?;
                    path.push(at);
                }
                path.reverse();
                return Some(path);
            }
            if let Entry::Vacant(e) = parent.entry(next) {
                e.insert(node);
                queue.push_back(next);
            }
        }
    }
    None
}
