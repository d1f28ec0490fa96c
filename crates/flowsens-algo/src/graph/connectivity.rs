//! Bus connectivity under temporary removals.
//!
//! The graph is taken once from a network: buses are vertices, every branch
//! connected at both sides is an edge. Contingency code then removes edges and
//! vertices inside a temporary change level, reads the components, and undoes
//! the level before moving on to the next state.

use crate::network::{BranchConnection, LfNetwork};
use petgraph::unionfind::UnionFind;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Edge(usize),
    Vertex(usize),
}

#[derive(Debug, Clone)]
pub struct GraphConnectivity {
    vertex_count: usize,
    /// Endpoints per branch index, `None` for branches outside the graph.
    edges: Vec<Option<(usize, usize)>>,
    removed_edges: Vec<bool>,
    removed_vertices: Vec<bool>,
    levels: Vec<Vec<Change>>,
    labels: Option<Vec<usize>>,
}

impl GraphConnectivity {
    pub fn new(net: &LfNetwork) -> Self {
        let edges = (0..net.branches.len())
            .map(|br| match net.branch_connection(br) {
                BranchConnection::Both => {
                    let b = &net.branches[br];
                    b.bus1.zip(b.bus2)
                }
                _ => None,
            })
            .collect::<Vec<_>>();
        let removed_vertices = net.buses.iter().map(|b| b.disabled).collect();
        Self {
            vertex_count: net.buses.len(),
            removed_edges: vec![false; edges.len()],
            edges,
            removed_vertices,
            levels: Vec::new(),
            labels: None,
        }
    }

    pub fn start_temporary_changes(&mut self) {
        self.levels.push(Vec::new());
    }

    /// Revert every removal made since the matching
    /// [`start_temporary_changes`](Self::start_temporary_changes).
    pub fn undo_temporary_changes(&mut self) {
        let Some(level) = self.levels.pop() else {
            return;
        };
        for change in level.into_iter().rev() {
            match change {
                Change::Edge(e) => self.removed_edges[e] = false,
                Change::Vertex(v) => self.removed_vertices[v] = false,
            }
        }
        self.labels = None;
    }

    fn record(&mut self, change: Change) {
        if let Some(level) = self.levels.last_mut() {
            level.push(change);
        }
        self.labels = None;
    }

    pub fn remove_edge(&mut self, branch: usize) {
        if self.edges.get(branch).copied().flatten().is_none() || self.removed_edges[branch] {
            return;
        }
        self.removed_edges[branch] = true;
        self.record(Change::Edge(branch));
    }

    pub fn remove_vertex(&mut self, bus: usize) {
        if self.removed_vertices[bus] {
            return;
        }
        self.removed_vertices[bus] = true;
        self.record(Change::Vertex(bus));
    }

    pub fn is_removed(&self, bus: usize) -> bool {
        self.removed_vertices[bus]
    }

    /// Component label of every bus. Removed buses carry their own label.
    pub fn labels(&mut self) -> &[usize] {
        if self.labels.is_none() {
            let mut uf = UnionFind::<usize>::new(self.vertex_count);
            for (e, edge) in self.edges.iter().enumerate() {
                let Some((b1, b2)) = *edge else {
                    continue;
                };
                if self.removed_edges[e] || self.removed_vertices[b1] || self.removed_vertices[b2] {
                    continue;
                }
                uf.union(b1, b2);
            }
            self.labels = Some(uf.into_labeling());
        }
        self.labels.as_deref().unwrap_or(&[])
    }

    /// Number of components made of buses still in the graph.
    pub fn component_count(&mut self) -> usize {
        let removed = self.removed_vertices.clone();
        let labels = self.labels();
        labels
            .iter()
            .zip(removed)
            .filter(|(_, removed)| !removed)
            .map(|(label, _)| *label)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Buses of the component holding `anchor` if it survives, otherwise of
    /// the largest surviving component. Ties go to the component with the
    /// smallest bus number.
    pub fn main_component(&mut self, anchor: Option<usize>) -> BTreeSet<usize> {
        let removed = self.removed_vertices.clone();
        let labels = self.labels().to_vec();
        let members = |label: usize| -> BTreeSet<usize> {
            (0..labels.len())
                .filter(|&b| !removed[b] && labels[b] == label)
                .collect()
        };
        if let Some(bus) = anchor.filter(|&b| !removed[b]) {
            return members(labels[bus]);
        }
        let mut sizes: Vec<(usize, usize, usize)> = Vec::new();
        for bus in (0..labels.len()).filter(|&b| !removed[b]) {
            match sizes.iter_mut().find(|(label, _, _)| *label == labels[bus]) {
                Some(entry) => entry.1 += 1,
                None => sizes.push((labels[bus], 1, bus)),
            }
        }
        sizes
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(b.2.cmp(&a.2)))
            .map(|(label, _, _)| members(label))
            .unwrap_or_default()
    }

    /// Buses outside the main component, removed buses included.
    pub fn lost_buses(&mut self, anchor: Option<usize>) -> BTreeSet<usize> {
        let main = self.main_component(anchor);
        (0..self.vertex_count).filter(|b| !main.contains(b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::meshed_network;

    #[test]
    fn removing_a_cycle_edge_keeps_one_component() {
        let net = meshed_network();
        let mut graph = GraphConnectivity::new(&net);
        graph.start_temporary_changes();
        graph.remove_edge(1);
        assert_eq!(graph.component_count(), 1);
        assert!(graph.lost_buses(Some(0)).is_empty());
        graph.undo_temporary_changes();
    }

    #[test]
    fn bridge_removal_and_undo() {
        let net = meshed_network();
        let mut graph = GraphConnectivity::new(&net);
        graph.start_temporary_changes();
        // L01 is the only link of bus 0
        graph.remove_edge(0);
        assert_eq!(graph.component_count(), 2);
        assert_eq!(graph.lost_buses(Some(1)), BTreeSet::from([0]));
        assert_eq!(graph.lost_buses(Some(0)), BTreeSet::from([1, 2, 3]));
        // without an anchor the larger part is main
        assert_eq!(graph.lost_buses(None), BTreeSet::from([0]));
        graph.undo_temporary_changes();
        assert_eq!(graph.component_count(), 1);
    }

    #[test]
    fn removed_vertex_is_lost() {
        let net = meshed_network();
        let mut graph = GraphConnectivity::new(&net);
        graph.start_temporary_changes();
        graph.remove_vertex(1);
        // bus 0 hangs off bus 1 only
        assert_eq!(graph.lost_buses(Some(2)), BTreeSet::from([0, 1]));
        graph.undo_temporary_changes();
        assert!(!graph.is_removed(1));
    }
}
