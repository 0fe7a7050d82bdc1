use petgraph::visit::EdgeRef;
use std::collections::HashMap;
use tracing::debug;

use crate::graph_export::GraphData;

const MAX_ITERATIONS: usize = 10;

pub struct LouvainDetector {
    graph: GraphData,
}

impl LouvainDetector {
    pub fn new(graph: GraphData) -> Self {
        Self { graph }
    }

    /// Run Louvain local moving on the weighted graph.
    /// Returns: entity name -> community id, ids contiguous from 0 in node order.
    pub fn detect_communities(&self) -> HashMap<String, usize> {
        let g = &self.graph.graph;
        let n = g.node_count();

        if n == 0 {
            return HashMap::new();
        }

        // Initialize: each node in its own community
        let mut communities: Vec<usize> = (0..n).collect();

        // Build adjacency list with weights
        let mut adj_list: Vec<HashMap<usize, f64>> = vec![HashMap::new(); n];
        for edge in g.edge_references() {
            let (a, b) = (edge.source().index(), edge.target().index());
            *adj_list[a].entry(b).or_insert(0.0) += *edge.weight();
            *adj_list[b].entry(a).or_insert(0.0) += *edge.weight();
        }

        let degrees: Vec<f64> = adj_list.iter().map(|neighbors| neighbors.values().sum()).collect();
        let two_m: f64 = degrees.iter().sum();
        if two_m <= 0.0 {
            return self.label(&communities);
        }

        // Total degree per community
        let mut sigma_tot = degrees.clone();

        let mut improved = true;
        let mut iteration = 0;

        while improved && iteration < MAX_ITERATIONS {
            improved = false;
            iteration += 1;

            for node in 0..n {
                let current_comm = communities[node];
                let k_i = degrees[node];

                let mut neighbor_comms: HashMap<usize, f64> = HashMap::new();
                for (&neighbor, &weight) in &adj_list[node] {
                    *neighbor_comms.entry(communities[neighbor]).or_insert(0.0) += weight;
                }

                // Take the node out, then put it where the gain is largest
                sigma_tot[current_comm] -= k_i;
                let gain = |comm: usize, k_i_in: f64| k_i_in - sigma_tot[comm] * k_i / two_m;

                let mut best_comm = current_comm;
                let mut best_gain = gain(current_comm, neighbor_comms.get(&current_comm).copied().unwrap_or(0.0));
                let mut candidates: Vec<(usize, f64)> = neighbor_comms.into_iter().collect();
                candidates.sort_by_key(|(comm, _)| *comm);
                for (comm, k_i_in) in candidates {
                    let candidate_gain = gain(comm, k_i_in);
                    if candidate_gain > best_gain + 1e-12 {
                        best_gain = candidate_gain;
                        best_comm = comm;
                    }
                }

                sigma_tot[best_comm] += k_i;
                if best_comm != current_comm {
                    communities[node] = best_comm;
                    improved = true;
                }
            }
        }

        let result = self.label(&communities);
        debug!(
            communities = result.values().max().map(|m| m + 1).unwrap_or(0),
            iterations = iteration,
            "Louvain finished"
        );
        result
    }

    /// Renumber communities to be contiguous (0, 1, 2, ...)
    fn label(&self, communities: &[usize]) -> HashMap<String, usize> {
        let mut comm_mapping: HashMap<usize, usize> = HashMap::new();
        let mut result = HashMap::new();
        for idx in self.graph.graph.node_indices() {
            let next = comm_mapping.len();
            let comm = *comm_mapping.entry(communities[idx.index()]).or_insert(next);
            result.insert(self.graph.graph[idx].clone(), comm);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph::{Edge, KnowledgeGraph, Node};

    #[test]
    fn test_two_cliques_with_weak_bridge() {
        let mut source = KnowledgeGraph::new();
        for name in ["A", "B", "C", "D", "E", "F"] {
            source.insert_node(Node::new(name, "T", "", "doc1"));
        }
        for (a, b) in [("A", "B"), ("B", "C"), ("A", "C"), ("D", "E"), ("E", "F"), ("D", "F")] {
            source.insert_edge(Edge::new(a, b, "", 5.0, "doc1"));
        }
        source.insert_edge(Edge::new("C", "D", "", 1.0, "doc1"));

        let communities = LouvainDetector::new(GraphData::export(&source)).detect_communities();

        assert_eq!(communities.len(), 6);
        assert_eq!(communities["A"], communities["B"]);
        assert_eq!(communities["B"], communities["C"]);
        assert_eq!(communities["D"], communities["E"]);
        assert_eq!(communities["E"], communities["F"]);
        assert_ne!(communities["A"], communities["D"]);
    }

    #[test]
    fn test_isolated_nodes_stay_alone() {
        let mut source = KnowledgeGraph::new();
        for name in ["A", "B"] {
            source.insert_node(Node::new(name, "T", "", "doc1"));
        }
        let communities = LouvainDetector::new(GraphData::export(&source)).detect_communities();
        assert_ne!(communities["A"], communities["B"]);
    }
}
