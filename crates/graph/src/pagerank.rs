use std::collections::{BTreeMap, HashMap};

use crate::model::KnowledgeGraph;

#[derive(Debug, Clone, Copy)]
pub struct PageRankConfig {
    pub damping_factor: f64,
    pub max_iterations: usize,
    /// Per-node L1 tolerance; the loop stops once total change < n * tolerance.
    pub tolerance: f64,
}

impl Default for PageRankConfig {
    fn default() -> Self {
        Self {
            damping_factor: 0.85,
            max_iterations: 100,
            tolerance: 1e-6,
        }
    }
}

/// Weighted PageRank over the undirected graph (each edge walks both ways).
/// Nodes without outgoing weight spread their mass uniformly, so scores sum
/// to 1.0 for any non-empty graph.
pub fn pagerank(graph: &KnowledgeGraph, config: &PageRankConfig) -> BTreeMap<String, f64> {
    let n = graph.node_count();
    if n == 0 {
        return BTreeMap::new();
    }

    let names: Vec<&str> = graph.node_names().collect();
    let index: HashMap<&str, usize> = names.iter().enumerate().map(|(i, &name)| (name, i)).collect();

    let mut adj: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    for (name, neighbours) in graph.adjacency() {
        let from = index[name];
        for (to, weight) in neighbours {
            adj[from].push((index[to], weight.max(0.0)));
        }
    }
    let out_weight: Vec<f64> = adj.iter().map(|edges| edges.iter().map(|(_, w)| w).sum()).collect();

    let d = config.damping_factor;
    let uniform = 1.0 / n as f64;
    let mut scores = vec![uniform; n];

    for iteration in 0..config.max_iterations {
        let dangling: f64 = (0..n).filter(|&i| out_weight[i] <= 0.0).map(|i| scores[i]).sum();
        let base = (1.0 - d) * uniform + d * dangling * uniform;
        let mut next = vec![base; n];

        for (from, edges) in adj.iter().enumerate() {
            if out_weight[from] <= 0.0 {
                continue;
            }
            let share = d * scores[from] / out_weight[from];
            for &(to, weight) in edges {
                next[to] += share * weight;
            }
        }

        let delta: f64 = next.iter().zip(&scores).map(|(a, b)| (a - b).abs()).sum();
        scores = next;
        if delta < n as f64 * config.tolerance {
            tracing::debug!(iterations = iteration + 1, nodes = n, "PageRank converged");
            break;
        }
    }

    names.into_iter().map(str::to_string).zip(scores).collect()
}

impl KnowledgeGraph {
    /// Recomputes PageRank over the whole graph and writes it onto every node.
    pub fn recompute_pagerank(&mut self, config: &PageRankConfig) {
        let scores = pagerank(self, config);
        for (name, score) in scores {
            if let Some(node) = self.node_mut(&name) {
                node.pagerank = score;
            }
        }
    }
}
