use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::KnowledgeGraph;

pub const DEFAULT_HOPS: usize = 2;
pub const MAX_PATHS_PER_ENTITY: usize = 32;

/// A simple path starting at an entity, with the weight of each hop.
/// `weights.len() == path.len() - 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NHopPath {
    pub path: Vec<String>,
    pub weights: Vec<f64>,
}

/// Maximal simple paths from `start`, at most `hops` edges long. A path
/// stops early only where it cannot be extended without revisiting a node.
pub fn n_hop_paths(graph: &KnowledgeGraph, start: &str, hops: usize, max_paths: usize) -> Vec<NHopPath> {
    let adjacency = graph.adjacency();
    paths_from(&adjacency, start, hops, max_paths)
}

/// Paths for every node in one pass over a shared adjacency list.
pub fn all_n_hop_paths(graph: &KnowledgeGraph, hops: usize, max_paths: usize) -> BTreeMap<String, Vec<NHopPath>> {
    let adjacency = graph.adjacency();
    graph
        .node_names()
        .map(|name| (name.to_string(), paths_from(&adjacency, name, hops, max_paths)))
        .collect()
}

fn paths_from(
    adjacency: &BTreeMap<&str, Vec<(&str, f64)>>,
    start: &str,
    hops: usize,
    max_paths: usize,
) -> Vec<NHopPath> {
    let mut out = Vec::new();
    if hops == 0 || !adjacency.contains_key(start) {
        return out;
    }
    let mut path = vec![start];
    let mut weights = Vec::new();
    walk(adjacency, &mut path, &mut weights, hops, max_paths, &mut out);
    out
}

fn walk<'a>(
    adjacency: &BTreeMap<&'a str, Vec<(&'a str, f64)>>,
    path: &mut Vec<&'a str>,
    weights: &mut Vec<f64>,
    hops_left: usize,
    max_paths: usize,
    out: &mut Vec<NHopPath>,
) {
    if out.len() >= max_paths {
        return;
    }
    let last = path[path.len() - 1];
    let next: Vec<(&str, f64)> = adjacency
        .get(last)
        .map(|list| list.iter().filter(|(n, _)| !path.contains(n)).copied().collect())
        .unwrap_or_default();

    if hops_left == 0 || next.is_empty() {
        if path.len() > 1 {
            out.push(NHopPath {
                path: path.iter().map(|s| s.to_string()).collect(),
                weights: weights.clone(),
            });
        }
        return;
    }

    for (neighbour, weight) in next {
        path.push(neighbour);
        weights.push(weight);
        walk(adjacency, path, weights, hops_left - 1, max_paths, out);
        path.pop();
        weights.pop();
        if out.len() >= max_paths {
            return;
        }
    }
}
