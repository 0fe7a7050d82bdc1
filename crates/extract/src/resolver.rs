use anyhow::Result;
use async_trait::async_trait;
use graph::{AppendDistinct, ChangeSet, DescriptionPolicy, KnowledgeGraph, Node};
use index::Resolver;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

use crate::normalizer::EntityNormalizer;

/// Folds same-typed entities whose names the [`EntityNormalizer`] considers
/// similar. Only names in the dirty scope are compared.
pub struct NameSimilarityResolver {
    normalizer: EntityNormalizer,
    policy: Arc<dyn DescriptionPolicy>,
}

impl NameSimilarityResolver {
    pub fn new() -> Result<Self> {
        Ok(Self {
            normalizer: EntityNormalizer::new()?,
            policy: Arc::new(AppendDistinct),
        })
    }

    pub fn with_policy(mut self, policy: Arc<dyn DescriptionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Folds similar pairs within one type bucket, first match first.
    fn resolve_bucket(&self, graph: &mut KnowledgeGraph, names: &[String], changes: &mut ChangeSet) {
        let normalized: Vec<String> = names.iter().map(|n| self.normalizer.normalize(n)).collect();
        let mut gone = BTreeSet::new();

        for i in 0..names.len() {
            for j in (i + 1)..names.len() {
                if gone.contains(&i) || gone.contains(&j) {
                    continue;
                }
                if !self.normalizer.are_similar(&normalized[i], &normalized[j]) {
                    continue;
                }
                let (Some(a), Some(b)) = (graph.node(&names[i]), graph.node(&names[j])) else {
                    continue;
                };
                let (from, into) = if survives(a, b) { (j, i) } else { (i, j) };
                debug!(from = %names[from], into = %names[into], "Folding duplicate entity");
                if graph.fold_node(&names[from], &names[into], self.policy.as_ref(), changes) {
                    gone.insert(from);
                }
            }
        }
    }
}

/// Whether `a` should survive over `b`: more source documents, then the
/// longer name, then the smaller name.
fn survives(a: &Node, b: &Node) -> bool {
    (a.source_id.len(), a.name.len(), std::cmp::Reverse(&a.name))
        > (b.source_id.len(), b.name.len(), std::cmp::Reverse(&b.name))
}

#[async_trait]
impl Resolver for NameSimilarityResolver {
    async fn resolve(&self, mut graph: KnowledgeGraph, dirty: &BTreeSet<String>) -> Result<(KnowledgeGraph, ChangeSet)> {
        let mut buckets: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for name in dirty {
            if let Some(node) = graph.node(name) {
                buckets.entry(node.entity_type.clone()).or_default().push(name.clone());
            }
        }

        let mut changes = ChangeSet::new();
        for names in buckets.values() {
            self.resolve_bucket(&mut graph, names, &mut changes);
        }
        Ok((graph, changes))
    }
}
