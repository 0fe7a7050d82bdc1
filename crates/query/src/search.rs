//! Query-time retrieval over the indexed graph: rewrite, multi-signal
//! lookups, composite scoring, budget packing, community augmentation.
//!
//! Read-only and lock-free. Every read goes through the store, which only
//! ever exposes complete records.

use anyhow::{Context, Result};
use graph::{EdgeKey, NHopPath};
use index::{
    Condition, DocStore, EntityRecord, Filter, OrderBy, RecordBody, RecordKind, SearchRequest,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::{CommunityRow, EntityRow, RelationRow, RetrievalContext, pack};
use crate::rewrite::{QueryRewriter, Rewrite};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub ent_topn: usize,
    pub rel_topn: usize,
    pub comm_topn: usize,
    pub max_tokens: usize,
    pub entity_similarity_threshold: f32,
    pub relation_similarity_threshold: f32,
    /// Upper bound on similarity hits fetched per lookup.
    pub candidate_limit: usize,
    pub type_hint_limit: usize,
    pub max_rewrite_entities: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            ent_topn: 6,
            rel_topn: 6,
            comm_topn: 1,
            max_tokens: 8196,
            entity_similarity_threshold: 0.3,
            relation_similarity_threshold: 0.3,
            candidate_limit: 56,
            type_hint_limit: 10000,
            max_rewrite_entities: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct EntityCandidate {
    sim: f64,
    pagerank: f64,
    description: String,
    n_hop: Vec<NHopPath>,
}

#[derive(Debug, Clone, PartialEq)]
struct RelationCandidate {
    sim: f64,
    pagerank: f64,
    /// None for relations known only from an n-hop path.
    description: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct PathScore {
    sim: f64,
    pagerank: f64,
}

pub struct GraphSearchEngine {
    store: Arc<dyn DocStore>,
    rewriter: Arc<dyn QueryRewriter>,
    config: SearchConfig,
}

impl GraphSearchEngine {
    pub fn new(store: Arc<dyn DocStore>, rewriter: Arc<dyn QueryRewriter>) -> Self {
        Self {
            store,
            rewriter,
            config: SearchConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SearchConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn search(&self, question: &str, kb_ids: &[String]) -> Result<RetrievalContext> {
        self.retrieve(question, kb_ids, &self.config).await
    }

    pub async fn retrieve(&self, question: &str, kb_ids: &[String], config: &SearchConfig) -> Result<RetrievalContext> {
        let started = Instant::now();
        let rewrite = self.rewrite(question, kb_ids, config).await?;

        let mut entities = self.entities_by_similarity(&rewrite.entities, kb_ids, config).await?;
        let type_hints = self.entities_by_type(&rewrite.answer_types, kb_ids, config).await?;
        let mut relations = self.relations_by_similarity(question, kb_ids, config).await?;

        apply_signals(&mut entities, &mut relations, &type_hints);

        let top_entities = top_n(entities, config.ent_topn, |c| c.sim * c.pagerank);
        let top_relations = top_n(relations, config.rel_topn, |c| c.sim * c.pagerank);
        let relation_rows = self.backfill(top_relations, kb_ids).await?;

        let entity_rows: Vec<EntityRow> = top_entities
            .into_iter()
            .map(|(name, c)| EntityRow {
                name,
                score: c.sim * c.pagerank,
                description: c.description,
            })
            .collect();
        let entity_rows = pack(entity_rows, config.max_tokens);
        let relation_rows = pack(relation_rows, config.max_tokens);

        let kept_names: Vec<String> = entity_rows.iter().map(|row| row.name.clone()).collect();
        let community_rows = pack(self.communities(&kept_names, kb_ids, config).await?, config.max_tokens);

        info!(
            kbs = kb_ids.len(),
            entities = entity_rows.len(),
            relations = relation_rows.len(),
            communities = community_rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Graph retrieval finished"
        );

        Ok(RetrievalContext {
            id: Uuid::new_v4().to_string(),
            kb_ids: kb_ids.to_vec(),
            entities: entity_rows,
            relations: relation_rows,
            communities: community_rows,
        })
    }

    /// Rewrite failures degrade to the raw question; store failures while
    /// loading type samples propagate.
    async fn rewrite(&self, question: &str, kb_ids: &[String], config: &SearchConfig) -> Result<Rewrite> {
        let samples = self.type_samples(kb_ids).await?;
        let mut rewrite = match self.rewriter.rewrite(question, &samples).await {
            Ok(rewrite) => rewrite,
            Err(e) => {
                warn!(error = %e, "Query rewrite failed, searching with the raw question");
                Rewrite::fallback(question)
            }
        };
        rewrite.entities.retain(|name| !name.trim().is_empty());
        rewrite.entities.truncate(config.max_rewrite_entities);
        if rewrite.entities.is_empty() {
            rewrite.entities.push(question.to_string());
        }
        debug!(types = ?rewrite.answer_types, entities = ?rewrite.entities, "Query rewritten");
        Ok(rewrite)
    }

    async fn type_samples(&self, kb_ids: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
        let request = SearchRequest::new(kb_ids, Filter::kind(RecordKind::TypeSamples));
        let mut merged: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for hit in self.store.search(&request).await.context("Failed to load type samples")? {
            if let RecordBody::TypeSamples(record) = hit.record.body {
                for (entity_type, names) in record.samples {
                    let slot = merged.entry(entity_type).or_default();
                    for name in names {
                        if !slot.contains(&name) {
                            slot.push(name);
                        }
                    }
                }
            }
        }
        Ok(merged)
    }

    async fn entities_by_similarity(
        &self,
        seeds: &[String],
        kb_ids: &[String],
        config: &SearchConfig,
    ) -> Result<BTreeMap<String, EntityCandidate>> {
        let request = SearchRequest::new(kb_ids, Filter::kind(RecordKind::Entity))
            .similar_to(seeds.join(", "), config.entity_similarity_threshold)
            .limit(config.candidate_limit);

        let mut out = BTreeMap::new();
        for hit in self.store.search(&request).await.context("Entity search failed")? {
            if let RecordBody::Entity(EntityRecord {
                name,
                description,
                pagerank,
                n_hop,
                ..
            }) = hit.record.body
            {
                out.entry(name).or_insert(EntityCandidate {
                    sim: f64::from(hit.score),
                    pagerank,
                    description,
                    n_hop,
                });
            }
        }
        Ok(out)
    }

    async fn entities_by_type(
        &self,
        types: &[String],
        kb_ids: &[String],
        config: &SearchConfig,
    ) -> Result<BTreeSet<String>> {
        if types.is_empty() {
            return Ok(BTreeSet::new());
        }
        let filter = Filter::kind(RecordKind::Entity).and(Condition::EntityTypes(types.to_vec()));
        let request = SearchRequest::new(kb_ids, filter)
            .order_by(OrderBy::PageRankDesc)
            .limit(config.type_hint_limit);

        Ok(self
            .store
            .search(&request)
            .await
            .context("Entity type search failed")?
            .into_iter()
            .filter_map(|hit| match hit.record.body {
                RecordBody::Entity(e) => Some(e.name),
                _ => None,
            })
            .collect())
    }

    async fn relations_by_similarity(
        &self,
        question: &str,
        kb_ids: &[String],
        config: &SearchConfig,
    ) -> Result<BTreeMap<EdgeKey, RelationCandidate>> {
        let request = SearchRequest::new(kb_ids, Filter::kind(RecordKind::Relation))
            .similar_to(question, config.relation_similarity_threshold)
            .limit(config.candidate_limit);

        let mut out = BTreeMap::new();
        for hit in self.store.search(&request).await.context("Relation search failed")? {
            if let RecordBody::Relation(relation) = hit.record.body {
                out.entry(relation.key()).or_insert(RelationCandidate {
                    sim: f64::from(hit.score),
                    pagerank: relation.weight,
                    description: Some(relation.description),
                });
            }
        }
        Ok(out)
    }

    /// Fills in descriptions of path-only relations from a direct relation
    /// record in any kb in scope. Relations with no record are dropped.
    async fn backfill(
        &self,
        relations: Vec<(EdgeKey, RelationCandidate)>,
        kb_ids: &[String],
    ) -> Result<Vec<RelationRow>> {
        let mut rows = Vec::with_capacity(relations.len());
        for (key, candidate) in relations {
            let description = match candidate.description {
                Some(description) => description,
                None => match self.lookup_relation(&key, kb_ids).await {
                    Some(description) => description,
                    None => {
                        debug!(pair = %key, "No relation record for path pair, dropping");
                        continue;
                    }
                },
            };
            rows.push(RelationRow {
                from: key.first().to_string(),
                to: key.second().to_string(),
                score: candidate.sim * candidate.pagerank,
                description,
            });
        }
        Ok(rows)
    }

    async fn lookup_relation(&self, key: &EdgeKey, kb_ids: &[String]) -> Option<String> {
        let filter = Filter::kind(RecordKind::Relation).and(Condition::Pair(key.clone()));
        let request = SearchRequest::new(kb_ids, filter).limit(1);
        match self.store.search(&request).await {
            Ok(hits) => hits.into_iter().find_map(|hit| match hit.record.body {
                RecordBody::Relation(r) => Some(r.description),
                _ => None,
            }),
            Err(e) => {
                warn!(pair = %key, error = %e, "Relation backfill failed");
                None
            }
        }
    }

    async fn communities(
        &self,
        entity_names: &[String],
        kb_ids: &[String],
        config: &SearchConfig,
    ) -> Result<Vec<CommunityRow>> {
        if entity_names.is_empty() || config.comm_topn == 0 {
            return Ok(Vec::new());
        }
        let filter = Filter::kind(RecordKind::CommunityReport).and(Condition::Members(entity_names.to_vec()));
        let request = SearchRequest::new(kb_ids, filter)
            .order_by(OrderBy::WeightDesc)
            .limit(config.comm_topn);

        Ok(self
            .store
            .search(&request)
            .await
            .context("Community report search failed")?
            .into_iter()
            .filter_map(|hit| match hit.record.body {
                RecordBody::CommunityReport(report) => Some(CommunityRow {
                    title: report.title,
                    report_text: report.report_text,
                    evidences: report.evidences,
                }),
                _ => None,
            })
            .collect())
    }
}

/// Path scores come from the raw entity similarity. Type-hinted entities are
/// doubled only afterwards.
fn apply_signals(
    entities: &mut BTreeMap<String, EntityCandidate>,
    relations: &mut BTreeMap<EdgeKey, RelationCandidate>,
    type_hints: &BTreeSet<String>,
) {
    let paths = path_scores(entities);
    for (name, candidate) in entities.iter_mut() {
        if type_hints.contains(name) {
            candidate.sim *= 2.0;
        }
    }
    combine_relations(relations, paths, type_hints);
}

/// Scores relations reachable through the cached n-hop paths of the matched
/// entities. Hop `i` of a path earns `entity_sim / (2 + i)`; the hop's
/// stored weight becomes the relation's rank.
fn path_scores(entities: &BTreeMap<String, EntityCandidate>) -> BTreeMap<EdgeKey, PathScore> {
    let mut scores: BTreeMap<EdgeKey, PathScore> = BTreeMap::new();
    for candidate in entities.values() {
        for path in &candidate.n_hop {
            for (i, hop) in path.path.windows(2).enumerate() {
                let score = scores.entry(EdgeKey::new(hop[0].clone(), hop[1].clone())).or_default();
                score.sim += candidate.sim / (2.0 + i as f64);
                score.pagerank = path.weights.get(i).copied().unwrap_or(score.pagerank);
            }
        }
    }
    scores
}

/// Direct matches are multiplied by `1 + path score + type-hint endpoints`;
/// path-only pairs join with `path score * (1 + type-hint endpoints)`.
fn combine_relations(
    relations: &mut BTreeMap<EdgeKey, RelationCandidate>,
    mut paths: BTreeMap<EdgeKey, PathScore>,
    type_hints: &BTreeSet<String>,
) {
    let hinted = |key: &EdgeKey| {
        [key.first(), key.second()]
            .iter()
            .filter(|name| type_hints.contains(**name))
            .count() as f64
    };

    for (key, candidate) in relations.iter_mut() {
        let s_nhop = paths.remove(key).map(|p| p.sim).unwrap_or(0.0);
        candidate.sim *= s_nhop + hinted(key) + 1.0;
    }
    for (key, path) in paths {
        let sim = path.sim * (hinted(&key) + 1.0);
        relations.insert(
            key,
            RelationCandidate {
                sim,
                pagerank: path.pagerank,
                description: None,
            },
        );
    }
}

fn top_n<K: Ord, V>(items: BTreeMap<K, V>, n: usize, score: impl Fn(&V) -> f64) -> Vec<(K, V)> {
    let mut ranked: Vec<(K, V)> = items.into_iter().collect();
    ranked.sort_by(|a, b| score(&b.1).partial_cmp(&score(&a.1)).unwrap_or(Ordering::Equal));
    ranked.truncate(n);
    ranked
}
