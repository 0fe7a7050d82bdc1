use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use graph::GraphRagError;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::embeddings::{Embedder, cosine_similarity};
use crate::records::{IndexRecord, RecordBody};
use crate::store::{DocStore, EntityRefresh, Filter, OrderBy, SearchHit, SearchRequest};

#[derive(Debug, Clone)]
struct Stored {
    record: IndexRecord,
    vector: Option<Vec<f32>>,
}

/// In-process document store: one record map per kb, vectors computed on
/// insert by the configured embedder.
pub struct MemoryStore {
    embedder: Arc<dyn Embedder>,
    indices: DashMap<String, DashMap<String, Stored>>,
}

impl MemoryStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            indices: DashMap::new(),
        }
    }

    pub fn record_count(&self, kb_id: &str) -> usize {
        self.indices.get(kb_id).map(|index| index.len()).unwrap_or(0)
    }

    fn missing_index(kb_id: &str) -> anyhow::Error {
        GraphRagError::Store(format!("index for kb '{kb_id}' does not exist")).into()
    }

    fn sort_key(record: &IndexRecord, order: OrderBy) -> f64 {
        match (order, &record.body) {
            (OrderBy::PageRankDesc, RecordBody::Entity(e)) => e.pagerank,
            (OrderBy::WeightDesc, RecordBody::CommunityReport(c)) => c.weight,
            (OrderBy::WeightDesc, RecordBody::Relation(r)) => r.weight,
            _ => 0.0,
        }
    }
}

#[async_trait]
impl DocStore for MemoryStore {
    async fn create_index(&self, kb_id: &str) -> Result<()> {
        self.indices.entry(kb_id.to_string()).or_default();
        Ok(())
    }

    async fn index_exists(&self, kb_id: &str) -> Result<bool> {
        Ok(self.indices.contains_key(kb_id))
    }

    async fn insert(&self, kb_id: &str, records: Vec<IndexRecord>) -> Result<()> {
        if !self.indices.contains_key(kb_id) {
            return Err(Self::missing_index(kb_id));
        }

        let texts: Vec<(usize, String)> = records
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.embedding_text().map(|t| (i, t)))
            .collect();
        let batch: Vec<String> = texts.iter().map(|(_, t)| t.clone()).collect();
        let vectors = if batch.is_empty() {
            Vec::new()
        } else {
            self.embedder.encode(&batch).await?
        };
        if vectors.len() != batch.len() {
            return Err(GraphRagError::Store(format!(
                "embedder returned {} vectors for {} records",
                vectors.len(),
                batch.len()
            ))
            .into());
        }

        let mut by_position: Vec<Option<Vec<f32>>> = vec![None; records.len()];
        for ((i, _), vector) in texts.into_iter().zip(vectors) {
            by_position[i] = Some(vector);
        }

        let index = self.indices.get(kb_id).ok_or_else(|| Self::missing_index(kb_id))?;
        for (record, vector) in records.into_iter().zip(by_position) {
            index.insert(record.id.clone(), Stored { record, vector });
        }
        Ok(())
    }

    async fn delete(&self, kb_id: &str, filter: &Filter) -> Result<usize> {
        let Some(index) = self.indices.get(kb_id) else {
            return Ok(0);
        };
        let before = index.len();
        index.retain(|_, stored| !filter.matches(&stored.record));
        Ok(before - index.len())
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let query_vector = match &request.vector {
            Some(vq) => Some(
                self.embedder
                    .encode(std::slice::from_ref(&vq.text))
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| GraphRagError::Store("embedder returned no vector".into()))?,
            ),
            None => None,
        };

        let mut hits = Vec::new();
        for kb_id in &request.kb_ids {
            let Some(index) = self.indices.get(kb_id) else {
                continue;
            };
            for entry in index.iter() {
                let stored = entry.value();
                if !request.filter.matches(&stored.record) {
                    continue;
                }
                let score = match (&query_vector, &request.vector) {
                    (Some(query), Some(vq)) => {
                        let Some(vector) = &stored.vector else { continue };
                        let score = cosine_similarity(query, vector);
                        if score < vq.threshold {
                            continue;
                        }
                        score
                    }
                    _ => 1.0,
                };
                hits.push(SearchHit {
                    record: stored.record.clone(),
                    score,
                });
            }
        }

        match request.order {
            Some(order) => hits.sort_by(|a, b| {
                Self::sort_key(&b.record, order)
                    .partial_cmp(&Self::sort_key(&a.record, order))
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.record.id.cmp(&b.record.id))
            }),
            None => hits.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.record.id.cmp(&b.record.id))
            }),
        }

        Ok(hits.into_iter().skip(request.offset).take(request.limit).collect())
    }

    async fn refresh_entities(&self, kb_id: &str, updates: Vec<EntityRefresh>) -> Result<usize> {
        let index = self.indices.get(kb_id).ok_or_else(|| Self::missing_index(kb_id))?;
        let mut refreshed = 0;
        for update in updates {
            let id = crate::records::entity_record_id(&update.name);
            if let Some(mut stored) = index.get_mut(&id) {
                if let RecordBody::Entity(entity) = &mut stored.record.body {
                    entity.pagerank = update.pagerank;
                    entity.n_hop = update.n_hop;
                    refreshed += 1;
                }
            }
        }
        Ok(refreshed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::records::RecordKind;
    use crate::store::Condition;
    use graph::{Edge, Node};

    fn store() -> MemoryStore {
        MemoryStore::new(Arc::new(HashingEmbedder::default()))
    }

    fn entity(name: &str, ty: &str, pagerank: f64) -> IndexRecord {
        let mut node = Node::new(name, ty, format!("about {name}"), "doc1");
        node.pagerank = pagerank;
        IndexRecord::entity("kb1", &node, Vec::new())
    }

    #[tokio::test]
    async fn test_insert_requires_index() {
        let store = store();
        let err = store.insert("kb1", vec![entity("Paris", "City", 0.5)]).await.unwrap_err();
        assert_eq!(graph::FailureKind::classify(&err), graph::FailureKind::Store);

        store.create_index("kb1").await.unwrap();
        store.insert("kb1", vec![entity("Paris", "City", 0.5)]).await.unwrap();
        assert!(store.index_exists("kb1").await.unwrap());
        assert_eq!(store.record_count("kb1"), 1);
    }

    #[tokio::test]
    async fn test_vector_search_applies_threshold() {
        let store = store();
        store.create_index("kb1").await.unwrap();
        store
            .insert("kb1", vec![entity("Paris", "City", 0.5), entity("Berlin", "City", 0.3)])
            .await
            .unwrap();

        let request = SearchRequest::new(&["kb1".to_string()], Filter::kind(RecordKind::Entity))
            .similar_to("Paris", 0.95);
        let hits = store.search(&request).await.unwrap();

        assert_eq!(hits.len(), 1);
        assert!(matches!(&hits[0].record.body, RecordBody::Entity(e) if e.name == "Paris"));
    }

    #[tokio::test]
    async fn test_type_filter_orders_by_pagerank() {
        let store = store();
        store.create_index("kb1").await.unwrap();
        store
            .insert(
                "kb1",
                vec![entity("Lyon", "City", 0.1), entity("Paris", "CITY", 0.6), entity("France", "Country", 0.9)],
            )
            .await
            .unwrap();

        let request = SearchRequest::new(
            &["kb1".to_string()],
            Filter::kind(RecordKind::Entity).and(Condition::EntityTypes(vec!["city".into()])),
        )
        .order_by(OrderBy::PageRankDesc);
        let hits = store.search(&request).await.unwrap();

        let names: Vec<String> = hits
            .iter()
            .filter_map(|h| match &h.record.body {
                RecordBody::Entity(e) => Some(e.name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["Paris", "Lyon"]);
    }

    #[tokio::test]
    async fn test_delete_and_refresh() {
        let store = store();
        store.create_index("kb1").await.unwrap();
        let edge = Edge::new("Paris", "France", "capital of", 1.0, "doc1");
        store
            .insert("kb1", vec![entity("Paris", "City", 0.5), IndexRecord::relation("kb1", &edge)])
            .await
            .unwrap();

        let refreshed = store
            .refresh_entities(
                "kb1",
                vec![
                    EntityRefresh { name: "Paris".into(), pagerank: 0.9, n_hop: Vec::new() },
                    EntityRefresh { name: "Nowhere".into(), pagerank: 0.1, n_hop: Vec::new() },
                ],
            )
            .await
            .unwrap();
        assert_eq!(refreshed, 1);

        let removed = store
            .delete("kb1", &Filter::kind(RecordKind::Relation).and(Condition::Pair(edge.key())))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.record_count("kb1"), 1);
    }
}
