use anyhow::Result;
use async_trait::async_trait;
use graph::{EdgeKey, NHopPath};

use crate::records::{IndexRecord, RecordBody, RecordKind};

/// Document/index store holding every kb's records.
///
/// `insert` replaces records with the same id, and a single record replace is
/// atomic: readers see the old record or the new one.
#[async_trait]
pub trait DocStore: Send + Sync {
    async fn create_index(&self, kb_id: &str) -> Result<()>;

    async fn index_exists(&self, kb_id: &str) -> Result<bool>;

    async fn insert(&self, kb_id: &str, records: Vec<IndexRecord>) -> Result<()>;

    /// Returns how many records were removed.
    async fn delete(&self, kb_id: &str, filter: &Filter) -> Result<usize>;

    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>>;

    /// Rewrites PageRank and n-hop caches on existing entity records without
    /// re-embedding them. Unknown names are skipped.
    async fn refresh_entities(&self, kb_id: &str, updates: Vec<EntityRefresh>) -> Result<usize>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityRefresh {
    pub name: String,
    pub pagerank: f64,
    pub n_hop: Vec<NHopPath>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Kind(RecordKind),
    Ids(Vec<String>),
    /// Entity name or alias is one of these.
    EntityNames(Vec<String>),
    /// Case-insensitive entity type match.
    EntityTypes(Vec<String>),
    Pair(EdgeKey),
    DocumentId(String),
    /// Community report shares at least one member with these names.
    Members(Vec<String>),
}

impl Condition {
    pub fn matches(&self, record: &IndexRecord) -> bool {
        match self {
            Condition::Kind(kind) => record.kind() == *kind,
            Condition::Ids(ids) => ids.iter().any(|id| *id == record.id),
            Condition::EntityNames(names) => match &record.body {
                RecordBody::Entity(e) => names.iter().any(|n| *n == e.name || e.aliases.contains(n)),
                _ => false,
            },
            Condition::EntityTypes(types) => match &record.body {
                RecordBody::Entity(e) => types.iter().any(|t| t.eq_ignore_ascii_case(&e.entity_type)),
                _ => false,
            },
            Condition::Pair(key) => match &record.body {
                RecordBody::Relation(r) => r.key() == *key,
                _ => false,
            },
            Condition::DocumentId(document_id) => match &record.body {
                RecordBody::Subgraph(s) => s.document_id == *document_id,
                _ => false,
            },
            Condition::Members(names) => match &record.body {
                RecordBody::CommunityReport(c) => c.member_entity_names.iter().any(|m| names.contains(m)),
                _ => false,
            },
        }
    }
}

/// Conjunction of conditions. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub conditions: Vec<Condition>,
}

impl Filter {
    pub fn kind(kind: RecordKind) -> Self {
        Self {
            conditions: vec![Condition::Kind(kind)],
        }
    }

    pub fn and(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn matches(&self, record: &IndexRecord) -> bool {
        self.conditions.iter().all(|c| c.matches(record))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorQuery {
    pub text: String,
    /// Hits scoring below this cosine similarity are dropped.
    pub threshold: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBy {
    PageRankDesc,
    WeightDesc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub kb_ids: Vec<String>,
    pub filter: Filter,
    pub vector: Option<VectorQuery>,
    pub order: Option<OrderBy>,
    pub offset: usize,
    pub limit: usize,
}

impl SearchRequest {
    pub fn new(kb_ids: &[String], filter: Filter) -> Self {
        Self {
            kb_ids: kb_ids.to_vec(),
            filter,
            vector: None,
            order: None,
            offset: 0,
            limit: usize::MAX,
        }
    }

    pub fn similar_to(mut self, text: impl Into<String>, threshold: f32) -> Self {
        self.vector = Some(VectorQuery {
            text: text.into(),
            threshold,
        });
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order = Some(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub record: IndexRecord,
    /// Cosine similarity for vector queries, 1.0 otherwise.
    pub score: f32,
}

/// First hit of a filter-only lookup in one kb.
pub async fn get_one(store: &dyn DocStore, kb_id: &str, filter: Filter) -> Result<Option<IndexRecord>> {
    let request = SearchRequest::new(&[kb_id.to_string()], filter).limit(1);
    Ok(store.search(&request).await?.into_iter().next().map(|hit| hit.record))
}
