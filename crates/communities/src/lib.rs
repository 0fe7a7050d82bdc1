pub mod graph_export;
pub mod louvain;
pub mod summarizer;

pub use graph_export::{EntityInfo, GraphData, RelationInfo};
pub use louvain::LouvainDetector;
pub use summarizer::{CommunitySummarizer, Finding, ReportDraft};

use anyhow::Result;
use async_trait::async_trait;
use graph::{GraphRagError, KnowledgeGraph, TaskContext, with_deadline};
use index::{
    CommunityReport, Filter, GraphStore, IndexRecord, LockConfig, LockService, RecordKind, graph_lock_name, with_lock,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

/// A detected cluster of entities.
#[derive(Debug, Clone, PartialEq)]
pub struct Community {
    pub members: Vec<String>,
    pub weight: f64,
}

/// Community collaborator. The two lists are parallel: report `i`
/// describes community `i`.
#[async_trait]
pub trait CommunityDetector: Send + Sync {
    async fn detect_and_report(&self, graph: &KnowledgeGraph) -> Result<(Vec<Community>, Vec<ReportDraft>)>;
}

/// Louvain clustering plus one LLM-written report per community of at
/// least `min_size` members.
pub struct LouvainReporter {
    summarizer: CommunitySummarizer,
    min_size: usize,
    prompt_entities: usize,
    prompt_relations: usize,
}

impl LouvainReporter {
    pub fn new(summarizer: CommunitySummarizer) -> Self {
        Self {
            summarizer,
            min_size: 2,
            prompt_entities: 10,
            prompt_relations: 20,
        }
    }

    pub fn with_min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size.max(1);
        self
    }

    /// Member lists in community-id order, members sorted by name.
    pub fn communities(&self, graph: &KnowledgeGraph) -> Vec<Community> {
        let assignment = LouvainDetector::new(GraphData::export(graph)).detect_communities();

        let mut groups: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for (name, comm_id) in assignment {
            groups.entry(comm_id).or_default().push(name);
        }

        let mut communities: Vec<Community> = groups
            .into_values()
            .filter(|members| members.len() >= self.min_size)
            .map(|mut members| {
                members.sort();
                let weight = distinct_sources(graph, &members).len() as f64;
                Community { members, weight }
            })
            .collect();

        let max_weight = communities.iter().map(|c| c.weight).fold(0.0, f64::max);
        if max_weight > 0.0 {
            for community in &mut communities {
                community.weight /= max_weight;
            }
        }
        communities
    }
}

#[async_trait]
impl CommunityDetector for LouvainReporter {
    async fn detect_and_report(&self, graph: &KnowledgeGraph) -> Result<(Vec<Community>, Vec<ReportDraft>)> {
        let communities = self.communities(graph);
        let mut reports = Vec::with_capacity(communities.len());

        for (comm_id, community) in communities.iter().enumerate() {
            debug!(comm_id, members = community.members.len(), "Writing community report");
            let entities = graph_export::community_entities(graph, &community.members, self.prompt_entities);
            let relations = graph_export::community_relations(graph, &community.members, self.prompt_relations);
            reports.push(self.summarizer.summarize_community(comm_id, &entities, &relations).await?);
        }

        Ok((communities, reports))
    }
}

fn distinct_sources(graph: &KnowledgeGraph, members: &[String]) -> BTreeSet<String> {
    members
        .iter()
        .filter_map(|name| graph.node(name))
        .flat_map(|node| node.source_id.iter().cloned())
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommunityOutcome {
    pub reports: Vec<CommunityReport>,
}

/// Replaces a kb's community reports wholesale under the kb lock.
pub struct CommunityStage {
    graphs: GraphStore,
    locks: Arc<dyn LockService>,
    lease: Duration,
    timeout: Option<Duration>,
}

impl CommunityStage {
    pub fn new(graphs: GraphStore, locks: Arc<dyn LockService>) -> Self {
        Self {
            graphs,
            locks,
            lease: LockConfig::default().lease(),
            timeout: Some(Duration::from_secs(30 * 60)),
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn run(&self, ctx: &TaskContext, kb_id: &str, detector: &dyn CommunityDetector) -> Result<CommunityOutcome> {
        let lock_value = Uuid::new_v4().to_string();
        let lock = self.locks.lock(&graph_lock_name(kb_id), &lock_value, self.lease);
        with_lock(lock.as_ref(), || self.run_locked(ctx, kb_id, detector)).await
    }

    async fn run_locked(&self, ctx: &TaskContext, kb_id: &str, detector: &dyn CommunityDetector) -> Result<CommunityOutcome> {
        ctx.checkpoint("community").await?;
        let Some(graph) = self.graphs.load(kb_id).await? else {
            return Ok(CommunityOutcome::default());
        };

        let started = Instant::now();
        let (communities, drafts) =
            with_deadline("community", self.timeout, detector.detect_and_report(&graph)).await?;
        if communities.len() != drafts.len() {
            return Err(GraphRagError::Contract(format!(
                "{} communities but {} reports",
                communities.len(),
                drafts.len()
            ))
            .into());
        }
        ctx.checkpoint("community").await?;

        let reports: Vec<CommunityReport> = communities
            .into_iter()
            .zip(drafts)
            .map(|(community, draft)| build_report(&graph, community, draft))
            .collect();

        let store = self.graphs.doc_store();
        self.graphs.ensure_index(kb_id).await?;
        let removed = store.delete(kb_id, &Filter::kind(RecordKind::CommunityReport)).await?;
        let records = reports
            .iter()
            .enumerate()
            .map(|(ordinal, report)| IndexRecord::community_report(kb_id, ordinal, report.clone()))
            .collect();
        store.insert(kb_id, records).await?;

        info!(
            kb_id,
            reports = reports.len(),
            replaced = removed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Community reports indexed"
        );
        ctx.progress(&format!("Indexed {} community reports", reports.len()));
        Ok(CommunityOutcome { reports })
    }
}

/// Ties a draft to its members. Evidences are the finding explanations, one
/// per line; sources are the members' documents.
pub fn build_report(graph: &KnowledgeGraph, community: Community, draft: ReportDraft) -> CommunityReport {
    let evidences = draft
        .findings
        .iter()
        .map(|f| f.explanation.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    CommunityReport {
        title: draft.title,
        report_text: draft.summary,
        evidences,
        weight: community.weight,
        source_id: distinct_sources(graph, &community.members).into_iter().collect(),
        member_entity_names: community.members,
        rating: draft.rating,
    }
}
