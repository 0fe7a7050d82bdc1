use anyhow::{Context, Result};
use extract::{LanguageModel, OllamaClient};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::graph_export::{EntityInfo, RelationInfo};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub summary: String,
    #[serde(default)]
    pub explanation: String,
}

/// A generated community report before it is tied to its members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDraft {
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub findings: Vec<Finding>,
}

/// Writes one report per community with a language model.
#[derive(Clone)]
pub struct CommunitySummarizer {
    llm: Arc<dyn LanguageModel>,
}

impl CommunitySummarizer {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    pub fn local() -> Self {
        Self::new(Arc::new(OllamaClient::local()))
    }

    /// Generate the report for a community
    pub async fn summarize_community(
        &self,
        community_id: usize,
        entities: &[EntityInfo],
        relations: &[RelationInfo],
    ) -> Result<ReportDraft> {
        let prompt = self.build_summary_prompt(entities, relations);

        let json = self
            .llm
            .generate_json(&prompt)
            .await
            .with_context(|| format!("Failed to generate report for community {community_id}"))?;

        let mut draft: ReportDraft = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse report for community {community_id}"))?;
        draft.title = draft.title.trim().to_string();
        draft.summary = draft.summary.trim().to_string();
        Ok(draft)
    }

    fn build_summary_prompt(&self, entities: &[EntityInfo], relations: &[RelationInfo]) -> String {
        let mut prompt = String::from(
            "You are analyzing a community of related entities from a knowledge graph.\n\n"
        );

        prompt.push_str("ENTITIES IN THIS COMMUNITY:\n");
        for entity in entities {
            prompt.push_str(&format!(
                "- {} ({}): {}\n",
                entity.name,
                entity.entity_type,
                entity.description
            ));
        }

        if !relations.is_empty() {
            prompt.push_str("\nKEY RELATIONSHIPS:\n");
            for relation in relations {
                prompt.push_str(&format!(
                    "- {} -> {}: {}\n",
                    relation.source,
                    relation.target,
                    relation.description
                ));
            }
        }

        prompt.push_str(
            "\nTASK: Write a report describing the main theme of this community, \
            its key entities and their roles, and its important relationships.\n\
            Keep it concise and factual. Output ONLY a JSON object of this shape:\n\
            {\"title\": \"short name for the community\", \
            \"summary\": \"2-3 paragraph summary\", \
            \"rating\": 0.0-10.0 importance, \
            \"findings\": [{\"summary\": \"one insight\", \"explanation\": \"grounding from the entities above\"}]}\n\n\
            JSON OUTPUT:"
        );

        prompt
    }
}
