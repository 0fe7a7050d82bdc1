use anyhow::{Context, Result};
use async_trait::async_trait;
use extract::{LanguageModel, OllamaClient};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// What the rewriter pulled out of a question.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rewrite {
    /// Entity types the answer is expected to have.
    #[serde(rename = "answer_type_keywords", default)]
    pub answer_types: Vec<String>,
    /// Entity names mentioned by the question.
    #[serde(rename = "entities_from_query", default)]
    pub entities: Vec<String>,
}

impl Rewrite {
    /// The degraded rewrite: no type hints, the question itself as the only
    /// entity seed.
    pub fn fallback(question: &str) -> Self {
        Self {
            answer_types: Vec::new(),
            entities: vec![question.to_string()],
        }
    }
}

/// Query-rewrite collaborator. `type_samples` maps entity types to example
/// entity names from the index.
#[async_trait]
pub trait QueryRewriter: Send + Sync {
    async fn rewrite(&self, question: &str, type_samples: &BTreeMap<String, Vec<String>>) -> Result<Rewrite>;
}

pub struct LlmRewriter {
    llm: Arc<dyn LanguageModel>,
}

impl LlmRewriter {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    pub fn local() -> Self {
        Self::new(Arc::new(OllamaClient::local()))
    }

    fn build_prompt(question: &str, type_samples: &BTreeMap<String, Vec<String>>) -> String {
        let mut samples = String::new();
        for (entity_type, names) in type_samples {
            samples.push_str(&format!("- {}: {}\n", entity_type, names.join(", ")));
        }

        format!(
            r#"You are analyzing a question asked against a knowledge graph.

ENTITY TYPES IN THE GRAPH, WITH EXAMPLES:
{samples}
USER QUESTION: {question}

INSTRUCTIONS:
- List the entity types (from the list above) that an answer to the question would be
- List the entity names the question mentions, as they would appear in the graph
- Output ONLY a JSON object of this shape:
{{"answer_type_keywords": ["TYPE"], "entities_from_query": ["name"]}}

JSON OUTPUT:"#
        )
    }
}

#[async_trait]
impl QueryRewriter for LlmRewriter {
    async fn rewrite(&self, question: &str, type_samples: &BTreeMap<String, Vec<String>>) -> Result<Rewrite> {
        let prompt = Self::build_prompt(question, type_samples);
        let json = self.llm.generate_json(&prompt).await.context("Failed to rewrite query")?;
        let rewrite: Rewrite = serde_json::from_str(&json).context("Failed to parse query rewrite")?;
        Ok(rewrite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(&'static str);

    #[async_trait]
    impl LanguageModel for Canned {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }

        async fn generate_json(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn test_rewrite_parses_keywords() {
        let rewriter = LlmRewriter::new(Arc::new(Canned(
            r#"{"answer_type_keywords": ["City"], "entities_from_query": ["France"]}"#,
        )));
        let samples = BTreeMap::from([("City".to_string(), vec!["Paris".to_string()])]);

        let rewrite = rewriter.rewrite("Which city is the capital of France?", &samples).await.unwrap();
        assert_eq!(rewrite.answer_types, vec!["City"]);
        assert_eq!(rewrite.entities, vec!["France"]);
    }

    #[test]
    fn test_prompt_lists_type_samples() {
        let samples = BTreeMap::from([("City".to_string(), vec!["Paris".to_string(), "Lyon".to_string()])]);
        let prompt = LlmRewriter::build_prompt("q?", &samples);
        assert!(prompt.contains("- City: Paris, Lyon"));
    }
}
