//! The retrieval result handed to prompt assembly, plus the token-budget
//! packing that decides which ranked rows make it in.

use graph::estimate_tokens;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRow {
    pub name: String,
    pub score: f64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRow {
    pub from: String,
    pub to: String,
    pub score: f64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityRow {
    pub title: String,
    pub report_text: String,
    pub evidences: String,
}

/// Something that occupies one line (or block) of the rendered context.
pub trait ContextRow {
    fn render(&self) -> String;
}

impl ContextRow for EntityRow {
    fn render(&self) -> String {
        format!("{},{:.2},{}", csv_field(&self.name), self.score, csv_field(&self.description))
    }
}

impl ContextRow for RelationRow {
    fn render(&self) -> String {
        format!(
            "{},{},{:.2},{}",
            csv_field(&self.from),
            csv_field(&self.to),
            self.score,
            csv_field(&self.description)
        )
    }
}

impl ContextRow for CommunityRow {
    fn render(&self) -> String {
        format!("# {}\n## Content\n{}\n## Evidences\n{}", self.title, self.report_text, self.evidences)
    }
}

/// Keeps the longest prefix of `rows` whose rendered token counts fit in
/// `max_tokens`. The first row that would overflow is dropped, and so is
/// everything after it.
pub fn pack<R: ContextRow>(rows: Vec<R>, max_tokens: usize) -> Vec<R> {
    let mut remaining = max_tokens;
    let mut kept = Vec::new();
    for row in rows {
        let cost = estimate_tokens(&row.render());
        if cost > remaining {
            break;
        }
        remaining -= cost;
        kept.push(row);
    }
    kept
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// One synthesized context record for downstream prompt assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalContext {
    pub id: String,
    pub kb_ids: Vec<String>,
    pub entities: Vec<EntityRow>,
    pub relations: Vec<RelationRow>,
    pub communities: Vec<CommunityRow>,
}

impl RetrievalContext {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty() && self.communities.is_empty()
    }

    pub fn render(&self) -> String {
        let mut context = String::new();

        if !self.entities.is_empty() {
            context.push_str("---- Entities ----\nEntity,Score,Description\n");
            for row in &self.entities {
                context.push_str(&row.render());
                context.push('\n');
            }
        }

        if !self.relations.is_empty() {
            context.push_str("\n---- Relations ----\nFrom Entity,To Entity,Score,Description\n");
            for row in &self.relations {
                context.push_str(&row.render());
                context.push('\n');
            }
        }

        if !self.communities.is_empty() {
            context.push_str("\n---- Community Report ----\n");
            for row in &self.communities {
                context.push_str(&row.render());
                context.push_str("\n\n");
            }
        }

        context
    }
}
