use graph::GraphRagError;
use serde::{Deserialize, Serialize};

/// One extracted entity. `description` is required on the wire; it is an
/// Option only so that a missing field is reported instead of defaulted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(rename = "type", default)]
    pub entity_type: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

impl Entity {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            description: Some(description.into()),
        }
    }
}

impl Relation {
    pub fn new(source: impl Into<String>, target: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            description: Some(description.into()),
            weight: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }
}

impl ExtractionResult {
    /// Rejects items missing a name or a description.
    pub fn validate(&self, document_id: &str) -> Result<(), GraphRagError> {
        for entity in &self.entities {
            if entity.name.trim().is_empty() {
                return Err(GraphRagError::extraction(document_id, "entity without a name"));
            }
            if entity.description.is_none() {
                return Err(GraphRagError::extraction(
                    document_id,
                    format!("entity '{}' has no description", entity.name),
                ));
            }
        }
        for relation in &self.relations {
            if relation.source.trim().is_empty() || relation.target.trim().is_empty() {
                return Err(GraphRagError::extraction(document_id, "relation without an endpoint"));
            }
            if relation.description.is_none() {
                return Err(GraphRagError::extraction(
                    document_id,
                    format!("relation '{}' -> '{}' has no description", relation.source, relation.target),
                ));
            }
        }
        Ok(())
    }

    pub fn extend(&mut self, other: ExtractionResult) {
        self.entities.extend(other.entities);
        self.relations.extend(other.relations);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_description_is_rejected() {
        let parsed: ExtractionResult =
            serde_json::from_str(r#"{"entities": [{"name": "Paris", "type": "City"}], "relations": []}"#).unwrap();
        let err = parsed.validate("doc1").unwrap_err();
        assert!(matches!(err, GraphRagError::Extraction { ref document_id, .. } if document_id == "doc1"));
    }

    #[test]
    fn test_weight_is_optional() {
        let parsed: ExtractionResult = serde_json::from_str(
            r#"{"entities": [], "relations": [{"source": "A", "target": "B", "description": "knows"}]}"#,
        )
        .unwrap();
        assert!(parsed.validate("doc1").is_ok());
        assert_eq!(parsed.relations[0].weight, None);
    }
}
