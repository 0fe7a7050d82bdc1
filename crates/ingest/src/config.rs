use anyhow::{Context, Result};
use index::LockConfig;
use query::SearchConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::chunker::ChunkerConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub concurrency: ConcurrencyConfig,
    pub timeouts: TimeoutConfig,
    pub lock: LockConfig,
    pub extraction: ExtractionConfig,
    pub chunker: ChunkerConfig,
    pub stages: StageConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub max_concurrent_documents: usize,
}

/// Per-document deadline: `base_secs + per_chunk_secs * chunks`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DocumentTimeout {
    pub base_secs: u64,
    pub per_chunk_secs: u64,
}

impl DocumentTimeout {
    pub fn for_chunks(&self, chunks: usize) -> Duration {
        Duration::from_secs(self.base_secs + self.per_chunk_secs * chunks as u64)
    }
}

/// `None` disables the corresponding deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub document: Option<DocumentTimeout>,
    pub resolution_secs: Option<u64>,
    pub community_secs: Option<u64>,
}

impl TimeoutConfig {
    pub fn resolution(&self) -> Option<Duration> {
        self.resolution_secs.map(Duration::from_secs)
    }

    pub fn community(&self) -> Option<Duration> {
        self.community_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub language: String,
    pub entity_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub with_resolution: bool,
    pub with_community: bool,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_documents: 4,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            document: Some(DocumentTimeout {
                base_secs: 180,
                per_chunk_secs: 20,
            }),
            resolution_secs: Some(30 * 60),
            community_secs: Some(30 * 60),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            language: "English".to_string(),
            entity_types: ["organization", "person", "geo", "event", "category"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            with_resolution: true,
            with_community: true,
        }
    }
}

impl PipelineConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config: {:?}", path))?;
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse config: {:?}", path))
    }

    /// Wide fan-out, no resolution pass.
    pub fn fast() -> Self {
        Self {
            concurrency: ConcurrencyConfig {
                max_concurrent_documents: 16,
            },
            stages: StageConfig {
                with_resolution: false,
                with_community: true,
            },
            ..Self::default()
        }
    }

    /// Narrow fan-out, no per-document deadline, every stage on.
    pub fn thorough() -> Self {
        Self {
            concurrency: ConcurrencyConfig {
                max_concurrent_documents: 2,
            },
            timeouts: TimeoutConfig {
                document: None,
                ..TimeoutConfig::default()
            },
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.concurrency.max_concurrent_documents, 4);
        assert_eq!(config.lock.lease_secs, 1200);
        assert_eq!(config.search.max_tokens, 8196);
        assert!(config.stages.with_resolution);
    }

    #[test]
    fn test_document_timeout_scales_with_chunks() {
        let timeout = TimeoutConfig::default().document.unwrap();
        assert_eq!(timeout.for_chunks(0), Duration::from_secs(180));
        assert_eq!(timeout.for_chunks(3), Duration::from_secs(240));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"concurrency": {"max_concurrent_documents": 2}, "stages": {"with_resolution": false, "with_community": false}}"#)
                .unwrap();
        assert_eq!(config.concurrency.max_concurrent_documents, 2);
        assert!(!config.stages.with_community);
        assert_eq!(config.search.ent_topn, 6);
        assert!(config.timeouts.document.is_some());
    }

    #[test]
    fn test_presets() {
        assert!(!PipelineConfig::fast().stages.with_resolution);
        assert!(PipelineConfig::thorough().timeouts.document.is_none());
    }
}
