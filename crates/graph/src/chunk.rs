use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One ordered piece of a document, as handed to the extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub kb_id: String,
    pub text: String,
    pub position: usize,
}

impl Chunk {
    pub fn new(kb_id: String, document_id: String, text: String, position: usize) -> Self {
        // Generate stable chunk id from content
        let id = Self::generate_chunk_id(&document_id, &text, position);

        Self {
            id,
            document_id,
            kb_id,
            text,
            position,
        }
    }

    fn generate_chunk_id(document_id: &str, text: &str, position: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(document_id.as_bytes());
        hasher.update(text.as_bytes());
        hasher.update(position.to_string().as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16]) // first 16 bytes (32 hex chars)
    }

    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.text)
    }
}

/// Rough token count: 1.3 tokens per word, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    let word_count = text.split_whitespace().count();
    (word_count * 13).div_ceil(10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_is_stable() {
        let a = Chunk::new("kb".into(), "doc".into(), "Paris is a city.".into(), 0);
        let b = Chunk::new("kb".into(), "doc".into(), "Paris is a city.".into(), 0);
        let c = Chunk::new("kb".into(), "doc".into(), "Paris is a city.".into(), 1);
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.id.len(), 32);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("one"), 2);
        assert_eq!(estimate_tokens("one two three four five six seven eight nine ten"), 13);
    }
}
