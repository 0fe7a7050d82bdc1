use graph::{Chunk, estimate_tokens};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    pub target_tokens_max: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_tokens_max: 900,
            overlap_tokens: 100,
        }
    }
}

/// Splits raw text into ordered chunks: markdown sections first, then
/// paragraphs packed up to the token target, each new chunk carrying the
/// tail of the previous one.
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn chunk_text(&self, kb_id: &str, document_id: &str, text: &str) -> Vec<Chunk> {
        let mut pieces = Vec::new();

        for section in split_by_headings(text) {
            if estimate_tokens(&section) <= self.config.target_tokens_max {
                if !section.trim().is_empty() {
                    pieces.push(section.trim().to_string());
                }
                continue;
            }

            let mut buffer = String::new();
            let mut fresh = false;
            for para in split_by_paragraphs(&section) {
                if fresh && estimate_tokens(&buffer) + estimate_tokens(&para) > self.config.target_tokens_max {
                    pieces.push(buffer.trim().to_string());
                    buffer = overlap(&buffer, self.config.overlap_tokens);
                    if !buffer.is_empty() {
                        buffer.push_str("\n\n");
                    }
                    fresh = false;
                }
                buffer.push_str(&para);
                buffer.push_str("\n\n");
                fresh = true;
            }
            if fresh {
                pieces.push(buffer.trim().to_string());
            }
        }

        pieces
            .into_iter()
            .enumerate()
            .map(|(position, text)| Chunk::new(kb_id.to_string(), document_id.to_string(), text, position))
            .collect()
    }
}

fn split_by_headings(text: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if line.trim_start().starts_with('#') && !current.trim().is_empty() {
            sections.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        sections.push(current);
    }
    sections
}

fn split_by_paragraphs(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Last words of `text` worth about `target_tokens`.
fn overlap(text: &str, target_tokens: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let target_words = target_tokens * 10 / 13;
    if words.len() <= target_words {
        return words.join(" ");
    }
    words[words.len() - target_words..].join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_is_one_chunk() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let chunks = chunker.chunk_text("kb1", "doc1", "Paris is a city.\n\nIt is in France.");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].document_id, "doc1");
        assert_eq!(chunks[0].kb_id, "kb1");
        assert_eq!(chunks[0].position, 0);
    }

    #[test]
    fn test_headings_start_new_chunks() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let chunks = chunker.chunk_text("kb1", "doc1", "# Paris\nCapital.\n# Lyon\nOn the Rhone.");

        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].text.starts_with("# Lyon"));
        assert_eq!(chunks[1].position, 1);
    }

    #[test]
    fn test_long_section_packs_paragraphs_with_overlap() {
        let chunker = Chunker::new(ChunkerConfig {
            target_tokens_max: 20,
            overlap_tokens: 4,
        });
        let para = "alpha beta gamma delta epsilon zeta eta theta";
        let text = [para, para, para].join("\n\n");
        let chunks = chunker.chunk_text("kb1", "doc1", &text);

        assert!(chunks.len() >= 2);
        assert!(chunks[1].text.starts_with("zeta eta theta"));
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.position, i);
        }
    }

    #[test]
    fn test_blank_text_has_no_chunks() {
        let chunker = Chunker::new(ChunkerConfig::default());
        assert!(chunker.chunk_text("kb1", "doc1", "  \n\n ").is_empty());
    }
}
