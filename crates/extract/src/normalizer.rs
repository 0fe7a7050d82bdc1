use anyhow::Result;
use regex::Regex;

/// Name canonicalisation and the similarity rules entity resolution uses.
#[derive(Debug, Clone)]
pub struct EntityNormalizer {
    punctuation: Regex,
    whitespace: Regex,
}

impl EntityNormalizer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            punctuation: Regex::new(r"[.,!?;:'()\-]")?,
            whitespace: Regex::new(r"\s+")?,
        })
    }

    /// Normalize entity name: lowercase, trim punctuation, collapse whitespace
    pub fn normalize(&self, name: &str) -> String {
        let lowered = name.to_lowercase();
        let stripped = self.punctuation.replace_all(lowered.trim(), " ");
        self.whitespace.replace_all(stripped.trim(), " ").to_string()
    }

    /// Whether two already-normalized names plausibly denote one entity.
    pub fn are_similar(&self, a: &str, b: &str) -> bool {
        if a.is_empty() || b.is_empty() {
            return false;
        }
        if a == b {
            return true;
        }

        let words_a: Vec<&str> = a.split_whitespace().collect();
        let words_b: Vec<&str> = b.split_whitespace().collect();

        if is_acronym(&words_a, &words_b) || is_acronym(&words_b, &words_a) {
            return true;
        }

        // Whole-word containment (handles "openai" vs "openai inc")
        let (short, long) = if words_a.len() <= words_b.len() {
            (&words_a, &words_b)
        } else {
            (&words_b, &words_a)
        };
        if long.len() > 1 && long.windows(short.len()).any(|w| w == short.as_slice()) {
            return true;
        }

        if words_a.len() > 1 && words_b.len() > 1 {
            let common = words_a.iter().filter(|w| words_b.contains(w)).count();
            let total = words_a.len().max(words_b.len());
            return common as f64 / total as f64 >= 0.7;
        }

        false
    }
}

/// "nyc" against ["new", "york", "city"].
fn is_acronym(short: &[&str], long: &[&str]) -> bool {
    if short.len() != 1 || long.len() < 2 {
        return false;
    }
    let initials: String = long.iter().filter_map(|w| w.chars().next()).collect();
    short[0].len() >= 2 && short[0] == initials
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        let normalizer = EntityNormalizer::new().unwrap();

        assert_eq!(normalizer.normalize("GraphRAG"), "graphrag");
        assert_eq!(normalizer.normalize("GraphRAG!"), "graphrag");
        assert_eq!(normalizer.normalize("  GraphRAG  "), "graphrag");
        assert_eq!(normalizer.normalize("U.S.  Army"), "u s army");
    }

    #[test]
    fn test_similarity_rules() {
        let n = EntityNormalizer::new().unwrap();
        let sim = |a: &str, b: &str| n.are_similar(&n.normalize(a), &n.normalize(b));

        assert!(sim("OpenAI", "OpenAI Inc"));
        assert!(sim("NYC", "New York City"));
        assert!(sim("Bank of England", "The Bank of England"));
        assert!(!sim("Paris", "Parish Council"));
        assert!(!sim("Paris", "Lyon"));
        assert!(!sim("", "Lyon"));
    }
}
