/// Token counting strategy used by the splitter and recorded in schema
/// metadata (so a future re-tokenization can detect a mismatch).
///
/// Implementations must be deterministic and monotone under concatenation:
/// `count(a) + count(b) >= count(a ⊕ b) - 1`, allowing one boundary token.
pub trait Tokenizer: Send + Sync {
    fn count(&self, s: &str) -> usize;
    fn name(&self) -> &'static str;
}

/// Default tokenizer: one token per Unicode code point.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuneTokenizer;

impl Tokenizer for RuneTokenizer {
    fn count(&self, s: &str) -> usize {
        s.chars().count()
    }

    fn name(&self) -> &'static str {
        "rune"
    }
}

/// Cheap model-proxy tokenizer: ~N chars per token, rounded up.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicTokenizer {
    pub chars_per_token: usize,
}

impl Default for HeuristicTokenizer {
    fn default() -> Self {
        Self { chars_per_token: 4 }
    }
}

impl Tokenizer for HeuristicTokenizer {
    fn count(&self, s: &str) -> usize {
        if self.chars_per_token == 0 {
            return s.chars().count();
        }
        s.chars().count().div_ceil(self.chars_per_token)
    }

    fn name(&self) -> &'static str {
        "heuristic"
    }
}

/// Whitespace-word tokenizer: one token per whitespace-separated word.
/// Budgets expressed in words rather than characters suit prose corpora.
#[derive(Debug, Default, Clone, Copy)]
pub struct WordTokenizer;

impl Tokenizer for WordTokenizer {
    fn count(&self, s: &str) -> usize {
        s.split_whitespace().count()
    }

    fn name(&self) -> &'static str {
        "word"
    }
}

/// Lexical tokenization for the inverted index: split on Unicode whitespace,
/// fold to lower case, drop empties. Punctuation is retained.
///
/// Intentionally distinct from [`Tokenizer::count`], and stable across ingest
/// and query — the same function runs on both sides.
pub fn lexical_tokens(s: &str) -> Vec<String> {
    s.split_whitespace()
        .map(|t| t.to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}
