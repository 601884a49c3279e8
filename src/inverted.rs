use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::token::lexical_tokens;

/// Token → chunk-id posting sets for exact-token lexical lookup.
///
/// Tokens are the lexical tokenization of chunk content (whitespace-split,
/// lower-cased, punctuation kept), so ingest and query sides always agree.
/// The composite (token, chunk_id) key is unique; `put` ignores duplicates.
///
/// This lives inside the store's tables and is persisted with them, so the
/// in-memory map is rebuilt from the persistent state on every open and can
/// never serve ids of deleted chunks.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct InvertedIndex {
    postings: BTreeMap<String, BTreeSet<u64>>,
}

impl InvertedIndex {
    /// Insert one (token, chunk_id) pair. Returns false when the pair was
    /// already present.
    pub fn put(&mut self, token: &str, chunk_id: u64) -> bool {
        self.postings
            .entry(token.to_string())
            .or_default()
            .insert(chunk_id)
    }

    /// Index every lexical token of `content` under `chunk_id`.
    pub fn index_content(&mut self, chunk_id: u64, content: &str) {
        for token in lexical_tokens(content) {
            self.postings.entry(token).or_default().insert(chunk_id);
        }
    }

    /// The id set for `token`, ascending. Empty when unknown.
    pub fn get(&self, token: &str) -> Vec<u64> {
        self.postings
            .get(token)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Remove every entry referencing one of `ids`. Returns the number of
    /// pairs removed.
    pub fn delete_by_chunk_ids(&mut self, ids: &BTreeSet<u64>) -> usize {
        let mut removed = 0usize;
        self.postings.retain(|_, set| {
            let before = set.len();
            set.retain(|id| !ids.contains(id));
            removed += before - set.len();
            !set.is_empty()
        });
        removed
    }

    pub fn token_count(&self) -> usize {
        self.postings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_ignores_duplicate_pairs() {
        let mut idx = InvertedIndex::default();
        assert!(idx.put("alpha", 1));
        assert!(!idx.put("alpha", 1));
        assert_eq!(idx.get("alpha"), vec![1]);
    }

    #[test]
    fn get_returns_ascending_ids_without_duplicates() {
        let mut idx = InvertedIndex::default();
        idx.put("beta", 9);
        idx.put("beta", 3);
        idx.put("beta", 9);
        assert_eq!(idx.get("beta"), vec![3, 9]);
        assert!(idx.get("missing").is_empty());
    }

    #[test]
    fn index_content_uses_lexical_tokenization() {
        let mut idx = InvertedIndex::default();
        idx.index_content(7, "Alpha beta\tGAMMA, alpha");
        assert_eq!(idx.get("alpha"), vec![7]);
        assert_eq!(idx.get("gamma,"), vec![7]);
        // The raw cased form is not a key.
        assert!(idx.get("Alpha").is_empty());
    }

    #[test]
    fn delete_by_chunk_ids_drops_empty_postings() {
        let mut idx = InvertedIndex::default();
        idx.index_content(1, "alpha beta");
        idx.index_content(2, "alpha");
        let removed = idx.delete_by_chunk_ids(&BTreeSet::from([1]));
        assert_eq!(removed, 2);
        assert_eq!(idx.get("alpha"), vec![2]);
        assert!(idx.get("beta").is_empty());
    }
}
