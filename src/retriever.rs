use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::embed::{Embedder, PASSAGE_PREFIX, QUERY_PREFIX};
use crate::error::{CoreError, Result};
use crate::store::{Chunk, VectorStore};
use crate::token::lexical_tokens;

/// Policy for combining the vector and lexical candidate sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    #[default]
    Union,
    Intersect,
}

impl MergeMode {
    /// Unknown strings fall back to union (recall-maximizing).
    pub fn parse(s: &str) -> MergeMode {
        match s.to_lowercase().as_str() {
            "intersect" => MergeMode::Intersect,
            _ => MergeMode::Union,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub file_path_filter: Option<String>,
    pub limit: usize,
    pub use_vector: bool,
    pub use_inverted: bool,
    pub merge_mode: MergeMode,
    pub rerank: bool,
    /// Weight of the vector rank in blended scoring; unused when zero.
    pub alpha: f32,
    /// Weight of the lexical rank in blended scoring; unused when zero.
    pub beta: f32,
    pub return_full_docs: bool,
    pub context_window: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            file_path_filter: None,
            limit: 10,
            use_vector: true,
            use_inverted: true,
            merge_mode: MergeMode::Union,
            rerank: false,
            alpha: 0.0,
            beta: 0.0,
            return_full_docs: false,
            context_window: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk: Chunk,
    /// Present when a reranker or blended scoring ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    /// Sibling chunks within ±context_window of the hit's chunkIndex.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub neighbor_chunks: Vec<Chunk>,
}

/// Either matched chunks or fully reassembled documents.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SearchResult {
    Chunks { chunks: Vec<SearchHit> },
    Documents { documents: BTreeMap<String, String> },
}

/// One chunk with its surrounding context, for RetrieveWithContext.
#[derive(Debug, Clone, Serialize)]
pub struct ContextualChunk {
    pub chunk: Chunk,
    pub neighbors: Vec<Chunk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_document: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_stats: Option<DocStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocStats {
    pub file_path: String,
    pub total_chunks: usize,
    pub language: Option<String>,
}

/// Reorders a candidate list by relevance to the query. `scores[i]` is the
/// relevance of `docs[i]`; higher is better; output length equals input
/// length.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, docs: &[String]) -> Result<Vec<f32>>;
}

/// Keeps the incoming order (every candidate scores alike).
#[derive(Debug, Default)]
pub struct NoopReranker;

#[async_trait]
impl Reranker for NoopReranker {
    async fn rerank(&self, _query: &str, docs: &[String]) -> Result<Vec<f32>> {
        Ok(vec![1.0; docs.len()])
    }
}

/// Answers queries by merging semantic nearest-neighbor and exact-token
/// candidates, with optional re-ranking and document re-assembly.
///
/// All orderings that could be nondeterministic fall back to ascending
/// chunk id, so a fixed corpus + query + options always returns the same
/// id list.
pub struct HybridRetriever {
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    reranker: Option<Arc<dyn Reranker>>,
}

impl HybridRetriever {
    pub fn new(store: Arc<VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            reranker: None,
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub async fn search(
        &self,
        cancel: &CancellationToken,
        query: &str,
        opts: &SearchOptions,
    ) -> Result<SearchResult> {
        let limit = if opts.limit == 0 { 10 } else { opts.limit };

        // ── Candidate sources ────────────────────────────────────────────
        let vector_ids = if opts.use_vector {
            self.check_cancel(cancel)?;
            let qv = self
                .embedder
                .embed(&[format!("{QUERY_PREFIX}{query}")])
                .await?;
            self.check_cancel(cancel)?;
            self.store
                .vector_nn(&qv[0], limit, opts.file_path_filter.as_deref())?
        } else {
            vec![]
        };

        let lexical_ids = if opts.use_inverted {
            self.check_cancel(cancel)?;
            self.lexical_candidates(query, opts.file_path_filter.as_deref())?
        } else {
            vec![]
        };

        debug!(
            vector = vector_ids.len(),
            lexical = lexical_ids.len(),
            mode = ?opts.merge_mode,
            "candidate sets fetched"
        );

        // ── Merge + deterministic truncation ─────────────────────────────
        let merged = merge_candidates(&vector_ids, &lexical_ids, opts.merge_mode);
        let final_ids: Vec<u64> = merged.into_iter().take(limit).collect();

        self.check_cancel(cancel)?;
        let chunks = self.store.fetch_by_ids(&final_ids)?;

        // ── Scoring ──────────────────────────────────────────────────────
        let mut hits = self
            .score_hits(cancel, query, chunks, &vector_ids, &lexical_ids, opts)
            .await?;

        // ── Context expansion ────────────────────────────────────────────
        if opts.context_window > 0 {
            for hit in &mut hits {
                hit.neighbor_chunks =
                    self.neighbors(&hit.chunk, opts.context_window)?;
            }
        }

        // ── Document re-assembly ─────────────────────────────────────────
        if opts.return_full_docs {
            self.check_cancel(cancel)?;
            let mut documents = BTreeMap::new();
            let paths: BTreeSet<String> =
                hits.iter().map(|h| h.chunk.file_path.clone()).collect();
            for path in paths {
                documents.insert(path.clone(), self.reassemble(&path)?);
            }
            return Ok(SearchResult::Documents { documents });
        }

        Ok(SearchResult::Chunks { chunks: hits })
    }

    /// Expand stored chunk ids to chunks with neighbors and optionally the
    /// full document. Absent ids are skipped (non-fatal).
    pub async fn retrieve_with_context(
        &self,
        cancel: &CancellationToken,
        ids: &[u64],
        context_window: usize,
        include_full_doc: bool,
    ) -> Result<Vec<ContextualChunk>> {
        self.check_cancel(cancel)?;
        let chunks = self.store.fetch_by_ids(ids)?;

        let mut out = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            self.check_cancel(cancel)?;
            let neighbors = if context_window > 0 {
                self.neighbors(&chunk, context_window)?
            } else {
                vec![]
            };

            let siblings = self.store.fetch_by_path(&chunk.file_path)?;
            let doc_stats = Some(DocStats {
                file_path: chunk.file_path.clone(),
                total_chunks: siblings.len(),
                language: chunk.language().map(str::to_string),
            });

            let full_document = if include_full_doc {
                Some(self.reassemble(&chunk.file_path)?)
            } else {
                None
            };

            out.push(ContextualChunk {
                chunk,
                neighbors,
                full_document,
                doc_stats,
            });
        }
        Ok(out)
    }

    fn check_cancel(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        Ok(())
    }

    /// Union of posting sets over the query's lexical tokens, ascending id.
    fn lexical_candidates(&self, query: &str, path_filter: Option<&str>) -> Result<Vec<u64>> {
        let mut ids = BTreeSet::new();
        for token in lexical_tokens(query) {
            for id in self.store.lookup_token(&token)? {
                ids.insert(id);
            }
        }

        let ids: Vec<u64> = ids.into_iter().collect();
        match path_filter {
            None => Ok(ids),
            Some(path) => {
                let chunks = self.store.fetch_by_ids(&ids)?;
                Ok(chunks
                    .into_iter()
                    .filter(|c| c.file_path == path)
                    .map(|c| c.id)
                    .collect())
            }
        }
    }

    async fn score_hits(
        &self,
        cancel: &CancellationToken,
        query: &str,
        chunks: Vec<Chunk>,
        vector_ids: &[u64],
        lexical_ids: &[u64],
        opts: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        let mut hits: Vec<SearchHit> = chunks
            .into_iter()
            .map(|chunk| SearchHit {
                chunk,
                score: None,
                neighbor_chunks: vec![],
            })
            .collect();

        if opts.rerank {
            if let Some(reranker) = &self.reranker {
                self.check_cancel(cancel)?;
                let docs: Vec<String> = hits
                    .iter()
                    .map(|h| strip_passage_prefix(&h.chunk.content).to_string())
                    .collect();
                let scores = reranker.rerank(query, &docs).await?;
                if scores.len() != docs.len() {
                    return Err(CoreError::embed_permanent(format!(
                        "reranker returned {} scores for {} docs",
                        scores.len(),
                        docs.len()
                    )));
                }
                for (hit, score) in hits.iter_mut().zip(&scores) {
                    hit.score = Some(*score);
                }
                // Stable sort: equal scores keep merge order, which itself
                // tie-breaks by ascending id.
                hits.sort_by(|a, b| {
                    b.score
                        .unwrap_or(0.0)
                        .partial_cmp(&a.score.unwrap_or(0.0))
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                return Ok(hits);
            }
        }

        // Blended rank scoring, only when a weight was requested.
        if (opts.alpha > 0.0 || opts.beta > 0.0) && !hits.is_empty() {
            let vrank: BTreeMap<u64, usize> = vector_ids
                .iter()
                .enumerate()
                .map(|(i, id)| (*id, i))
                .collect();
            let lrank: BTreeMap<u64, usize> = lexical_ids
                .iter()
                .enumerate()
                .map(|(i, id)| (*id, i))
                .collect();
            for hit in &mut hits {
                let v = vrank
                    .get(&hit.chunk.id)
                    .map(|r| opts.alpha / (1.0 + *r as f32))
                    .unwrap_or(0.0);
                let l = lrank
                    .get(&hit.chunk.id)
                    .map(|r| opts.beta / (1.0 + *r as f32))
                    .unwrap_or(0.0);
                hit.score = Some(v + l);
            }
            hits.sort_by(|a, b| {
                b.score
                    .unwrap_or(0.0)
                    .partial_cmp(&a.score.unwrap_or(0.0))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.chunk.id.cmp(&b.chunk.id))
            });
        }

        Ok(hits)
    }

    /// Sibling chunks in [chunkIndex − w, chunkIndex + w] for the same
    /// file_path, excluding the hit itself.
    fn neighbors(&self, chunk: &Chunk, window: usize) -> Result<Vec<Chunk>> {
        let Some(center) = chunk.chunk_index() else {
            return Ok(vec![]);
        };
        let lo = center.saturating_sub(window);
        let hi = center + window;

        Ok(self
            .store
            .fetch_by_path(&chunk.file_path)?
            .into_iter()
            .filter(|c| {
                c.id != chunk.id
                    && c.chunk_index()
                        .map(|i| i >= lo && i <= hi)
                        .unwrap_or(false)
            })
            .collect())
    }

    /// Concatenate a document's chunks in chunkIndex order, stripping the
    /// embedding-time prefix, with a single blank-line separator.
    fn reassemble(&self, file_path: &str) -> Result<String> {
        let chunks = self.store.fetch_by_path(file_path)?;
        if chunks.is_empty() {
            return Err(CoreError::not_found(format!("document {file_path}")));
        }
        Ok(chunks
            .iter()
            .map(|c| strip_passage_prefix(&c.content))
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

pub fn strip_passage_prefix(content: &str) -> &str {
    content.strip_prefix(PASSAGE_PREFIX).unwrap_or(content)
}

/// Merge the candidate sets, preserving vector order first, then lexical
/// order; ascending-id ties are inherited from the sources (vector_nn
/// breaks distance ties by id, lexical sets are ascending).
fn merge_candidates(vector_ids: &[u64], lexical_ids: &[u64], mode: MergeMode) -> Vec<u64> {
    match mode {
        MergeMode::Union => {
            let mut seen: BTreeSet<u64> = BTreeSet::new();
            let mut out = Vec::new();
            for id in vector_ids.iter().chain(lexical_ids.iter()) {
                if seen.insert(*id) {
                    out.push(*id);
                }
            }
            out
        }
        MergeMode::Intersect => {
            let lex: BTreeSet<u64> = lexical_ids.iter().copied().collect();
            vector_ids
                .iter()
                .copied()
                .filter(|id| lex.contains(id))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_mode_parse_falls_back_to_union() {
        assert_eq!(MergeMode::parse("intersect"), MergeMode::Intersect);
        assert_eq!(MergeMode::parse("INTERSECT"), MergeMode::Intersect);
        assert_eq!(MergeMode::parse("union"), MergeMode::Union);
        assert_eq!(MergeMode::parse("whatever"), MergeMode::Union);
    }

    #[test]
    fn union_preserves_vector_order_then_lexical() {
        let merged = merge_candidates(&[5, 2, 9], &[1, 2, 7], MergeMode::Union);
        assert_eq!(merged, vec![5, 2, 9, 1, 7]);
    }

    #[test]
    fn intersect_keeps_vector_order() {
        let merged = merge_candidates(&[5, 2, 9], &[2, 9, 11], MergeMode::Intersect);
        assert_eq!(merged, vec![2, 9]);
    }

    #[test]
    fn intersect_of_disjoint_or_empty_sets_is_empty() {
        assert!(merge_candidates(&[], &[1, 2], MergeMode::Intersect).is_empty());
        assert!(merge_candidates(&[3, 1], &[], MergeMode::Intersect).is_empty());
        assert!(merge_candidates(&[1], &[2], MergeMode::Intersect).is_empty());
    }

    #[test]
    fn strip_prefix_only_removes_the_semantic_header() {
        assert_eq!(strip_passage_prefix("passage: hello"), "hello");
        assert_eq!(strip_passage_prefix("hello"), "hello");
        assert_eq!(strip_passage_prefix("passage:hello"), "passage:hello");
    }
}
