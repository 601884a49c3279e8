use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{CoreError, Result};
use crate::inverted::InvertedIndex;
use crate::metric::{hamming_distance, sign_sketch, VectorMetric};

// ---------------------------------------------------------------------------
// Flat-file relational vector store.
//
//  corpex.db.json
//  {
//    "meta":      { "schema_version": 2, "dimension": 256,
//                   "metric": "l2", "tokenizer": "rune" },
//    "next_id":   42,
//    "chunks":    { "<id>": { content, summary?, file_path, metadata,
//                             embedding, sketch, start_token, end_token } },
//    "inverted":  { "<token>": [chunk ids] },
//    "documents": { "<file_path>": { language, doc_title?, byte_size,
//                                    content_hash, ingested_at_ms } }
//  }
//
//  All three tables live under one RwLock and are saved in one atomic
//  temp-file + rename, so a chunk insert and its inverted entries are never
//  observable apart. Missing fields deserialize to their defaults, which is
//  how columns are added without rewriting existing rows.
// ---------------------------------------------------------------------------

/// Reserved metadata keys (wire-visible, camelCase).
pub const META_CHUNK_INDEX: &str = "chunkIndex";
pub const META_LANGUAGE: &str = "language";
pub const META_DOC_TITLE: &str = "docTitle";

/// Corpora above this size get a Hamming sign-sketch prescreen before exact
/// distance scoring.
const SKETCH_PRESCREEN_MIN: usize = 4096;
/// Prescreen shortlist multiplier: keep 4k sketch-nearest before exact pass.
const SKETCH_SHORTLIST_FACTOR: usize = 4;

/// Atomic unit of indexed content, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: u64,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub file_path: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub start_token: usize,
    #[serde(default)]
    pub end_token: usize,
}

impl Chunk {
    /// Zero-based ordinal within the source document, parsed from metadata.
    pub fn chunk_index(&self) -> Option<usize> {
        self.metadata.get(META_CHUNK_INDEX)?.parse().ok()
    }

    pub fn language(&self) -> Option<&str> {
        self.metadata.get(META_LANGUAGE).map(String::as_str)
    }
}

/// A chunk awaiting insertion; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub content: String,
    pub summary: Option<String>,
    pub index: usize,
    pub start_token: usize,
    pub end_token: usize,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct PersistReq {
    pub chunk: NewChunk,
    pub embedding: Vec<f32>,
}

/// Per-document row, upserted at the end of a successful ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub file_path: String,
    #[serde(default)]
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_title: Option<String>,
    #[serde(default)]
    pub byte_size: u64,
    /// xxh3 hex digest of the source content at ingest time.
    #[serde(default)]
    pub content_hash: String,
    #[serde(default)]
    pub ingested_at_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaMeta {
    pub schema_version: u32,
    pub dimension: usize,
    pub metric: VectorMetric,
    /// `Tokenizer::name()` used at ingest, recorded for future
    /// re-tokenization.
    pub tokenizer: String,
}

const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredChunk {
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    // Added in schema v2; rows written before it deserialize to "".
    #[serde(default)]
    file_path: String,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    embedding: Vec<f32>,
    #[serde(default)]
    sketch: u64,
    #[serde(default)]
    start_token: usize,
    #[serde(default)]
    end_token: usize,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Tables {
    #[serde(default)]
    meta: Option<SchemaMeta>,
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    chunks: BTreeMap<u64, StoredChunk>,
    #[serde(default)]
    inverted: InvertedIndex,
    #[serde(default)]
    documents: BTreeMap<String, DocumentMetadata>,
}

impl Tables {
    fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str::<Self>(&text) {
            Ok(tables) => tables,
            Err(e) => {
                warn!(error = %e, "store file unreadable, starting empty");
                Self::default()
            }
        }
    }

    fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string(self)
            .map_err(|e| CoreError::store_permanent(format!("serialize: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, text)
            .map_err(|e| CoreError::store_transient(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| CoreError::store_transient(format!("rename {}: {e}", path.display())))?;
        Ok(())
    }

    fn dimension(&self) -> Result<usize> {
        self.meta
            .as_ref()
            .map(|m| m.dimension)
            .ok_or_else(|| CoreError::store_permanent("schema not initialized; call ensure_schema"))
    }
}

/// Chunk, inverted-index, and document tables behind one handle.
///
/// Safe for concurrent use: readers share the lock, writers serialize.
/// Every mutation is staged on a copy of the tables and swapped in only
/// after a successful save, so a failed write leaves memory and disk on the
/// previous state and a retry re-applies cleanly.
pub struct VectorStore {
    db_path: PathBuf,
    inner: RwLock<Tables>,
    /// Saves to fail with a transient error, for fault-injection tests.
    #[cfg(test)]
    pub(crate) fail_next_saves: std::sync::atomic::AtomicU32,
}

impl VectorStore {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| CoreError::store_permanent(format!("create {}: {e}", dir.display())))?;
        let db_path = dir.join("corpex.db.json");
        let tables = Tables::load(&db_path);
        debug!(
            chunks = tables.chunks.len(),
            tokens = tables.inverted.token_count(),
            "store opened"
        );
        Ok(Self {
            db_path,
            inner: RwLock::new(tables),
            #[cfg(test)]
            fail_next_saves: std::sync::atomic::AtomicU32::new(0),
        })
    }

    /// Run `mutate` against a staged copy of the tables, persist it, then
    /// swap it in. An error from `mutate` or from the save leaves the live
    /// tables untouched.
    fn commit<T>(&self, mutate: impl FnOnce(&mut Tables) -> Result<T>) -> Result<T> {
        let mut tables = self.write_lock()?;
        let mut staged = tables.clone();
        let out = mutate(&mut staged)?;
        #[cfg(test)]
        self.maybe_fail_save()?;
        staged.save(&self.db_path)?;
        *tables = staged;
        Ok(out)
    }

    #[cfg(test)]
    fn maybe_fail_save(&self) -> Result<()> {
        use std::sync::atomic::Ordering;
        if self.fail_next_saves.load(Ordering::SeqCst) > 0 {
            self.fail_next_saves.fetch_sub(1, Ordering::SeqCst);
            return Err(CoreError::store_transient("injected save failure"));
        }
        Ok(())
    }

    /// Create or validate schema metadata. Idempotent: reopening with the
    /// same dimension and metric is a no-op; a mismatch is a permanent
    /// error (vectors from different spaces must never mix).
    pub fn ensure_schema(&self, dimension: usize, metric: VectorMetric, tokenizer: &str) -> Result<()> {
        if dimension == 0 {
            return Err(CoreError::config("vector dimension must be > 0"));
        }
        self.commit(|tables| match &tables.meta {
            None => {
                tables.meta = Some(SchemaMeta {
                    schema_version: SCHEMA_VERSION,
                    dimension,
                    metric,
                    tokenizer: tokenizer.to_string(),
                });
                Ok(())
            }
            Some(meta) => {
                if meta.dimension != dimension {
                    return Err(CoreError::store_permanent(format!(
                        "store dimension {} does not match requested {}",
                        meta.dimension, dimension
                    )));
                }
                if meta.metric != metric {
                    return Err(CoreError::store_permanent(
                        "store metric does not match requested metric",
                    ));
                }
                if meta.tokenizer != tokenizer {
                    warn!(
                        stored = %meta.tokenizer,
                        requested = %tokenizer,
                        "tokenizer changed since ingest; token offsets may shift"
                    );
                }
                Ok(())
            }
        })
    }

    pub fn schema(&self) -> Result<Option<SchemaMeta>> {
        Ok(self.read_lock()?.meta.clone())
    }

    /// Insert a batch of chunks for one document, together with their
    /// inverted-index entries, atomically. Inserts are ordered by
    /// `chunk.index`, so assigned ids increase monotonically within the
    /// file. Returns the assigned ids in that order.
    pub fn upsert_batch(&self, file_path: &str, mut reqs: Vec<PersistReq>) -> Result<Vec<u64>> {
        if reqs.is_empty() {
            return Ok(vec![]);
        }
        reqs.sort_by_key(|r| r.chunk.index);

        self.commit(move |tables| {
            let dim = tables.dimension()?;
            for req in &reqs {
                if req.embedding.len() != dim {
                    return Err(CoreError::store_permanent(format!(
                        "embedding dimension {} does not match store dimension {dim}",
                        req.embedding.len()
                    )));
                }
            }

            let mut ids = Vec::with_capacity(reqs.len());
            for req in reqs {
                let id = tables.next_id;
                tables.next_id += 1;

                let mut metadata = req.chunk.metadata;
                metadata.insert(META_CHUNK_INDEX.to_string(), req.chunk.index.to_string());

                tables.inverted.index_content(id, &req.chunk.content);
                let sketch = sign_sketch(&req.embedding);
                tables.chunks.insert(
                    id,
                    StoredChunk {
                        content: req.chunk.content,
                        summary: req.chunk.summary,
                        file_path: file_path.to_string(),
                        metadata,
                        embedding: req.embedding,
                        sketch,
                        start_token: req.chunk.start_token,
                        end_token: req.chunk.end_token,
                    },
                );
                ids.push(id);
            }
            Ok(ids)
        })
    }

    /// Up to `k` chunk ids ordered by ascending distance under the schema
    /// metric; ties break by id ascending. Above `SKETCH_PRESCREEN_MIN`
    /// stored chunks, candidates are shortlisted by sign-sketch Hamming
    /// distance before the exact pass.
    pub fn vector_nn(&self, query: &[f32], k: usize, file_path_filter: Option<&str>) -> Result<Vec<u64>> {
        if k == 0 {
            return Ok(vec![]);
        }
        let tables = self.read_lock()?;
        let dim = tables.dimension()?;
        if query.len() != dim {
            return Err(CoreError::store_permanent(format!(
                "query dimension {} does not match store dimension {dim}",
                query.len()
            )));
        }
        let metric = tables.meta.as_ref().map(|m| m.metric).unwrap_or_default();

        let candidates: Vec<(&u64, &StoredChunk)> = tables
            .chunks
            .iter()
            .filter(|(_, c)| file_path_filter.map_or(true, |p| c.file_path == p))
            .collect();

        let candidates = if candidates.len() > SKETCH_PRESCREEN_MIN {
            let qsketch = sign_sketch(query);
            let shortlist = (k * SKETCH_SHORTLIST_FACTOR).max(SKETCH_PRESCREEN_MIN / 4);
            let mut by_sketch: Vec<(u32, (&u64, &StoredChunk))> = candidates
                .into_iter()
                .map(|e| (hamming_distance(qsketch, e.1.sketch), e))
                .collect();
            by_sketch.sort_by_key(|(d, (id, _))| (*d, **id));
            by_sketch
                .into_iter()
                .take(shortlist)
                .map(|(_, e)| e)
                .collect()
        } else {
            candidates
        };

        let mut scored: Vec<(f32, u64)> = candidates
            .par_iter()
            .map(|(id, c)| (metric.distance(query, &c.embedding), **id))
            .collect();

        scored.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });

        Ok(scored.into_iter().take(k).map(|(_, id)| id).collect())
    }

    /// Chunks in the same order as the requested ids; missing ids are
    /// omitted.
    pub fn fetch_by_ids(&self, ids: &[u64]) -> Result<Vec<Chunk>> {
        let tables = self.read_lock()?;
        Ok(ids
            .iter()
            .filter_map(|id| tables.chunks.get(id).map(|c| materialize(*id, c)))
            .collect())
    }

    /// Distinct file paths referenced by `ids`, ascending.
    pub fn list_paths_for_ids(&self, ids: &[u64]) -> Result<Vec<String>> {
        let tables = self.read_lock()?;
        let set: BTreeSet<String> = ids
            .iter()
            .filter_map(|id| tables.chunks.get(id).map(|c| c.file_path.clone()))
            .collect();
        Ok(set.into_iter().collect())
    }

    /// All chunks of a document, ordered by chunkIndex ascending (id
    /// ascending as fallback). Used for document reconstruction.
    pub fn fetch_by_path(&self, file_path: &str) -> Result<Vec<Chunk>> {
        let tables = self.read_lock()?;
        let mut chunks: Vec<Chunk> = tables
            .chunks
            .iter()
            .filter(|(_, c)| c.file_path == file_path)
            .map(|(id, c)| materialize(*id, c))
            .collect();
        chunks.sort_by(|a, b| {
            match (a.chunk_index(), b.chunk_index()) {
                (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.id.cmp(&b.id)),
                _ => a.id.cmp(&b.id),
            }
        });
        Ok(chunks)
    }

    /// Remove a document: its chunks, their inverted entries, and the
    /// document row, in one transaction. Returns the number of chunks
    /// removed.
    pub fn delete_by_path(&self, file_path: &str) -> Result<usize> {
        {
            let tables = self.read_lock()?;
            let present = tables.documents.contains_key(file_path)
                || tables.chunks.values().any(|c| c.file_path == file_path);
            if !present {
                return Ok(0);
            }
        }

        self.commit(|tables| {
            let doomed: BTreeSet<u64> = tables
                .chunks
                .iter()
                .filter(|(_, c)| c.file_path == file_path)
                .map(|(id, _)| *id)
                .collect();

            for id in &doomed {
                tables.chunks.remove(id);
            }
            tables.inverted.delete_by_chunk_ids(&doomed);
            tables.documents.remove(file_path);
            Ok(doomed.len())
        })
    }

    // ── Inverted index (C7) ──────────────────────────────────────────────

    /// The chunk-id set for one lexical token, ascending. Never returns ids
    /// of deleted chunks: entries are removed in the same transaction as
    /// their chunks.
    pub fn lookup_token(&self, token: &str) -> Result<Vec<u64>> {
        Ok(self.read_lock()?.inverted.get(token))
    }

    // ── Document metadata ────────────────────────────────────────────────

    pub fn upsert_document(&self, meta: DocumentMetadata) -> Result<()> {
        self.commit(move |tables| {
            tables.documents.insert(meta.file_path.clone(), meta);
            Ok(())
        })
    }

    pub fn document(&self, file_path: &str) -> Result<Option<DocumentMetadata>> {
        Ok(self.read_lock()?.documents.get(file_path).cloned())
    }

    /// Whether any chunk rows exist under `file_path`. Cheaper than
    /// `fetch_by_path` when only presence matters; catches orphans from a
    /// partially failed ingest, which have chunks but no document row.
    pub fn contains_path(&self, file_path: &str) -> Result<bool> {
        Ok(self
            .read_lock()?
            .chunks
            .values()
            .any(|c| c.file_path == file_path))
    }

    pub fn chunk_count(&self) -> Result<usize> {
        Ok(self.read_lock()?.chunks.len())
    }

    fn read_lock(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>> {
        self.inner
            .read()
            .map_err(|_| CoreError::store_permanent("store lock poisoned"))
    }

    fn write_lock(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.inner
            .write()
            .map_err(|_| CoreError::store_permanent("store lock poisoned"))
    }
}

fn materialize(id: u64, c: &StoredChunk) -> Chunk {
    Chunk {
        id,
        content: c.content.clone(),
        summary: c.summary.clone(),
        file_path: c.file_path.clone(),
        metadata: c.metadata.clone(),
        embedding: c.embedding.clone(),
        start_token: c.start_token,
        end_token: c.end_token,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dim: usize) -> (tempfile::TempDir, VectorStore) {
        let dir = tempfile::tempdir().unwrap();
        let s = VectorStore::open(dir.path()).unwrap();
        s.ensure_schema(dim, VectorMetric::L2, "rune").unwrap();
        (dir, s)
    }

    fn req(index: usize, content: &str, embedding: Vec<f32>) -> PersistReq {
        PersistReq {
            chunk: NewChunk {
                content: content.to_string(),
                summary: None,
                index,
                start_token: index * 4,
                end_token: index * 4 + 4,
                metadata: BTreeMap::new(),
            },
            embedding,
        }
    }

    #[test]
    fn ensure_schema_is_idempotent_but_rejects_dimension_change() {
        let (_dir, s) = store(4);
        s.ensure_schema(4, VectorMetric::L2, "rune").unwrap();
        let err = s.ensure_schema(8, VectorMetric::L2, "rune").unwrap_err();
        assert_eq!(err.kind(), "store");
        let err = s.ensure_schema(4, VectorMetric::Cosine, "rune").unwrap_err();
        assert_eq!(err.kind(), "store");
    }

    #[test]
    fn upsert_assigns_monotone_ids_in_chunk_index_order() {
        let (_dir, s) = store(2);
        // Deliberately out of order; the store sorts by chunk index.
        let ids = s
            .upsert_batch(
                "doc",
                vec![
                    req(1, "second", vec![0.0, 1.0]),
                    req(0, "first", vec![1.0, 0.0]),
                ],
            )
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids[0] < ids[1]);

        let chunks = s.fetch_by_path("doc").unwrap();
        assert_eq!(chunks[0].content, "first");
        assert_eq!(chunks[0].chunk_index(), Some(0));
        assert_eq!(chunks[1].content, "second");
    }

    #[test]
    fn upsert_rejects_wrong_dimension() {
        let (_dir, s) = store(2);
        let err = s
            .upsert_batch("doc", vec![req(0, "x", vec![1.0, 0.0, 0.0])])
            .unwrap_err();
        assert_eq!(err.kind(), "store");
        assert!(!err.is_transient());
    }

    #[test]
    fn vector_nn_orders_by_distance_then_id() {
        let (_dir, s) = store(2);
        s.upsert_batch(
            "doc",
            vec![
                req(0, "a", vec![1.0, 0.0]),
                req(1, "b", vec![0.0, 1.0]),
                req(2, "c", vec![1.0, 0.0]), // tie with chunk 0
            ],
        )
        .unwrap();

        let ids = s.vector_nn(&[1.0, 0.0], 3, None).unwrap();
        // Exact matches first, tie broken by id; the orthogonal vector last.
        assert_eq!(ids, vec![0, 2, 1]);
    }

    #[test]
    fn vector_nn_honors_path_filter() {
        let (_dir, s) = store(2);
        s.upsert_batch("one", vec![req(0, "a", vec![1.0, 0.0])]).unwrap();
        s.upsert_batch("two", vec![req(0, "b", vec![0.9, 0.0])]).unwrap();

        let ids = s.vector_nn(&[1.0, 0.0], 5, Some("two")).unwrap();
        assert_eq!(ids.len(), 1);
        let chunks = s.fetch_by_ids(&ids).unwrap();
        assert_eq!(chunks[0].file_path, "two");
    }

    #[test]
    fn list_paths_for_ids_returns_distinct_paths() {
        let (_dir, s) = store(2);
        let a = s.upsert_batch("one", vec![req(0, "a", vec![1.0, 0.0])]).unwrap();
        let b = s
            .upsert_batch(
                "two",
                vec![req(0, "b", vec![0.0, 1.0]), req(1, "c", vec![0.5, 0.5])],
            )
            .unwrap();

        let mut ids = a;
        ids.extend(b);
        ids.push(777); // absent
        let paths = s.list_paths_for_ids(&ids).unwrap();
        assert_eq!(paths, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn fetch_by_ids_preserves_request_order_and_omits_missing() {
        let (_dir, s) = store(2);
        let ids = s
            .upsert_batch(
                "doc",
                vec![req(0, "a", vec![1.0, 0.0]), req(1, "b", vec![0.0, 1.0])],
            )
            .unwrap();

        let fetched = s.fetch_by_ids(&[ids[1], 999, ids[0]]).unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].content, "b");
        assert_eq!(fetched[1].content, "a");
    }

    #[test]
    fn delete_by_path_cascades_to_inverted_entries() {
        let (_dir, s) = store(2);
        s.upsert_batch("doc", vec![req(0, "alpha beta", vec![1.0, 0.0])])
            .unwrap();
        assert_eq!(s.lookup_token("alpha").unwrap().len(), 1);

        let removed = s.delete_by_path("doc").unwrap();
        assert_eq!(removed, 1);
        assert!(s.lookup_token("alpha").unwrap().is_empty());
        assert!(s.fetch_by_path("doc").unwrap().is_empty());
    }

    #[test]
    fn failed_save_rolls_back_memory_and_id_counter() {
        use std::sync::atomic::Ordering;

        let (_dir, s) = store(2);
        s.fail_next_saves.store(1, Ordering::SeqCst);
        let err = s
            .upsert_batch("doc", vec![req(0, "alpha beta", vec![1.0, 0.0])])
            .unwrap_err();
        assert_eq!(err.kind(), "store");
        assert!(err.is_transient());

        // The failed batch left nothing behind in any table.
        assert_eq!(s.chunk_count().unwrap(), 0);
        assert!(s.lookup_token("alpha").unwrap().is_empty());
        assert!(!s.contains_path("doc").unwrap());

        // The retry lands on the same ids the first attempt would have
        // used, so nothing is persisted twice.
        let ids = s
            .upsert_batch("doc", vec![req(0, "alpha beta", vec![1.0, 0.0])])
            .unwrap();
        assert_eq!(ids, vec![0]);
        assert_eq!(s.chunk_count().unwrap(), 1);
        assert_eq!(s.lookup_token("alpha").unwrap(), vec![0]);
    }

    #[test]
    fn tables_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let s = VectorStore::open(dir.path()).unwrap();
            s.ensure_schema(2, VectorMetric::L2, "rune").unwrap();
            s.upsert_batch("doc", vec![req(0, "alpha", vec![1.0, 0.0])])
                .unwrap();
        }
        let s = VectorStore::open(dir.path()).unwrap();
        s.ensure_schema(2, VectorMetric::L2, "rune").unwrap();
        assert_eq!(s.chunk_count().unwrap(), 1);
        assert_eq!(s.lookup_token("alpha").unwrap().len(), 1);
        let meta = s.schema().unwrap().unwrap();
        assert_eq!(meta.dimension, 2);
    }

    #[test]
    fn corrupt_store_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("corpex.db.json"), b"not json").unwrap();
        let s = VectorStore::open(dir.path()).unwrap();
        assert_eq!(s.chunk_count().unwrap(), 0);
    }

    #[test]
    fn document_metadata_round_trips() {
        let (_dir, s) = store(2);
        s.upsert_document(DocumentMetadata {
            file_path: "doc".into(),
            language: "rust".into(),
            doc_title: Some("Title".into()),
            byte_size: 42,
            content_hash: "abcd".into(),
            ingested_at_ms: 1,
        })
        .unwrap();
        let meta = s.document("doc").unwrap().unwrap();
        assert_eq!(meta.language, "rust");
        assert_eq!(meta.doc_title.as_deref(), Some("Title"));
    }
}
