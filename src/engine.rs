use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{ChunkingConfig, Config};
use crate::embed::Embedder;
use crate::error::{CoreError, Result};
use crate::language::Language;
use crate::pipeline::{DocumentInput, IngestPipeline, IngestReport, Summariser};
use crate::reader::{FileData, ReaderOptions, SourceReader};
use crate::retriever::{ContextualChunk, HybridRetriever, Reranker, SearchOptions, SearchResult};
use crate::store::VectorStore;
use crate::token::Tokenizer;

/// Parameters for one ingest request. Unset knobs fall back to the engine
/// config.
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    pub file_path: String,
    /// `None` deduces from the file path suffix.
    pub language: Option<Language>,
    pub doc_title: Option<String>,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub generate_summary: bool,
    pub generate_keywords: bool,
}

/// Facade over the ingestion and retrieval core: Ingest, Search,
/// RetrieveWithContext, DeleteDocument. Surrounding transport layers are
/// free to marshal these four operations.
pub struct Engine {
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    tokenizer: Arc<dyn Tokenizer>,
    summariser: Option<Arc<dyn Summariser>>,
    retriever: HybridRetriever,
    config: Config,
}

impl Engine {
    /// Open (or create) the store under `corpus_root` and validate the
    /// schema against the embedder's dimension.
    pub fn open(
        corpus_root: &Path,
        config: Config,
        embedder: Arc<dyn Embedder>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(VectorStore::open(&corpus_root.join(&config.store_dir))?);
        store.ensure_schema(embedder.dimensions(), config.store.metric, tokenizer.name())?;

        let retriever = HybridRetriever::new(Arc::clone(&store), Arc::clone(&embedder));

        Ok(Self {
            store,
            embedder,
            tokenizer,
            summariser: None,
            retriever,
            config,
        })
    }

    pub fn with_summariser(mut self, summariser: Arc<dyn Summariser>) -> Self {
        self.summariser = Some(summariser);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.retriever = HybridRetriever::new(Arc::clone(&self.store), Arc::clone(&self.embedder))
            .with_reranker(reranker);
        self
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    // ── Operation 1: Ingest ──────────────────────────────────────────────

    /// Ingest one text blob under `req.file_path`.
    ///
    /// Re-ingesting unchanged content (same xxh3 hash) is a no-op; changed
    /// content replaces the previous document (delete + ingest), so
    /// chunkIndex stays dense per path.
    pub async fn ingest_text(
        &self,
        cancel: &CancellationToken,
        req: &IngestRequest,
        text: String,
    ) -> Result<IngestReport> {
        if req.file_path.is_empty() {
            return Err(CoreError::config("file_path must not be empty"));
        }
        let chunking = self.chunking_for(req)?;

        let hash = format!("{:016x}", xxhash_rust::xxh3::xxh3_64(text.as_bytes()));
        let existing = self.store.document(&req.file_path)?;
        if let Some(doc) = &existing {
            if doc.content_hash == hash {
                debug!(file = %req.file_path, "content unchanged, skipping");
                return Ok(IngestReport::default());
            }
        }
        // Clear whatever already sits under this path. A partially failed
        // ingest leaves chunks with no document row (the row is only
        // written on clean completion), so presence is probed on the chunk
        // table too — otherwise re-ingesting after a failure would stack a
        // second chunk sequence on top of the orphans.
        if existing.is_some() || self.store.contains_path(&req.file_path)? {
            let removed = self.store.delete_by_path(&req.file_path)?;
            info!(file = %req.file_path, removed, "replacing existing document chunks");
        }

        let language = req
            .language
            .unwrap_or_else(|| Language::deduce(&req.file_path));

        let mut pipeline = IngestPipeline::new(
            Arc::clone(&self.store),
            Arc::clone(&self.embedder),
            chunking,
            self.config.pipeline.clone(),
            Arc::clone(&self.tokenizer),
        )?;
        if req.generate_summary || req.generate_keywords {
            if let Some(summariser) = &self.summariser {
                pipeline = pipeline.with_summariser(Arc::new(GatedSummariser {
                    inner: Arc::clone(summariser),
                    summary: req.generate_summary,
                    keywords: req.generate_keywords,
                }));
            }
        }

        let input = DocumentInput {
            file_path: req.file_path.clone(),
            language,
            doc_title: req.doc_title.clone(),
        };
        pipeline.ingest_document(cancel, input, text).await
    }

    /// Walk `dir` and ingest every textual file, in deterministic path
    /// order. `on_file` observes per-document progress. Single-file read
    /// errors are skipped by the reader; a store or config failure aborts.
    pub async fn ingest_dir<F>(
        &self,
        cancel: &CancellationToken,
        dir: &Path,
        base: &IngestRequest,
        mut on_file: F,
    ) -> Result<IngestReport>
    where
        F: FnMut(&str, &IngestReport),
    {
        let reader = SourceReader::new(ReaderOptions {
            root: dir.to_path_buf(),
            max_file_bytes: self.config.max_file_bytes,
            exclude_dir_names: self.config.exclude_dir_names.clone(),
        });

        let mut files: Vec<FileData> = Vec::new();
        reader.stream(cancel, |f| {
            files.push(f);
            Ok(())
        })?;

        let mut total = IngestReport::default();
        for file in files {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            let req = IngestRequest {
                file_path: file.path.clone(),
                language: None,
                doc_title: base.doc_title.clone(),
                ..base.clone()
            };
            let report = self.ingest_text(cancel, &req, file.content).await?;
            on_file(&file.path, &report);
            total.merge(&report);
        }
        Ok(total)
    }

    // ── Operation 2: Search ──────────────────────────────────────────────

    pub async fn search(
        &self,
        cancel: &CancellationToken,
        query: &str,
        opts: &SearchOptions,
    ) -> Result<SearchResult> {
        if query.trim().is_empty() {
            return Err(CoreError::config("query must not be empty"));
        }
        self.retriever.search(cancel, query, opts).await
    }

    // ── Operation 3: RetrieveWithContext ─────────────────────────────────

    pub async fn retrieve_with_context(
        &self,
        cancel: &CancellationToken,
        ids: &[u64],
        context_window: usize,
        include_full_doc: bool,
    ) -> Result<Vec<ContextualChunk>> {
        self.retriever
            .retrieve_with_context(cancel, ids, context_window, include_full_doc)
            .await
    }

    // ── Operation 4: DeleteDocument ──────────────────────────────────────

    /// Remove a document and all derived rows. Deleting an absent path is
    /// non-fatal and returns 0.
    pub fn delete_document(&self, file_path: &str) -> Result<usize> {
        self.store.delete_by_path(file_path)
    }

    fn chunking_for(&self, req: &IngestRequest) -> Result<ChunkingConfig> {
        let chunking = ChunkingConfig {
            max_tokens: req.chunk_size.unwrap_or(self.config.chunking.max_tokens),
            overlap_tokens: req
                .chunk_overlap
                .unwrap_or(self.config.chunking.overlap_tokens),
            structure_aware: self.config.chunking.structure_aware,
        };
        chunking.validate()?;
        Ok(chunking)
    }
}

/// Applies the per-request generate_summary/generate_keywords switches on
/// top of the configured hook.
struct GatedSummariser {
    inner: Arc<dyn Summariser>,
    summary: bool,
    keywords: bool,
}

impl Summariser for GatedSummariser {
    fn summarise(&self, chunk_text: &str) -> Option<String> {
        if self.summary {
            self.inner.summarise(chunk_text)
        } else {
            None
        }
    }

    fn keywords(&self, chunk_text: &str) -> Option<Vec<String>> {
        if self.keywords {
            self.inner.keywords(chunk_text)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbedder;
    use crate::token::RuneTokenizer;

    fn engine(dir: &Path) -> Engine {
        let mut config = Config::default();
        config.chunking.max_tokens = 32;
        config.chunking.overlap_tokens = 4;
        config.pipeline.max_workers = 2;
        config.pipeline.batch_size = 2;
        Engine::open(
            dir,
            config,
            Arc::new(HashEmbedder::new(16)),
            Arc::new(RuneTokenizer),
        )
        .unwrap()
    }

    fn req(path: &str) -> IngestRequest {
        IngestRequest {
            file_path: path.to_string(),
            ..IngestRequest::default()
        }
    }

    #[tokio::test]
    async fn invalid_overlap_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path());
        let mut r = req("doc");
        r.chunk_size = Some(8);
        r.chunk_overlap = Some(8);
        let err = e
            .ingest_text(&CancellationToken::new(), &r, "body".into())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[tokio::test]
    async fn unchanged_content_is_skipped_and_changed_content_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path());
        let cancel = CancellationToken::new();

        let first = e
            .ingest_text(&cancel, &req("doc"), "alpha beta gamma".into())
            .await
            .unwrap();
        assert!(first.ingested_chunks > 0);

        let again = e
            .ingest_text(&cancel, &req("doc"), "alpha beta gamma".into())
            .await
            .unwrap();
        assert_eq!(again.ingested_chunks, 0);

        let changed = e
            .ingest_text(&cancel, &req("doc"), "delta epsilon".into())
            .await
            .unwrap();
        assert!(changed.ingested_chunks > 0);
        // The replaced document's tokens are gone.
        assert!(e.store().lookup_token("alpha").unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_document_is_nonfatal_for_absent_paths() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path());
        assert_eq!(e.delete_document("missing").unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path());
        let err = e
            .search(&CancellationToken::new(), "  ", &SearchOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}
