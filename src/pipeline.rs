use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{ChunkingConfig, PipelineConfig};
use crate::embed::{check_batch, Embedder, PASSAGE_PREFIX};
use crate::error::{CoreError, Result};
use crate::language::Language;
use crate::splitter::{SplitChunk, Splitter};
use crate::store::{
    DocumentMetadata, NewChunk, PersistReq, VectorStore, META_DOC_TITLE, META_LANGUAGE,
};
use crate::token::Tokenizer;

/// Optional chunk → summary/keyword hook (typically an LLM completion
/// adapter). Failures are non-fatal: `None` leaves the field empty and the
/// chunk is persisted regardless.
pub trait Summariser: Send + Sync {
    fn summarise(&self, chunk_text: &str) -> Option<String>;

    fn keywords(&self, _chunk_text: &str) -> Option<Vec<String>> {
        None
    }
}

/// Outcome of one ingest call.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct IngestReport {
    pub ingested_chunks: usize,
    pub failed_batches: usize,
}

impl IngestReport {
    pub fn merge(&mut self, other: &IngestReport) {
        self.ingested_chunks += other.ingested_chunks;
        self.failed_batches += other.failed_batches;
    }
}

/// One document entering the pipeline.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub file_path: String,
    pub language: Language,
    pub doc_title: Option<String>,
}

/// Concurrent ingestion pipeline: one producer drives the splitter into a
/// bounded channel; a fixed pool of workers drains it in batches, embeds,
/// and writes chunks plus inverted entries per batch.
///
/// Chunks may persist out of order across workers; the splitter-assigned
/// chunkIndex metadata preserves document order. Transient embed/store
/// failures retry with exponential backoff inside the worker; a batch that
/// still fails is dropped and counted in `failed_batches` while the other
/// workers proceed.
pub struct IngestPipeline {
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    chunking: ChunkingConfig,
    cfg: PipelineConfig,
    tokenizer: Arc<dyn Tokenizer>,
    summariser: Option<Arc<dyn Summariser>>,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<VectorStore>,
        embedder: Arc<dyn Embedder>,
        chunking: ChunkingConfig,
        cfg: PipelineConfig,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Result<Self> {
        chunking.validate()?;
        cfg.validate()?;
        Ok(Self {
            store,
            embedder,
            chunking,
            cfg,
            tokenizer,
            summariser: None,
        })
    }

    pub fn with_summariser(mut self, summariser: Arc<dyn Summariser>) -> Self {
        self.summariser = Some(summariser);
        self
    }

    /// Ingest one document. The producer splits `content` into the jobs
    /// channel (backpressure: capacity = worker count); workers flush their
    /// in-flight batch on cancellation, then the call returns `Cancelled`.
    pub async fn ingest_document(
        &self,
        cancel: &CancellationToken,
        input: DocumentInput,
        content: String,
    ) -> Result<IngestReport> {
        let splitter = Splitter::new(&self.chunking, input.language, Arc::clone(&self.tokenizer))?;

        let byte_size = content.len() as u64;
        let content_hash = format!("{:016x}", xxhash_rust::xxh3::xxh3_64(content.as_bytes()));

        let (tx, rx) = mpsc::channel::<SplitChunk>(self.cfg.max_workers);
        let rx = Arc::new(Mutex::new(rx));

        let ingested = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::with_capacity(self.cfg.max_workers);
        for worker_id in 0..self.cfg.max_workers {
            workers.push(tokio::spawn(run_worker(WorkerContext {
                worker_id,
                rx: Arc::clone(&rx),
                cancel: cancel.clone(),
                store: Arc::clone(&self.store),
                embedder: Arc::clone(&self.embedder),
                summariser: self.summariser.clone(),
                input: input.clone(),
                batch_size: self.cfg.batch_size,
                max_retries: self.cfg.max_retries,
                retry_backoff_ms: self.cfg.retry_backoff_ms,
                ingested: Arc::clone(&ingested),
                failed: Arc::clone(&failed),
            })));
        }

        // Producer: the splitter is synchronous, so it runs on the blocking
        // pool and feeds the channel with blocking_send. Dropping `tx` at
        // the end closes the channel and lets the workers drain.
        let producer_cancel = cancel.clone();
        let producer = tokio::task::spawn_blocking(move || -> Result<usize> {
            let cursor = Cursor::new(content);
            splitter.stream(cursor, |chunk| {
                if producer_cancel.is_cancelled() {
                    return Err(CoreError::Cancelled);
                }
                tx.blocking_send(chunk)
                    .map_err(|_| CoreError::Cancelled)
            })
        });

        let produce_result = producer
            .await
            .map_err(|e| CoreError::split(crate::error::SplitStage::Reader, e.to_string()));

        for w in workers {
            let _ = w.await;
        }

        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        // Splitter failure: workers have drained; surface its error.
        match produce_result? {
            Err(e) => return Err(e),
            Ok(chunks) => {
                debug!(
                    file = %input.file_path,
                    chunks,
                    "document split complete"
                );
            }
        }

        let report = IngestReport {
            ingested_chunks: ingested.load(Ordering::SeqCst),
            failed_batches: failed.load(Ordering::SeqCst),
        };

        if report.failed_batches == 0 {
            self.upsert_document_metadata(&input, byte_size, content_hash)?;
        }

        Ok(report)
    }

    fn upsert_document_metadata(
        &self,
        input: &DocumentInput,
        byte_size: u64,
        content_hash: String,
    ) -> Result<()> {
        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.store.upsert_document(DocumentMetadata {
            file_path: input.file_path.clone(),
            language: input.language.tag().to_string(),
            doc_title: input.doc_title.clone(),
            byte_size,
            content_hash,
            ingested_at_ms: now_ms,
        })
    }
}

struct WorkerContext {
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<SplitChunk>>>,
    cancel: CancellationToken,
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    summariser: Option<Arc<dyn Summariser>>,
    input: DocumentInput,
    batch_size: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    ingested: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
}

async fn run_worker(ctx: WorkerContext) {
    let mut batch: Vec<SplitChunk> = Vec::with_capacity(ctx.batch_size);

    loop {
        let next = {
            let mut rx = ctx.rx.lock().await;
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => None,
                chunk = rx.recv() => chunk,
            }
        };

        match next {
            Some(chunk) => {
                batch.push(chunk);
                if batch.len() >= ctx.batch_size {
                    process_batch(&ctx, std::mem::take(&mut batch)).await;
                }
            }
            None => {
                // Channel closed or cancelled: flush the in-flight batch
                // best-effort, then stop.
                if !batch.is_empty() {
                    process_batch(&ctx, std::mem::take(&mut batch)).await;
                }
                break;
            }
        }
    }
}

async fn process_batch(ctx: &WorkerContext, batch: Vec<SplitChunk>) {
    let size = batch.len();
    match try_persist_batch(ctx, batch).await {
        Ok(()) => {
            ctx.ingested.fetch_add(size, Ordering::SeqCst);
        }
        Err(e) => {
            warn!(
                worker = ctx.worker_id,
                file = %ctx.input.file_path,
                error = %e,
                kind = e.kind(),
                "dropping batch after final failure"
            );
            ctx.failed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

async fn try_persist_batch(ctx: &WorkerContext, batch: Vec<SplitChunk>) -> Result<()> {
    let texts: Vec<String> = batch
        .iter()
        .map(|c| format!("{PASSAGE_PREFIX}{}", c.text))
        .collect();

    let embeddings = with_retries(ctx, "embed", || {
        let embedder = Arc::clone(&ctx.embedder);
        let texts = texts.clone();
        async move { embedder.embed(&texts).await }
    })
    .await?;
    check_batch(texts.len(), &embeddings, ctx.embedder.dimensions())?;

    let reqs: Vec<PersistReq> = batch
        .into_iter()
        .zip(embeddings)
        .map(|(chunk, embedding)| {
            let summary = ctx
                .summariser
                .as_ref()
                .and_then(|s| s.summarise(&chunk.text));
            let mut metadata = BTreeMap::new();
            metadata.insert(META_LANGUAGE.to_string(), ctx.input.language.tag().to_string());
            if let Some(title) = &ctx.input.doc_title {
                metadata.insert(META_DOC_TITLE.to_string(), title.clone());
            }
            if let Some(kw) = ctx
                .summariser
                .as_ref()
                .and_then(|s| s.keywords(&chunk.text))
            {
                metadata.insert("keywords".to_string(), kw.join(" "));
            }
            PersistReq {
                chunk: NewChunk {
                    content: format!("{PASSAGE_PREFIX}{}", chunk.text),
                    summary,
                    index: chunk.index,
                    start_token: chunk.start_token,
                    end_token: chunk.end_token,
                    metadata,
                },
                embedding,
            }
        })
        .collect();

    let store = Arc::clone(&ctx.store);
    let path = ctx.input.file_path.clone();
    with_retries(ctx, "store", || {
        let store = Arc::clone(&store);
        let path = path.clone();
        let reqs = reqs.clone();
        async move { store.upsert_batch(&path, reqs).map(|_| ()) }
    })
    .await
}

/// Run `op`, retrying transient failures up to `max_retries` attempts with
/// exponential backoff. Permanent failures return immediately.
async fn with_retries<T, F, Fut>(ctx: &WorkerContext, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt + 1 < ctx.max_retries.max(1) => {
                let delay = ctx.retry_backoff_ms.saturating_mul(1 << attempt);
                debug!(
                    worker = ctx.worker_id,
                    what,
                    attempt,
                    delay_ms = delay,
                    error = %e,
                    "transient failure, backing off"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::embed::HashEmbedder;
    use crate::token::RuneTokenizer;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    fn chunking(max: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            max_tokens: max,
            overlap_tokens: overlap,
            structure_aware: false,
        }
    }

    fn open_store(dir: &std::path::Path, dim: usize) -> Arc<VectorStore> {
        let store = VectorStore::open(dir).unwrap();
        store.ensure_schema(dim, StoreConfig::default().metric, "rune").unwrap();
        Arc::new(store)
    }

    fn pipeline(store: Arc<VectorStore>, workers: usize, batch: usize) -> IngestPipeline {
        IngestPipeline::new(
            store,
            Arc::new(HashEmbedder::new(8)),
            chunking(16, 4),
            PipelineConfig {
                max_workers: workers,
                batch_size: batch,
                max_retries: 3,
                retry_backoff_ms: 1,
            },
            Arc::new(RuneTokenizer),
        )
        .unwrap()
    }

    fn doc(path: &str) -> DocumentInput {
        DocumentInput {
            file_path: path.to_string(),
            language: Language::Plain,
            doc_title: None,
        }
    }

    #[tokio::test]
    async fn ingest_persists_every_chunk_with_dense_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), 8);
        let p = pipeline(Arc::clone(&store), 3, 2);

        let report = p
            .ingest_document(
                &CancellationToken::new(),
                doc("doc1"),
                "alpha beta gamma delta epsilon zeta eta theta".to_string(),
            )
            .await
            .unwrap();

        assert!(report.ingested_chunks > 0);
        assert_eq!(report.failed_batches, 0);

        let chunks = store.fetch_by_path("doc1").unwrap();
        assert_eq!(chunks.len(), report.ingested_chunks);
        // chunkIndex is dense and zero-based regardless of worker interleave.
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index(), Some(i));
        }

        // Document metadata row exists after a clean ingest.
        assert!(store.document("doc1").unwrap().is_some());
    }

    #[tokio::test]
    async fn cancellation_surfaces_and_leaves_no_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), 8);
        let p = pipeline(Arc::clone(&store), 2, 2);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = p
            .ingest_document(&cancel, doc("doc1"), "alpha beta gamma".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "cancelled");
        assert!(store.document("doc1").unwrap().is_none());
    }

    /// Embedder that fails transiently a fixed number of times before
    /// succeeding, to prove the worker retry loop.
    struct FlakyEmbedder {
        inner: HashEmbedder,
        remaining_failures: AtomicU32,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        async fn embed(&self, batch: &[String]) -> crate::error::Result<Vec<Vec<f32>>> {
            let left = self.remaining_failures.load(Ordering::SeqCst);
            if left > 0 {
                self.remaining_failures.store(left - 1, Ordering::SeqCst);
                return Err(CoreError::embed_transient("simulated outage"));
            }
            self.inner.embed(batch).await
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn transient_embed_failures_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), 8);
        let embedder = Arc::new(FlakyEmbedder {
            inner: HashEmbedder::new(8),
            remaining_failures: AtomicU32::new(2),
        });
        let p = IngestPipeline::new(
            Arc::clone(&store),
            embedder,
            chunking(64, 0),
            PipelineConfig {
                max_workers: 1,
                batch_size: 8,
                max_retries: 3,
                retry_backoff_ms: 1,
            },
            Arc::new(RuneTokenizer),
        )
        .unwrap();

        let report = p
            .ingest_document(&CancellationToken::new(), doc("doc1"), "alpha beta".to_string())
            .await
            .unwrap();
        assert_eq!(report.failed_batches, 0);
        assert!(report.ingested_chunks > 0);
    }

    #[tokio::test]
    async fn transient_store_failures_retry_without_duplicating_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), 8);
        let p = pipeline(Arc::clone(&store), 1, 8);

        // The first two save attempts fail after staging; the worker's
        // retry loop must land the third with no doubled ids or postings.
        store.fail_next_saves.store(2, Ordering::SeqCst);

        let report = p
            .ingest_document(
                &CancellationToken::new(),
                doc("doc1"),
                "alpha beta gamma".to_string(),
            )
            .await
            .unwrap();
        assert_eq!(report.failed_batches, 0);
        assert_eq!(report.ingested_chunks, 1);

        let chunks = store.fetch_by_path("doc1").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index(), Some(0));
        assert_eq!(store.lookup_token("alpha").unwrap().len(), 1);
        assert_eq!(store.lookup_token("gamma").unwrap().len(), 1);
    }

    /// Embedder that always fails permanently.
    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        async fn embed(&self, _batch: &[String]) -> crate::error::Result<Vec<Vec<f32>>> {
            Err(CoreError::embed_permanent("auth rejected"))
        }

        fn dimensions(&self) -> usize {
            8
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn permanent_embed_failure_counts_failed_batches() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), 8);
        let p = IngestPipeline::new(
            Arc::clone(&store),
            Arc::new(BrokenEmbedder),
            chunking(64, 0),
            PipelineConfig {
                max_workers: 1,
                batch_size: 8,
                max_retries: 3,
                retry_backoff_ms: 1,
            },
            Arc::new(RuneTokenizer),
        )
        .unwrap();

        let report = p
            .ingest_document(&CancellationToken::new(), doc("doc1"), "alpha beta".to_string())
            .await
            .unwrap();
        assert_eq!(report.ingested_chunks, 0);
        assert_eq!(report.failed_batches, 1);
        // A failed document does not get a metadata row.
        assert!(store.document("doc1").unwrap().is_none());
    }
}
