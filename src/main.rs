use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use corpex::config::{load_config, Config};
use corpex::embed::{Embedder, HashEmbedder, StaticModelEmbedder};
use corpex::engine::{Engine, IngestRequest};
use corpex::retriever::{MergeMode, SearchOptions, SearchResult};
use corpex::token::RuneTokenizer;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "corpex")]
#[command(version)]
#[command(about = "Document ingestion and hybrid retrieval engine (vector + lexical)")]
struct Cli {
    /// Corpus root; the store lives under {root}/.corpex.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Override the embedding model repo ID (HuggingFace) used by
    /// Model2Vec-RS, or "hash" for the deterministic offline backend.
    #[arg(long, value_name = "MODEL_ID")]
    embed_model: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ingest a file or directory into the store
    Ingest {
        /// File or directory to ingest
        path: PathBuf,

        /// Logical file_path key for a single-file ingest (defaults to the
        /// path itself)
        #[arg(long)]
        file_path: Option<String>,

        /// Document title recorded in chunk metadata
        #[arg(long)]
        doc_title: Option<String>,

        /// Token budget per chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Overlap tokens between adjacent chunks
        #[arg(long)]
        chunk_overlap: Option<usize>,
    },
    /// Search the store
    Search {
        query: String,

        /// Restrict candidates to a single document
        #[arg(long)]
        file_path: Option<String>,

        /// Max results
        #[arg(long, default_value_t = 10)]
        limit: usize,

        /// Disable the vector candidate source
        #[arg(long)]
        no_vector: bool,

        /// Disable the inverted-index candidate source
        #[arg(long)]
        no_inverted: bool,

        /// Candidate merge mode: union | intersect
        #[arg(long, default_value = "union")]
        merge_mode: String,

        /// Include +-N sibling chunks per hit
        #[arg(long, default_value_t = 0)]
        context_window: usize,

        /// Return whole reassembled documents instead of chunks
        #[arg(long)]
        full_docs: bool,
    },
    /// Fetch chunks by id with surrounding context
    Retrieve {
        /// Chunk ids
        #[arg(required = true)]
        ids: Vec<u64>,

        #[arg(long, default_value_t = 1)]
        context_window: usize,

        /// Attach the fully reassembled document to each chunk
        #[arg(long)]
        full_doc: bool,
    },
    /// Delete a document and all its chunks
    Delete {
        /// Logical file_path of the document
        file_path: String,
    },
}

fn open_embedder(cfg: &Config, override_model: Option<&str>) -> Result<Arc<dyn Embedder>> {
    let model_id = override_model.unwrap_or(cfg.embedding.model.as_str());
    if model_id == "hash" {
        return Ok(Arc::new(HashEmbedder::new(cfg.store.dimension)));
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} loading embedding model...")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    let embedder =
        StaticModelEmbedder::load(model_id).with_context(|| format!("loading {model_id}"))?;
    spinner.finish_with_message("model ready");
    Ok(Arc::new(embedder))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = cli
        .root
        .canonicalize()
        .with_context(|| format!("corpus root {}", cli.root.display()))?;
    let cfg = load_config(&root);

    let embedder = open_embedder(&cfg, cli.embed_model.as_deref())?;
    let engine = Engine::open(&root, cfg, embedder, Arc::new(RuneTokenizer))?;
    let cancel = CancellationToken::new();

    match cli.cmd {
        Command::Ingest {
            path,
            file_path,
            doc_title,
            chunk_size,
            chunk_overlap,
        } => {
            let base = IngestRequest {
                file_path: String::new(),
                language: None,
                doc_title,
                chunk_size,
                chunk_overlap,
                generate_summary: false,
                generate_keywords: false,
            };

            let abs = if path.is_absolute() { path } else { root.join(&path) };
            let report = if abs.is_dir() {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::with_template("{spinner} {msg}")
                        .unwrap()
                        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
                );
                bar.enable_steady_tick(std::time::Duration::from_millis(80));
                let report = engine
                    .ingest_dir(&cancel, &abs, &base, |file, r| {
                        bar.set_message(format!("{file}: {} chunks", r.ingested_chunks));
                    })
                    .await?;
                bar.finish_with_message(format!("{} chunks ingested", report.ingested_chunks));
                report
            } else {
                let content = std::fs::read_to_string(&abs)
                    .with_context(|| format!("reading {}", abs.display()))?;
                let mut req = base;
                req.file_path = file_path.unwrap_or_else(|| {
                    abs.strip_prefix(&root)
                        .map(|p| p.to_string_lossy().replace('\\', "/"))
                        .unwrap_or_else(|_| abs.to_string_lossy().replace('\\', "/"))
                });
                engine.ingest_text(&cancel, &req, content).await?
            };

            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Command::Search {
            query,
            file_path,
            limit,
            no_vector,
            no_inverted,
            merge_mode,
            context_window,
            full_docs,
        } => {
            let opts = SearchOptions {
                file_path_filter: file_path,
                limit,
                use_vector: !no_vector,
                use_inverted: !no_inverted,
                merge_mode: MergeMode::parse(&merge_mode),
                context_window,
                return_full_docs: full_docs,
                ..SearchOptions::default()
            };
            let result = engine.search(&cancel, &query, &opts).await?;
            match result {
                SearchResult::Chunks { chunks } => {
                    println!("{}", serde_json::to_string_pretty(&json!({ "chunks": chunks }))?);
                }
                SearchResult::Documents { documents } => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&json!({ "documents": documents }))?
                    );
                }
            }
        }

        Command::Retrieve {
            ids,
            context_window,
            full_doc,
        } => {
            let out = engine
                .retrieve_with_context(&cancel, &ids, context_window, full_doc)
                .await?;
            println!("{}", serde_json::to_string_pretty(&out)?);
        }

        Command::Delete { file_path } => {
            let removed = engine.delete_document(&file_path)?;
            println!("{}", serde_json::to_string_pretty(&json!({ "removed": removed }))?);
        }
    }

    Ok(())
}
