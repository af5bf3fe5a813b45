//! # docsearch CLI
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docsearch init` | Create the SQLite database and run schema migrations |
//! | `docsearch serve` | Start the HTTP API |
//! | `docsearch ingest <paths…>` | Extract, embed and store local files |
//! | `docsearch query "<text>"` | Print the closest documents |
//! | `docsearch list` | Print every stored document |
//! | `docsearch embed rebuild` | Re-embed all chunks with the configured model |
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (default `docsearch=info,tower_http=info`).

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use docsearch::config::{self, Config};
use docsearch::embedding::{self, Embedder};
use docsearch::store::DocumentStore;
use docsearch::{embed_cmd, ingest, search, server};

#[derive(Parser)]
#[command(
    name = "docsearch",
    about = "Upload documents, embed them, and query them by meaning",
    version
)]
struct Cli {
    /// Path to a TOML configuration file. Built-in defaults are used when
    /// omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Start the HTTP server.
    Serve {
        /// Override `[server].bind`.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Ingest local files as one batch.
    Ingest {
        /// Files to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Print the documents closest to a query.
    Query {
        /// The query text.
        query: String,

        /// Number of documents to return (defaults to `[retrieval].top_k`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// List stored documents.
    List,

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Re-embed every chunk with the configured model.
    ///
    /// Run after changing `[embedding]` so existing documents become
    /// searchable again.
    Rebuild {
        /// Override the batch size from config.
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("docsearch=info,tower_http=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => {
            let store = DocumentStore::open(&cfg.db).await?;
            store.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                cfg.server.bind = bind;
            }
            server::run_server(&cfg).await?;
        }
        Commands::Ingest { paths } => {
            let store = DocumentStore::open(&cfg.db).await?;
            let embedder = load_embedder(&cfg).await?;
            ingest::run_ingest(&cfg, &store, embedder.as_ref(), &paths).await?;
            store.close().await;
        }
        Commands::Query { query, limit } => {
            let store = DocumentStore::open(&cfg.db).await?;
            let embedder = load_embedder(&cfg).await?;
            search::run_query(&cfg, &store, embedder.as_ref(), &query, limit).await?;
            store.close().await;
        }
        Commands::List => {
            let store = DocumentStore::open(&cfg.db).await?;
            search::run_list(&store).await?;
            store.close().await;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Rebuild { batch_size } => {
                let store = DocumentStore::open(&cfg.db).await?;
                let embedder = load_embedder(&cfg).await?;
                let batch_size = batch_size.unwrap_or(cfg.embedding.batch_size);
                embed_cmd::run_embed_rebuild(&store, embedder.as_ref(), batch_size).await?;
                store.close().await;
            }
        },
    }

    Ok(())
}

/// Model loading may download weights and run ONNX session setup, so it
/// happens off the async workers.
async fn load_embedder(cfg: &Config) -> anyhow::Result<Arc<dyn Embedder>> {
    let embedding_config = cfg.embedding.clone();
    tokio::task::spawn_blocking(move || embedding::create_embedder(&embedding_config)).await?
}
