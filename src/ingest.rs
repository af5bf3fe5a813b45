//! Upload pipeline: extract → chunk → embed → store.
//!
//! A batch of uploaded files is processed as a unit. Any file that cannot
//! be read fails the whole batch before anything is embedded, and the
//! prepared documents are written in a single transaction.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::{self, Embedder};
use crate::extract::{self, ExtractError};
use crate::models::{NewDocument, UploadedFile};
use crate::store::DocumentStore;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("No files were provided.")]
    NoFiles,
    #[error("Cannot decode '{filename}'.")]
    Decode { filename: String },
    #[error("Cannot extract text from '{filename}': {source}")]
    Extract {
        filename: String,
        #[source]
        source: ExtractError,
    },
    #[error("embedding failed: {0}")]
    Embedding(#[source] anyhow::Error),
    #[error("storage failed: {0}")]
    Storage(#[source] anyhow::Error),
    #[error("extraction task failed: {0}")]
    Task(#[source] tokio::task::JoinError),
}

/// One stored document of an ingest batch.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IngestedDocument {
    pub id: String,
    pub filename: String,
    pub chunks: usize,
}

#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub documents: Vec<IngestedDocument>,
}

impl IngestReport {
    pub fn chunk_count(&self) -> usize {
        self.documents.iter().map(|d| d.chunks).sum()
    }
}

/// Turn a batch of uploaded files into stored, embedded documents.
pub async fn ingest_files(
    store: &DocumentStore,
    embedder: &dyn Embedder,
    config: &Config,
    files: Vec<UploadedFile>,
) -> Result<IngestReport, IngestError> {
    if files.is_empty() {
        return Err(IngestError::NoFiles);
    }

    // PDF and Office parsing is CPU-bound; keep it off the async workers.
    let max_tokens = config.chunking.max_tokens;
    let model = embedder.model_name().to_string();
    let mut docs = tokio::task::spawn_blocking(move || prepare_documents(files, max_tokens, &model))
        .await
        .map_err(IngestError::Task)??;

    let texts: Vec<String> = docs
        .iter()
        .flat_map(|d| d.chunks.iter().map(|c| c.text.clone()))
        .collect();
    let mut vectors =
        embedding::embed_batched(embedder, &texts, config.embedding.batch_size)
            .await
            .map_err(IngestError::Embedding)?
            .into_iter();
    for doc in &mut docs {
        doc.vectors = vectors.by_ref().take(doc.chunks.len()).collect();
    }
    info!(chunks = texts.len(), model = embedder.model_name(), "embeddings created");

    store
        .insert_documents(&docs)
        .await
        .map_err(IngestError::Storage)?;

    let report = IngestReport {
        documents: docs
            .iter()
            .map(|d| IngestedDocument {
                id: d.id.clone(),
                filename: d.filename.clone(),
                chunks: d.chunks.len(),
            })
            .collect(),
    };
    info!(
        documents = report.documents.len(),
        chunks = report.chunk_count(),
        collection = store.collection(),
        "documents stored"
    );
    Ok(report)
}

/// Extract and chunk every file. Vectors are filled in later.
fn prepare_documents(
    files: Vec<UploadedFile>,
    max_tokens: usize,
    model: &str,
) -> Result<Vec<NewDocument>, IngestError> {
    let mut docs = Vec::with_capacity(files.len());
    for file in files {
        let format = extract::detect_format(&file.filename, file.content_type.as_deref());
        let body = extract::extract_text(&file.bytes, format).map_err(|e| match e {
            ExtractError::InvalidUtf8(_) => IngestError::Decode {
                filename: file.filename.clone(),
            },
            other => IngestError::Extract {
                filename: file.filename.clone(),
                source: other,
            },
        })?;
        info!(filename = %file.filename, bytes = file.bytes.len(), chars = body.len(), "file read");

        let id = Uuid::new_v4().to_string();
        let chunks = chunk_text(&id, &body, max_tokens);
        docs.push(NewDocument {
            id,
            filename: file.filename,
            content_type: format.mime().to_string(),
            body,
            created_at: Utc::now(),
            chunks,
            vectors: Vec::new(),
            model: model.to_string(),
        });
    }
    Ok(docs)
}

/// CLI entry point for `docsearch ingest <paths…>`.
pub async fn run_ingest(
    config: &Config,
    store: &DocumentStore,
    embedder: &dyn Embedder,
    paths: &[PathBuf],
) -> Result<()> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        files.push(UploadedFile {
            filename,
            content_type: None,
            bytes,
        });
    }

    let report = ingest_files(store, embedder, config, files).await?;

    println!("ingest");
    for doc in &report.documents {
        println!("  {}  {} ({} chunks)", doc.id, doc.filename, doc.chunks);
    }
    println!("  documents: {}", report.documents.len());
    println!("  chunks: {}", report.chunk_count());
    Ok(())
}
