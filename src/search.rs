//! Semantic query over stored documents.
//!
//! The query is embedded with the active model and compared against every
//! chunk vector of the collection by squared L2 distance. Chunk distances
//! are folded into document scores with MIN, so a document ranks by its
//! single best passage.

use std::collections::HashMap;

use anyhow::Result;
use thiserror::Error;
use tracing::debug;

use crate::config::{Config, RetrievalConfig};
use crate::embedding::{self, Embedder};
use crate::models::QueryMatch;
use crate::store::{ChunkCandidate, DocumentStore};

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("query_text must not be empty")]
    EmptyQuery,
    #[error("n_results must be between 1 and {max}, got {got}")]
    InvalidLimit { got: usize, max: usize },
    #[error("embedding failed: {0}")]
    Embedding(#[source] anyhow::Error),
    #[error("storage failed: {0}")]
    Storage(#[source] anyhow::Error),
}

/// Best chunk of one document.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedDocument {
    pub document_id: String,
    pub distance: f64,
    pub excerpt: String,
}

/// Fold chunk candidates into per-document scores and keep the closest
/// `limit`. Ties on distance are broken by document id.
pub fn rank_documents(candidates: Vec<ChunkCandidate>, limit: usize) -> Vec<RankedDocument> {
    let mut best: HashMap<String, RankedDocument> = HashMap::new();

    for cand in candidates {
        match best.get_mut(&cand.document_id) {
            Some(entry) if entry.distance <= cand.distance => {}
            Some(entry) => {
                entry.distance = cand.distance;
                entry.excerpt = cand.text;
            }
            None => {
                best.insert(
                    cand.document_id.clone(),
                    RankedDocument {
                        document_id: cand.document_id,
                        distance: cand.distance,
                        excerpt: cand.text,
                    },
                );
            }
        }
    }

    let mut ranked: Vec<RankedDocument> = best.into_values().collect();
    ranked.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.document_id.cmp(&b.document_id))
    });
    ranked.truncate(limit);
    ranked
}

/// Embed `query_text` and return the `n_results` closest documents.
pub async fn query_documents(
    store: &DocumentStore,
    embedder: &dyn Embedder,
    retrieval: &RetrievalConfig,
    query_text: &str,
    n_results: Option<usize>,
) -> Result<Vec<QueryMatch>, SearchError> {
    if query_text.trim().is_empty() {
        return Err(SearchError::EmptyQuery);
    }
    let limit = n_results.unwrap_or(retrieval.top_k);
    if limit == 0 || limit > retrieval.max_top_k {
        return Err(SearchError::InvalidLimit {
            got: limit,
            max: retrieval.max_top_k,
        });
    }

    let query_vec = embedding::embed_query(embedder, query_text)
        .await
        .map_err(SearchError::Embedding)?;
    let candidates = store
        .vector_candidates(embedder.model_name(), &query_vec)
        .await
        .map_err(SearchError::Storage)?;
    debug!(candidates = candidates.len(), limit, "scored chunk vectors");

    let mut matches = Vec::new();
    for ranked in rank_documents(candidates, limit) {
        let Some(doc) = store
            .get_document(&ranked.document_id)
            .await
            .map_err(SearchError::Storage)?
        else {
            continue;
        };

        let filename = if doc.filename.is_empty() {
            "unknown".to_string()
        } else {
            doc.filename
        };
        matches.push(QueryMatch {
            id: doc.id,
            filename,
            score: ranked.distance,
            text: doc.text,
            excerpt: ranked.excerpt,
        });
    }

    Ok(matches)
}

/// CLI entry point for `docsearch query`.
pub async fn run_query(
    config: &Config,
    store: &DocumentStore,
    embedder: &dyn Embedder,
    query: &str,
    limit: Option<usize>,
) -> Result<()> {
    let matches = query_documents(store, embedder, &config.retrieval, query, limit).await?;

    if matches.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, m) in matches.iter().enumerate() {
        println!("{}. [{:.4}] {}", i + 1, m.score, m.filename);
        println!(
            "    excerpt: \"{}\"",
            m.excerpt.replace('\n', " ").trim()
        );
        println!("    id: {}", m.id);
        println!();
    }
    Ok(())
}

/// CLI entry point for `docsearch list`.
pub async fn run_list(store: &DocumentStore) -> Result<()> {
    let docs = store.list_documents().await?;
    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }

    for doc in &docs {
        println!("{}  {}  {}  ({} chars)", doc.id, doc.created_at, doc.filename, doc.text.chars().count());
    }
    println!();
    println!("{} document(s) in collection '{}'", docs.len(), store.collection());
    Ok(())
}
