//! Core data types that flow through the ingest and query pipelines.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A file as received from a client, before text extraction.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// A fully prepared document, ready to be written in one transaction.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub chunks: Vec<Chunk>,
    /// One vector per entry of `chunks`, same order.
    pub vectors: Vec<Vec<f32>>,
    pub model: String,
}

/// A chunk of a document's body text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A document as read back from the store.
#[derive(Debug, Clone, Serialize)]
pub struct StoredDocument {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub created_at: String, // ISO8601
    pub text: String,
}

/// One ranked result of a query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryMatch {
    pub id: String,
    pub filename: String,
    /// Squared L2 distance between query and best chunk; lower is closer.
    pub score: f64,
    pub text: String,
    pub excerpt: String,
}
