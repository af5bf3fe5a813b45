//! SQLite-backed document and vector store.
//!
//! A [`DocumentStore`] is bound to one collection. Documents, their chunks
//! and the chunk vectors live in three tables (see [`crate::migrate`]).
//! Nearest-neighbour search is a brute-force squared L2 scan over the
//! vectors produced by the active model.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::DbConfig;
use crate::db;
use crate::embedding::{blob_to_vec, squared_l2_distance, vec_to_blob};
use crate::migrate;
use crate::models::{NewDocument, StoredDocument};

/// A chunk scored against a query vector.
#[derive(Debug, Clone)]
pub struct ChunkCandidate {
    pub chunk_id: String,
    pub document_id: String,
    /// Squared L2 distance to the query. Lower is closer.
    pub distance: f64,
    pub text: String,
}

/// A stored chunk, as needed to re-embed it.
#[derive(Debug, Clone)]
pub struct ChunkRow {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
}

#[derive(Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
    collection: String,
}

impl DocumentStore {
    /// Connect, run migrations, and bind to `config.collection`.
    pub async fn open(config: &DbConfig) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self {
            pool,
            collection: config.collection.clone(),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Write every document, chunk and vector of a batch in one
    /// transaction. Either the whole batch is stored or nothing is.
    pub async fn insert_documents(&self, docs: &[NewDocument]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for doc in docs {
            if doc.chunks.len() != doc.vectors.len() {
                anyhow::bail!(
                    "document {} has {} chunks but {} vectors",
                    doc.id,
                    doc.chunks.len(),
                    doc.vectors.len()
                );
            }

            sqlx::query(
                "INSERT INTO documents (id, collection, filename, content_type, body, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&doc.id)
            .bind(&self.collection)
            .bind(&doc.filename)
            .bind(&doc.content_type)
            .bind(&doc.body)
            .bind(doc.created_at.timestamp())
            .execute(&mut *tx)
            .await?;

            for (chunk, vector) in doc.chunks.iter().zip(doc.vectors.iter()) {
                sqlx::query(
                    "INSERT INTO chunks (id, document_id, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&chunk.id)
                .bind(&doc.id)
                .bind(chunk.chunk_index)
                .bind(&chunk.text)
                .bind(&chunk.hash)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    "INSERT INTO chunk_vectors (chunk_id, document_id, model, dims, embedding) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&chunk.id)
                .bind(&doc.id)
                .bind(&doc.model)
                .bind(vector.len() as i64)
                .bind(vec_to_blob(vector))
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Score every chunk vector produced by `model` against `query_vec`,
    /// closest first.
    pub async fn vector_candidates(
        &self,
        model: &str,
        query_vec: &[f32],
    ) -> Result<Vec<ChunkCandidate>> {
        let rows = sqlx::query(
            r#"
            SELECT cv.chunk_id, cv.document_id, cv.embedding, c.text
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            JOIN documents d ON d.id = cv.document_id
            WHERE d.collection = ? AND cv.model = ?
            "#,
        )
        .bind(&self.collection)
        .bind(model)
        .fetch_all(&self.pool)
        .await?;

        let mut candidates: Vec<ChunkCandidate> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                ChunkCandidate {
                    chunk_id: row.get("chunk_id"),
                    document_id: row.get("document_id"),
                    distance: squared_l2_distance(query_vec, &vec) as f64,
                    text: row.get("text"),
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        Ok(candidates)
    }

    /// All documents of the collection, oldest first.
    pub async fn list_documents(&self) -> Result<Vec<StoredDocument>> {
        let rows = sqlx::query(
            "SELECT id, filename, content_type, body, created_at FROM documents WHERE collection = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_document).collect())
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<StoredDocument>> {
        let row = sqlx::query(
            "SELECT id, filename, content_type, body, created_at FROM documents WHERE collection = ? AND id = ?",
        )
        .bind(&self.collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_document))
    }

    pub async fn count_documents(&self) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE collection = ?")
                .bind(&self.collection)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Every chunk of the collection, in document then chunk order.
    pub async fn all_chunks(&self) -> Result<Vec<ChunkRow>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id AS chunk_id, c.document_id, c.text
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.collection = ?
            ORDER BY d.created_at, c.document_id, c.chunk_index
            "#,
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ChunkRow {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                text: row.get("text"),
            })
            .collect())
    }

    /// Insert or overwrite the vectors of existing chunks.
    pub async fn replace_vectors(&self, model: &str, vectors: &[(ChunkRow, Vec<f32>)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (chunk, vector) in vectors {
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (chunk_id, document_id, model, dims, embedding)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    model = excluded.model,
                    dims = excluded.dims,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.document_id)
            .bind(model)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> StoredDocument {
    let created_at: i64 = row.get("created_at");
    StoredDocument {
        id: row.get("id"),
        filename: row.get("filename"),
        content_type: row.get("content_type"),
        created_at: format_ts_iso(created_at),
        text: row.get("body"),
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
