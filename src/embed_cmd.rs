//! `docsearch embed rebuild`: re-embed every stored chunk.
//!
//! Used after switching `[embedding]` model or provider. Queries only
//! consider vectors written by the active model, so documents stay
//! invisible to search until they have been rebuilt.

use anyhow::Result;
use tracing::info;

use crate::embedding::{self, Embedder};
use crate::store::{ChunkRow, DocumentStore};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RebuildStats {
    pub total: usize,
    pub embedded: usize,
}

/// Embed all chunks of the collection with `embedder`, replacing their
/// vectors batch by batch.
pub async fn rebuild_embeddings(
    store: &DocumentStore,
    embedder: &dyn Embedder,
    batch_size: usize,
) -> Result<RebuildStats> {
    let chunks = store.all_chunks().await?;
    let mut stats = RebuildStats {
        total: chunks.len(),
        embedded: 0,
    };

    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedding::embed_batched(embedder, &texts, batch_size).await?;
        let pairs: Vec<(ChunkRow, Vec<f32>)> = batch.iter().cloned().zip(vectors).collect();
        store.replace_vectors(embedder.model_name(), &pairs).await?;
        stats.embedded += pairs.len();
        info!(embedded = stats.embedded, total = stats.total, "rebuild progress");
    }

    Ok(stats)
}

pub async fn run_embed_rebuild(
    store: &DocumentStore,
    embedder: &dyn Embedder,
    batch_size: usize,
) -> Result<()> {
    let stats = rebuild_embeddings(store, embedder, batch_size).await?;

    println!("embed rebuild");
    if stats.total == 0 {
        println!("  no chunks to embed");
        return Ok(());
    }
    println!("  model: {}", embedder.model_name());
    println!("  total chunks: {}", stats.total);
    println!("  embedded: {}", stats.embedded);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DbConfig};
    use crate::embedding::WordHashEmbedder;
    use crate::ingest::ingest_files;
    use crate::models::UploadedFile;
    use crate::search::query_documents;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct OtherModel(WordHashEmbedder);

    #[async_trait]
    impl Embedder for OtherModel {
        fn model_name(&self) -> &str {
            "other-model"
        }
        fn dims(&self) -> usize {
            self.0.dims
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.0.embed(texts).await
        }
    }

    #[tokio::test]
    async fn test_rebuild_makes_documents_searchable_under_new_model() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.db = DbConfig {
            path: tmp.path().join("rebuild.sqlite"),
            collection: "text_docs".to_string(),
        };
        let store = DocumentStore::open(&config.db).await.unwrap();

        let files = vec![UploadedFile {
            filename: "sea.txt".to_string(),
            content_type: None,
            bytes: b"ocean waves tide".to_vec(),
        }];
        ingest_files(&store, &WordHashEmbedder { dims: 32 }, &config, files)
            .await
            .unwrap();

        let other = OtherModel(WordHashEmbedder { dims: 16 });
        let before = query_documents(&store, &other, &config.retrieval, "ocean", None)
            .await
            .unwrap();
        assert!(before.is_empty());

        let stats = rebuild_embeddings(&store, &other, 2).await.unwrap();
        assert_eq!(stats, RebuildStats { total: 1, embedded: 1 });

        let after = query_documents(&store, &other, &config.retrieval, "ocean", None)
            .await
            .unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].filename, "sea.txt");
    }

    #[tokio::test]
    async fn test_rebuild_of_empty_store_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        let db = DbConfig {
            path: tmp.path().join("empty.sqlite"),
            collection: "text_docs".to_string(),
        };
        let store = DocumentStore::open(&db).await.unwrap();
        let stats = rebuild_embeddings(&store, &WordHashEmbedder { dims: 8 }, 4)
            .await
            .unwrap();
        assert_eq!(stats, RebuildStats::default());
    }
}
