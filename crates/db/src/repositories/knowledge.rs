use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use tracing::warn;

use leadwise_core::domain::knowledge::{rank_nearest, ChunkId, KnowledgeChunk, RetrievedChunk};

use super::{format_timestamp, KnowledgeRepository, RepositoryError};
use crate::DbPool;

/// Chunk store with in-process cosine ranking over little-endian f32 blobs.
pub struct SqlKnowledgeRepository {
    pool: DbPool,
}

impl SqlKnowledgeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl KnowledgeRepository for SqlKnowledgeRepository {
    async fn upsert_chunks(
        &self,
        chunks: &[KnowledgeChunk],
        now: DateTime<Utc>,
    ) -> Result<usize, RepositoryError> {
        let updated_at = format_timestamp(now);
        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            let dimensions = i64::try_from(chunk.embedding.len()).map_err(|_| {
                RepositoryError::Decode(format!("embedding too large for chunk {}", chunk.id.0))
            })?;
            sqlx::query(
                "INSERT INTO kb_chunks (id, source_url, title, content, embedding, dimensions, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    source_url = excluded.source_url,
                    title = excluded.title,
                    content = excluded.content,
                    embedding = excluded.embedding,
                    dimensions = excluded.dimensions,
                    updated_at = excluded.updated_at",
            )
            .bind(&chunk.id.0)
            .bind(&chunk.source_url)
            .bind(&chunk.title)
            .bind(&chunk.content)
            .bind(encode_f32_embedding_blob(&chunk.embedding))
            .bind(dimensions)
            .bind(&updated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(chunks.len())
    }

    async fn nearest(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, RepositoryError> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let dimensions = i64::try_from(query.len())
            .map_err(|_| RepositoryError::Decode("query embedding too large".to_string()))?;

        let rows = match sqlx::query(
            "SELECT id, source_url, title, content, embedding, dimensions
             FROM kb_chunks
             WHERE dimensions = ?",
        )
        .bind(dimensions)
        .fetch_all(&self.pool)
        .await
        {
            Ok(rows) => rows,
            Err(error) if is_missing_table(&error) => {
                warn!(
                    event_name = "knowledge.store.unavailable",
                    error = %error,
                    "knowledge table is missing; retrieval returns no chunks"
                );
                return Ok(Vec::new());
            }
            Err(error) => return Err(error.into()),
        };

        let candidates = rows.into_iter().map(chunk_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(rank_nearest(query, candidates, k))
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM kb_chunks")
            .fetch_one(&self.pool)
            .await
        {
            Ok(count) => Ok(u64::try_from(count).unwrap_or_default()),
            Err(error) if is_missing_table(&error) => Ok(0),
            Err(error) => Err(error.into()),
        }
    }
}

fn is_missing_table(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .is_some_and(|database_error| database_error.message().contains("no such table"))
}

fn chunk_from_row(row: SqliteRow) -> Result<KnowledgeChunk, RepositoryError> {
    let dimensions = row.try_get::<i64, _>("dimensions")?;
    let dimensions = usize::try_from(dimensions)
        .map_err(|_| RepositoryError::Decode(format!("invalid dimensions `{dimensions}`")))?;
    let blob = row.try_get::<Vec<u8>, _>("embedding")?;

    Ok(KnowledgeChunk {
        id: ChunkId(row.try_get("id")?),
        source_url: row.try_get("source_url")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        embedding: decode_f32_embedding_blob(&blob, dimensions)?,
    })
}

fn encode_f32_embedding_blob(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(vector));
    for &value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_f32_embedding_blob(blob: &[u8], dimensions: usize) -> Result<Vec<f32>, RepositoryError> {
    let expected_len = dimensions.saturating_mul(std::mem::size_of::<f32>());
    if blob.len() != expected_len {
        return Err(RepositoryError::Decode(format!(
            "invalid embedding byte length: expected {expected_len}, got {}",
            blob.len()
        )));
    }

    let mut out = Vec::with_capacity(dimensions);
    for chunk in blob.chunks_exact(4) {
        let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if !value.is_finite() {
            return Err(RepositoryError::Decode("embedding contains non-finite values".to_string()));
        }
        out.push(value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use leadwise_core::domain::knowledge::{ChunkId, KnowledgeChunk};

    use super::{decode_f32_embedding_blob, encode_f32_embedding_blob, SqlKnowledgeRepository};
    use crate::repositories::KnowledgeRepository;
    use crate::{connect_with_settings, migrations, DbPool};

    fn chunk(url: &str, ordinal: usize, content: &str, embedding: Vec<f32>) -> KnowledgeChunk {
        KnowledgeChunk {
            id: ChunkId::derive(url, ordinal),
            source_url: url.to_string(),
            title: "Цены".to_string(),
            content: content.to_string(),
            embedding,
        }
    }

    #[tokio::test]
    async fn reingesting_same_ids_does_not_duplicate_rows() {
        let pool = setup_pool().await;
        let repo = SqlKnowledgeRepository::new(pool.clone());
        let url = "https://example.com/pricing";

        repo.upsert_chunks(&[chunk(url, 0, "старый текст", vec![1.0, 0.0])], Utc::now())
            .await
            .expect("first ingest");
        repo.upsert_chunks(&[chunk(url, 0, "новый текст", vec![0.0, 1.0])], Utc::now())
            .await
            .expect("second ingest");

        assert_eq!(repo.count().await.expect("count"), 1);
        let nearest = repo.nearest(&[0.0, 1.0], 6).await.expect("search");
        assert_eq!(nearest[0].content, "новый текст");
        assert!(nearest[0].distance.abs() < 1e-6);

        pool.close().await;
    }

    #[tokio::test]
    async fn nearest_orders_ascending_and_limits_to_k() {
        let pool = setup_pool().await;
        let repo = SqlKnowledgeRepository::new(pool.clone());
        let url = "https://example.com/services";
        repo.upsert_chunks(
            &[
                chunk(url, 0, "боты", vec![1.0, 0.0, 0.0]),
                chunk(url, 1, "сайты", vec![0.7, 0.7, 0.0]),
                chunk(url, 2, "автоматизация", vec![0.0, 0.0, 1.0]),
            ],
            Utc::now(),
        )
        .await
        .expect("ingest");

        let nearest = repo.nearest(&[1.0, 0.1, 0.0], 2).await.expect("search");

        let contents = nearest.iter().map(|item| item.content.as_str()).collect::<Vec<_>>();
        assert_eq!(contents, vec!["боты", "сайты"]);
        assert!(nearest[0].distance <= nearest[1].distance);

        pool.close().await;
    }

    #[tokio::test]
    async fn missing_table_yields_empty_results() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        let repo = SqlKnowledgeRepository::new(pool.clone());

        assert!(repo.nearest(&[1.0, 0.0], 6).await.expect("search").is_empty());
        assert_eq!(repo.count().await.expect("count"), 0);

        pool.close().await;
    }

    #[test]
    fn embedding_blob_rejects_wrong_length() {
        let blob = encode_f32_embedding_blob(&[0.25, -1.5]);

        assert_eq!(blob.len(), 8);
        assert_eq!(decode_f32_embedding_blob(&blob, 2).expect("decode"), vec![0.25, -1.5]);
        assert!(decode_f32_embedding_blob(&blob, 3).is_err());
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }
}
