//! PostgreSQL chunk store
//!
//! Chunk writes are idempotent upserts on `chunk_id`, which is itself
//! deterministic from `(session_id, chunk_index)` - re-running a session
//! rewrites the same rows.

use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::PgRow;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{DatabaseErrorExt, DatabaseResult};
use crate::models::{ChunkEntities, ChunkRecord, EmbeddingStatus};
use crate::pool::PoolManager;
use crate::traits::ChunkStore;

/// Chunk store over separated connection pools
pub struct PgChunkStore {
    pools: PoolManager,
}

impl PgChunkStore {
    pub const fn new(pools: PoolManager) -> Self {
        Self { pools }
    }
}

fn chunk_from_row(row: &PgRow) -> ChunkRecord {
    let main_topics: serde_json::Value = row.get("main_topics");
    let emotions: serde_json::Value = row.get("emotions");
    let key_entities: serde_json::Value = row.get("key_entities");

    ChunkRecord {
        chunk_id: row.get("chunk_id"),
        session_id: row.get("session_id"),
        url: row.get("url"),
        title: row.get("title"),
        chunk_index: row.get("chunk_index"),
        chunk_text: row.get("chunk_text"),
        contextual_summary: row.get("contextual_summary"),
        document_summary: row.get("document_summary"),
        embedding_status: row.get::<String, _>("embedding_status").into(),
        processing_status: row.get::<String, _>("processing_status").into(),
        sentiment: row.get("sentiment"),
        category: row.get("category"),
        content_type: row.get("content_type"),
        technical_level: row.get("technical_level"),
        main_topics: serde_json::from_value(main_topics).unwrap_or_default(),
        key_concepts: row.get("key_concepts"),
        emotions: serde_json::from_value(emotions).unwrap_or_default(),
        tags: row.get("tags"),
        key_entities: serde_json::from_value::<ChunkEntities>(key_entities).unwrap_or_default(),
        uses_contextual_embedding: row.get("uses_contextual_embedding"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl ChunkStore for PgChunkStore {
    async fn upsert_chunk(&self, chunk: &ChunkRecord) -> DatabaseResult<()> {
        let main_topics = serde_json::to_value(&chunk.main_topics)?;
        let emotions = serde_json::to_value(&chunk.emotions)?;
        let key_entities = serde_json::to_value(&chunk.key_entities)?;

        sqlx::query(
            r"
            INSERT INTO chunks (
                chunk_id, session_id, url, title, chunk_index, chunk_text,
                contextual_summary, document_summary, embedding_status,
                processing_status, sentiment, category, content_type,
                technical_level, main_topics, key_concepts, emotions, tags,
                key_entities, uses_contextual_embedding
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            ON CONFLICT (chunk_id) DO UPDATE SET
                url = EXCLUDED.url,
                title = EXCLUDED.title,
                chunk_text = EXCLUDED.chunk_text,
                contextual_summary = EXCLUDED.contextual_summary,
                document_summary = EXCLUDED.document_summary,
                embedding_status = EXCLUDED.embedding_status,
                processing_status = EXCLUDED.processing_status,
                sentiment = EXCLUDED.sentiment,
                category = EXCLUDED.category,
                content_type = EXCLUDED.content_type,
                technical_level = EXCLUDED.technical_level,
                main_topics = EXCLUDED.main_topics,
                key_concepts = EXCLUDED.key_concepts,
                emotions = EXCLUDED.emotions,
                tags = EXCLUDED.tags,
                key_entities = EXCLUDED.key_entities,
                uses_contextual_embedding = EXCLUDED.uses_contextual_embedding,
                updated_at = NOW()
            ",
        )
        .bind(chunk.chunk_id)
        .bind(chunk.session_id)
        .bind(&chunk.url)
        .bind(&chunk.title)
        .bind(chunk.chunk_index)
        .bind(&chunk.chunk_text)
        .bind(&chunk.contextual_summary)
        .bind(&chunk.document_summary)
        .bind(chunk.embedding_status.to_string())
        .bind(chunk.processing_status.to_string())
        .bind(&chunk.sentiment)
        .bind(&chunk.category)
        .bind(&chunk.content_type)
        .bind(&chunk.technical_level)
        .bind(main_topics)
        .bind(&chunk.key_concepts)
        .bind(emotions)
        .bind(&chunk.tags)
        .bind(key_entities)
        .bind(chunk.uses_contextual_embedding)
        .execute(self.pools.write_pool())
        .await
        .map_db_err("upsert_chunk")?;

        Ok(())
    }

    async fn set_embedding_status(
        &self,
        chunk_id: &Uuid,
        status: EmbeddingStatus,
    ) -> DatabaseResult<()> {
        sqlx::query(
            r"
            UPDATE chunks
            SET embedding_status = $2, updated_at = NOW()
            WHERE chunk_id = $1
            ",
        )
        .bind(chunk_id)
        .bind(status.to_string())
        .execute(self.pools.write_pool())
        .await
        .map_db_err("set_embedding_status")?;

        Ok(())
    }

    async fn get_session_chunks(&self, session_id: &Uuid) -> DatabaseResult<Vec<ChunkRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM chunks WHERE session_id = $1 ORDER BY chunk_index ASC",
        )
        .bind(session_id)
        .fetch_all(self.pools.read_pool())
        .await
        .map_db_err("get_session_chunks")?;

        Ok(rows.iter().map(chunk_from_row).collect())
    }

    async fn count_session_chunks(&self, session_id: &Uuid) -> DatabaseResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM chunks WHERE session_id = $1")
            .bind(session_id)
            .fetch_one(self.pools.read_pool())
            .await
            .map_db_err("count_session_chunks")?;

        Ok(row.get("count"))
    }

    async fn find_orphaned_chunks(&self, limit: i64) -> DatabaseResult<Vec<Uuid>> {
        let rows = sqlx::query(
            r"
            SELECT c.chunk_id
            FROM chunks c
            LEFT JOIN sessions s ON s.session_id = c.session_id
            WHERE s.session_id IS NULL
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(self.pools.read_pool())
        .await
        .map_db_err("find_orphaned_chunks")?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.get("chunk_id")).collect();
        if !ids.is_empty() {
            warn!(count = ids.len(), "Found orphaned chunks");
        }
        Ok(ids)
    }

    async fn mark_orphaned_chunks(
        &self,
        chunk_ids: &[Uuid],
        status: EmbeddingStatus,
    ) -> DatabaseResult<u64> {
        if chunk_ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pools
            .write_pool()
            .begin()
            .await
            .map_db_err("mark_orphaned_chunks_begin")?;

        let result = sqlx::query(
            r"
            UPDATE chunks
            SET embedding_status = $2, updated_at = NOW()
            WHERE chunk_id = ANY($1)
            ",
        )
        .bind(chunk_ids)
        .bind(status.to_string())
        .execute(&mut *tx)
        .await
        .map_db_err("mark_orphaned_chunks")?;

        tx.commit().await.map_db_err("mark_orphaned_chunks_commit")?;

        info!(
            count = result.rows_affected(),
            status = %status,
            "Marked orphaned chunks"
        );
        Ok(result.rows_affected())
    }
}
