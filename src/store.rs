//! Vector store backends for the application.
//!
//! The in-memory store lives in the core crate; this module adds the
//! SQLite-backed [`SqliteVectorStore`] and [`create_store`], which picks
//! one according to `[store]`.
//!
//! The SQLite schema keeps one row per chunk:
//!
//! | Column | Contents |
//! |--------|----------|
//! | `id` | chunk UUID (primary key) |
//! | `document_id`, `chunk_index` | position within the source document |
//! | `tenant` | the `companyCode` tag, indexed for filtered search |
//! | `text`, `hash` | chunk text and its SHA-256 |
//! | `metadata_json` | full metadata map |
//! | `embedding` | little-endian `f32` BLOB |
//!
//! Filtering happens in SQL; cosine ranking happens in process.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use tenant_rag_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use tenant_rag_core::models::{Chunk, EmbeddedChunk, Metadata, ScoredChunk, TENANT_KEY};
use tenant_rag_core::store::memory::InMemoryVectorStore;
use tenant_rag_core::store::{ensure_tenant_tagged, rank, SearchQuery, VectorStore};

use crate::config::StoreConfig;

/// Build the store selected by `store.backend`.
pub async fn create_store(config: &StoreConfig) -> Result<Arc<dyn VectorStore>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryVectorStore::new())),
        "sqlite" => Ok(Arc::new(SqliteVectorStore::open(&config.path).await?)),
        other => anyhow::bail!("Unknown store backend: {}", other),
    }
}

pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    /// Open (creating if missing) the database at `path` and ensure the schema.
    pub async fn open(path: &std::path::Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open vector store at {}", path.display()))?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::info!(path = %path.display(), "sqlite vector store ready");
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                tenant TEXT NOT NULL,
                text TEXT NOT NULL,
                hash TEXT NOT NULL,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                embedding BLOB NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_tenant ON chunks(tenant)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn add(&self, record: &EmbeddedChunk) -> Result<()> {
        ensure_tenant_tagged(&record.chunk)?;
        let chunk = &record.chunk;
        let tenant = chunk.tenant().unwrap_or_default();

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO chunks
                (id, document_id, chunk_index, tenant, text, hash, metadata_json, embedding, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(tenant)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .bind(serde_json::to_string(&chunk.metadata)?)
        .bind(vec_to_blob(&record.embedding))
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to store chunk {}", chunk.id))?;
        Ok(())
    }

    async fn similarity_search(&self, query: &SearchQuery<'_>) -> Result<Vec<ScoredChunk>> {
        if query.top_k == 0 {
            return Ok(Vec::new());
        }

        let mut sql = String::from(
            "SELECT id, document_id, chunk_index, text, hash, metadata_json, embedding FROM chunks",
        );
        let mut binds: Vec<String> = Vec::new();
        for (i, (key, value)) in query.filter.conditions().iter().enumerate() {
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            if key == TENANT_KEY {
                sql.push_str("tenant = ?");
            } else {
                sql.push_str("json_extract(metadata_json, ?) = ?");
                binds.push(json_path(key));
            }
            binds.push(value.clone());
        }

        let mut q = sqlx::query(&sql);
        for value in &binds {
            q = q.bind(value.as_str());
        }
        let rows = q.fetch_all(&self.pool).await.context("vector search failed")?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            let metadata_json: String = row.get("metadata_json");
            let metadata: Metadata = serde_json::from_str(&metadata_json)
                .with_context(|| "corrupt metadata_json in chunks table")?;
            let blob: Vec<u8> = row.get("embedding");
            let chunk = Chunk {
                id: row.get("id"),
                document_id: row.get("document_id"),
                chunk_index: row.get("chunk_index"),
                text: row.get("text"),
                hash: row.get("hash"),
                metadata,
            };
            candidates.push(ScoredChunk {
                score: cosine_similarity(query.vector, &blob_to_vec(&blob)),
                chunk,
            });
        }
        Ok(rank(candidates, query.top_k, query.threshold))
    }

    async fn len(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

/// SQLite JSON path selecting a top-level key.
fn json_path(key: &str) -> String {
    format!("$.\"{}\"", key.replace('"', "\\\""))
}
