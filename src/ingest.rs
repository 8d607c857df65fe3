//! Ingestion pipeline: upload → parse → split → tag → embed → store.
//!
//! # Failure semantics
//!
//! - A missing or invalid tenant is rejected before the document is read.
//! - A parser failure aborts before any store write.
//! - Chunks are embedded and written one at a time, in order. The first
//!   embedding or write failure stops ingestion with
//!   [`RagError::Storage`], whose `stored` count says how many chunks are
//!   already visible to queries. Nothing is rolled back.
//!
//! Document ids are derived from the tenant, file name and content hash,
//! so re-uploading the same file overwrites its chunks instead of
//! duplicating them. Retrying after a partial failure is therefore safe.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use tenant_rag_core::chunk::{split_document, SplitOptions};
use tenant_rag_core::embedding::Embedder;
use tenant_rag_core::models::{EmbeddedChunk, CONTENT_TYPE_KEY, SOURCE_KEY};
use tenant_rag_core::store::VectorStore;
use tenant_rag_core::tenant::{tag_chunks, TenantId};

use crate::config::ChunkingConfig;
use crate::error::{RagError, Result};
use crate::extract::{detect_content_type, DocumentParser};

/// File name recorded for uploads that arrive without one.
pub const UNNAMED_SOURCE: &str = "upload";

/// A raw uploaded document. Lives for one ingestion request.
#[derive(Debug, Clone)]
pub struct Document {
    pub bytes: Vec<u8>,
    pub filename: Option<String>,
    /// Content type declared by the client, if any.
    pub content_type: Option<String>,
}

impl Document {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            filename: None,
            content_type: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// Outcome of a successful ingestion.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub document_id: String,
    pub tenant: TenantId,
    pub source: String,
    pub content_type: String,
    pub chunks: usize,
    /// Chunks beyond `chunking.max_chunks` that were not stored.
    pub dropped_chunks: usize,
}

impl IngestReport {
    /// Plain-text confirmation returned to the uploader.
    pub fn confirmation(&self) -> String {
        let mut message = format!(
            "Its done! Stored {} chunk{} from {} for companyCode {}.",
            self.chunks,
            if self.chunks == 1 { "" } else { "s" },
            self.source,
            self.tenant
        );
        if self.dropped_chunks > 0 {
            message.push_str(&format!(
                " {} more chunk{} exceeded the per-document limit and were skipped.",
                self.dropped_chunks,
                if self.dropped_chunks == 1 { "" } else { "s" }
            ));
        }
        message
    }
}

pub struct IngestPipeline {
    parser: Arc<dyn DocumentParser>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    split: SplitOptions,
}

impl IngestPipeline {
    pub fn new(
        parser: Arc<dyn DocumentParser>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        chunking: &ChunkingConfig,
    ) -> Self {
        Self {
            parser,
            embedder,
            store,
            split: SplitOptions {
                max_tokens: chunking.max_tokens,
                min_chunk_chars: chunking.min_chunk_chars,
                max_chunks: chunking.max_chunks,
            },
        }
    }

    /// Ingest `document` for the tenant named by `company_code`.
    pub async fn ingest(&self, document: Document, company_code: Option<&str>) -> Result<IngestReport> {
        let tenant = TenantId::parse_opt(company_code)?;
        let source = document
            .filename
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .unwrap_or(UNNAMED_SOURCE)
            .to_string();
        let content_type = detect_content_type(
            document.content_type.as_deref(),
            Some(source.as_str()),
            &document.bytes,
        );
        let document_id = document_id(&tenant, &source, &document.bytes);

        tracing::info!(
            tenant = %tenant,
            source = %source,
            content_type = %content_type,
            bytes = document.bytes.len(),
            "ingestion started"
        );

        let text = self.parse(document.bytes, content_type.clone()).await?;

        let split = split_document(&document_id, &text, &self.split);
        if split.truncated > 0 {
            tracing::warn!(
                tenant = %tenant,
                source = %source,
                kept = split.chunks.len(),
                dropped = split.truncated,
                max_chunks = self.split.max_chunks,
                "document truncated to max_chunks"
            );
        }
        let dropped_chunks = split.truncated;

        let mut chunks = tag_chunks(split.chunks, &tenant);
        for chunk in &mut chunks {
            chunk.metadata.insert(SOURCE_KEY.to_string(), source.clone());
            chunk
                .metadata
                .insert(CONTENT_TYPE_KEY.to_string(), content_type.clone());
        }

        let total = chunks.len();
        for (stored, chunk) in chunks.into_iter().enumerate() {
            let chunk_id = chunk.id.clone();
            let result = match self.embedder.embed_one(&chunk.text).await {
                Ok(embedding) => self.store.add(&EmbeddedChunk { chunk, embedding }).await,
                Err(e) => Err(e.context("embedding failed")),
            };
            if let Err(e) = result {
                tracing::warn!(
                    tenant = %tenant,
                    source = %source,
                    chunk = %chunk_id,
                    stored,
                    failed = total - stored,
                    "ingestion stopped: {:#}",
                    e
                );
                return Err(RagError::Storage {
                    stored,
                    failed: total - stored,
                    message: format!("{:#}", e),
                });
            }
        }

        tracing::info!(
            tenant = %tenant,
            source = %source,
            chunks = total,
            store = self.store.name(),
            "ingestion finished"
        );

        Ok(IngestReport {
            document_id,
            tenant,
            source,
            content_type,
            chunks: total,
            dropped_chunks,
        })
    }

    /// Run the parser on the blocking pool.
    async fn parse(&self, bytes: Vec<u8>, content_type: String) -> Result<String> {
        let parser = Arc::clone(&self.parser);
        let parsed = tokio::task::spawn_blocking(move || parser.parse(&bytes, &content_type))
            .await
            .map_err(|e| RagError::UnsupportedDocument(format!("parser aborted: {}", e)))?;
        Ok(parsed?)
    }
}

/// Deterministic document id for one tenant's copy of one file.
fn document_id(tenant: &TenantId, source: &str, bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let name = format!("{}\u{0}{}\u{0}{:x}", tenant, source, digest);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}
