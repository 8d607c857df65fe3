//! Core data models shared by the ingestion and query pipelines.
//!
//! A [`Chunk`] is the unit of stored knowledge: a bounded slice of a
//! document's text plus a flat metadata map. Chunks are created by the
//! splitter ([`crate::chunk`]), scoped by the tenant tagger
//! ([`crate::tenant`]), and handed to a [`VectorStore`](crate::store::VectorStore)
//! together with their embedding. Once stored they are never mutated.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Metadata attached to a chunk.
///
/// A `BTreeMap` keeps serialization order stable, which keeps chunk
/// hashes and SQLite rows reproducible across runs.
pub type Metadata = BTreeMap<String, String>;

/// Metadata key holding the tenant (company code) of a chunk.
pub const TENANT_KEY: &str = "companyCode";
/// Metadata key holding the parent document id.
pub const DOCUMENT_ID_KEY: &str = "document_id";
/// Metadata key holding the chunk's position within its document.
pub const CHUNK_INDEX_KEY: &str = "chunk_index";
/// Metadata key holding the uploaded file name.
pub const SOURCE_KEY: &str = "source";
/// Metadata key holding the detected content type of the source document.
pub const CONTENT_TYPE_KEY: &str = "content_type";

/// A chunk of a document's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic UUIDv5 derived from `document_id` and `chunk_index`.
    pub id: String,
    pub document_id: String,
    /// Zero-based, contiguous position within the document.
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
    pub metadata: Metadata,
}

impl Chunk {
    /// Tenant identifier recorded in this chunk's metadata, if any.
    pub fn tenant(&self) -> Option<&str> {
        self.metadata.get(TENANT_KEY).map(String::as_str)
    }
}

/// A chunk paired with its embedding, ready to be written to a store.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// A chunk returned from similarity search.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity to the query vector, in `[-1.0, 1.0]`.
    pub score: f32,
}
