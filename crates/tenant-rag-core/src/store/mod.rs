//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the narrow interface the ingestion and
//! query pipelines use to persist embedded chunks and to run filtered
//! similarity search. Implementations must be `Send + Sync` to work with
//! async runtimes.
//!
//! There is no multi-item transaction: each [`add`](VectorStore::add) is
//! independently visible to later searches once it returns.

pub mod memory;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{Chunk, EmbeddedChunk, ScoredChunk, TENANT_KEY};
use crate::tenant::TenantId;

/// Conjunction of metadata equality constraints.
///
/// An empty filter matches everything; callers that must respect tenant
/// isolation build filters through [`MetadataFilter::for_tenant`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataFilter {
    conditions: Vec<(String, String)>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter restricted to chunks tagged with `tenant`.
    pub fn for_tenant(tenant: &TenantId) -> Self {
        Self::new().and_eq(TENANT_KEY, tenant.as_str())
    }

    /// Add an equality constraint.
    pub fn and_eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.push((key.into(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, String)] {
        &self.conditions
    }

    /// Whether `chunk`'s metadata satisfies every condition.
    pub fn matches(&self, chunk: &Chunk) -> bool {
        self.conditions
            .iter()
            .all(|(k, v)| chunk.metadata.get(k) == Some(v))
    }
}

/// Search parameters for [`VectorStore::similarity_search`].
#[derive(Debug, Clone)]
pub struct SearchQuery<'a> {
    pub vector: &'a [f32],
    pub filter: &'a MetadataFilter,
    pub top_k: usize,
    /// Results scoring below this cosine similarity are dropped.
    pub threshold: f32,
}

/// Abstract vector storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`add`](VectorStore::add) | Store one embedded chunk |
/// | [`similarity_search`](VectorStore::similarity_search) | Filtered top-K cosine search |
/// | [`len`](VectorStore::len) | Number of stored chunks |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Store one embedded chunk. Re-adding a chunk id replaces it.
    async fn add(&self, record: &EmbeddedChunk) -> Result<()>;

    /// Return up to `top_k` chunks matching the filter, best first.
    async fn similarity_search(&self, query: &SearchQuery<'_>) -> Result<Vec<ScoredChunk>>;

    /// Number of stored chunks.
    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Reject chunks that carry no tenant. Shared by every store implementation.
pub fn ensure_tenant_tagged(chunk: &Chunk) -> Result<()> {
    match chunk.tenant() {
        Some(t) if !t.trim().is_empty() => Ok(()),
        _ => bail!("chunk {} has no tenant tag; refusing to store", chunk.id),
    }
}

/// Sort candidates best-first, apply the threshold, and truncate to `top_k`.
///
/// Ties are broken by chunk id so results are stable across backends.
pub fn rank(mut candidates: Vec<ScoredChunk>, top_k: usize, threshold: f32) -> Vec<ScoredChunk> {
    candidates.retain(|c| c.score >= threshold);
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    candidates.truncate(top_k);
    candidates
}
