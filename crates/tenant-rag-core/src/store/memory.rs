//! In-memory [`VectorStore`] implementation.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`. Search is brute-force
//! cosine similarity over the chunks that pass the metadata filter.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{EmbeddedChunk, ScoredChunk};

use super::{ensure_tenant_tagged, rank, SearchQuery, VectorStore};

/// In-memory store for tests, the CLI, and single-process deployments.
pub struct InMemoryVectorStore {
    records: RwLock<HashMap<String, EmbeddedChunk>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory vector store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn add(&self, record: &EmbeddedChunk) -> Result<()> {
        ensure_tenant_tagged(&record.chunk)?;
        let mut records = self.records.write().map_err(poisoned)?;
        records.insert(record.chunk.id.clone(), record.clone());
        Ok(())
    }

    async fn similarity_search(&self, query: &SearchQuery<'_>) -> Result<Vec<ScoredChunk>> {
        if query.top_k == 0 {
            return Ok(Vec::new());
        }
        let records = self.records.read().map_err(poisoned)?;
        let candidates = records
            .values()
            .filter(|r| query.filter.matches(&r.chunk))
            .map(|r| ScoredChunk {
                chunk: r.chunk.clone(),
                score: cosine_similarity(query.vector, &r.embedding),
            })
            .collect();
        Ok(rank(candidates, query.top_k, query.threshold))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.records.read().map_err(poisoned)?.len())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
