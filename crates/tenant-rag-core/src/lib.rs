//! # Tenant RAG Core
//!
//! I/O-free building blocks for tenant-scoped retrieval-augmented
//! generation: the chunk model, the document splitter, tenant tagging,
//! the embedding and vector store traits (with in-memory and hashing
//! implementations), and the structured output contract.
//!
//! This crate contains no HTTP clients, database drivers, or filesystem
//! I/O. Those live in the `tenant-rag` app crate.
//!
//! ## Ingestion contract
//!
//! ```text
//! text ──split──▶ [Chunk] ──tag(tenant)──▶ [Chunk+companyCode] ──embed──▶ VectorStore
//! ```
//!
//! Queries search the same store through a [`store::MetadataFilter`]
//! built for the caller's tenant, so a chunk is only ever retrievable by
//! the tenant it was ingested for.

pub mod chunk;
pub mod embedding;
pub mod models;
pub mod output;
pub mod store;
pub mod tenant;
