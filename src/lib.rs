//! # Tenant RAG
//!
//! A multi-tenant retrieval-augmented generation service.
//!
//! Documents are uploaded per tenant (`companyCode`), split into chunks,
//! tagged, embedded and stored. Prompts are answered by a language model
//! that sees only the chunks of the requested tenant, and the reply is
//! validated against a JSON schema before it reaches the caller.
//!
//! ## Architecture
//!
//! ```text
//!  POST /upload                                   GET /
//!       │                                           │
//!       ▼                                           ▼
//! ┌──────────┐  ┌─────────────┐  ┌─────────┐  ┌───────────┐  ┌───────┐
//! │  Parser  │─▶│ Split + Tag │─▶│  Store  │◀─│ Retrieve  │─▶│  LLM  │
//! │ pdf/docx │  │ companyCode │  │ mem/sql │  │ by tenant │  │ + JSON│
//! └──────────┘  └─────────────┘  └─────────┘  └───────────┘  └───────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! trag ingest handbook.pdf --company ACME
//! trag ask "What is the leave policy?" --company ACME
//! trag serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy and HTTP error bodies |
//! | [`extract`] | Document parsing (text, PDF, Office) |
//! | [`embedding`] | Embedding providers |
//! | [`llm`] | Language model clients |
//! | [`store`] | Vector store backends |
//! | [`session`] | Per-session conversation memory |
//! | [`ingest`] | Ingestion pipeline |
//! | [`query`] | Retrieval-augmented query pipeline |
//! | [`answer`] | Structured response shape |
//! | [`app`] | Component wiring |
//! | [`server`] | HTTP server |

pub mod answer;
pub mod app;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod query;
pub mod server;
pub mod session;
pub mod store;
