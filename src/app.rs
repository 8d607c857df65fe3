//! Wiring: build every collaborator from [`Config`] once and share it.

use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::extract::TextExtractor;
use crate::ingest::IngestPipeline;
use crate::llm::create_model;
use crate::query::{QueryPipeline, QuerySettings};
use crate::session::SessionStore;
use crate::store::create_store;

/// The assembled service, shared by the HTTP server and the CLI.
#[derive(Clone)]
pub struct App {
    pub config: Arc<Config>,
    pub ingest: Arc<IngestPipeline>,
    pub query: Arc<QueryPipeline>,
    pub sessions: Arc<SessionStore>,
}

impl App {
    pub async fn from_config(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let store = create_store(&config.store).await?;
        let model = create_model(&config.llm)?;
        let sessions = Arc::new(SessionStore::new(&config.session));
        let settings = QuerySettings::from_config(&config.prompt, &config.retrieval)?;

        tracing::info!(
            embedder = embedder.model_name(),
            dims = embedder.dims(),
            store = store.name(),
            model = model.name(),
            top_k = settings.top_k,
            "components ready"
        );

        let ingest = IngestPipeline::new(
            Arc::new(TextExtractor),
            Arc::clone(&embedder),
            Arc::clone(&store),
            &config.chunking,
        );
        let query = QueryPipeline::new(embedder, store, model, Arc::clone(&sessions), settings);

        Ok(Self {
            config: Arc::new(config.clone()),
            ingest: Arc::new(ingest),
            query: Arc::new(query),
            sessions,
        })
    }
}
