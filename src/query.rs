//! Retrieval-augmented query pipeline.
//!
//! For each prompt:
//!
//! 1. resolve the retrieval scope (explicit `companyCode`, else the
//!    configured default tenant, else none);
//! 2. embed the prompt and run a tenant-filtered similarity search
//!    (skipped when there is no scope);
//! 3. build the system instruction: base directive, retrieved context,
//!    then the response schema;
//! 4. call the model with the session's earlier turns;
//! 5. log token usage and convert the reply into a [`ChatAnswer`].
//!
//! Retrieval is a hard filter on the tenant tag. There is no unscoped search.

use std::fmt::Write as _;
use std::sync::Arc;

use tenant_rag_core::embedding::Embedder;
use tenant_rag_core::models::{ScoredChunk, SOURCE_KEY};
use tenant_rag_core::output::OutputContract;
use tenant_rag_core::store::{MetadataFilter, SearchQuery, VectorStore};
use tenant_rag_core::tenant::TenantId;

use crate::answer::ChatAnswer;
use crate::config::{PromptConfig, RetrievalConfig};
use crate::error::{RagError, Result};
use crate::llm::{CompletionRequest, LanguageModel, TokenUsage};
use crate::session::{SessionStore, MAX_SESSION_ID_LEN};

/// Fixed query-time settings.
#[derive(Debug, Clone)]
pub struct QuerySettings {
    pub system_directive: String,
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub default_tenant: Option<TenantId>,
}

impl QuerySettings {
    pub fn from_config(prompt: &PromptConfig, retrieval: &RetrievalConfig) -> Result<Self> {
        let default_tenant = retrieval
            .default_tenant
            .as_deref()
            .map(TenantId::parse)
            .transpose()?;
        Ok(Self {
            system_directive: prompt.system_directive.clone(),
            top_k: retrieval.top_k,
            similarity_threshold: retrieval.similarity_threshold,
            default_tenant,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueryRequest<'a> {
    pub prompt: &'a str,
    pub company_code: Option<&'a str>,
    pub session_id: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub answer: ChatAnswer,
    pub usage: TokenUsage,
    /// Scope the retrieval ran under, if any.
    pub tenant: Option<TenantId>,
    pub retrieved: Vec<ScoredChunk>,
}

pub struct QueryPipeline {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    model: Arc<dyn LanguageModel>,
    sessions: Arc<SessionStore>,
    contract: OutputContract<ChatAnswer>,
    settings: QuerySettings,
}

impl QueryPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        model: Arc<dyn LanguageModel>,
        sessions: Arc<SessionStore>,
        settings: QuerySettings,
    ) -> Self {
        Self {
            embedder,
            store,
            model,
            sessions,
            contract: OutputContract::new(),
            settings,
        }
    }

    pub async fn query(&self, request: QueryRequest<'_>) -> Result<QueryOutcome> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(RagError::validation("prompt must not be empty"));
        }
        let tenant = match request.company_code {
            Some(raw) => Some(TenantId::parse(raw)?),
            None => self.settings.default_tenant.clone(),
        };
        let session_id = request.session_id.map(parse_session_id).transpose()?;

        // Held until the exchange is recorded, serialising same-session requests.
        let mut lease = match session_id {
            Some(id) => Some(self.sessions.acquire(id).await),
            None => None,
        };

        let retrieved = match &tenant {
            Some(tenant) => self.retrieve(prompt, tenant).await?,
            None => {
                tracing::debug!("no tenant scope; answering without retrieved context");
                Vec::new()
            }
        };

        let system = build_system_instruction(
            &self.settings.system_directive,
            &retrieved,
            &self.contract.format_instructions(),
        );
        let history = lease.as_ref().map(|l| l.history()).unwrap_or_default();
        let completion = self
            .model
            .complete(&CompletionRequest {
                system: &system,
                prompt,
                history,
            })
            .await?;

        let usage = completion.usage;
        tracing::info!(
            model = self.model.name(),
            tenant = tenant.as_ref().map(TenantId::as_str),
            retrieved = retrieved.len(),
            "Token usage: prompt={} generation={} total={}",
            usage.prompt,
            usage.generation,
            usage.total
        );

        let answer = self.contract.convert(&completion.text).map_err(|e| {
            tracing::warn!(model = self.model.name(), "model reply rejected: {}", e);
            RagError::from(e)
        })?;

        if let Some(lease) = lease.as_mut() {
            lease.record(prompt, &completion.text);
        }

        Ok(QueryOutcome {
            answer,
            usage,
            tenant,
            retrieved,
        })
    }

    async fn retrieve(&self, prompt: &str, tenant: &TenantId) -> Result<Vec<ScoredChunk>> {
        let vector = self
            .embedder
            .embed_one(prompt)
            .await
            .map_err(|e| RagError::storage(format!("query embedding failed: {:#}", e)))?;
        let filter = MetadataFilter::for_tenant(tenant);
        let hits = self
            .store
            .similarity_search(&SearchQuery {
                vector: &vector,
                filter: &filter,
                top_k: self.settings.top_k,
                threshold: self.settings.similarity_threshold,
            })
            .await
            .map_err(|e| RagError::storage(format!("{:#}", e)))?;
        tracing::info!(tenant = %tenant, hits = hits.len(), "retrieval finished");
        Ok(hits)
    }
}

fn parse_session_id(raw: &str) -> Result<&str> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(RagError::validation("sessionId must not be empty"));
    }
    if id.chars().count() > MAX_SESSION_ID_LEN || id.chars().any(char::is_control) {
        return Err(RagError::validation(format!(
            "sessionId must be at most {} printable characters",
            MAX_SESSION_ID_LEN
        )));
    }
    Ok(id)
}

/// Directive, then numbered context passages, then the output format.
pub fn build_system_instruction(directive: &str, context: &[ScoredChunk], format: &str) -> String {
    let mut out = String::new();
    out.push_str(directive.trim());
    out.push_str("\n\n");

    if context.is_empty() {
        out.push_str(
            "No context documents were retrieved for this question. \
             Answer from general knowledge and return an empty references list.\n\n",
        );
    } else {
        out.push_str(
            "Use the context passages below when they are relevant to the question. \
             Cite each passage you rely on in references, using its source.\n\n",
        );
        for (i, hit) in context.iter().enumerate() {
            let source = hit
                .chunk
                .metadata
                .get(SOURCE_KEY)
                .map(String::as_str)
                .unwrap_or("unknown");
            let _ = writeln!(out, "[{}] source: {}\n{}\n", i + 1, source, hit.chunk.text.trim());
        }
    }

    out.push_str(format);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::Reference;
    use crate::config::SessionConfig;
    use crate::llm::{ChatTurn, Completion, ModelError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tenant_rag_core::chunk::{split_text, SplitOptions};
    use tenant_rag_core::embedding::HashEmbedder;
    use tenant_rag_core::models::EmbeddedChunk;
    use tenant_rag_core::store::memory::InMemoryVectorStore;
    use tenant_rag_core::tenant::tag_chunks;

    /// Replays canned replies and remembers every request it saw.
    #[derive(Default)]
    struct ScriptedModel {
        replies: Mutex<VecDeque<std::result::Result<String, ModelError>>>,
        seen: Mutex<Vec<(String, String, Vec<ChatTurn>)>>,
    }

    impl ScriptedModel {
        fn replying(replies: Vec<std::result::Result<String, ModelError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            request: &CompletionRequest<'_>,
        ) -> std::result::Result<Completion, ModelError> {
            self.seen.lock().push((
                request.system.to_string(),
                request.prompt.to_string(),
                request.history.to_vec(),
            ));
            let text = self
                .replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ModelError::InvalidResponse("script exhausted".into())))?;
            Ok(Completion {
                text,
                usage: TokenUsage::new(100, 20, None),
            })
        }
    }

    fn answer_json(title: &str) -> String {
        serde_json::to_string(&ChatAnswer {
            title: title.to_string(),
            answer: "answer".to_string(),
            key_points: vec![],
            references: vec![Reference {
                source: "doc.txt".to_string(),
                excerpt: "excerpt".to_string(),
            }],
        })
        .unwrap()
    }

    fn settings(default_tenant: Option<&str>) -> QuerySettings {
        QuerySettings {
            system_directive: "take a deep breath".to_string(),
            top_k: 4,
            similarity_threshold: 0.0,
            default_tenant: default_tenant.map(|t| TenantId::parse(t).unwrap()),
        }
    }

    async fn seeded_store() -> Arc<InMemoryVectorStore> {
        let store = Arc::new(InMemoryVectorStore::new());
        let embedder = HashEmbedder::default();
        for (tenant, text) in [
            ("ACME", "Acme quarterly revenue grew on anvil sales."),
            ("GLOBEX", "Globex quarterly revenue fell on magnet recalls."),
        ] {
            let tenant = TenantId::parse(tenant).unwrap();
            for mut chunk in tag_chunks(split_text(tenant.as_str(), text, &SplitOptions::new(100)), &tenant) {
                chunk
                    .metadata
                    .insert(SOURCE_KEY.to_string(), format!("{}.txt", tenant));
                let embedding = embedder.embed_text(&chunk.text);
                store.add(&EmbeddedChunk { chunk, embedding }).await.unwrap();
            }
        }
        store
    }

    fn pipeline(
        store: Arc<InMemoryVectorStore>,
        model: Arc<ScriptedModel>,
        settings: QuerySettings,
    ) -> QueryPipeline {
        QueryPipeline::new(
            Arc::new(HashEmbedder::default()),
            store,
            model,
            Arc::new(SessionStore::new(&SessionConfig::default())),
            settings,
        )
    }

    #[tokio::test]
    async fn test_retrieval_is_scoped_to_tenant() {
        let model = ScriptedModel::replying(vec![Ok(answer_json("Revenue"))]);
        let pipeline = pipeline(seeded_store().await, model.clone(), settings(None));

        let outcome = pipeline
            .query(QueryRequest {
                prompt: "how did quarterly revenue change?",
                company_code: Some("ACME"),
                session_id: None,
            })
            .await
            .unwrap();

        assert_eq!(outcome.answer.title, "Revenue");
        assert_eq!(outcome.usage.total, 120);
        assert!(!outcome.retrieved.is_empty());
        assert!(outcome.retrieved.iter().all(|h| h.chunk.tenant() == Some("ACME")));

        let seen = model.seen.lock();
        let system = &seen[0].0;
        assert!(system.starts_with("take a deep breath"));
        assert!(system.contains("anvil"));
        assert!(!system.contains("magnet"));
        assert!(system.contains("JSON Schema"));
    }

    #[tokio::test]
    async fn test_no_scope_skips_retrieval() {
        let model = ScriptedModel::replying(vec![Ok(answer_json("General"))]);
        let pipeline = pipeline(seeded_store().await, model.clone(), settings(None));
        let outcome = pipeline
            .query(QueryRequest {
                prompt: "quarterly revenue",
                ..QueryRequest::default()
            })
            .await
            .unwrap();
        assert!(outcome.retrieved.is_empty());
        assert!(outcome.tenant.is_none());
        assert!(model.seen.lock()[0].0.contains("No context documents"));
    }

    #[tokio::test]
    async fn test_default_tenant_applies() {
        let model = ScriptedModel::replying(vec![Ok(answer_json("Default"))]);
        let pipeline = pipeline(seeded_store().await, model, settings(Some("GLOBEX")));
        let outcome = pipeline
            .query(QueryRequest {
                prompt: "quarterly revenue",
                ..QueryRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(outcome.tenant.unwrap().as_str(), "GLOBEX");
        assert!(outcome
            .retrieved
            .iter()
            .all(|h| h.chunk.tenant() == Some("GLOBEX")));
    }

    #[tokio::test]
    async fn test_malformed_output_is_distinct_from_model_failure() {
        let model = ScriptedModel::replying(vec![
            Ok("Sure! Revenue grew.".to_string()),
            Err(ModelError::Timeout),
        ]);
        let pipeline = pipeline(seeded_store().await, model, settings(None));
        let request = QueryRequest {
            prompt: "revenue?",
            ..QueryRequest::default()
        };

        let err = pipeline.query(request).await.unwrap_err();
        assert!(matches!(err, RagError::MalformedModelOutput(_)));

        let err = pipeline.query(request).await.unwrap_err();
        assert!(matches!(err, RagError::ModelUnavailable(_)));
    }

    #[tokio::test]
    async fn test_session_history_is_passed_to_model() {
        let model = ScriptedModel::replying(vec![Ok(answer_json("One")), Ok(answer_json("Two"))]);
        let pipeline = pipeline(seeded_store().await, model.clone(), settings(None));
        for prompt in ["first question", "follow up"] {
            pipeline
                .query(QueryRequest {
                    prompt,
                    company_code: None,
                    session_id: Some("s-1"),
                })
                .await
                .unwrap();
        }
        let seen = model.seen.lock();
        assert!(seen[0].2.is_empty());
        assert_eq!(seen[1].2.len(), 2);
        assert_eq!(seen[1].2[0], ChatTurn::user("first question"));
    }

    #[tokio::test]
    async fn test_invalid_inputs_are_rejected_before_model_call() {
        let model = ScriptedModel::replying(vec![]);
        let pipeline = pipeline(seeded_store().await, model.clone(), settings(None));
        for request in [
            QueryRequest {
                prompt: "  ",
                ..QueryRequest::default()
            },
            QueryRequest {
                prompt: "ok",
                company_code: Some(""),
                session_id: None,
            },
            QueryRequest {
                prompt: "ok",
                company_code: None,
                session_id: Some(" "),
            },
        ] {
            let err = pipeline.query(request).await.unwrap_err();
            assert!(matches!(err, RagError::Validation(_)));
        }
        assert!(model.seen.lock().is_empty());
    }

    #[test]
    fn test_system_instruction_numbers_passages() {
        let tenant = TenantId::parse("ACME").unwrap();
        let chunks = tag_chunks(
            split_text("d", "Alpha text.\n\nBeta text.", &SplitOptions::new(3)),
            &tenant,
        );
        let hits: Vec<ScoredChunk> = chunks
            .into_iter()
            .map(|chunk| ScoredChunk { chunk, score: 0.5 })
            .collect();
        let text = build_system_instruction("Directive.", &hits, "FORMAT");
        assert!(text.starts_with("Directive."));
        assert!(text.contains("[1] source: unknown\nAlpha text."));
        assert!(text.contains("[2] source: unknown\nBeta text."));
        assert!(text.ends_with("FORMAT"));
    }
}
