//! HTTP front-end.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Answer `prompt`, optionally scoped by `companyCode` and `sessionId` |
//! | `POST` | `/upload` | Ingest multipart `file` for the tenant in `companyCode` |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! `GET /` returns the JSON [`ChatAnswer`] plus the token usage of the model
//! call in `x-usage-prompt-tokens`, `x-usage-generation-tokens` and
//! `x-usage-total-tokens`. `POST /upload` returns a plain-text confirmation.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "validation_error", "message": "invalid request: companyCode must not be empty" } }
//! ```
//!
//! Codes: `validation_error` (400), `payload_too_large` (413, uploads over
//! `server.max_upload_bytes`), `unsupported_document` (415),
//! `malformed_model_output` (422), `storage_error` (503, with `stored` and
//! `failed`), `model_unavailable` (503). Requests exceeding
//! `server.request_timeout_secs` are dropped with 408.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use tenant_rag_core::tenant::TenantId;

use crate::answer::ChatAnswer;
use crate::app::App;
use crate::config::{Config, ServerConfig};
use crate::error::{RagError, Result};
use crate::ingest::{Document, IngestPipeline};
use crate::query::{QueryPipeline, QueryRequest};

pub const USAGE_PROMPT_HEADER: &str = "x-usage-prompt-tokens";
pub const USAGE_GENERATION_HEADER: &str = "x-usage-generation-tokens";
pub const USAGE_TOTAL_HEADER: &str = "x-usage-total-tokens";

/// Shared state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    ingest: Arc<IngestPipeline>,
    query: Arc<QueryPipeline>,
    /// Prompt answered when `GET /` carries none.
    default_prompt: Arc<str>,
}

impl AppState {
    pub fn new(
        ingest: Arc<IngestPipeline>,
        query: Arc<QueryPipeline>,
        default_prompt: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            ingest,
            query,
            default_prompt: default_prompt.into(),
        }
    }
}

impl From<&App> for AppState {
    fn from(app: &App) -> Self {
        Self::new(
            Arc::clone(&app.ingest),
            Arc::clone(&app.query),
            app.config.prompt.default_prompt.as_str(),
        )
    }
}

/// Build the router with every route and middleware layer.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_ask))
        .route(
            "/upload",
            post(handle_upload).layer(DefaultBodyLimit::max(config.max_upload_bytes)),
        )
        .route("/health", get(handle_health))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs,
        )))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server.
///
/// Builds every component from `config`, spawns the idle-session sweeper,
/// binds to `[server].bind` and serves until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let app = App::from_config(config).await?;

    let sessions = Arc::clone(&app.sessions);
    let period = sessions.idle_timeout().max(Duration::from_secs(5));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let evicted = sessions.sweep();
            if evicted > 0 {
                tracing::debug!(evicted, live = sessions.len(), "idle sessions evicted");
            }
        }
    });

    let router = build_router(AppState::from(&app), &config.server);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

#[derive(Debug, Default, Deserialize)]
struct AskParams {
    prompt: Option<String>,
    #[serde(rename = "companyCode")]
    company_code: Option<String>,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

async fn handle_ask(
    State(state): State<AppState>,
    Query(params): Query<AskParams>,
) -> Result<([(&'static str, String); 3], Json<ChatAnswer>)> {
    let prompt = params
        .prompt
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or(state.default_prompt.as_ref());

    let outcome = state
        .query
        .query(QueryRequest {
            prompt,
            company_code: params.company_code.as_deref(),
            session_id: params.session_id.as_deref(),
        })
        .await?;

    let usage = outcome.usage;
    let headers = [
        (USAGE_PROMPT_HEADER, usage.prompt.to_string()),
        (USAGE_GENERATION_HEADER, usage.generation.to_string()),
        (USAGE_TOTAL_HEADER, usage.total.to_string()),
    ];
    Ok((headers, Json(outcome.answer)))
}

async fn handle_upload(State(state): State<AppState>, mut multipart: Multipart) -> Result<String> {
    let mut document: Option<Document> = None;
    let mut company_code: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(multipart_error)?;
                let mut doc = Document::new(bytes.to_vec());
                doc.filename = filename;
                doc.content_type = content_type;
                document = Some(doc);
            }
            "companyCode" => {
                company_code = Some(field.text().await.map_err(multipart_error)?);
            }
            other => tracing::debug!(field = other, "ignoring multipart field"),
        }
    }

    // Tenant problems win over a missing file.
    TenantId::parse_opt(company_code.as_deref())?;
    let document = document.ok_or_else(|| RagError::validation("multipart field `file` is required"))?;

    let report = state.ingest.ingest(document, company_code.as_deref()).await?;
    Ok(report.confirmation())
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> RagError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return RagError::PayloadTooLarge(err.body_text());
    }
    RagError::validation(format!("malformed multipart body: {}", err.body_text()))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
