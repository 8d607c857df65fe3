//! Error taxonomy shared by the ingestion and query pipelines.
//!
//! Every pipeline stage either completes or returns one [`RagError`].
//! Collaborator errors ([`ExtractError`], [`ModelError`], [`OutputError`],
//! [`TenantError`]) convert into the variant callers act on. The HTTP
//! layer renders a `RagError` as
//!
//! ```json
//! { "error": { "code": "storage_error", "message": "..." } }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use tenant_rag_core::output::OutputError;
use tenant_rag_core::tenant::TenantError;

use crate::extract::ExtractError;
use crate::llm::ModelError;

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Debug, Error)]
pub enum RagError {
    /// Bad caller input, rejected before any external call.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The request body exceeds `server.max_upload_bytes`.
    #[error("upload too large: {0}")]
    PayloadTooLarge(String),

    /// The parser could not turn the upload into text.
    #[error("unsupported document: {0}")]
    UnsupportedDocument(String),

    /// Embedding, write or search failure. `stored` chunks remain visible.
    #[error("storage failure ({stored} stored, {failed} failed): {message}")]
    Storage {
        stored: usize,
        failed: usize,
        message: String,
    },

    /// The language model call produced no reply.
    #[error("language model unavailable: {0}")]
    ModelUnavailable(String),

    /// The language model replied but the reply does not fit the response schema.
    #[error("malformed model output: {0}")]
    MalformedModelOutput(#[source] OutputError),
}

impl RagError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// A storage error where nothing was written (search failures, empty ingestion).
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage {
            stored: 0,
            failed: 0,
            message: err.to_string(),
        }
    }

    /// Stable machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::Validation(_) => "validation_error",
            RagError::PayloadTooLarge(_) => "payload_too_large",
            RagError::UnsupportedDocument(_) => "unsupported_document",
            RagError::Storage { .. } => "storage_error",
            RagError::ModelUnavailable(_) => "model_unavailable",
            RagError::MalformedModelOutput(_) => "malformed_model_output",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RagError::Validation(_) => StatusCode::BAD_REQUEST,
            RagError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            RagError::UnsupportedDocument(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            RagError::Storage { .. } => StatusCode::SERVICE_UNAVAILABLE,
            RagError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RagError::MalformedModelOutput(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl From<TenantError> for RagError {
    fn from(err: TenantError) -> Self {
        RagError::Validation(err.to_string())
    }
}

impl From<ExtractError> for RagError {
    fn from(err: ExtractError) -> Self {
        RagError::UnsupportedDocument(err.to_string())
    }
}

impl From<ModelError> for RagError {
    fn from(err: ModelError) -> Self {
        RagError::ModelUnavailable(err.to_string())
    }
}

impl From<OutputError> for RagError {
    fn from(err: OutputError) -> Self {
        RagError::MalformedModelOutput(err)
    }
}

impl IntoResponse for RagError {
    fn into_response(self) -> Response {
        let mut error = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        match &self {
            RagError::Storage { stored, failed, .. } => {
                error["stored"] = json!(stored);
                error["failed"] = json!(failed);
            }
            RagError::MalformedModelOutput(inner) if !inner.violations().is_empty() => {
                error["violations"] = json!(inner.violations());
            }
            _ => {}
        }

        match self.status() {
            s if s.is_server_error() => tracing::warn!(code = self.code(), "{}", self),
            _ => tracing::debug!(code = self.code(), "{}", self),
        }

        (self.status(), Json(json!({ "error": error }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenant_rag_core::output::Violation;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            RagError::validation("x").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RagError::UnsupportedDocument("x".into()).status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            RagError::PayloadTooLarge("x".into()).status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            RagError::storage("x").status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            RagError::ModelUnavailable("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            RagError::from(OutputError::Empty).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_collaborator_errors_convert() {
        assert!(matches!(
            RagError::from(TenantError::Empty),
            RagError::Validation(_)
        ));
        assert!(matches!(
            RagError::from(ModelError::Timeout),
            RagError::ModelUnavailable(_)
        ));
        assert!(matches!(
            RagError::from(ExtractError::Encoding),
            RagError::UnsupportedDocument(_)
        ));
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let err = RagError::from(OutputError::SchemaViolation(vec![Violation {
            path: "$.title".to_string(),
            message: "missing required field".to_string(),
        }]));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["error"]["code"], "malformed_model_output");
        assert_eq!(v["error"]["violations"][0]["path"], "$.title");
    }

    #[tokio::test]
    async fn test_storage_body_carries_counts() {
        let err = RagError::Storage {
            stored: 2,
            failed: 1,
            message: "disk full".to_string(),
        };
        let body = axum::body::to_bytes(err.into_response().into_body(), usize::MAX)
            .await
            .unwrap();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["error"]["stored"], 2);
        assert_eq!(v["error"]["failed"], 1);
    }
}
