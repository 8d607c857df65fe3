//! The response shape returned by `GET /`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use tenant_rag_core::output::StructuredOutput;

/// Structured answer to a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatAnswer {
    /// Short headline for the answer.
    pub title: String,
    pub answer: String,
    pub key_points: Vec<String>,
    /// Retrieved passages the answer relies on. Empty when no context was used.
    pub references: Vec<Reference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    /// File name of the uploaded document.
    pub source: String,
    /// The passage, quoted or paraphrased.
    pub excerpt: String,
}

impl StructuredOutput for ChatAnswer {
    fn json_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string", "description": "short headline for the answer" },
                "answer": { "type": "string", "description": "the full answer to the user's prompt" },
                "key_points": {
                    "type": "array",
                    "description": "the main points of the answer, one sentence each",
                    "items": { "type": "string" }
                },
                "references": {
                    "type": "array",
                    "description": "context passages the answer relies on; empty if none were used",
                    "items": {
                        "type": "object",
                        "properties": {
                            "source": { "type": "string", "description": "source file name of the passage" },
                            "excerpt": { "type": "string", "description": "the relevant passage text" }
                        },
                        "required": ["source", "excerpt"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["title", "answer", "key_points", "references"],
            "additionalProperties": false
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenant_rag_core::output::{validate, OutputContract, OutputError};

    fn sample() -> ChatAnswer {
        ChatAnswer {
            title: "Anvils".to_string(),
            answer: "Acme sells anvils.".to_string(),
            key_points: vec!["Anvils are heavy.".to_string()],
            references: vec![Reference {
                source: "catalog.txt".to_string(),
                excerpt: "Acme sells anvils to coyotes.".to_string(),
            }],
        }
    }

    #[test]
    fn test_schema_accepts_serialized_answer() {
        let value = serde_json::to_value(sample()).unwrap();
        assert!(validate(&ChatAnswer::json_schema(), &value).is_empty());
    }

    #[test]
    fn test_contract_converts_valid_reply() {
        let contract = OutputContract::<ChatAnswer>::new();
        let reply = serde_json::to_string(&sample()).unwrap();
        assert_eq!(contract.convert(&reply).unwrap(), sample());
    }

    #[test]
    fn test_missing_references_is_rejected() {
        let contract = OutputContract::<ChatAnswer>::new();
        let err = contract
            .convert(r#"{"title": "t", "answer": "a", "key_points": []}"#)
            .unwrap_err();
        assert!(matches!(err, OutputError::SchemaViolation(_)));
        assert_eq!(err.violations()[0].path, "$.references");
    }
}
