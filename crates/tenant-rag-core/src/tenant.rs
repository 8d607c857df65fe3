//! Tenant scoping for stored chunks.
//!
//! Every chunk handed to a vector store must carry exactly one tenant
//! identifier under [`TENANT_KEY`]. Unscoped chunks would be visible to
//! every tenant, so [`tag_chunks`] refuses to run without a valid
//! [`TenantId`] and the stores refuse untagged chunks.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Chunk, TENANT_KEY};

/// Longest accepted tenant identifier, in characters.
pub const MAX_TENANT_LEN: usize = 128;

/// Reasons a tenant identifier is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TenantError {
    #[error("tenant identifier (companyCode) is missing")]
    Missing,
    #[error("tenant identifier (companyCode) must not be empty")]
    Empty,
    #[error("tenant identifier (companyCode) exceeds {MAX_TENANT_LEN} characters")]
    TooLong,
    #[error("tenant identifier (companyCode) contains control characters")]
    ControlCharacters,
}

/// An opaque, validated tenant (company code) identifier.
///
/// Surrounding whitespace is trimmed; the remaining value is compared
/// byte-for-byte, so `ACME` and `acme` are different tenants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn parse(raw: &str) -> Result<Self, TenantError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TenantError::Empty);
        }
        if trimmed.chars().count() > MAX_TENANT_LEN {
            return Err(TenantError::TooLong);
        }
        if trimmed.chars().any(char::is_control) {
            return Err(TenantError::ControlCharacters);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Parse an optional raw value, treating `None` as [`TenantError::Missing`].
    pub fn parse_opt(raw: Option<&str>) -> Result<Self, TenantError> {
        raw.ok_or(TenantError::Missing).and_then(Self::parse)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantId {
    type Error = TenantError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

/// Attach `tenant` to every chunk's metadata.
///
/// Chunk text is left untouched. Any tenant value already present in the
/// metadata is replaced, so each chunk ends up with exactly one tenant.
pub fn tag_chunks(chunks: Vec<Chunk>, tenant: &TenantId) -> Vec<Chunk> {
    chunks
        .into_iter()
        .map(|mut chunk| {
            chunk
                .metadata
                .insert(TENANT_KEY.to_string(), tenant.as_str().to_string());
            chunk
        })
        .collect()
}
