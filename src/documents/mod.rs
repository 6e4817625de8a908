//! Versioned JSON documents with optimistic concurrency.
//!
//! Every read returns a version token. A write names the version it was
//! based on and fails with [`DocumentError::Conflict`] if the stored
//! document has moved on since.

mod github;
mod json_file;

pub use github::GithubDocumentStore;
pub use json_file::JsonFileDocumentStore;

use std::path::{Component, Path};

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// The stored version differs from the one the write was based on.
    #[error("document {key} was modified concurrently")]
    Conflict { key: String },

    #[error("invalid document key: {0:?}")]
    InvalidKey(String),

    #[error("document {key} is not valid JSON: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
}

/// A document together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedDocument {
    pub content: Value,
    pub version: String,
}

#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a document; `None` if it does not exist.
    async fn read(&self, key: &str) -> Result<Option<VersionedDocument>, DocumentError>;

    /// Write a document and return its new version.
    ///
    /// `expected_version` must be the version last read, or `None` when
    /// creating a document that does not exist yet. `message` describes the
    /// change for stores that keep history.
    async fn write(
        &self,
        key: &str,
        content: &Value,
        expected_version: Option<&str>,
        message: &str,
    ) -> Result<String, DocumentError>;
}

/// Keys are relative slash-separated paths without `.` or `..` segments.
pub(crate) fn validate_key(key: &str) -> Result<(), DocumentError> {
    let path = Path::new(key);
    let valid = !key.is_empty()
        && !key.contains('\\')
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(())
    } else {
        Err(DocumentError::InvalidKey(key.to_string()))
    }
}
