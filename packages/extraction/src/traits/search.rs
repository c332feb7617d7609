//! Semantic search store collaborator.
//!
//! The vocabulary here (`fileSearchStores`,
//! `STATE_ACTIVE`/`STATE_PENDING`/`STATE_FAILED`, `generateAnswer`-style
//! grounding) traces back to the Gemini File Search API. This trait is
//! shaped to that wire contract but stays provider-agnostic: the Job Engine
//! and Query Facade only see `DocumentState`/`Document`/`GroundedAnswer`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// An uploaded document's lifecycle state, normalized from whatever string
/// casing/prefix the search store reports (`STATE_ACTIVE` and `ACTIVE` are
/// the same state to the core).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentState {
    Pending,
    Active,
    Failed,
    /// Any state string the store reports that isn't one of the three
    /// above; treated the same as `Pending` everywhere it's read
    /// (unknown -> do not delete).
    Unknown,
}

impl DocumentState {
    /// Parse a state string case-insensitively, accepting both the
    /// `STATE_*`-prefixed and bare forms.
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim_start_matches("STATE_").to_ascii_uppercase();
        match normalized.as_str() {
            "ACTIVE" => DocumentState::Active,
            "PENDING" | "PROCESSING" => DocumentState::Pending,
            "FAILED" | "ERROR" => DocumentState::Failed,
            _ => DocumentState::Unknown,
        }
    }
}

/// A search store's identity, as returned by `list_stores`/`get_store`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreInfo {
    pub id: String,
    pub display_name: Option<String>,
}

/// A document's identity and state, as returned by `upload`/`get_document`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub name: String,
    pub display_name: Option<String>,
    pub state: DocumentState,
}

/// Metadata attached to an uploaded document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub url: String,
    pub title: Option<String>,
    pub path: Option<String>,
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,
}

/// A grounding citation extracted from a query response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub url: Option<String>,
    pub title: Option<String>,
    pub snippet: Option<String>,
}

/// The result of a grounded query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundedAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
}

/// Optional scoping applied to a query, used by `search_with_filter`.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub metadata_filter: Option<String>,
}

/// Semantic search store collaborator. A store belongs to exactly
/// one website and holds its uploaded documents.
#[async_trait]
pub trait SearchStore: Send + Sync {
    /// List every store this collaborator currently holds.
    async fn list_stores(&self) -> Result<Vec<StoreInfo>>;

    /// Fetch a single store's identity.
    async fn get_store(&self, store_id: &str) -> Result<StoreInfo>;

    /// Create a new store, returning its id.
    async fn create_store(&self, display_name: &str) -> Result<String>;

    /// Delete a store and everything it holds.
    async fn delete_store(&self, store_id: &str) -> Result<()>;

    /// List every document currently held by a store.
    async fn list_documents(&self, store_id: &str) -> Result<Vec<Document>>;

    /// Upload content to a store, returning the created document. When the
    /// store processes uploads asynchronously the returned document may
    /// still be `Pending`; callers needing a long-running operation polled
    /// to completion use [`SearchStore::poll_operation`].
    async fn upload(
        &self,
        store_id: &str,
        content: &str,
        metadata: &DocumentMetadata,
    ) -> Result<Document>;

    /// Fetch a document's current state.
    async fn get_document(&self, name: &str) -> Result<Document>;

    /// Delete a document. A 404 (the document is already gone) counts as
    /// success -- deletion is idempotent.
    async fn delete_document(&self, name: &str) -> Result<()>;

    /// Poll a long-running operation returned by an asynchronous upload
    /// until it reaches a terminal state, bounded by
    /// `CoreConfig::operation_poll_interval`/`operation_max_wait` in the
    /// caller. Implementations whose uploads complete synchronously may
    /// simply resolve the operation name to its document immediately.
    async fn poll_operation(&self, operation_name: &str) -> Result<Document>;

    /// Ask a grounded question scoped to `store_id`.
    async fn query(
        &self,
        store_id: &str,
        question: &str,
        options: &QueryOptions,
    ) -> Result<GroundedAnswer>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_state_accepts_prefixed_and_bare_forms() {
        assert_eq!(DocumentState::parse("STATE_ACTIVE"), DocumentState::Active);
        assert_eq!(DocumentState::parse("active"), DocumentState::Active);
        assert_eq!(DocumentState::parse("STATE_PENDING"), DocumentState::Pending);
        assert_eq!(DocumentState::parse("processing"), DocumentState::Pending);
        assert_eq!(DocumentState::parse("STATE_FAILED"), DocumentState::Failed);
        assert_eq!(DocumentState::parse("whatever"), DocumentState::Unknown);
    }
}
