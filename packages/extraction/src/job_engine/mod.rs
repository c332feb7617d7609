//! Job Engine: the heart of the system. Owns the page lifecycle
//! and exposes four operations -- `ingest`, `sync`, `index`,
//! `recover_ingestion` -- each `#[instrument]`-ed at its entry point the way
//! `stores/postgres.rs` instruments its own public methods.
//!
//! Every operation here observes the same two invariants: two-phase writes
//! (persist Markdown+hash locally before any external upload) and the
//! complete-write rule (a page row is written iff it has a URL and
//! non-empty Markdown).

mod index;
mod ingest;
mod recovery;
mod sync;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::traits::crawler::{Crawler, UrlValidator};
use crate::traits::search::SearchStore;
use crate::traits::store::PageStoreAdapter;
use crate::types::job::JobError;

/// Result of [`JobEngine::ingest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResult {
    pub website_id: Uuid,
    pub base_domain: String,
    pub search_store_id: Option<String>,
    pub pages_discovered: usize,
    pub pages_written: usize,
    pub errors: Vec<JobError>,
    pub ingestion_job_id: Uuid,
}

/// Options for [`JobEngine::index`].
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    pub ingestion_job_id: Option<Uuid>,
    pub sync_job_id: Option<Uuid>,
    pub auto_create_store: bool,
}

impl IndexOptions {
    pub fn new() -> Self {
        Self {
            auto_create_store: true,
            ..Default::default()
        }
    }
}

/// Result of [`JobEngine::index`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexResult {
    pub indexing_job_id: Uuid,
    pub website_id: Uuid,
    pub pages_indexed: usize,
    pub errors: Vec<JobError>,
}

/// Result of [`JobEngine::sync`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    pub sync_job_id: Uuid,
    pub urls_discovered: usize,
    pub urls_updated: usize,
    pub urls_deleted: usize,
    pub urls_errored: usize,
    pub errors: Vec<JobError>,
}

/// Outcome reported by [`JobEngine::recover_ingestion`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    Completed,
    Failed,
    StillRunning,
    CannotRecover,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    pub recovered: bool,
    pub status: RecoveryStatus,
    pub result: Option<IngestResult>,
    pub error: Option<String>,
}

/// The Job Engine. Holds its three collaborators as trait objects so a host
/// application can wire up whichever store/crawler/search-store
/// implementation it likes without this crate knowing the concrete types.
///
/// Cheaply `Clone`: every field is an `Arc` or plain data, so sync's
/// fire-and-forget indexing trigger (§9) can hand a clone to a detached
/// `tokio::spawn` task without the caller losing its own handle.
#[derive(Clone)]
pub struct JobEngine {
    pub(crate) store: Arc<dyn PageStoreAdapter>,
    pub(crate) crawler: Arc<dyn Crawler>,
    pub(crate) search: Arc<dyn SearchStore>,
    pub(crate) validator: UrlValidator,
    pub(crate) config: CoreConfig,
}

impl JobEngine {
    pub fn new(
        store: Arc<dyn PageStoreAdapter>,
        crawler: Arc<dyn Crawler>,
        search: Arc<dyn SearchStore>,
        config: CoreConfig,
    ) -> Self {
        Self {
            store,
            crawler,
            search,
            validator: UrlValidator::new(),
            config,
        }
    }

    /// §4.4.1 Ingestion.
    #[tracing::instrument(skip(self, seed_url, display_name), fields(seed_url = %seed_url))]
    pub async fn ingest(&self, seed_url: &str, display_name: Option<&str>) -> crate::error::Result<IngestResult> {
        ingest::run(self, seed_url, display_name).await
    }

    /// §4.4.2 Indexing.
    #[tracing::instrument(skip(self, options), fields(website_id = %website_id))]
    pub async fn index(&self, website_id: Uuid, options: IndexOptions) -> crate::error::Result<IndexResult> {
        index::run(self, website_id, options).await
    }

    /// §4.4.3 Sync.
    #[tracing::instrument(skip(self), fields(website_id = %website_id))]
    pub async fn sync(&self, website_id: Uuid) -> crate::error::Result<SyncResult> {
        sync::run(self, website_id).await
    }

    /// §4.4.4 Recovery.
    #[tracing::instrument(skip(self), fields(ingestion_job_id = %ingestion_job_id))]
    pub async fn recover_ingestion(&self, ingestion_job_id: Uuid) -> crate::error::Result<RecoveryOutcome> {
        recovery::run(self, ingestion_job_id).await
    }
}
