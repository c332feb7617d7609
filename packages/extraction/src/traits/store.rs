//! Page Store Adapter: a narrow, typed CRUD interface over the relational
//! store holding websites, pages, and process-jobs. The core never issues
//! SQL itself outside of `stores::postgres`; the Job Engine and Query
//! Facade depend only on these traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::types::job::{ProcessJob, ProcessType};
use crate::types::page::{Page, PageStatus};
use crate::types::website::Website;

/// Options for `PageStore::get_pages_ready_for_indexing` and its
/// `ready_for_re_indexing`/`ready_for_deletion` siblings.
#[derive(Debug, Clone, Default)]
pub struct ReadyPagesOptions {
    /// Scope to pages whose lineage ties to this job (either
    /// `created_by_ingestion_id`, `created_by_sync_id`, or
    /// `last_updated_by_sync_id`).
    pub job_id: Option<Uuid>,
    pub limit: Option<usize>,
}

/// A patch applied to a single page row. `None` fields are left untouched;
/// `Some(None)` clears the field. Every state-machine transition in the Job
/// Engine goes through `update_page`, so this is the single place a page row
/// changes.
#[derive(Debug, Clone, Default)]
pub struct PageUpdate {
    pub status: Option<PageStatus>,
    pub title: Option<Option<String>>,
    pub content_hash: Option<Option<String>>,
    pub markdown: Option<Option<String>>,
    pub last_http_status: Option<Option<i32>>,
    pub firecrawl_scrape_count: Option<i32>,
    pub missing_count: Option<i32>,
    pub last_scraped: Option<Option<DateTime<Utc>>>,
    pub last_seen: Option<Option<DateTime<Utc>>>,
    pub search_file_id: Option<Option<String>>,
    pub search_file_name: Option<Option<String>>,
    pub metadata: Option<serde_json::Value>,
    pub created_by_ingestion_id: Option<Option<Uuid>>,
    pub created_by_sync_id: Option<Option<Uuid>>,
    pub last_updated_by_sync_id: Option<Option<Uuid>>,
    pub firecrawl_batch_id: Option<Option<String>>,
    pub error_message: Option<Option<String>>,
}

impl PageUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: PageStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn markdown_and_hash(mut self, markdown: impl Into<String>, hash: impl Into<String>) -> Self {
        self.markdown = Some(Some(markdown.into()));
        self.content_hash = Some(Some(hash.into()));
        self
    }

    pub fn clear_search_refs(mut self) -> Self {
        self.search_file_id = Some(None);
        self.search_file_name = Some(None);
        self
    }

    pub fn search_refs(mut self, file_id: impl Into<String>, file_name: impl Into<String>) -> Self {
        self.search_file_id = Some(Some(file_id.into()));
        self.search_file_name = Some(Some(file_name.into()));
        self
    }

    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(Some(message.into()));
        self
    }
}

/// A patch applied to a single website row.
#[derive(Debug, Clone, Default)]
pub struct WebsiteUpdate {
    pub display_name: Option<Option<String>>,
    pub search_store_id: Option<Option<String>>,
    pub search_store_display_name: Option<Option<String>>,
    pub last_full_crawl: Option<Option<DateTime<Utc>>>,
    pub created_by_ingestion_id: Option<Uuid>,
}

impl WebsiteUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn search_store(mut self, id: impl Into<String>, display_name: impl Into<String>) -> Self {
        self.search_store_id = Some(Some(id.into()));
        self.search_store_display_name = Some(Some(display_name.into()));
        self
    }

    pub fn last_full_crawl_now(mut self) -> Self {
        self.last_full_crawl = Some(Some(Utc::now()));
        self
    }
}

/// CRUD and query contract over the `websites` table.
#[async_trait]
pub trait WebsiteStore: Send + Sync {
    async fn create_website(&self, website: &Website) -> Result<Website>;
    async fn get_website(&self, id: Uuid) -> Result<Option<Website>>;
    /// Dedup/resolution key: excludes soft-deleted websites, so a
    /// soft-deleted base domain can be re-registered by a fresh ingestion.
    async fn get_website_by_base_domain(&self, base_domain: &str) -> Result<Option<Website>>;
    async fn update_website(&self, id: Uuid, patch: WebsiteUpdate) -> Result<Website>;
    async fn list_websites(&self) -> Result<Vec<Website>>;
    async fn soft_delete_website(&self, id: Uuid) -> Result<()>;
}

/// CRUD and query contract over the `pages` table.
#[async_trait]
pub trait PageStore: Send + Sync {
    async fn create_page(&self, page: &Page) -> Result<Page>;
    async fn bulk_create_pages(&self, pages: &[Page]) -> Result<Vec<Page>>;

    /// Insert `page` on first sight of `(website_id, url)`, otherwise
    /// overwrite the content/lineage/status fields of the existing row with
    /// `page`'s (preserving the existing row's `id`/`created_at`). Must be
    /// atomic per row.
    async fn upsert_page(&self, page: Page) -> Result<Page>;
    async fn bulk_upsert_pages(&self, pages: Vec<Page>) -> Result<Vec<Page>>;

    async fn get_page(&self, id: Uuid) -> Result<Option<Page>>;
    async fn get_page_by_url(&self, website_id: Uuid, url: &str) -> Result<Option<Page>>;
    async fn list_pages_by_website(&self, website_id: Uuid, status: Option<PageStatus>) -> Result<Vec<Page>>;
    async fn get_pages_by_statuses(&self, website_id: Uuid, statuses: &[PageStatus]) -> Result<Vec<Page>>;

    /// `status='ready_for_indexing'` AND non-empty markdown AND
    /// `search_file_id IS NULL`, FIFO by `updated_at`.
    async fn get_pages_ready_for_indexing(&self, website_id: Uuid, opts: &ReadyPagesOptions) -> Result<Vec<Page>>;
    async fn get_pages_ready_for_reindexing(&self, website_id: Uuid, opts: &ReadyPagesOptions) -> Result<Vec<Page>>;
    async fn get_pages_ready_for_deletion(&self, website_id: Uuid, opts: &ReadyPagesOptions) -> Result<Vec<Page>>;

    /// Refresh `last_seen` and reset `missing_count` to zero for every URL
    /// in `urls`. Idempotent.
    async fn update_pages_last_seen(&self, website_id: Uuid, urls: &[String], ts: DateTime<Utc>) -> Result<()>;
    /// Idempotent +1 on `missing_count` for every URL in `urls`.
    async fn increment_missing_count(&self, website_id: Uuid, urls: &[String]) -> Result<()>;
    /// Pages with `missing_count >= threshold` and `status != 'deleted'`.
    async fn get_pages_past_deletion_threshold(&self, website_id: Uuid, threshold: i32) -> Result<Vec<Page>>;
    async fn mark_pages_deleted(&self, ids: &[Uuid]) -> Result<()>;

    async fn update_page(&self, id: Uuid, patch: PageUpdate) -> Result<Page>;
}

/// CRUD and query contract over the `process_jobs` table.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a job row: `status='running'`, empty batch ids, empty
    /// metadata.
    async fn create_job(&self, website_id: Uuid, process_type: ProcessType) -> Result<ProcessJob>;
    async fn update_job(&self, job: &ProcessJob) -> Result<ProcessJob>;
    async fn get_job(&self, id: Uuid) -> Result<Option<ProcessJob>>;
    /// Descending by `started_at`.
    async fn list_jobs_by_website(
        &self,
        website_id: Uuid,
        process_type: Option<ProcessType>,
        limit: Option<usize>,
    ) -> Result<Vec<ProcessJob>>;
}

/// Composite store combining the three narrow traits; this is what the Job
/// Engine and Query Facade actually hold.
pub trait PageStoreAdapter: WebsiteStore + PageStore + JobStore {}
impl<T: WebsiteStore + PageStore + JobStore> PageStoreAdapter for T {}
