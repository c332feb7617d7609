//! In-memory page store for tests and local development.
//!
//! A single `RwLock`-guarded map per entity, no persistence across restarts.
//! Gives the Job Engine's state-machine tests a fully working store without
//! a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::traits::store::{JobStore, PageStore, PageUpdate, ReadyPagesOptions, WebsiteStore, WebsiteUpdate};
use crate::types::job::{ProcessJob, ProcessType};
use crate::types::page::{Page, PageStatus};
use crate::types::website::Website;

/// In-memory implementation of [`WebsiteStore`] + [`PageStore`] +
/// [`JobStore`]. Not suitable for production: all state is lost on
/// restart, and locking is coarse (one `RwLock` per table, not per row).
#[derive(Default)]
pub struct MemoryPageStore {
    websites: RwLock<HashMap<Uuid, Website>>,
    pages: RwLock<HashMap<Uuid, Page>>,
    jobs: RwLock<HashMap<Uuid, ProcessJob>>,
}

impl MemoryPageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_page_by_url(&self, website_id: Uuid, url: &str) -> Option<Page> {
        self.pages
            .read()
            .unwrap()
            .values()
            .find(|p| p.website_id == website_id && p.url == url)
            .cloned()
    }

    fn apply_page_patch(page: &mut Page, patch: PageUpdate) {
        if let Some(v) = patch.status {
            page.status = v;
        }
        if let Some(v) = patch.title {
            page.title = v;
        }
        if let Some(v) = patch.content_hash {
            page.content_hash = v;
        }
        if let Some(v) = patch.markdown {
            page.markdown = v;
        }
        if let Some(v) = patch.last_http_status {
            page.last_http_status = v;
        }
        if let Some(v) = patch.firecrawl_scrape_count {
            page.firecrawl_scrape_count = v;
        }
        if let Some(v) = patch.missing_count {
            page.missing_count = v;
        }
        if let Some(v) = patch.last_scraped {
            page.last_scraped = v;
        }
        if let Some(v) = patch.last_seen {
            page.last_seen = v;
        }
        if let Some(v) = patch.search_file_id {
            page.search_file_id = v;
        }
        if let Some(v) = patch.search_file_name {
            page.search_file_name = v;
        }
        if let Some(v) = patch.metadata {
            page.metadata = v;
        }
        if let Some(v) = patch.created_by_ingestion_id {
            page.created_by_ingestion_id = v;
        }
        if let Some(v) = patch.created_by_sync_id {
            page.created_by_sync_id = v;
        }
        if let Some(v) = patch.last_updated_by_sync_id {
            page.last_updated_by_sync_id = v;
        }
        if let Some(v) = patch.firecrawl_batch_id {
            page.firecrawl_batch_id = v;
        }
        if let Some(v) = patch.error_message {
            page.error_message = v;
        }
        page.updated_at = Utc::now();
    }

    fn apply_website_patch(website: &mut Website, patch: WebsiteUpdate) {
        if let Some(v) = patch.display_name {
            website.display_name = v;
        }
        if let Some(v) = patch.search_store_id {
            website.search_store_id = v;
        }
        if let Some(v) = patch.search_store_display_name {
            website.search_store_display_name = v;
        }
        if let Some(v) = patch.last_full_crawl {
            website.last_full_crawl = v;
        }
        if let Some(v) = patch.created_by_ingestion_id {
            website.created_by_ingestion_id = v;
        }
        website.updated_at = Utc::now();
    }
}

#[async_trait]
impl WebsiteStore for MemoryPageStore {
    async fn create_website(&self, website: &Website) -> Result<Website> {
        let mut websites = self.websites.write().unwrap();
        websites.insert(website.id, website.clone());
        Ok(website.clone())
    }

    async fn get_website(&self, id: Uuid) -> Result<Option<Website>> {
        Ok(self.websites.read().unwrap().get(&id).cloned())
    }

    async fn get_website_by_base_domain(&self, base_domain: &str) -> Result<Option<Website>> {
        Ok(self
            .websites
            .read()
            .unwrap()
            .values()
            .find(|w| w.base_domain == base_domain && !w.is_deleted())
            .cloned())
    }

    async fn update_website(&self, id: Uuid, patch: WebsiteUpdate) -> Result<Website> {
        let mut websites = self.websites.write().unwrap();
        let website = websites
            .get_mut(&id)
            .ok_or_else(|| crate::error::CoreError::NotFound {
                what: format!("website {id}"),
            })?;
        Self::apply_website_patch(website, patch);
        Ok(website.clone())
    }

    async fn list_websites(&self) -> Result<Vec<Website>> {
        Ok(self.websites.read().unwrap().values().cloned().collect())
    }

    async fn soft_delete_website(&self, id: Uuid) -> Result<()> {
        let mut websites = self.websites.write().unwrap();
        if let Some(website) = websites.get_mut(&id) {
            website.deleted_at = Some(Utc::now());
        }
        Ok(())
    }
}

#[async_trait]
impl PageStore for MemoryPageStore {
    async fn create_page(&self, page: &Page) -> Result<Page> {
        self.pages.write().unwrap().insert(page.id, page.clone());
        Ok(page.clone())
    }

    async fn bulk_create_pages(&self, pages: &[Page]) -> Result<Vec<Page>> {
        let mut store = self.pages.write().unwrap();
        for page in pages {
            store.insert(page.id, page.clone());
        }
        Ok(pages.to_vec())
    }

    async fn upsert_page(&self, page: Page) -> Result<Page> {
        let existing_id = self.find_page_by_url(page.website_id, &page.url).map(|p| p.id);
        let mut store = self.pages.write().unwrap();
        let row = match existing_id {
            Some(id) => {
                let mut merged = page;
                merged.id = id;
                merged.created_at = store.get(&id).map(|p| p.created_at).unwrap_or(merged.created_at);
                merged.updated_at = Utc::now();
                store.insert(id, merged.clone());
                merged
            }
            None => {
                store.insert(page.id, page.clone());
                page
            }
        };
        Ok(row)
    }

    async fn bulk_upsert_pages(&self, pages: Vec<Page>) -> Result<Vec<Page>> {
        let mut out = Vec::with_capacity(pages.len());
        for page in pages {
            out.push(self.upsert_page(page).await?);
        }
        Ok(out)
    }

    async fn get_page(&self, id: Uuid) -> Result<Option<Page>> {
        Ok(self.pages.read().unwrap().get(&id).cloned())
    }

    async fn get_page_by_url(&self, website_id: Uuid, url: &str) -> Result<Option<Page>> {
        Ok(self.find_page_by_url(website_id, url))
    }

    async fn list_pages_by_website(&self, website_id: Uuid, status: Option<PageStatus>) -> Result<Vec<Page>> {
        Ok(self
            .pages
            .read()
            .unwrap()
            .values()
            .filter(|p| p.website_id == website_id && status.is_none_or(|s| p.status == s))
            .cloned()
            .collect())
    }

    async fn get_pages_by_statuses(&self, website_id: Uuid, statuses: &[PageStatus]) -> Result<Vec<Page>> {
        Ok(self
            .pages
            .read()
            .unwrap()
            .values()
            .filter(|p| p.website_id == website_id && statuses.contains(&p.status))
            .cloned()
            .collect())
    }

    async fn get_pages_ready_for_indexing(&self, website_id: Uuid, opts: &ReadyPagesOptions) -> Result<Vec<Page>> {
        ready_pages(&self.pages, website_id, PageStatus::ReadyForIndexing, opts)
    }

    async fn get_pages_ready_for_reindexing(&self, website_id: Uuid, opts: &ReadyPagesOptions) -> Result<Vec<Page>> {
        ready_pages(&self.pages, website_id, PageStatus::ReadyForReIndexing, opts)
    }

    async fn get_pages_ready_for_deletion(&self, website_id: Uuid, opts: &ReadyPagesOptions) -> Result<Vec<Page>> {
        let mut pages: Vec<Page> = self
            .pages
            .read()
            .unwrap()
            .values()
            .filter(|p| p.website_id == website_id && p.status == PageStatus::ReadyForDeletion)
            .filter(|p| matches_job(p, opts.job_id))
            .cloned()
            .collect();
        pages.sort_by_key(|p| p.updated_at);
        if let Some(limit) = opts.limit {
            pages.truncate(limit);
        }
        Ok(pages)
    }

    async fn update_pages_last_seen(&self, website_id: Uuid, urls: &[String], ts: DateTime<Utc>) -> Result<()> {
        let mut store = self.pages.write().unwrap();
        for page in store.values_mut() {
            if page.website_id == website_id && urls.contains(&page.url) {
                page.last_seen = Some(ts);
                page.missing_count = 0;
                page.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn increment_missing_count(&self, website_id: Uuid, urls: &[String]) -> Result<()> {
        let mut store = self.pages.write().unwrap();
        for page in store.values_mut() {
            if page.website_id == website_id && urls.contains(&page.url) {
                page.missing_count += 1;
                page.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn get_pages_past_deletion_threshold(&self, website_id: Uuid, threshold: i32) -> Result<Vec<Page>> {
        Ok(self
            .pages
            .read()
            .unwrap()
            .values()
            .filter(|p| p.website_id == website_id && p.missing_count >= threshold && p.status != PageStatus::Deleted)
            .cloned()
            .collect())
    }

    async fn mark_pages_deleted(&self, ids: &[Uuid]) -> Result<()> {
        let mut store = self.pages.write().unwrap();
        for id in ids {
            if let Some(page) = store.get_mut(id) {
                page.status = PageStatus::Deleted;
                page.search_file_id = None;
                page.search_file_name = None;
                page.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn update_page(&self, id: Uuid, patch: PageUpdate) -> Result<Page> {
        let mut store = self.pages.write().unwrap();
        let page = store.get_mut(&id).ok_or_else(|| crate::error::CoreError::NotFound {
            what: format!("page {id}"),
        })?;
        Self::apply_page_patch(page, patch);
        Ok(page.clone())
    }
}

fn matches_job(page: &Page, job_id: Option<Uuid>) -> bool {
    match job_id {
        None => true,
        Some(id) => {
            page.created_by_ingestion_id == Some(id)
                || page.created_by_sync_id == Some(id)
                || page.last_updated_by_sync_id == Some(id)
        }
    }
}

fn ready_pages(
    pages: &RwLock<HashMap<Uuid, Page>>,
    website_id: Uuid,
    status: PageStatus,
    opts: &ReadyPagesOptions,
) -> Result<Vec<Page>> {
    let mut rows: Vec<Page> = pages
        .read()
        .unwrap()
        .values()
        .filter(|p| {
            p.website_id == website_id
                && p.status == status
                && p.has_complete_write()
                && p.search_file_id.is_none()
        })
        .filter(|p| matches_job(p, opts.job_id))
        .cloned()
        .collect();
    rows.sort_by_key(|p| p.updated_at);
    if let Some(limit) = opts.limit {
        rows.truncate(limit);
    }
    Ok(rows)
}

#[async_trait]
impl JobStore for MemoryPageStore {
    async fn create_job(&self, website_id: Uuid, process_type: ProcessType) -> Result<ProcessJob> {
        let job = ProcessJob::new(website_id, process_type);
        self.jobs.write().unwrap().insert(job.id, job.clone());
        Ok(job)
    }

    async fn update_job(&self, job: &ProcessJob) -> Result<ProcessJob> {
        self.jobs.write().unwrap().insert(job.id, job.clone());
        Ok(job.clone())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<ProcessJob>> {
        Ok(self.jobs.read().unwrap().get(&id).cloned())
    }

    async fn list_jobs_by_website(
        &self,
        website_id: Uuid,
        process_type: Option<ProcessType>,
        limit: Option<usize>,
    ) -> Result<Vec<ProcessJob>> {
        let mut jobs: Vec<ProcessJob> = self
            .jobs
            .read()
            .unwrap()
            .values()
            .filter(|j| j.website_id == website_id && process_type.is_none_or(|t| j.process_type == t))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if let Some(limit) = limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn website() -> Website {
        Website::new("https://example.com/", "example.com", Uuid::new_v4()).with_display_name("Example")
    }

    #[tokio::test]
    async fn upsert_inserts_then_updates_same_row() {
        let store = MemoryPageStore::new();
        let website_id = Uuid::new_v4();
        let page = Page::new(website_id, "https://example.com/", "/");
        let created = store.upsert_page(page.clone()).await.unwrap();

        let mut changed = created.clone();
        changed.markdown = Some("v2".into());
        let updated = store.upsert_page(changed).await.unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(store.list_pages_by_website(website_id, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deletion_threshold_respects_status() {
        let store = MemoryPageStore::new();
        let website_id = Uuid::new_v4();
        let mut page = Page::new(website_id, "https://example.com/gone", "/gone");
        page.missing_count = 3;
        store.create_page(&page).await.unwrap();

        let past = store.get_pages_past_deletion_threshold(website_id, 3).await.unwrap();
        assert_eq!(past.len(), 1);

        store.mark_pages_deleted(&[page.id]).await.unwrap();
        let past = store.get_pages_past_deletion_threshold(website_id, 3).await.unwrap();
        assert!(past.is_empty());
    }

    #[tokio::test]
    async fn base_domain_lookup_excludes_soft_deleted() {
        let store = MemoryPageStore::new();
        let w = website();
        store.create_website(&w).await.unwrap();
        assert!(store.get_website_by_base_domain("example.com").await.unwrap().is_some());

        store.soft_delete_website(w.id).await.unwrap();
        assert!(store.get_website_by_base_domain("example.com").await.unwrap().is_none());
    }
}
