//! Testing utilities: mock implementations of the `Crawler` and
//! `SearchStore` collaborators.
//!
//! In-memory, deterministic, call-tracking, builder-configured. A host
//! exercising the Job Engine's state machine pairs these with
//! [`crate::stores::memory::MemoryPageStore`] to run every pipeline
//! operation without a network or a database.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::{CoreError, Result};
use crate::traits::crawler::{BatchState, BatchStatus, Crawler, MapLink, ScrapedMetadata, ScrapedPage};
use crate::traits::search::{
    Document, DocumentMetadata, DocumentState, GroundedAnswer, QueryOptions, SearchStore, StoreInfo,
};
use crate::types::config::MapOptions;

/// Record of a call made to [`MockCrawler`].
#[derive(Debug, Clone)]
pub enum MockCrawlerCall {
    Map { seed: String },
    Scrape { url: String },
    BatchStart { urls: Vec<String> },
    BatchStatus { job_id: String },
    BatchCancel { job_id: String },
}

/// A mock [`Crawler`] that returns predefined pages without making network
/// requests. Every `batch_start` completes its batch immediately; call
/// `batch_status` once to read back the (already-finished) result.
#[derive(Default)]
pub struct MockCrawler {
    map_results: RwLock<HashMap<String, Vec<MapLink>>>,
    pages: RwLock<HashMap<String, ScrapedPage>>,
    fail_urls: RwLock<Vec<String>>,
    batches: RwLock<HashMap<String, Vec<String>>>,
    next_batch_id: RwLock<u64>,
    calls: RwLock<Vec<MockCrawlerCall>>,
}

impl MockCrawler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Predefine the `map` result for a seed URL.
    pub fn with_map_result(self, seed: impl Into<String>, links: Vec<MapLink>) -> Self {
        self.map_results.write().unwrap().insert(seed.into(), links);
        self
    }

    /// Predefine a scraped page, keyed by its source URL.
    pub fn with_page(self, url: impl Into<String>, markdown: impl Into<String>) -> Self {
        let url = url.into();
        let markdown = markdown.into();
        let page = ScrapedPage {
            markdown: Some(markdown),
            html: None,
            metadata: ScrapedMetadata {
                source_url: url.clone(),
                status_code: Some(200),
                ..Default::default()
            },
        };
        self.pages.write().unwrap().insert(url, page);
        self
    }

    /// Predefine a page whose scrape reports an HTTP status with no
    /// markdown (used to simulate 404/410 in sync tests).
    pub fn with_status_only(self, url: impl Into<String>, status: i32) -> Self {
        let url = url.into();
        let page = ScrapedPage {
            markdown: None,
            html: None,
            metadata: ScrapedMetadata {
                source_url: url.clone(),
                status_code: Some(status),
                ..Default::default()
            },
        };
        self.pages.write().unwrap().insert(url, page);
        self
    }

    /// Mark a URL as failing every scrape/map call.
    pub fn fail_url(self, url: impl Into<String>) -> Self {
        self.fail_urls.write().unwrap().push(url.into());
        self
    }

    pub fn calls(&self) -> Vec<MockCrawlerCall> {
        self.calls.read().unwrap().clone()
    }
}

#[async_trait]
impl Crawler for MockCrawler {
    async fn map(&self, seed: &str, _options: &MapOptions) -> Result<Vec<MapLink>> {
        self.calls.write().unwrap().push(MockCrawlerCall::Map { seed: seed.to_string() });
        if self.fail_urls.read().unwrap().contains(&seed.to_string()) {
            return Err(CoreError::Crawler(Box::new(std::io::Error::other("mock map failure"))));
        }
        Ok(self.map_results.read().unwrap().get(seed).cloned().unwrap_or_default())
    }

    async fn scrape(&self, url: &str) -> Result<ScrapedPage> {
        self.calls.write().unwrap().push(MockCrawlerCall::Scrape { url: url.to_string() });
        if self.fail_urls.read().unwrap().contains(&url.to_string()) {
            return Err(CoreError::Crawler(Box::new(std::io::Error::other("mock scrape failure"))));
        }
        self.pages
            .read()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| CoreError::NotFound { what: format!("mock page {url}") })
    }

    async fn batch_start(&self, urls: &[String]) -> Result<String> {
        self.calls
            .write()
            .unwrap()
            .push(MockCrawlerCall::BatchStart { urls: urls.to_vec() });
        let mut next = self.next_batch_id.write().unwrap();
        let id = format!("mock-batch-{next}");
        *next += 1;
        self.batches.write().unwrap().insert(id.clone(), urls.to_vec());
        Ok(id)
    }

    async fn batch_status(&self, job_id: &str) -> Result<BatchStatus> {
        self.calls
            .write()
            .unwrap()
            .push(MockCrawlerCall::BatchStatus { job_id: job_id.to_string() });
        let urls = self
            .batches
            .read()
            .unwrap()
            .get(job_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound { what: format!("mock batch {job_id}") })?;

        let pages = self.pages.read().unwrap();
        let fail_urls = self.fail_urls.read().unwrap();
        let mut data = Vec::with_capacity(urls.len());
        for url in &urls {
            if fail_urls.contains(url) {
                continue;
            }
            if let Some(page) = pages.get(url) {
                data.push(page.clone());
            }
        }

        Ok(BatchStatus {
            state: BatchState::Completed,
            completed: data.len(),
            total: urls.len(),
            data,
            error: None,
        })
    }

    async fn batch_cancel(&self, job_id: &str) -> Result<()> {
        self.calls
            .write()
            .unwrap()
            .push(MockCrawlerCall::BatchCancel { job_id: job_id.to_string() });
        self.batches.write().unwrap().remove(job_id);
        Ok(())
    }
}

/// Record of a call made to [`MockSearchStore`].
#[derive(Debug, Clone)]
pub enum MockSearchStoreCall {
    CreateStore { display_name: String },
    Upload { store_id: String },
    GetDocument { name: String },
    DeleteDocument { name: String },
    Query { store_id: String, question: String },
}

/// A mock [`SearchStore`] that holds documents in memory and reports
/// whatever state was configured for them (defaulting to `Active`
/// immediately after upload, matching the common case in indexing tests).
pub struct MockSearchStore {
    stores: RwLock<HashMap<String, Option<String>>>,
    documents: RwLock<HashMap<String, Document>>,
    /// Per-document state override, consulted by `get_document`; falls back
    /// to the state recorded at upload time.
    state_overrides: RwLock<HashMap<String, DocumentState>>,
    fail_uploads_for: RwLock<Vec<String>>,
    answer: RwLock<GroundedAnswer>,
    next_doc_id: RwLock<u64>,
    calls: Arc<RwLock<Vec<MockSearchStoreCall>>>,
}

impl Default for MockSearchStore {
    fn default() -> Self {
        Self {
            stores: RwLock::new(HashMap::new()),
            documents: RwLock::new(HashMap::new()),
            state_overrides: RwLock::new(HashMap::new()),
            fail_uploads_for: RwLock::new(Vec::new()),
            answer: RwLock::new(GroundedAnswer {
                answer: "mock answer".to_string(),
                citations: Vec::new(),
            }),
            next_doc_id: RwLock::new(0),
            calls: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl MockSearchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force every future upload under `url` to verify as `state`.
    pub fn with_document_state(self, url: impl Into<String>, state: DocumentState) -> Self {
        self.state_overrides.write().unwrap().insert(url.into(), state);
        self
    }

    /// Make uploads whose content contains `marker` fail outright.
    pub fn fail_uploads_containing(self, marker: impl Into<String>) -> Self {
        self.fail_uploads_for.write().unwrap().push(marker.into());
        self
    }

    /// Predefine the answer returned by every `query` call.
    pub fn with_answer(self, answer: GroundedAnswer) -> Self {
        *self.answer.write().unwrap() = answer;
        self
    }

    pub fn calls(&self) -> Vec<MockSearchStoreCall> {
        self.calls.read().unwrap().clone()
    }

    pub fn document_count(&self) -> usize {
        self.documents.read().unwrap().len()
    }
}

#[async_trait]
impl SearchStore for MockSearchStore {
    async fn list_stores(&self) -> Result<Vec<StoreInfo>> {
        Ok(self
            .stores
            .read()
            .unwrap()
            .iter()
            .map(|(id, display_name)| StoreInfo {
                id: id.clone(),
                display_name: display_name.clone(),
            })
            .collect())
    }

    async fn get_store(&self, store_id: &str) -> Result<StoreInfo> {
        self.stores
            .read()
            .unwrap()
            .get(store_id)
            .map(|display_name| StoreInfo {
                id: store_id.to_string(),
                display_name: display_name.clone(),
            })
            .ok_or_else(|| CoreError::NotFound { what: format!("mock store {store_id}") })
    }

    async fn create_store(&self, display_name: &str) -> Result<String> {
        self.calls.write().unwrap().push(MockSearchStoreCall::CreateStore {
            display_name: display_name.to_string(),
        });
        let id = format!("fileSearchStores/{display_name}");
        self.stores.write().unwrap().insert(id.clone(), Some(display_name.to_string()));
        Ok(id)
    }

    async fn delete_store(&self, store_id: &str) -> Result<()> {
        self.stores.write().unwrap().remove(store_id);
        Ok(())
    }

    async fn list_documents(&self, store_id: &str) -> Result<Vec<Document>> {
        let prefix = format!("{store_id}/documents/");
        Ok(self
            .documents
            .read()
            .unwrap()
            .iter()
            .filter(|(name, _)| name.starts_with(&prefix))
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    async fn upload(&self, store_id: &str, content: &str, metadata: &DocumentMetadata) -> Result<Document> {
        self.calls.write().unwrap().push(MockSearchStoreCall::Upload {
            store_id: store_id.to_string(),
        });
        if self.fail_uploads_for.read().unwrap().iter().any(|m| content.contains(m.as_str())) {
            return Err(CoreError::Search(Box::new(std::io::Error::other("mock upload failure"))));
        }

        let mut next = self.next_doc_id.write().unwrap();
        let name = format!("{store_id}/documents/{next}");
        *next += 1;

        let state = self
            .state_overrides
            .read()
            .unwrap()
            .get(&metadata.url)
            .copied()
            .unwrap_or(DocumentState::Active);

        let doc = Document {
            name: name.clone(),
            display_name: metadata.title.clone(),
            state,
        };
        self.documents.write().unwrap().insert(name, doc.clone());
        Ok(doc)
    }

    async fn get_document(&self, name: &str) -> Result<Document> {
        self.calls
            .write()
            .unwrap()
            .push(MockSearchStoreCall::GetDocument { name: name.to_string() });
        self.documents
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::NotFound { what: format!("mock document {name}") })
    }

    async fn delete_document(&self, name: &str) -> Result<()> {
        self.calls
            .write()
            .unwrap()
            .push(MockSearchStoreCall::DeleteDocument { name: name.to_string() });
        // A delete of an already-absent document is success.
        self.documents.write().unwrap().remove(name);
        Ok(())
    }

    async fn poll_operation(&self, operation_name: &str) -> Result<Document> {
        // Uploads above complete synchronously, so polling is just a lookup.
        self.get_document(operation_name).await
    }

    async fn query(&self, store_id: &str, question: &str, _options: &QueryOptions) -> Result<GroundedAnswer> {
        self.calls.write().unwrap().push(MockSearchStoreCall::Query {
            store_id: store_id.to_string(),
            question: question.to_string(),
        });
        Ok(self.answer.read().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_crawler_batch_roundtrip() {
        let crawler = MockCrawler::new().with_page("https://example.com/", "# Home");
        let batch_id = crawler.batch_start(&["https://example.com/".to_string()]).await.unwrap();
        let status = crawler.batch_status(&batch_id).await.unwrap();
        assert_eq!(status.state, BatchState::Completed);
        assert_eq!(status.data.len(), 1);
    }

    #[tokio::test]
    async fn mock_crawler_fail_url_is_excluded_from_batch() {
        let crawler = MockCrawler::new()
            .with_page("https://example.com/ok", "content")
            .fail_url("https://example.com/bad");
        let batch_id = crawler
            .batch_start(&["https://example.com/ok".to_string(), "https://example.com/bad".to_string()])
            .await
            .unwrap();
        let status = crawler.batch_status(&batch_id).await.unwrap();
        assert_eq!(status.data.len(), 1);
    }

    #[tokio::test]
    async fn mock_search_store_upload_then_verify_active() {
        let search = MockSearchStore::new();
        let store_id = search.create_store("website-example-com").await.unwrap();
        let doc = search
            .upload(&store_id, "# content", &DocumentMetadata { url: "https://example.com/".into(), ..Default::default() })
            .await
            .unwrap();
        let verified = search.get_document(&doc.name).await.unwrap();
        assert_eq!(verified.state, DocumentState::Active);
    }

    #[tokio::test]
    async fn mock_search_store_delete_of_absent_document_succeeds() {
        let search = MockSearchStore::new();
        assert!(search.delete_document("fileSearchStores/x/documents/404").await.is_ok());
    }
}
