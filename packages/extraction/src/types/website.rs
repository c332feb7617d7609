//! Website record: the root of a crawled site's corpus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A website whose pages are discovered, fetched, and indexed.
///
/// `base_domain` is unique across the table (see
/// [`crate::url::extract_base_domain`]) and is the stable key callers use to
/// refer to a website (`website_ref` in the Query Facade). `search_store_id`
/// is assigned once, the first time a website is indexed, and never changes
/// afterward -- re-indexing reuses the same external search store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Website {
    pub id: Uuid,
    pub seed_url: String,
    pub base_domain: String,
    pub display_name: Option<String>,
    pub search_store_id: Option<String>,
    pub search_store_display_name: Option<String>,
    pub last_full_crawl: Option<DateTime<Utc>>,
    pub created_by_ingestion_id: Uuid,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Website {
    /// Build a new website row for insertion; `id`/timestamps are assigned
    /// by the store on write.
    pub fn new(seed_url: impl Into<String>, base_domain: impl Into<String>, ingestion_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            seed_url: seed_url.into(),
            base_domain: base_domain.into(),
            display_name: None,
            search_store_id: None,
            search_store_display_name: None,
            last_full_crawl: None,
            created_by_ingestion_id: ingestion_id,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// True once this website has never had a search store assigned.
    pub fn is_unindexed(&self) -> bool {
        self.search_store_id.is_none()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
