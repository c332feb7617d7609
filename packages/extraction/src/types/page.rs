//! Page records and the page lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle state of a page row.
///
/// Stored as raw `TEXT` in the page store (see [`Display`]/[`FromStr`])
/// rather than as a database enum; the `postgres` store adapter round-trips
/// it through a plain `String` column rather than teaching `sqlx` about the
/// enum directly, keeping storage concerns out of this module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    /// Discovered and scraped, not yet queued for indexing. Set by ingestion
    /// before the completeness check runs.
    Pending,
    /// Scraped with a complete write (URL + non-empty markdown); waiting for
    /// the next indexing run to upload it. Set by ingestion and by sync for
    /// newly-discovered pages.
    ReadyForIndexing,
    /// Already indexed once; content changed since, waiting to be
    /// re-uploaded. Set by sync when a hash comparison detects a change.
    ReadyForReIndexing,
    /// Missing-count crossed the deletion threshold; waiting for the next
    /// indexing run to delete its search document. Set by sync.
    ReadyForDeletion,
    /// Currently being uploaded or deleted by an indexing run. Set by
    /// indexing for the duration of the upload/delete call.
    Processing,
    /// Present in the external search store and queryable. Set by indexing
    /// after a successful upload and verified `ACTIVE` state.
    Active,
    /// Search document deleted and the page is no longer discoverable on the
    /// site. Set by indexing after a successful deletion.
    Deleted,
    /// The URL now redirects elsewhere. Reserved for a future crawler
    /// signal; not currently set by any operation in this crate.
    Redirect,
    /// A per-page operation failed; `error_message` carries the reason. Set
    /// by ingestion, sync, or indexing on a caught per-page failure.
    Error,
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PageStatus::Pending => "pending",
            PageStatus::ReadyForIndexing => "ready_for_indexing",
            PageStatus::ReadyForReIndexing => "ready_for_re_indexing",
            PageStatus::ReadyForDeletion => "ready_for_deletion",
            PageStatus::Processing => "processing",
            PageStatus::Active => "active",
            PageStatus::Deleted => "deleted",
            PageStatus::Redirect => "redirect",
            PageStatus::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for PageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PageStatus::Pending),
            "ready_for_indexing" => Ok(PageStatus::ReadyForIndexing),
            "ready_for_re_indexing" => Ok(PageStatus::ReadyForReIndexing),
            "ready_for_deletion" => Ok(PageStatus::ReadyForDeletion),
            "processing" => Ok(PageStatus::Processing),
            "active" => Ok(PageStatus::Active),
            "deleted" => Ok(PageStatus::Deleted),
            "redirect" => Ok(PageStatus::Redirect),
            "error" => Ok(PageStatus::Error),
            other => Err(format!("unknown page status: {other}")),
        }
    }
}

/// A page belonging to a [`crate::types::website::Website`].
///
/// `(website_id, url)` is unique. `content_hash` and `markdown` are always
/// set together: either both present (a complete write happened) or both
/// absent (the page has never been successfully scraped).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: Uuid,
    pub website_id: Uuid,
    pub url: String,
    pub path: String,
    pub title: Option<String>,
    pub status: PageStatus,
    pub content_hash: Option<String>,
    pub markdown: Option<String>,
    pub last_http_status: Option<i32>,
    pub firecrawl_scrape_count: i32,
    pub missing_count: i32,
    pub last_scraped: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub search_file_id: Option<String>,
    pub search_file_name: Option<String>,
    pub metadata: serde_json::Value,
    pub created_by_ingestion_id: Option<Uuid>,
    pub created_by_sync_id: Option<Uuid>,
    pub last_updated_by_sync_id: Option<Uuid>,
    pub firecrawl_batch_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Page {
    /// Build a new page row for a freshly-discovered URL.
    pub fn new(website_id: Uuid, url: impl Into<String>, path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            website_id,
            url: url.into(),
            path: path.into(),
            title: None,
            status: PageStatus::Pending,
            content_hash: None,
            markdown: None,
            last_http_status: None,
            firecrawl_scrape_count: 0,
            missing_count: 0,
            last_scraped: None,
            last_seen: None,
            search_file_id: None,
            search_file_name: None,
            metadata: serde_json::json!({}),
            created_by_ingestion_id: None,
            created_by_sync_id: None,
            last_updated_by_sync_id: None,
            firecrawl_batch_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A row is eligible for upload only with a complete write: non-empty
    /// markdown and a matching content hash already computed.
    pub fn has_complete_write(&self) -> bool {
        self.markdown.as_deref().is_some_and(|m| !m.trim().is_empty()) && self.content_hash.is_some()
    }
}

/// SHA-256 content hash of a page's markdown.
///
/// BOM-stripped only -- no whitespace normalization, no case-folding. Two
/// markdown strings that differ only by leading byte-order mark hash equal;
/// everything else hashes as written. See `crate::hash`.
pub fn hash_markdown(markdown: &str) -> String {
    crate::hash::hash(markdown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            PageStatus::Pending,
            PageStatus::ReadyForIndexing,
            PageStatus::ReadyForReIndexing,
            PageStatus::ReadyForDeletion,
            PageStatus::Processing,
            PageStatus::Active,
            PageStatus::Deleted,
            PageStatus::Redirect,
            PageStatus::Error,
        ] {
            let text = status.to_string();
            assert_eq!(PageStatus::from_str(&text).unwrap(), status);
        }
    }

    #[test]
    fn complete_write_requires_markdown_and_hash() {
        let mut page = Page::new(Uuid::new_v4(), "https://example.com/", "/");
        assert!(!page.has_complete_write());

        page.markdown = Some("# Hello".to_string());
        assert!(!page.has_complete_write());

        page.content_hash = Some(hash_markdown("# Hello"));
        assert!(page.has_complete_write());

        page.markdown = Some("   ".to_string());
        assert!(!page.has_complete_write());
    }
}
