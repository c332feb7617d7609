//! Sync: reconcile the current map of a website's pages against the stored
//! corpus. Three phases -- self-healing retry, categorization (the diff),
//! and threshold-based deletion -- followed by a fire-and-forget indexing
//! trigger.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use uuid::Uuid;

use super::{IndexOptions, JobEngine, SyncResult};
use crate::error::{CoreError, Result};
use crate::traits::store::PageUpdate;
use crate::types::config::MapOptions;
use crate::types::job::{JobError, ProcessStatus, ProcessType};
use crate::types::page::{Page, PageStatus};

const MISSING_HTTP_STATUSES: [i32; 2] = [404, 410];

pub async fn run(engine: &JobEngine, website_id: Uuid) -> Result<SyncResult> {
    let website = engine
        .store
        .get_website(website_id)
        .await?
        .ok_or_else(|| CoreError::NotFound {
            what: format!("website {website_id}"),
        })?;

    let existing_pages = engine.store.list_pages_by_website(website_id, None).await?;
    if existing_pages.is_empty() {
        return Err(CoreError::Validation {
            reason: "sync refuses to run against a website with zero pages".to_string(),
        });
    }
    if website.search_store_id.is_none() {
        return Err(CoreError::Validation {
            reason: "sync refuses to run against a website with no search store".to_string(),
        });
    }

    let mut job = engine.store.create_job(website_id, ProcessType::Sync).await?;

    let result = run_inner(engine, &website, &mut job, existing_pages).await;

    match result {
        Ok(result) => {
            job.status = ProcessStatus::Completed;
            job.completed_at = Some(Utc::now());
            engine.store.update_job(&job).await?;
            engine
                .store
                .update_website(website_id, crate::traits::store::WebsiteUpdate::new().last_full_crawl_now())
                .await?;

            // Fire-and-forget: indexing runs as a detached task and never
            // propagates failure into this sync job's own status.
            let engine_handle = engine.clone();
            let sync_job_id = job.id;
            tokio::spawn(async move {
                let options = IndexOptions {
                    sync_job_id: Some(sync_job_id),
                    ingestion_job_id: None,
                    auto_create_store: true,
                };
                if let Err(e) = engine_handle.index(website_id, options).await {
                    tracing::warn!(website_id = %website_id, error = %e, "background indexing after sync failed");
                }
            });

            Ok(result)
        }
        Err(e) => {
            job.push_error(JobError::new(None, e.to_string()));
            job.status = ProcessStatus::Failed;
            job.completed_at = Some(Utc::now());
            engine.store.update_job(&job).await?;
            Err(e)
        }
    }
}

async fn run_inner(
    engine: &JobEngine,
    website: &crate::types::website::Website,
    job: &mut crate::types::job::ProcessJob,
    existing_pages: Vec<Page>,
) -> Result<SyncResult> {
    let mut urls_updated = 0usize;
    let mut urls_deleted = 0usize;

    // Phase 0: self-healing retry over pending/processing/error pages.
    run_self_healing_retry(engine, website.id, job, &existing_pages, &mut urls_updated).await?;

    // Phase 1: categorization -- diff the crawler's map against the store.
    let map_options = MapOptions::default();
    let discovered = engine.crawler.map(&website.seed_url, &map_options).await?;

    let mut seen = HashSet::new();
    let mapped_urls: Vec<String> = discovered
        .into_iter()
        .filter_map(|link| crate::url::normalize(&link.url).ok())
        .filter(|url| crate::url::is_url_in_base_domain(url, &website.base_domain))
        .filter(|url| seen.insert(url.clone()))
        .filter(|url| match engine.validator.validate(url) {
            Ok(()) => true,
            Err(e) => {
                job.push_error(JobError::new(Some(url.clone()), format!("blocked by URL validator: {e}")));
                false
            }
        })
        .collect();

    job.urls_discovered = mapped_urls.len() as i32;

    let live_pages: HashMap<String, Page> = engine
        .store
        .list_pages_by_website(website.id, None)
        .await?
        .into_iter()
        .filter(|p| p.status != PageStatus::Deleted)
        .map(|p| (p.url.clone(), p))
        .collect();

    let mapped_set: HashSet<&String> = mapped_urls.iter().collect();

    let new_urls: Vec<String> = mapped_urls
        .iter()
        .filter(|u| !live_pages.contains_key(*u))
        .cloned()
        .collect();

    let existing_active_urls: Vec<String> = mapped_urls
        .iter()
        .filter(|u| {
            live_pages
                .get(*u)
                .is_some_and(|p| p.status == PageStatus::Active)
        })
        .cloned()
        .collect();

    let all_existing_urls: Vec<String> = mapped_urls.iter().filter(|u| live_pages.contains_key(*u)).cloned().collect();

    let missing_urls: Vec<String> = live_pages
        .keys()
        .filter(|u| !mapped_set.contains(u))
        .cloned()
        .collect();

    if !new_urls.is_empty() {
        urls_updated += fetch_and_persist_new(engine, website.id, job, &new_urls).await?;
    }

    if !existing_active_urls.is_empty() {
        urls_updated += reconcile_existing(engine, website.id, job, &existing_active_urls, &live_pages).await?;
    }

    if !all_existing_urls.is_empty() {
        engine
            .store
            .update_pages_last_seen(website.id, &all_existing_urls, Utc::now())
            .await?;
    }

    if !missing_urls.is_empty() {
        engine.store.increment_missing_count(website.id, &missing_urls).await?;
    }

    // Phase 2: threshold-based deletion.
    let past_threshold = engine
        .store
        .get_pages_past_deletion_threshold(website.id, engine.config.deletion_threshold)
        .await?;
    for page in &past_threshold {
        engine
            .store
            .update_page(page.id, PageUpdate::new().status(PageStatus::ReadyForDeletion))
            .await?;
    }
    urls_deleted += past_threshold.len();

    job.urls_updated = urls_updated as i32;
    job.urls_deleted = urls_deleted as i32;

    Ok(SyncResult {
        sync_job_id: job.id,
        urls_discovered: job.urls_discovered as usize,
        urls_updated,
        urls_deleted,
        urls_errored: job.urls_errored as usize,
        errors: job.errors_list(),
    })
}

/// Phase 0: pages stuck in `pending`/`processing`/`error`.
/// Those with existing content are nudged into `processing` so the next
/// indexing run picks them up; those without are re-fetched now.
async fn run_self_healing_retry(
    engine: &JobEngine,
    website_id: Uuid,
    job: &mut crate::types::job::ProcessJob,
    existing_pages: &[Page],
    urls_updated: &mut usize,
) -> Result<()> {
    let stuck: Vec<&Page> = existing_pages
        .iter()
        .filter(|p| matches!(p.status, PageStatus::Pending | PageStatus::Processing | PageStatus::Error))
        .collect();

    if stuck.is_empty() {
        return Ok(());
    }

    let (with_content, without_content): (Vec<&Page>, Vec<&Page>) =
        stuck.into_iter().partition(|p| p.has_complete_write());

    for page in with_content {
        engine
            .store
            .update_page(page.id, PageUpdate::new().status(PageStatus::Processing))
            .await?;
    }

    if without_content.is_empty() {
        return Ok(());
    }

    let urls: Vec<String> = without_content.iter().map(|p| p.url.clone()).collect();
    let page_by_url: HashMap<&str, &Page> = without_content.iter().map(|p| (p.url.as_str(), *p)).collect();

    let fetched = engine.crawler.fetch_many(&urls).await;
    for (url, result) in fetched {
        let page = page_by_url.get(url.as_str());
        match result {
            Ok(scraped) if scraped.markdown.as_deref().is_some_and(|m| !m.trim().is_empty()) => {
                let markdown = scraped.markdown.unwrap();
                let hash = crate::hash::hash(&markdown);
                let scrape_count = page.map(|p| p.firecrawl_scrape_count + 1).unwrap_or(1);
                let mut patch = PageUpdate::new()
                    .status(PageStatus::ReadyForIndexing)
                    .markdown_and_hash(markdown, hash);
                patch.firecrawl_scrape_count = Some(scrape_count);
                patch.last_scraped = Some(Some(Utc::now()));
                patch.last_seen = Some(Some(Utc::now()));
                patch.last_updated_by_sync_id = Some(Some(job.id));
                if let Some(page) = page {
                    engine.store.update_page(page.id, patch).await?;
                    *urls_updated += 1;
                }
            }
            Ok(_) => {
                job.push_error(JobError::new(Some(url), "discarded: empty markdown".to_string()));
            }
            Err(e) => {
                job.push_error(JobError::new(Some(url), format!("self-heal fetch failed: {e}")));
            }
        }
    }

    Ok(())
}

/// Phase 1 new-URL handling: batch-fetch and persist complete writes as
/// `ready_for_indexing`, lineage tagged to this sync job.
async fn fetch_and_persist_new(
    engine: &JobEngine,
    website_id: Uuid,
    job: &mut crate::types::job::ProcessJob,
    new_urls: &[String],
) -> Result<usize> {
    let batch_id = engine.crawler.batch_start(new_urls).await?;
    job.firecrawl_batch_ids.push(batch_id.clone());

    let status = crate::traits::crawler::wait_for_batch(
        engine.crawler.as_ref(),
        &batch_id,
        crate::traits::crawler::WaitOptions {
            poll_interval: engine.config.batch_poll_interval,
            max_wait: engine.config.batch_max_wait,
        },
        |_| async {},
    )
    .await?;

    if status.state != crate::traits::crawler::BatchState::Completed {
        job.push_error(JobError::new(
            None,
            status.error.unwrap_or_else(|| "new-url batch fetch failed".to_string()),
        ));
        return Ok(0);
    }

    let mut written = 0usize;
    let now = Utc::now();
    for scraped in status.data {
        let url = scraped.metadata.source_url.clone();
        let markdown = scraped.markdown.clone();

        if url.is_empty() || markdown.as_deref().is_none_or(|m| m.trim().is_empty()) {
            job.push_error(JobError::new(
                if url.is_empty() { None } else { Some(url) },
                "discarded: missing URL or empty markdown".to_string(),
            ));
            continue;
        }

        let markdown = markdown.expect("checked non-empty above");
        let hash = crate::hash::hash(&markdown);
        let path = url::Url::parse(&url).map(|u| u.path().to_string()).unwrap_or_default();

        let mut page = Page::new(website_id, url.clone(), path);
        page.title = scraped.metadata.title.clone();
        page.status = PageStatus::ReadyForIndexing;
        page.content_hash = Some(hash);
        page.markdown = Some(markdown);
        page.last_http_status = scraped.metadata.status_code;
        page.firecrawl_scrape_count = 1;
        page.last_scraped = Some(now);
        page.last_seen = Some(now);
        page.metadata = serde_json::to_value(&scraped.metadata).unwrap_or_default();
        page.created_by_sync_id = Some(job.id);
        page.firecrawl_batch_id = Some(batch_id.clone());

        match engine.store.upsert_page(page).await {
            Ok(_) => written += 1,
            Err(e) => job.push_error(JobError::new(Some(url), format!("store write failed: {e}"))),
        }
    }

    Ok(written)
}

/// Phase 1 existing-URL handling: batch-fetch currently-`active` pages and
/// categorize each response as gone/empty/unchanged/changed.
async fn reconcile_existing(
    engine: &JobEngine,
    _website_id: Uuid,
    job: &mut crate::types::job::ProcessJob,
    urls: &[String],
    live_pages: &HashMap<String, Page>,
) -> Result<usize> {
    let batch_id = engine.crawler.batch_start(urls).await?;
    job.firecrawl_batch_ids.push(batch_id.clone());

    let status = crate::traits::crawler::wait_for_batch(
        engine.crawler.as_ref(),
        &batch_id,
        crate::traits::crawler::WaitOptions {
            poll_interval: engine.config.batch_poll_interval,
            max_wait: engine.config.batch_max_wait,
        },
        |_| async {},
    )
    .await?;

    if status.state != crate::traits::crawler::BatchState::Completed {
        job.push_error(JobError::new(
            None,
            status.error.unwrap_or_else(|| "existing-url batch fetch failed".to_string()),
        ));
        return Ok(0);
    }

    let mut updated = 0usize;
    let now = Utc::now();

    for scraped in status.data {
        let url = scraped.metadata.source_url.clone();
        let Some(page) = live_pages.get(&url) else {
            continue;
        };

        if let Some(code) = scraped.metadata.status_code {
            if MISSING_HTTP_STATUSES.contains(&code) {
                engine.store.increment_missing_count(page.website_id, &[url.clone()]).await?;
                continue;
            }
        }

        match scraped.markdown.as_deref() {
            None => {
                let mut patch = PageUpdate::new();
                patch.missing_count = Some(0);
                patch.last_seen = Some(Some(now));
                engine.store.update_page(page.id, patch).await?;
            }
            Some(markdown) if markdown.trim().is_empty() => {
                let mut patch = PageUpdate::new();
                patch.missing_count = Some(0);
                patch.last_seen = Some(Some(now));
                engine.store.update_page(page.id, patch).await?;
            }
            Some(markdown) => {
                let new_hash = crate::hash::hash(markdown);
                let unchanged = page.content_hash.as_deref() == Some(new_hash.as_str());

                if unchanged {
                    let mut patch = PageUpdate::new();
                    patch.last_scraped = Some(Some(now));
                    patch.last_seen = Some(Some(now));
                    patch.firecrawl_scrape_count = Some(page.firecrawl_scrape_count + 1);
                    patch.last_http_status = Some(scraped.metadata.status_code);
                    engine.store.update_page(page.id, patch).await?;
                } else {
                    let mut patch = PageUpdate::new()
                        .status(PageStatus::ReadyForReIndexing)
                        .markdown_and_hash(markdown.to_string(), new_hash);
                    patch.firecrawl_scrape_count = Some(page.firecrawl_scrape_count + 1);
                    patch.last_updated_by_sync_id = Some(Some(job.id));
                    patch.metadata = Some(serde_json::to_value(&scraped.metadata).unwrap_or_default());
                    engine.store.update_page(page.id, patch).await?;
                    updated += 1;
                }
            }
        }
    }

    Ok(updated)
}
