//! Ingestion: discover a website's pages from a seed URL and
//! write them as `ready_for_indexing` rows. Never triggers indexing itself.

use chrono::Utc;
use uuid::Uuid;

use super::{IngestResult, JobEngine, RecoveryStatus};
use crate::error::{CoreError, Result};
use crate::traits::crawler::{wait_for_batch, BatchState, ScrapedPage, WaitOptions};
use crate::types::config::MapOptions;
use crate::types::job::{metadata as job_metadata, JobError, ProcessJob, ProcessStatus, ProcessType};
use crate::types::page::Page;
use crate::types::website::Website;

const MAX_DISPLAY_NAME_LEN: usize = 512;

pub async fn run(engine: &JobEngine, seed_url: &str, display_name: Option<&str>) -> Result<IngestResult> {
    if let Some(name) = display_name {
        if name.len() > MAX_DISPLAY_NAME_LEN {
            return Err(CoreError::Validation {
                reason: format!("display name exceeds {MAX_DISPLAY_NAME_LEN} characters"),
            });
        }
    }

    let normalized_seed = parse_seed(seed_url)?;
    engine.validator.validate(&normalized_seed)?;
    let host = crate::url::extract_domain(&normalized_seed)?;
    let base_domain = crate::url::extract_base_domain(&host);

    if let Some(website) = engine.store.get_website_by_base_domain(&base_domain).await? {
        if let Some(result) = resolve_existing_website(engine, &website).await? {
            return Ok(result);
        }
        return run_fresh_ingestion(engine, website, &normalized_seed).await;
    }

    let store_id = engine.search.create_store(&store_display_name(&base_domain)).await?;
    let mut website = Website::new(normalized_seed.clone(), base_domain.clone(), Uuid::nil());
    website.display_name = display_name.map(str::to_string);
    website.search_store_id = Some(store_id);
    let website = engine.store.create_website(&website).await?;

    run_fresh_ingestion(engine, website, &normalized_seed).await
}

fn store_display_name(base_domain: &str) -> String {
    format!("website-{}-{}", base_domain.replace('.', "-"), Utc::now().timestamp_millis())
}

fn parse_seed(seed: &str) -> Result<String> {
    crate::url::normalize(seed)
        .or_else(|_| crate::url::normalize(&format!("https://{seed}")))
        .map_err(|_| CoreError::Validation {
            reason: format!("'{seed}' is not a valid URL or bare domain"),
        })
}

/// Step 3: look at the most recent ingestion job against an already-known
/// website. Returns `Some(result)` when the caller should short-circuit
/// (a completed job reconstructed, or a successfully recovered job);
/// returns `None` when a fresh ingestion should proceed.
async fn resolve_existing_website(engine: &JobEngine, website: &Website) -> Result<Option<IngestResult>> {
    let recent = engine
        .store
        .list_jobs_by_website(website.id, Some(ProcessType::Ingestion), Some(1))
        .await?;
    let Some(job) = recent.into_iter().next() else {
        return Ok(None);
    };

    match job.status {
        ProcessStatus::Completed => Ok(Some(reconstruct_result(website, &job))),
        ProcessStatus::Running => {
            let age = Utc::now() - job.started_at;
            let stale_after = chrono::Duration::from_std(engine.config.recovery_stale_after)
                .unwrap_or_else(|_| chrono::Duration::seconds(60));
            if age < stale_after {
                return Err(CoreError::Validation {
                    reason: "ingestion already in progress".to_string(),
                });
            }
            let outcome = super::recovery::run(engine, job.id).await?;
            match outcome.status {
                RecoveryStatus::Completed => Ok(outcome.result),
                RecoveryStatus::StillRunning => Err(CoreError::Validation {
                    reason: "ingestion already in progress".to_string(),
                }),
                RecoveryStatus::Failed | RecoveryStatus::CannotRecover => Ok(None),
            }
        }
        ProcessStatus::Failed => Ok(None),
    }
}

fn reconstruct_result(website: &Website, job: &ProcessJob) -> IngestResult {
    IngestResult {
        website_id: website.id,
        base_domain: website.base_domain.clone(),
        search_store_id: website.search_store_id.clone(),
        pages_discovered: job.urls_discovered as usize,
        pages_written: job.urls_updated as usize,
        errors: job.errors_list(),
        ingestion_job_id: job.id,
    }
}

async fn run_fresh_ingestion(engine: &JobEngine, website: Website, normalized_seed: &str) -> Result<IngestResult> {
    let mut job = engine.store.create_job(website.id, ProcessType::Ingestion).await?;
    job_metadata::set_ingestion_job_id(&mut job, job.id);
    job = engine.store.update_job(&job).await?;

    engine
        .store
        .update_website(
            website.id,
            crate::traits::store::WebsiteUpdate {
                created_by_ingestion_id: Some(job.id),
                ..Default::default()
            },
        )
        .await?;

    let map_options = MapOptions::default();
    let discovered = match engine.crawler.map(normalized_seed, &map_options).await {
        Ok(links) => links,
        Err(e) => return fail_job(engine, job, format!("map failed: {e}")).await,
    };

    let mut seen = std::collections::HashSet::new();
    let filtered: Vec<String> = discovered
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

    if filtered.is_empty() {
        return fail_job(engine, job, "crawler map returned no URLs in this base domain".to_string()).await;
    }

    job.urls_discovered = filtered.len() as i32;

    let batch_id = match engine.crawler.batch_start(&filtered).await {
        Ok(id) => id,
        Err(e) => return fail_job(engine, job, format!("batch_start failed: {e}")).await,
    };
    job.firecrawl_batch_ids.push(batch_id.clone());
    job = engine.store.update_job(&job).await?;

    let mut poll_count: u32 = 0;
    let mut progress_job = job.clone();
    let wait_result = wait_for_batch(
        engine.crawler.as_ref(),
        &batch_id,
        WaitOptions {
            poll_interval: engine.config.batch_poll_interval,
            max_wait: engine.config.batch_max_wait,
        },
        |status| {
            poll_count += 1;
            let write = if poll_count % 6 == 0 {
                // Every 30s (6 polls at the default 5s interval) write progress
                // for UI consumers polling job progress. Awaited in place so
                // this can never land after the job's own finalization write.
                job_metadata::set_progress(&mut progress_job, status);
                Some((engine.store.clone(), progress_job.clone()))
            } else {
                None
            };
            async move {
                if let Some((store, snapshot)) = write {
                    if let Err(e) = store.update_job(&snapshot).await {
                        tracing::warn!(error = %e, "failed to persist ingestion progress");
                    }
                }
            }
        },
    )
    .await;
    job = progress_job;

    let batch_status = match wait_result {
        Ok(status) if status.state == BatchState::Completed => status,
        Ok(status) => return fail_job(engine, job, status.error.unwrap_or_else(|| "batch fetch failed".into())).await,
        Err(e) => return fail_job(engine, job, format!("batch wait failed: {e}")).await,
    };

    let pages_written = persist_scraped_pages(engine, website.id, &mut job, &batch_id, batch_status.data).await?;

    job.urls_updated = pages_written as i32;
    job.status = ProcessStatus::Completed;
    job.completed_at = Some(Utc::now());
    engine.store.update_job(&job).await?;
    engine
        .store
        .update_website(website.id, crate::traits::store::WebsiteUpdate::new().last_full_crawl_now())
        .await?;

    Ok(IngestResult {
        website_id: website.id,
        base_domain: website.base_domain.clone(),
        search_store_id: website.search_store_id.clone(),
        pages_discovered: job.urls_discovered as usize,
        pages_written,
        errors: job.errors_list(),
        ingestion_job_id: job.id,
    })
}

async fn fail_job(engine: &JobEngine, mut job: ProcessJob, reason: String) -> Result<IngestResult> {
    job.push_error(JobError::new(None, reason.clone()));
    job.status = ProcessStatus::Failed;
    job.completed_at = Some(Utc::now());
    engine.store.update_job(&job).await?;
    Err(CoreError::Validation { reason })
}

/// Shared with recovery (§4.4.4): complete-write validation, hashing, and
/// upsert for a batch of scraped pages. Mutates `job`'s error list but does
/// not touch its status -- the caller finalizes the job.
pub(super) async fn persist_scraped_pages(
    engine: &JobEngine,
    website_id: Uuid,
    job: &mut ProcessJob,
    batch_id: &str,
    pages: Vec<ScrapedPage>,
) -> Result<usize> {
    let mut written = 0usize;
    let now = Utc::now();

    for scraped in pages {
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
        let path = crate::url::extract_domain(&url).map(|_| path_of(&url)).unwrap_or_default();

        let mut page = Page::new(website_id, url.clone(), path);
        page.title = scraped.metadata.title.clone();
        page.status = crate::types::page::PageStatus::ReadyForIndexing;
        page.content_hash = Some(hash);
        page.markdown = Some(markdown);
        page.last_http_status = scraped.metadata.status_code;
        page.firecrawl_scrape_count = 1;
        page.last_scraped = Some(now);
        page.last_seen = Some(now);
        page.metadata = serde_json::to_value(&scraped.metadata).unwrap_or_default();
        page.created_by_ingestion_id = Some(job.id);
        page.firecrawl_batch_id = Some(batch_id.to_string());

        match engine.store.upsert_page(page).await {
            Ok(_) => written += 1,
            Err(e) => job.push_error(JobError::new(Some(url), format!("store write failed: {e}"))),
        }
    }

    Ok(written)
}

fn path_of(url: &str) -> String {
    url::Url::parse(url).map(|u| u.path().to_string()).unwrap_or_default()
}
