//! Recovery: resume a `running` ingestion job abandoned by a
//! dead process, using the crawler's batch status as the source of truth.

use chrono::Utc;
use uuid::Uuid;

use super::{ingest, IngestResult, JobEngine, RecoveryOutcome, RecoveryStatus};
use crate::error::{CoreError, Result};
use crate::traits::crawler::BatchState;
use crate::types::job::{metadata as job_metadata, JobError, ProcessStatus};

pub(super) async fn run(engine: &JobEngine, ingestion_job_id: Uuid) -> Result<RecoveryOutcome> {
    let mut job = engine
        .store
        .get_job(ingestion_job_id)
        .await?
        .ok_or_else(|| CoreError::NotFound {
            what: format!("job {ingestion_job_id}"),
        })?;

    if job.status != ProcessStatus::Running {
        return Ok(no_op());
    }

    let Some(batch_id) = job.firecrawl_batch_ids.first().cloned() else {
        job.push_error(JobError::new(None, "no batch job id -- cannot recover".to_string()));
        job.status = ProcessStatus::Failed;
        job.completed_at = Some(Utc::now());
        engine.store.update_job(&job).await?;
        return Ok(RecoveryOutcome {
            recovered: false,
            status: RecoveryStatus::CannotRecover,
            result: None,
            error: Some("no batch job id -- cannot recover".to_string()),
        });
    };

    let status = match engine.crawler.batch_status(&batch_id).await {
        Ok(status) => status,
        Err(e) => {
            job.push_error(JobError::new(None, format!("recovery batch_status failed: {e}")));
            job.status = ProcessStatus::Failed;
            job.completed_at = Some(Utc::now());
            engine.store.update_job(&job).await?;
            return Ok(RecoveryOutcome {
                recovered: false,
                status: RecoveryStatus::Failed,
                result: None,
                error: Some(e.to_string()),
            });
        }
    };

    match status.state {
        BatchState::Completed => {
            let website = engine
                .store
                .get_website(job.website_id)
                .await?
                .ok_or_else(|| CoreError::NotFound {
                    what: format!("website {}", job.website_id),
                })?;

            let written = ingest::persist_scraped_pages(engine, job.website_id, &mut job, &batch_id, status.data).await?;
            job.urls_updated = written as i32;
            job.status = ProcessStatus::Completed;
            job.completed_at = Some(Utc::now());
            engine.store.update_job(&job).await?;
            engine
                .store
                .update_website(website.id, crate::traits::store::WebsiteUpdate::new().last_full_crawl_now())
                .await?;

            let result = IngestResult {
                website_id: website.id,
                base_domain: website.base_domain.clone(),
                search_store_id: website.search_store_id.clone(),
                pages_discovered: job.urls_discovered as usize,
                pages_written: written,
                errors: job.errors_list(),
                ingestion_job_id: job.id,
            };

            Ok(RecoveryOutcome {
                recovered: true,
                status: RecoveryStatus::Completed,
                result: Some(result),
                error: None,
            })
        }
        BatchState::Failed => {
            let reason = status.error.unwrap_or_else(|| "batch fetch failed".to_string());
            job.push_error(JobError::new(None, reason.clone()));
            job.status = ProcessStatus::Failed;
            job.completed_at = Some(Utc::now());
            engine.store.update_job(&job).await?;
            Ok(RecoveryOutcome {
                recovered: false,
                status: RecoveryStatus::Failed,
                result: None,
                error: Some(reason),
            })
        }
        BatchState::Scraping => {
            job_metadata::set_progress(&mut job, &status);
            engine.store.update_job(&job).await?;
            Ok(RecoveryOutcome {
                recovered: false,
                status: RecoveryStatus::StillRunning,
                result: None,
                error: None,
            })
        }
    }
}

fn no_op() -> RecoveryOutcome {
    RecoveryOutcome {
        recovered: false,
        status: RecoveryStatus::CannotRecover,
        result: None,
        error: Some("job is not running".to_string()),
    }
}
