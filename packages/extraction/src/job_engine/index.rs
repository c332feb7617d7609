//! Indexing: upload `ready_for_indexing`/`ready_for_re_indexing`
//! pages to the search store and delete `ready_for_deletion` pages, verifying
//! each upload's resulting document state before trusting it.

use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use super::{IndexOptions, IndexResult, JobEngine};
use crate::error::Result;
use crate::traits::search::{DocumentMetadata, DocumentState};
use crate::traits::store::{PageUpdate, ReadyPagesOptions, WebsiteUpdate};
use crate::types::job::{metadata as job_metadata, JobError, ProcessStatus, ProcessType};
use crate::types::page::{Page, PageStatus};

enum UploadOutcome {
    Active {
        page_id: Uuid,
        search_file_id: String,
        search_file_name: Option<String>,
    },
    Failed {
        page_id: Uuid,
        message: String,
    },
    Pending {
        page_id: Uuid,
    },
    Error {
        page_id: Uuid,
        url: String,
        message: String,
    },
}

pub async fn run(engine: &JobEngine, website_id: Uuid, options: IndexOptions) -> Result<IndexResult> {
    let website = engine
        .store
        .get_website(website_id)
        .await?
        .ok_or_else(|| crate::error::CoreError::NotFound {
            what: format!("website {website_id}"),
        })?;

    let parent_job_id = options.sync_job_id.or(options.ingestion_job_id);

    let mut job = engine.store.create_job(website_id, ProcessType::Indexing).await?;
    if let Some(sync_id) = options.sync_job_id {
        job_metadata::set_sync_job_id(&mut job, sync_id);
    } else if let Some(ingestion_id) = options.ingestion_job_id {
        job_metadata::set_ingestion_job_id(&mut job, ingestion_id);
    }
    job_metadata::set_document_states(&mut job, &HashMap::new());
    job = engine.store.update_job(&job).await?;

    let store_id = match (&website.search_store_id, options.auto_create_store) {
        (Some(id), _) => id.clone(),
        (None, true) => {
            let id = engine.search.create_store(&format!("website-{}", website.base_domain)).await?;
            engine
                .store
                .update_website(website_id, WebsiteUpdate::new().search_store(id.clone(), website.base_domain.clone()))
                .await?;
            id
        }
        (None, false) => {
            return fail_job(engine, job, "website has no search store and auto_create_store is false".to_string())
                .await
        }
    };

    let opts = ReadyPagesOptions {
        job_id: parent_job_id,
        limit: Some(engine.config.indexing_page_cap),
    };

    let (to_index, to_reindex, to_delete) = tokio::try_join!(
        engine.store.get_pages_ready_for_indexing(website_id, &opts),
        engine.store.get_pages_ready_for_reindexing(website_id, &opts),
        engine.store.get_pages_ready_for_deletion(website_id, &opts),
    )?;

    let mut pages_indexed = 0usize;
    let mut document_states: HashMap<String, String> = HashMap::new();

    run_deletion_pass(engine, &mut job, to_delete).await?;

    let mut upload_set = to_index;
    upload_set.extend(to_reindex);

    for batch in upload_set.chunks(engine.config.upload_concurrency) {
        let outcomes = futures::future::join_all(
            batch.iter().map(|page| upload_one(engine, &store_id, page.clone())),
        )
        .await;

        for outcome in outcomes {
            match outcome {
                UploadOutcome::Active {
                    page_id,
                    search_file_id,
                    search_file_name,
                } => {
                    let mut patch = PageUpdate::new()
                        .status(PageStatus::Active)
                        .search_refs(search_file_id, search_file_name.unwrap_or_default());
                    patch.last_scraped = Some(Some(Utc::now()));
                    patch.error_message = Some(None);
                    engine.store.update_page(page_id, patch).await?;
                    pages_indexed += 1;
                    document_states.insert(page_id.to_string(), "ACTIVE".to_string());
                }
                UploadOutcome::Failed { page_id, message } => {
                    let patch = PageUpdate::new().clear_search_refs().error_message(message.clone());
                    engine.store.update_page(page_id, patch).await?;
                    job.push_error(JobError::new(None, message));
                    document_states.insert(page_id.to_string(), "FAILED".to_string());
                }
                UploadOutcome::Pending { page_id } => {
                    document_states.insert(page_id.to_string(), "PROCESSING".to_string());
                }
                UploadOutcome::Error { page_id, url, message } => {
                    let patch = PageUpdate::new().clear_search_refs().error_message(message.clone());
                    engine.store.update_page(page_id, patch).await?;
                    job.push_error(JobError::new(Some(url), message));
                    document_states.insert(page_id.to_string(), "FAILED".to_string());
                }
            }
        }

        tokio::time::sleep(engine.config.inter_batch_pause).await;
    }

    job_metadata::set_document_states(&mut job, &document_states);
    let active_count = document_states.values().filter(|s| *s == "ACTIVE").count();
    let processing_count = document_states.values().filter(|s| *s == "PROCESSING").count();
    let failed_count = document_states.values().filter(|s| *s == "FAILED").count();
    job.metadata["activeCount"] = serde_json::json!(active_count);
    job.metadata["processingCount"] = serde_json::json!(processing_count);
    job.metadata["failedCount"] = serde_json::json!(failed_count);
    if let Some(parent) = parent_job_id {
        job.metadata["parentJobId"] = serde_json::json!(parent.to_string());
    }

    job.urls_updated = pages_indexed as i32;
    job.status = ProcessStatus::Completed;
    job.completed_at = Some(Utc::now());
    engine.store.update_job(&job).await?;

    Ok(IndexResult {
        indexing_job_id: job.id,
        website_id,
        pages_indexed,
        errors: job.errors_list(),
    })
}

async fn run_deletion_pass(engine: &JobEngine, job: &mut crate::types::job::ProcessJob, to_delete: Vec<Page>) -> Result<()> {
    for page in to_delete {
        if let Some(ref file_id) = page.search_file_id {
            if let Err(e) = engine.search.delete_document(file_id).await {
                job.push_error(JobError::new(Some(page.url.clone()), format!("delete failed: {e}")));
                continue;
            }
        }
        engine.store.mark_pages_deleted(&[page.id]).await?;
    }
    Ok(())
}

async fn upload_one(engine: &JobEngine, store_id: &str, page: Page) -> UploadOutcome {
    let is_reindex = page.status == PageStatus::ReadyForReIndexing;

    if is_reindex {
        if let Some(ref old_id) = page.search_file_id {
            let _ = engine.search.delete_document(old_id).await;
        }
        let clear = PageUpdate::new().clear_search_refs();
        if let Err(e) = engine.store.update_page(page.id, clear).await {
            return UploadOutcome::Error {
                page_id: page.id,
                url: page.url.clone(),
                message: format!("failed to clear stale search refs: {e}"),
            };
        }
    }

    let markdown = page.markdown.clone().unwrap_or_default();
    let metadata = DocumentMetadata {
        url: page.url.clone(),
        title: page.title.clone(),
        path: Some(page.path.clone()),
        last_updated: page.last_scraped,
    };

    let doc = match try_upload(engine, store_id, &markdown, &metadata).await {
        Ok(doc) => doc,
        Err(e) => {
            return UploadOutcome::Error {
                page_id: page.id,
                url: page.url.clone(),
                message: e.to_string(),
            }
        }
    };

    tokio::time::sleep(engine.config.verification_delay).await;

    // `poll_operation` is the collaborator's long-running-upload primitive;
    // a still-pending result here just means the next indexing run retries
    // this page.
    let verified = match engine.search.poll_operation(&doc.name).await {
        Ok(doc) => doc,
        Err(_) => return UploadOutcome::Pending { page_id: page.id },
    };

    match verified.state {
        DocumentState::Active => UploadOutcome::Active {
            page_id: page.id,
            search_file_id: verified.name,
            search_file_name: verified.display_name,
        },
        DocumentState::Failed => {
            let _ = engine.search.delete_document(&verified.name).await;
            UploadOutcome::Failed {
                page_id: page.id,
                message: "document failed to process".to_string(),
            }
        }
        DocumentState::Pending | DocumentState::Unknown => UploadOutcome::Pending { page_id: page.id },
    }
}

async fn try_upload(
    engine: &JobEngine,
    store_id: &str,
    markdown: &str,
    metadata: &DocumentMetadata,
) -> Result<crate::traits::search::Document> {
    match engine.search.upload(store_id, markdown, metadata).await {
        Ok(doc) => Ok(doc),
        Err(e) if is_rate_limited(&e) => {
            tokio::time::sleep(engine.config.upload_retry_backoff).await;
            engine.search.upload(store_id, markdown, metadata).await
        }
        Err(e) => Err(e),
    }
}

fn is_rate_limited(err: &crate::error::CoreError) -> bool {
    let text = err.to_string().to_ascii_lowercase();
    text.contains("429") || text.contains("rate limit")
}

async fn fail_job(engine: &JobEngine, mut job: crate::types::job::ProcessJob, reason: String) -> Result<IndexResult> {
    job.push_error(JobError::new(None, reason.clone()));
    job.status = ProcessStatus::Failed;
    job.completed_at = Some(Utc::now());
    engine.store.update_job(&job).await?;
    Err(crate::error::CoreError::Validation { reason })
}
