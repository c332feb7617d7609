//! Process job: the unit of lineage and progress tracking for every run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// What kind of run a [`ProcessJob`] records.
///
/// A tagged enum with a single `ProcessJob` record type, not a class
/// hierarchy per website -- every run, regardless of kind, is one row in the
/// same table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessType {
    Ingestion,
    Sync,
    Indexing,
    ManualReindex,
}

impl fmt::Display for ProcessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessType::Ingestion => "ingestion",
            ProcessType::Sync => "sync",
            ProcessType::Indexing => "indexing",
            ProcessType::ManualReindex => "manual_reindex",
        };
        f.write_str(s)
    }
}

impl FromStr for ProcessType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ingestion" => Ok(ProcessType::Ingestion),
            "sync" => Ok(ProcessType::Sync),
            "indexing" => Ok(ProcessType::Indexing),
            "manual_reindex" => Ok(ProcessType::ManualReindex),
            other => Err(format!("unknown process type: {other}")),
        }
    }
}

/// Terminal-or-not state of a [`ProcessJob`]. Every job must end in
/// `Completed` or `Failed`; no job is left `Running` once its operation
/// returns, including on error paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Running,
    Completed,
    Failed,
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessStatus::Running => "running",
            ProcessStatus::Completed => "completed",
            ProcessStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for ProcessStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ProcessStatus::Running),
            "completed" => Ok(ProcessStatus::Completed),
            "failed" => Ok(ProcessStatus::Failed),
            other => Err(format!("unknown process status: {other}")),
        }
    }
}

/// A single error recorded against a job (per-URL failures never abort the
/// job; they accumulate here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub url: Option<String>,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl JobError {
    pub fn new(url: Option<String>, error: impl Into<String>) -> Self {
        Self {
            url,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

/// One run of the ingestion/sync/indexing pipeline against a website.
///
/// `metadata` is the free-form progress/lineage/document-state map described
/// in the interface contract; typed accessors for the well-known keys live in
/// [`crate::types::job::metadata`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessJob {
    pub id: Uuid,
    pub website_id: Uuid,
    pub process_type: ProcessType,
    pub status: ProcessStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub urls_discovered: i32,
    pub urls_updated: i32,
    pub urls_deleted: i32,
    pub urls_errored: i32,
    pub firecrawl_batch_ids: Vec<String>,
    pub errors: serde_json::Value,
    pub metadata: serde_json::Value,
}

impl ProcessJob {
    pub fn new(website_id: Uuid, process_type: ProcessType) -> Self {
        Self {
            id: Uuid::new_v4(),
            website_id,
            process_type,
            status: ProcessStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            urls_discovered: 0,
            urls_updated: 0,
            urls_deleted: 0,
            urls_errored: 0,
            firecrawl_batch_ids: Vec::new(),
            errors: serde_json::json!([]),
            metadata: serde_json::json!({}),
        }
    }

    /// A job is stuck if it's still `Running` and started more than
    /// `stale_after` ago with no newer heartbeat; the caller must still
    /// consult the crawler for `still_running` before treating it as dead
    /// (see `job_engine::recovery`).
    pub fn looks_stale(&self, now: DateTime<Utc>, stale_after: chrono::Duration) -> bool {
        self.status == ProcessStatus::Running && now - self.started_at > stale_after
    }

    pub fn errors_list(&self) -> Vec<JobError> {
        serde_json::from_value(self.errors.clone()).unwrap_or_default()
    }

    pub fn push_error(&mut self, err: JobError) {
        let mut errors = self.errors_list();
        errors.push(err);
        self.errors = serde_json::to_value(errors).expect("JobError serializes");
        self.urls_errored += 1;
    }
}

/// Typed accessors over [`ProcessJob::metadata`]'s well-known keys.
pub mod metadata {
    use super::ProcessJob;
    use serde_json::{json, Value};
    use uuid::Uuid;

    const PROGRESS: &str = "progress";
    const INGESTION_JOB_ID: &str = "ingestionJobId";
    const SYNC_JOB_ID: &str = "syncJobId";
    const DOCUMENT_STATES: &str = "documentStates";

    /// `syncJobId ?? ingestionJobId` -- the parent job an indexing run scopes
    /// its work selection to.
    pub fn parent_job_id(job: &ProcessJob) -> Option<Uuid> {
        read_uuid(job, SYNC_JOB_ID).or_else(|| read_uuid(job, INGESTION_JOB_ID))
    }

    pub fn set_ingestion_job_id(job: &mut ProcessJob, id: Uuid) {
        set_field(job, INGESTION_JOB_ID, json!(id.to_string()));
    }

    pub fn set_sync_job_id(job: &mut ProcessJob, id: Uuid) {
        set_field(job, SYNC_JOB_ID, json!(id.to_string()));
    }

    /// Progress snapshot written roughly every 30s while a batch fetch runs.
    /// `{completed, total, percentage}` is the contract the UI polls for
    /// (spec §4.4.1 step 7 / §6); `percentage` comes from
    /// [`crate::traits::crawler::BatchStatus::percentage`] so the formula
    /// lives in exactly one place.
    pub fn set_progress(job: &mut ProcessJob, status: &crate::traits::crawler::BatchStatus) {
        set_field(
            job,
            PROGRESS,
            json!({ "completed": status.completed, "total": status.total, "percentage": status.percentage() }),
        );
    }

    /// Final per-document upload outcome, keyed by page URL, written at the
    /// end of an indexing run.
    pub fn set_document_states(job: &mut ProcessJob, states: &std::collections::HashMap<String, String>) {
        set_field(job, DOCUMENT_STATES, json!(states));
    }

    fn read_uuid(job: &ProcessJob, key: &str) -> Option<Uuid> {
        job.metadata
            .get(key)
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    fn set_field(job: &mut ProcessJob, key: &str, value: Value) {
        if !job.metadata.is_object() {
            job.metadata = json!({});
        }
        job.metadata
            .as_object_mut()
            .expect("just ensured object")
            .insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_and_status_round_trip() {
        for t in [
            ProcessType::Ingestion,
            ProcessType::Sync,
            ProcessType::Indexing,
            ProcessType::ManualReindex,
        ] {
            assert_eq!(ProcessType::from_str(&t.to_string()).unwrap(), t);
        }
        for s in [ProcessStatus::Running, ProcessStatus::Completed, ProcessStatus::Failed] {
            assert_eq!(ProcessStatus::from_str(&s.to_string()).unwrap(), s);
        }
    }

    #[test]
    fn parent_job_id_prefers_sync_over_ingestion() {
        let mut job = ProcessJob::new(Uuid::new_v4(), ProcessType::Indexing);
        let ingestion_id = Uuid::new_v4();
        let sync_id = Uuid::new_v4();
        metadata::set_ingestion_job_id(&mut job, ingestion_id);
        assert_eq!(metadata::parent_job_id(&job), Some(ingestion_id));
        metadata::set_sync_job_id(&mut job, sync_id);
        assert_eq!(metadata::parent_job_id(&job), Some(sync_id));
    }

    #[test]
    fn push_error_increments_counter_and_appends() {
        let mut job = ProcessJob::new(Uuid::new_v4(), ProcessType::Ingestion);
        job.push_error(JobError::new(Some("https://x.test/".into()), "boom"));
        assert_eq!(job.urls_errored, 1);
        assert_eq!(job.errors_list().len(), 1);
    }
}
