//! Host-supplied runtime configuration (§6 Configuration).
//!
//! Every tunable the interface contract lists is a field here with the
//! documented default; the Job Engine never hardcodes one of these values
//! directly. `from_env()` reads plain `CORE_*` environment variables with a
//! default fallback for anything unset or unparseable; loading `.env` files
//! (via `dotenvy`) and failing hard on missing required config is the host
//! application's concern, not this crate's -- its own config surface is a
//! handful of tunables, all individually optional.

use std::time::Duration;

/// Runtime tuning for the Job Engine and its collaborators.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Consecutive missing syncs before a page is queued for deletion.
    pub deletion_threshold: i32,
    /// Poll interval while waiting on a batch fetch.
    pub batch_poll_interval: Duration,
    /// Maximum time to wait for a batch fetch before giving up.
    pub batch_max_wait: Duration,
    /// Concurrent uploads per indexing run.
    pub upload_concurrency: usize,
    /// Backoff before retrying a single rate-limited upload.
    pub upload_retry_backoff: Duration,
    /// Maximum retries for a single upload.
    pub upload_max_retries: u32,
    /// Delay after upload before checking the document's state.
    pub verification_delay: Duration,
    /// Poll interval for a long-running search-store operation.
    pub operation_poll_interval: Duration,
    /// Maximum time to wait for a search-store operation.
    pub operation_max_wait: Duration,
    /// Pause between successive upload batches.
    pub inter_batch_pause: Duration,
    /// Maximum pages processed by a single indexing run.
    pub indexing_page_cap: usize,
    /// Age after which a `running` job is considered for recovery.
    pub recovery_stale_after: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            deletion_threshold: 3,
            batch_poll_interval: Duration::from_secs(5),
            batch_max_wait: Duration::from_secs(10 * 60),
            upload_concurrency: 5,
            upload_retry_backoff: Duration::from_secs(2),
            upload_max_retries: 3,
            verification_delay: Duration::from_secs(3),
            operation_poll_interval: Duration::from_secs(2),
            operation_max_wait: Duration::from_secs(5 * 60),
            inter_batch_pause: Duration::from_millis(500),
            indexing_page_cap: 200,
            recovery_stale_after: Duration::from_secs(60),
        }
    }
}

impl CoreConfig {
    /// Load overrides from the environment, falling back to the documented
    /// defaults for anything unset. Never fails: every variable here is
    /// optional, unlike the host application's required `DATABASE_URL`-style
    /// config, which is the host's own responsibility, not this crate's.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = parse_env("CORE_DELETION_THRESHOLD") {
            config.deletion_threshold = v;
        }
        if let Some(v) = parse_env_secs("CORE_BATCH_POLL_INTERVAL_SECS") {
            config.batch_poll_interval = v;
        }
        if let Some(v) = parse_env_secs("CORE_BATCH_MAX_WAIT_SECS") {
            config.batch_max_wait = v;
        }
        if let Some(v) = parse_env("CORE_UPLOAD_CONCURRENCY") {
            config.upload_concurrency = v;
        }
        if let Some(v) = parse_env_secs("CORE_UPLOAD_RETRY_BACKOFF_SECS") {
            config.upload_retry_backoff = v;
        }
        if let Some(v) = parse_env("CORE_UPLOAD_MAX_RETRIES") {
            config.upload_max_retries = v;
        }
        if let Some(v) = parse_env_secs("CORE_VERIFICATION_DELAY_SECS") {
            config.verification_delay = v;
        }
        if let Some(v) = parse_env_secs("CORE_OPERATION_POLL_INTERVAL_SECS") {
            config.operation_poll_interval = v;
        }
        if let Some(v) = parse_env_secs("CORE_OPERATION_MAX_WAIT_SECS") {
            config.operation_max_wait = v;
        }
        if let Some(v) = parse_env("CORE_INDEXING_PAGE_CAP") {
            config.indexing_page_cap = v;
        }
        if let Some(v) = parse_env_secs("CORE_RECOVERY_STALE_AFTER_SECS") {
            config.recovery_stale_after = v;
        }

        config
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn parse_env_secs(key: &str) -> Option<Duration> {
    parse_env::<u64>(key).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_interface_contract() {
        let config = CoreConfig::default();
        assert_eq!(config.deletion_threshold, 3);
        assert_eq!(config.batch_poll_interval, Duration::from_secs(5));
        assert_eq!(config.batch_max_wait, Duration::from_secs(600));
        assert_eq!(config.upload_concurrency, 5);
        assert_eq!(config.indexing_page_cap, 200);
        assert_eq!(config.recovery_stale_after, Duration::from_secs(60));
    }
}
