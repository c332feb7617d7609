//! Crawler collaborator: URL discovery, single-page fetch, and batch fetch
//! with polling. The core never crawls directly -- it only depends on this
//! trait; the crawling service is an external collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;

use crate::error::{CoreError, Result, SecurityError, SecurityResult};
use crate::types::config::MapOptions;

/// A single page returned by `map`. Crawlers may return either bare URL
/// strings or objects carrying a title/description; both normalize to this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapLink {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
}

impl From<String> for MapLink {
    fn from(url: String) -> Self {
        Self {
            url,
            title: None,
            description: None,
        }
    }
}

/// Page metadata as returned by `scrape`/`batch_fetch`: carries `sourceURL`,
/// `statusCode`, and the optional descriptive fields. Unknown fields
/// collected by the crawler are preserved in `extra` rather than dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapedMetadata {
    pub source_url: String,
    pub status_code: Option<i32>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub og_image: Option<String>,
    pub language: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One scraped page: the markdown the crawler fetched, plus its metadata.
/// `markdown` is `None` when the crawler reported the page but returned no
/// content (the complete-write rule discards these at the call site).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedPage {
    pub markdown: Option<String>,
    pub html: Option<String>,
    pub metadata: ScrapedMetadata,
}

/// Status of an in-flight or finished batch fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Scraping,
    Completed,
    Failed,
}

/// Snapshot of a batch fetch's progress, returned by `batch_status` and fed
/// into `batch_wait`'s `on_progress` callback.
#[derive(Debug, Clone)]
pub struct BatchStatus {
    pub state: BatchState,
    pub completed: usize,
    pub total: usize,
    pub data: Vec<ScrapedPage>,
    pub error: Option<String>,
}

impl BatchStatus {
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.completed as f64 / self.total as f64) * 100.0
        }
    }
}

/// Options controlling `batch_wait`'s poll loop.
#[derive(Clone, Copy)]
pub struct WaitOptions {
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

/// Crawler collaborator. Implementors talk to whatever crawling service the
/// host has wired up (Firecrawl, an internal spider, ...); the Job Engine
/// only ever calls through this trait.
#[async_trait]
pub trait Crawler: Send + Sync {
    /// Discover every URL reachable from `seed`.
    async fn map(&self, seed: &str, options: &MapOptions) -> Result<Vec<MapLink>>;

    /// Fetch a single URL.
    async fn scrape(&self, url: &str) -> Result<ScrapedPage>;

    /// Start an asynchronous batch fetch over `urls`, returning a job id the
    /// caller polls with `batch_status`.
    async fn batch_start(&self, urls: &[String]) -> Result<String>;

    /// Poll the current status of a batch fetch.
    async fn batch_status(&self, job_id: &str) -> Result<BatchStatus>;

    /// Cancel an in-flight batch fetch.
    async fn batch_cancel(&self, job_id: &str) -> Result<()>;

    /// Fetch several URLs one at a time, logging and skipping failures
    /// rather than aborting the whole call. Used by sync's self-healing
    /// retry phase, which fetches a small, already-known set of URLs rather
    /// than running a full batch job.
    async fn fetch_many(&self, urls: &[String]) -> Vec<(String, Result<ScrapedPage>)> {
        let mut results = Vec::with_capacity(urls.len());
        for url in urls {
            let result = self.scrape(url).await;
            if let Err(ref e) = result {
                tracing::warn!(url = %url, error = %e, "scrape failed");
            }
            results.push((url.clone(), result));
        }
        results
    }
}

/// Poll `crawler.batch_status(job_id)` until the batch completes, fails, or
/// `options`'s deadline elapses, invoking `on_progress` with the latest
/// snapshot after each poll so the Job Engine can persist
/// `metadata.progress` without its own timer.
///
/// `on_progress` returns a future that is awaited in place before the next
/// poll -- not spawned -- so a progress write can never be reordered after
/// the job's own finalization update once this function returns; the
/// caller's `update_job` for `status='completed'`/`'failed'` is always the
/// last write this job row sees for the batch it just waited on.
///
/// A free function rather than a `Crawler` default method: a generic
/// `on_progress` parameter would make the trait non-object-safe, and the
/// Job Engine always holds crawlers as `Arc<dyn Crawler>`.
pub async fn wait_for_batch<F, Fut>(
    crawler: &(dyn Crawler),
    job_id: &str,
    options: WaitOptions,
    mut on_progress: F,
) -> Result<BatchStatus>
where
    F: FnMut(&BatchStatus) -> Fut + Send,
    Fut: std::future::Future<Output = ()> + Send,
{
    let deadline = tokio::time::Instant::now() + options.max_wait;
    loop {
        let status = crawler.batch_status(job_id).await?;
        on_progress(&status).await;
        match status.state {
            BatchState::Completed | BatchState::Failed => return Ok(status),
            BatchState::Scraping => {}
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Err(CoreError::DeadlineExceeded {
                what: format!("batch fetch {job_id}"),
            });
        }
        tokio::time::sleep(options.poll_interval.min(deadline.saturating_duration_since(now))).await;
    }
}

/// SSRF-safe URL validation applied before any URL reaches a `Crawler`
/// implementation. Not part of the Crawler contract itself -- a hardening
/// wrapper the Job Engine applies at its own boundary.
#[derive(Debug, Clone)]
pub struct UrlValidator {
    allowed_schemes: HashSet<String>,
    blocked_hosts: HashSet<String>,
    blocked_cidrs: Vec<ipnet::IpNet>,
}

impl Default for UrlValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlValidator {
    pub fn new() -> Self {
        Self {
            allowed_schemes: ["http", "https"].into_iter().map(String::from).collect(),
            blocked_hosts: [
                "localhost",
                "127.0.0.1",
                "::1",
                "[::1]",
                "0.0.0.0",
                "metadata.google.internal",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            blocked_cidrs: vec![
                "10.0.0.0/8".parse().unwrap(),
                "172.16.0.0/12".parse().unwrap(),
                "192.168.0.0/16".parse().unwrap(),
                "169.254.0.0/16".parse().unwrap(),
                "127.0.0.0/8".parse().unwrap(),
                "::1/128".parse().unwrap(),
                "fc00::/7".parse().unwrap(),
                "fe80::/10".parse().unwrap(),
            ],
        }
    }

    pub fn validate(&self, url: &str) -> SecurityResult<()> {
        let parsed = url::Url::parse(url)?;
        if !self.allowed_schemes.contains(parsed.scheme()) {
            return Err(SecurityError::DisallowedScheme(parsed.scheme().to_string()));
        }
        let host = parsed.host_str().ok_or(SecurityError::NoHost)?;
        if self.blocked_hosts.contains(host) {
            return Err(SecurityError::BlockedHost(host.to_string()));
        }
        if let Ok(ip) = host.parse::<IpAddr>() {
            for cidr in &self.blocked_cidrs {
                if cidr.contains(&ip) {
                    return Err(SecurityError::BlockedCidr(ip.to_string()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_localhost_and_private_ranges() {
        let v = UrlValidator::new();
        assert!(v.validate("http://localhost/").is_err());
        assert!(v.validate("http://10.0.0.5/").is_err());
        assert!(v.validate("http://169.254.169.254/").is_err());
        assert!(v.validate("file:///etc/passwd").is_err());
    }

    #[test]
    fn allows_public_https() {
        let v = UrlValidator::new();
        assert!(v.validate("https://example.com/").is_ok());
    }

    #[test]
    fn batch_status_percentage() {
        let status = BatchStatus {
            state: BatchState::Scraping,
            completed: 3,
            total: 12,
            data: vec![],
            error: None,
        };
        assert_eq!(status.percentage(), 25.0);
    }
}
