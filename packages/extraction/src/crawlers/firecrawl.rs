//! Firecrawl-backed `Crawler`: the crawling service collaborator.
//!
//! Maps the trait's three operations onto Firecrawl's v1 API the way the
//! API itself separates them: `map` onto `/v1/map` (URL discovery from a
//! seed), `scrape` onto `/v1/scrape` (single-page fetch), and
//! `batch_start`/`batch_status`/`batch_cancel` onto `/v1/batch/scrape`
//! (fetch a known list of URLs, polled by id) rather than `/v1/crawl`,
//! which re-discovers URLs itself and would duplicate `map`.
//!
//! Requires the `firecrawl` feature.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{CoreError, Result};
use crate::traits::crawler::{BatchState, BatchStatus, Crawler, MapLink, ScrapedMetadata, ScrapedPage};
use crate::types::config::MapOptions;

const FIRECRAWL_API_URL: &str = "https://api.firecrawl.dev/v1";

/// `Crawler` adapter backed by the Firecrawl API.
pub struct FirecrawlCrawler {
    client: Client,
    api_key: SecretBox<str>,
}

#[derive(Serialize)]
struct MapRequest {
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    search: Option<String>,
    #[serde(rename = "includeSubdomains")]
    include_subdomains: bool,
    limit: usize,
    #[serde(rename = "timeout", skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<u64>,
}

#[derive(Deserialize)]
struct MapResponse {
    success: bool,
    #[serde(default)]
    links: Vec<String>,
    error: Option<String>,
}

#[derive(Serialize)]
struct ScrapeRequest<'a> {
    url: &'a str,
    formats: Vec<&'static str>,
    #[serde(rename = "onlyMainContent")]
    only_main_content: bool,
}

#[derive(Deserialize)]
struct ScrapeResponse {
    success: bool,
    data: Option<ScrapeData>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct ScrapeData {
    markdown: Option<String>,
    html: Option<String>,
    metadata: Option<FirecrawlMetadata>,
}

#[derive(Deserialize)]
struct FirecrawlMetadata {
    #[serde(rename = "sourceURL", default)]
    source_url: String,
    #[serde(rename = "statusCode")]
    status_code: Option<i32>,
    title: Option<String>,
    description: Option<String>,
    #[serde(rename = "ogImage")]
    og_image: Option<String>,
    language: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl From<FirecrawlMetadata> for ScrapedMetadata {
    fn from(m: FirecrawlMetadata) -> Self {
        Self {
            source_url: m.source_url,
            status_code: m.status_code,
            title: m.title,
            description: m.description,
            og_image: m.og_image,
            language: m.language,
            extra: m.extra,
        }
    }
}

#[derive(Serialize)]
struct BatchStartRequest<'a> {
    urls: &'a [String],
    formats: Vec<&'static str>,
    #[serde(rename = "onlyMainContent")]
    only_main_content: bool,
}

#[derive(Deserialize)]
struct BatchStartResponse {
    success: bool,
    id: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct BatchStatusResponse {
    status: String,
    #[serde(default)]
    completed: usize,
    #[serde(default)]
    total: usize,
    data: Option<Vec<ScrapeData>>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct BatchCancelResponse {
    #[allow(dead_code)]
    success: bool,
}

impl FirecrawlCrawler {
    /// Build a crawler with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| CoreError::Crawler(Box::new(e)))?;
        Ok(Self {
            client,
            api_key: SecretBox::new(Box::from(api_key.into().as_str())),
        })
    }

    /// Build from the `FIRECRAWL_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("FIRECRAWL_API_KEY").map_err(|_| CoreError::Validation {
            reason: "FIRECRAWL_API_KEY environment variable not set".to_string(),
        })?;
        Self::new(api_key)
    }

    async fn post<T: Serialize, R: for<'de> Deserialize<'de>>(&self, endpoint: &str, body: &T) -> Result<R> {
        let response = self
            .client
            .post(format!("{FIRECRAWL_API_URL}{endpoint}"))
            .header("Authorization", format!("Bearer {}", self.api_key.expose_secret()))
            .json(body)
            .send()
            .await
            .map_err(|e| CoreError::Crawler(Box::new(e)))?;
        Self::parse(response).await
    }

    async fn get<R: for<'de> Deserialize<'de>>(&self, endpoint: &str) -> Result<R> {
        let response = self
            .client
            .get(format!("{FIRECRAWL_API_URL}{endpoint}"))
            .header("Authorization", format!("Bearer {}", self.api_key.expose_secret()))
            .send()
            .await
            .map_err(|e| CoreError::Crawler(Box::new(e)))?;
        Self::parse(response).await
    }

    async fn delete(&self, endpoint: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{FIRECRAWL_API_URL}{endpoint}"))
            .header("Authorization", format!("Bearer {}", self.api_key.expose_secret()))
            .send()
            .await
            .map_err(|e| CoreError::Crawler(Box::new(e)))?;
        let _: BatchCancelResponse = Self::parse(response).await?;
        Ok(())
    }

    async fn parse<R: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<R> {
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CoreError::Crawler(Box::new(std::io::Error::other(format!(
                "Firecrawl API error: {status} - {text}"
            )))));
        }
        response.json().await.map_err(|e| CoreError::Crawler(Box::new(e)))
    }
}

fn data_to_scraped_page(data: ScrapeData) -> ScrapedPage {
    ScrapedPage {
        markdown: data.markdown,
        html: data.html,
        metadata: data.metadata.map(Into::into).unwrap_or_default(),
    }
}

#[async_trait]
impl Crawler for FirecrawlCrawler {
    async fn map(&self, seed: &str, options: &MapOptions) -> Result<Vec<MapLink>> {
        let request = MapRequest {
            url: seed.to_string(),
            search: options.search.clone(),
            include_subdomains: options.include_subdomains,
            limit: options.limit,
            timeout_ms: options.timeout.map(|d| d.as_millis() as u64),
        };
        let response: MapResponse = self.post("/map", &request).await?;
        if !response.success {
            return Err(CoreError::Crawler(Box::new(std::io::Error::other(
                response.error.unwrap_or_else(|| "Firecrawl map failed".to_string()),
            ))));
        }
        Ok(response.links.into_iter().map(MapLink::from).collect())
    }

    async fn scrape(&self, url: &str) -> Result<ScrapedPage> {
        let request = ScrapeRequest {
            url,
            formats: vec!["markdown"],
            only_main_content: true,
        };
        let response: ScrapeResponse = self.post("/scrape", &request).await?;
        if !response.success {
            return Err(CoreError::Crawler(Box::new(std::io::Error::other(
                response.error.unwrap_or_else(|| "Firecrawl scrape failed".to_string()),
            ))));
        }
        let data = response
            .data
            .ok_or_else(|| CoreError::Crawler(Box::new(std::io::Error::other("no data returned from Firecrawl"))))?;
        Ok(data_to_scraped_page(data))
    }

    async fn batch_start(&self, urls: &[String]) -> Result<String> {
        let request = BatchStartRequest {
            urls,
            formats: vec!["markdown"],
            only_main_content: true,
        };
        let response: BatchStartResponse = self.post("/batch/scrape", &request).await?;
        if !response.success {
            return Err(CoreError::Crawler(Box::new(std::io::Error::other(
                response.error.unwrap_or_else(|| "failed to start Firecrawl batch scrape".to_string()),
            ))));
        }
        response
            .id
            .ok_or_else(|| CoreError::Crawler(Box::new(std::io::Error::other("no batch id returned"))))
    }

    async fn batch_status(&self, job_id: &str) -> Result<BatchStatus> {
        let response: BatchStatusResponse = self.get(&format!("/batch/scrape/{job_id}")).await?;
        let state = match response.status.as_str() {
            "completed" => BatchState::Completed,
            "failed" => BatchState::Failed,
            _ => BatchState::Scraping,
        };
        Ok(BatchStatus {
            state,
            completed: response.completed,
            total: response.total,
            data: response.data.unwrap_or_default().into_iter().map(data_to_scraped_page).collect(),
            error: response.error,
        })
    }

    async fn batch_cancel(&self, job_id: &str) -> Result<()> {
        self.delete(&format!("/batch/scrape/{job_id}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_succeeds_without_validating_the_key() {
        assert!(FirecrawlCrawler::new("test-key").is_ok());
    }

    #[test]
    fn scrape_data_without_metadata_falls_back_to_default() {
        let page = data_to_scraped_page(ScrapeData {
            markdown: Some("# hi".to_string()),
            html: None,
            metadata: None,
        });
        assert_eq!(page.markdown.as_deref(), Some("# hi"));
        assert_eq!(page.metadata.source_url, "");
    }

    #[test]
    fn firecrawl_metadata_converts_known_fields_and_preserves_unknown_ones() {
        let raw = serde_json::json!({
            "sourceURL": "https://example.com/",
            "statusCode": 200,
            "title": "Example",
            "ogImage": "https://example.com/og.png",
            "customField": "kept",
        });
        let parsed: FirecrawlMetadata = serde_json::from_value(raw).unwrap();
        let metadata: ScrapedMetadata = parsed.into();
        assert_eq!(metadata.source_url, "https://example.com/");
        assert_eq!(metadata.status_code, Some(200));
        assert_eq!(metadata.title.as_deref(), Some("Example"));
        assert_eq!(metadata.extra.get("customField").unwrap(), "kept");
    }

    #[test]
    fn batch_status_maps_firecrawl_status_strings() {
        for (raw, expected) in [("completed", BatchState::Completed), ("failed", BatchState::Failed), ("scraping", BatchState::Scraping)] {
            let state = match raw {
                "completed" => BatchState::Completed,
                "failed" => BatchState::Failed,
                _ => BatchState::Scraping,
            };
            assert_eq!(state, expected);
        }
    }
}
