//! PostgreSQL-backed [`WebsiteStore`]/[`PageStore`]/[`JobStore`].
//!
//! Runtime-checked queries (`sqlx::query`/`query_as`, not the compile-time
//! `query!` macros) so the crate builds without a live database at compile
//! time. Schema is applied via idempotent `CREATE TABLE IF NOT EXISTS`
//! migrations tracked in a migrations table.
//!
//! The domain types in [`crate::types`] never derive `sqlx::FromRow` or
//! implement `sqlx::Type`/`Decode`/`Encode` themselves (`sqlx` is an
//! optional dependency gated by the `postgres` feature; teaching the core
//! types about it directly would make them uncompilable without that
//! feature). Instead each query is mapped through a private row struct
//! local to this file, with enum columns round-tripped through
//! `Display`/`FromStr`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::str::FromStr;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::traits::store::{JobStore, PageStore, PageUpdate, ReadyPagesOptions, WebsiteStore, WebsiteUpdate};
use crate::types::job::{ProcessJob, ProcessStatus, ProcessType};
use crate::types::page::{Page, PageStatus};
use crate::types::website::Website;

fn storage_err(e: sqlx::Error) -> CoreError {
    CoreError::Store(Box::new(e))
}

fn parse_err(what: &str, value: &str, err: String) -> CoreError {
    CoreError::Store(Box::new(std::io::Error::other(format!("invalid {what} {value:?}: {err}"))))
}

/// PostgreSQL page store.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(storage_err)?;
        Self::from_pool(pool).await
    }

    /// Build from an existing pool (e.g. one the host application already
    /// owns), running migrations against it.
    pub async fn from_pool(pool: PgPool) -> Result<Self> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    #[instrument(skip(self))]
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS extraction_migrations (
                name TEXT PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        let migrations: [(&str, &str); 3] = [
            ("001_websites", MIGRATION_WEBSITES),
            ("002_pages", MIGRATION_PAGES),
            ("003_process_jobs", MIGRATION_PROCESS_JOBS),
        ];

        for (name, sql) in migrations {
            let applied: Option<(String,)> = sqlx::query_as("SELECT name FROM extraction_migrations WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_err)?;

            if applied.is_some() {
                continue;
            }

            sqlx::raw_sql(sql).execute(&self.pool).await.map_err(storage_err)?;

            sqlx::query("INSERT INTO extraction_migrations (name) VALUES ($1)")
                .bind(name)
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }

        Ok(())
    }
}

const MIGRATION_WEBSITES: &str = r#"
CREATE TABLE IF NOT EXISTS websites (
    id UUID PRIMARY KEY,
    seed_url TEXT NOT NULL,
    base_domain TEXT NOT NULL UNIQUE,
    display_name TEXT,
    search_store_id TEXT,
    search_store_display_name TEXT,
    last_full_crawl TIMESTAMPTZ,
    created_by_ingestion_id UUID NOT NULL,
    deleted_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_websites_base_domain ON websites(base_domain) WHERE deleted_at IS NULL;
"#;

const MIGRATION_PAGES: &str = r#"
CREATE TABLE IF NOT EXISTS pages (
    id UUID PRIMARY KEY,
    website_id UUID NOT NULL REFERENCES websites(id),
    url TEXT NOT NULL,
    path TEXT NOT NULL,
    title TEXT,
    status TEXT NOT NULL,
    content_hash TEXT,
    markdown TEXT,
    last_http_status INT,
    firecrawl_scrape_count INT NOT NULL DEFAULT 0,
    missing_count INT NOT NULL DEFAULT 0,
    last_scraped TIMESTAMPTZ,
    last_seen TIMESTAMPTZ,
    search_file_id TEXT,
    search_file_name TEXT,
    metadata JSONB NOT NULL DEFAULT '{}',
    created_by_ingestion_id UUID,
    created_by_sync_id UUID,
    last_updated_by_sync_id UUID,
    firecrawl_batch_id TEXT,
    error_message TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    UNIQUE(website_id, url)
);
CREATE INDEX IF NOT EXISTS idx_pages_website_status ON pages(website_id, status);
CREATE INDEX IF NOT EXISTS idx_pages_website_missing ON pages(website_id, missing_count);
"#;

const MIGRATION_PROCESS_JOBS: &str = r#"
CREATE TABLE IF NOT EXISTS process_jobs (
    id UUID PRIMARY KEY,
    website_id UUID NOT NULL REFERENCES websites(id),
    process_type TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TIMESTAMPTZ NOT NULL,
    completed_at TIMESTAMPTZ,
    urls_discovered INT NOT NULL DEFAULT 0,
    urls_updated INT NOT NULL DEFAULT 0,
    urls_deleted INT NOT NULL DEFAULT 0,
    urls_errored INT NOT NULL DEFAULT 0,
    firecrawl_batch_ids TEXT[] NOT NULL DEFAULT '{}',
    errors JSONB NOT NULL DEFAULT '[]',
    metadata JSONB NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_process_jobs_website ON process_jobs(website_id, started_at DESC);
"#;

/// Row shape returned by every `websites` query; `Website` has no enum
/// columns, so this is a 1:1 field mirror kept private to isolate `sqlx`.
#[derive(sqlx::FromRow)]
struct WebsiteRow {
    id: Uuid,
    seed_url: String,
    base_domain: String,
    display_name: Option<String>,
    search_store_id: Option<String>,
    search_store_display_name: Option<String>,
    last_full_crawl: Option<DateTime<Utc>>,
    created_by_ingestion_id: Uuid,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<WebsiteRow> for Website {
    fn from(r: WebsiteRow) -> Self {
        Website {
            id: r.id,
            seed_url: r.seed_url,
            base_domain: r.base_domain,
            display_name: r.display_name,
            search_store_id: r.search_store_id,
            search_store_display_name: r.search_store_display_name,
            last_full_crawl: r.last_full_crawl,
            created_by_ingestion_id: r.created_by_ingestion_id,
            deleted_at: r.deleted_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

/// Row shape returned by every `pages` query; `status` is `TEXT` on the wire
/// and parsed into [`PageStatus`] on the way out.
#[derive(sqlx::FromRow)]
struct PageRow {
    id: Uuid,
    website_id: Uuid,
    url: String,
    path: String,
    title: Option<String>,
    status: String,
    content_hash: Option<String>,
    markdown: Option<String>,
    last_http_status: Option<i32>,
    firecrawl_scrape_count: i32,
    missing_count: i32,
    last_scraped: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
    search_file_id: Option<String>,
    search_file_name: Option<String>,
    metadata: serde_json::Value,
    created_by_ingestion_id: Option<Uuid>,
    created_by_sync_id: Option<Uuid>,
    last_updated_by_sync_id: Option<Uuid>,
    firecrawl_batch_id: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PageRow> for Page {
    type Error = CoreError;

    fn try_from(r: PageRow) -> Result<Self> {
        Ok(Page {
            id: r.id,
            website_id: r.website_id,
            url: r.url,
            path: r.path,
            title: r.title,
            status: PageStatus::from_str(&r.status).map_err(|e| parse_err("page status", &r.status, e))?,
            content_hash: r.content_hash,
            markdown: r.markdown,
            last_http_status: r.last_http_status,
            firecrawl_scrape_count: r.firecrawl_scrape_count,
            missing_count: r.missing_count,
            last_scraped: r.last_scraped,
            last_seen: r.last_seen,
            search_file_id: r.search_file_id,
            search_file_name: r.search_file_name,
            metadata: r.metadata,
            created_by_ingestion_id: r.created_by_ingestion_id,
            created_by_sync_id: r.created_by_sync_id,
            last_updated_by_sync_id: r.last_updated_by_sync_id,
            firecrawl_batch_id: r.firecrawl_batch_id,
            error_message: r.error_message,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

fn rows_to_pages(rows: Vec<PageRow>) -> Result<Vec<Page>> {
    rows.into_iter().map(Page::try_from).collect()
}

/// Row shape returned by every `process_jobs` query; `process_type`/`status`
/// are `TEXT` on the wire and parsed into their enums on the way out.
#[derive(sqlx::FromRow)]
struct ProcessJobRow {
    id: Uuid,
    website_id: Uuid,
    process_type: String,
    status: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    urls_discovered: i32,
    urls_updated: i32,
    urls_deleted: i32,
    urls_errored: i32,
    firecrawl_batch_ids: Vec<String>,
    errors: serde_json::Value,
    metadata: serde_json::Value,
}

impl TryFrom<ProcessJobRow> for ProcessJob {
    type Error = CoreError;

    fn try_from(r: ProcessJobRow) -> Result<Self> {
        Ok(ProcessJob {
            id: r.id,
            website_id: r.website_id,
            process_type: ProcessType::from_str(&r.process_type)
                .map_err(|e| parse_err("process type", &r.process_type, e))?,
            status: ProcessStatus::from_str(&r.status).map_err(|e| parse_err("process status", &r.status, e))?,
            started_at: r.started_at,
            completed_at: r.completed_at,
            urls_discovered: r.urls_discovered,
            urls_updated: r.urls_updated,
            urls_deleted: r.urls_deleted,
            urls_errored: r.urls_errored,
            firecrawl_batch_ids: r.firecrawl_batch_ids,
            errors: r.errors,
            metadata: r.metadata,
        })
    }
}

fn rows_to_jobs(rows: Vec<ProcessJobRow>) -> Result<Vec<ProcessJob>> {
    rows.into_iter().map(ProcessJob::try_from).collect()
}

#[async_trait]
impl WebsiteStore for PostgresStore {
    #[instrument(skip(self, website))]
    async fn create_website(&self, website: &Website) -> Result<Website> {
        sqlx::query_as::<_, WebsiteRow>(
            r#"
            INSERT INTO websites (
                id, seed_url, base_domain, display_name, search_store_id,
                search_store_display_name, last_full_crawl, created_by_ingestion_id,
                deleted_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(website.id)
        .bind(&website.seed_url)
        .bind(&website.base_domain)
        .bind(&website.display_name)
        .bind(&website.search_store_id)
        .bind(&website.search_store_display_name)
        .bind(website.last_full_crawl)
        .bind(website.created_by_ingestion_id)
        .bind(website.deleted_at)
        .bind(website.created_at)
        .bind(website.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)
        .map(Into::into)
    }

    #[instrument(skip(self))]
    async fn get_website(&self, id: Uuid) -> Result<Option<Website>> {
        sqlx::query_as::<_, WebsiteRow>("SELECT * FROM websites WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)
            .map(|row| row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn get_website_by_base_domain(&self, base_domain: &str) -> Result<Option<Website>> {
        sqlx::query_as::<_, WebsiteRow>("SELECT * FROM websites WHERE base_domain = $1 AND deleted_at IS NULL")
            .bind(base_domain)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)
            .map(|row| row.map(Into::into))
    }

    #[instrument(skip(self, patch))]
    async fn update_website(&self, id: Uuid, patch: WebsiteUpdate) -> Result<Website> {
        let current = self
            .get_website(id)
            .await?
            .ok_or_else(|| CoreError::NotFound { what: format!("website {id}") })?;

        let display_name = patch.display_name.unwrap_or(current.display_name);
        let search_store_id = patch.search_store_id.unwrap_or(current.search_store_id);
        let search_store_display_name = patch.search_store_display_name.unwrap_or(current.search_store_display_name);
        let last_full_crawl = patch.last_full_crawl.unwrap_or(current.last_full_crawl);
        let created_by_ingestion_id = patch.created_by_ingestion_id.unwrap_or(current.created_by_ingestion_id);

        sqlx::query_as::<_, WebsiteRow>(
            r#"
            UPDATE websites SET
                display_name = $2,
                search_store_id = $3,
                search_store_display_name = $4,
                last_full_crawl = $5,
                created_by_ingestion_id = $6,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(display_name)
        .bind(search_store_id)
        .bind(search_store_display_name)
        .bind(last_full_crawl)
        .bind(created_by_ingestion_id)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)
        .map(Into::into)
    }

    #[instrument(skip(self))]
    async fn list_websites(&self) -> Result<Vec<Website>> {
        sqlx::query_as::<_, WebsiteRow>("SELECT * FROM websites WHERE deleted_at IS NULL ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)
            .map(|rows| rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn soft_delete_website(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE websites SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

#[async_trait]
impl PageStore for PostgresStore {
    #[instrument(skip(self, page))]
    async fn create_page(&self, page: &Page) -> Result<Page> {
        insert_page(&self.pool, page).await
    }

    #[instrument(skip(self, pages))]
    async fn bulk_create_pages(&self, pages: &[Page]) -> Result<Vec<Page>> {
        let mut out = Vec::with_capacity(pages.len());
        for page in pages {
            out.push(insert_page(&self.pool, page).await?);
        }
        Ok(out)
    }

    #[instrument(skip(self, page))]
    async fn upsert_page(&self, page: Page) -> Result<Page> {
        sqlx::query_as::<_, PageRow>(
            r#"
            INSERT INTO pages (
                id, website_id, url, path, title, status, content_hash, markdown,
                last_http_status, firecrawl_scrape_count, missing_count, last_scraped,
                last_seen, search_file_id, search_file_name, metadata,
                created_by_ingestion_id, created_by_sync_id, last_updated_by_sync_id,
                firecrawl_batch_id, error_message, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23)
            ON CONFLICT (website_id, url) DO UPDATE SET
                path = EXCLUDED.path,
                title = EXCLUDED.title,
                status = EXCLUDED.status,
                content_hash = EXCLUDED.content_hash,
                markdown = EXCLUDED.markdown,
                last_http_status = EXCLUDED.last_http_status,
                firecrawl_scrape_count = EXCLUDED.firecrawl_scrape_count,
                missing_count = EXCLUDED.missing_count,
                last_scraped = EXCLUDED.last_scraped,
                last_seen = EXCLUDED.last_seen,
                metadata = EXCLUDED.metadata,
                created_by_sync_id = EXCLUDED.created_by_sync_id,
                last_updated_by_sync_id = EXCLUDED.last_updated_by_sync_id,
                firecrawl_batch_id = EXCLUDED.firecrawl_batch_id,
                error_message = EXCLUDED.error_message,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(page.id)
        .bind(page.website_id)
        .bind(&page.url)
        .bind(&page.path)
        .bind(&page.title)
        .bind(page.status.to_string())
        .bind(&page.content_hash)
        .bind(&page.markdown)
        .bind(page.last_http_status)
        .bind(page.firecrawl_scrape_count)
        .bind(page.missing_count)
        .bind(page.last_scraped)
        .bind(page.last_seen)
        .bind(&page.search_file_id)
        .bind(&page.search_file_name)
        .bind(&page.metadata)
        .bind(page.created_by_ingestion_id)
        .bind(page.created_by_sync_id)
        .bind(page.last_updated_by_sync_id)
        .bind(&page.firecrawl_batch_id)
        .bind(&page.error_message)
        .bind(page.created_at)
        .bind(page.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)
        .and_then(Page::try_from)
    }

    #[instrument(skip(self, pages))]
    async fn bulk_upsert_pages(&self, pages: Vec<Page>) -> Result<Vec<Page>> {
        let mut out = Vec::with_capacity(pages.len());
        for page in pages {
            out.push(self.upsert_page(page).await?);
        }
        Ok(out)
    }

    #[instrument(skip(self))]
    async fn get_page(&self, id: Uuid) -> Result<Option<Page>> {
        sqlx::query_as::<_, PageRow>("SELECT * FROM pages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?
            .map(Page::try_from)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn get_page_by_url(&self, website_id: Uuid, url: &str) -> Result<Option<Page>> {
        sqlx::query_as::<_, PageRow>("SELECT * FROM pages WHERE website_id = $1 AND url = $2")
            .bind(website_id)
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?
            .map(Page::try_from)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn list_pages_by_website(&self, website_id: Uuid, status: Option<PageStatus>) -> Result<Vec<Page>> {
        let rows = match status {
            Some(status) => sqlx::query_as::<_, PageRow>(
                "SELECT * FROM pages WHERE website_id = $1 AND status = $2 ORDER BY updated_at",
            )
            .bind(website_id)
            .bind(status.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?,
            None => sqlx::query_as::<_, PageRow>("SELECT * FROM pages WHERE website_id = $1 ORDER BY updated_at")
                .bind(website_id)
                .fetch_all(&self.pool)
                .await
                .map_err(storage_err)?,
        };
        rows_to_pages(rows)
    }

    #[instrument(skip(self))]
    async fn get_pages_by_statuses(&self, website_id: Uuid, statuses: &[PageStatus]) -> Result<Vec<Page>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.to_string()).collect();
        let rows = sqlx::query_as::<_, PageRow>(
            "SELECT * FROM pages WHERE website_id = $1 AND status = ANY($2) ORDER BY updated_at",
        )
        .bind(website_id)
        .bind(&statuses)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows_to_pages(rows)
    }

    #[instrument(skip(self, opts))]
    async fn get_pages_ready_for_indexing(&self, website_id: Uuid, opts: &ReadyPagesOptions) -> Result<Vec<Page>> {
        ready_query(&self.pool, website_id, PageStatus::ReadyForIndexing, opts).await
    }

    #[instrument(skip(self, opts))]
    async fn get_pages_ready_for_reindexing(&self, website_id: Uuid, opts: &ReadyPagesOptions) -> Result<Vec<Page>> {
        ready_query(&self.pool, website_id, PageStatus::ReadyForReIndexing, opts).await
    }

    #[instrument(skip(self, opts))]
    async fn get_pages_ready_for_deletion(&self, website_id: Uuid, opts: &ReadyPagesOptions) -> Result<Vec<Page>> {
        let limit = opts.limit.map(|l| l as i64).unwrap_or(i64::MAX);
        let rows = match opts.job_id {
            Some(job_id) => sqlx::query_as::<_, PageRow>(
                r#"
                SELECT * FROM pages
                WHERE website_id = $1 AND status = 'ready_for_deletion'
                AND (created_by_ingestion_id = $2 OR created_by_sync_id = $2 OR last_updated_by_sync_id = $2)
                ORDER BY updated_at
                LIMIT $3
                "#,
            )
            .bind(website_id)
            .bind(job_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?,
            None => sqlx::query_as::<_, PageRow>(
                "SELECT * FROM pages WHERE website_id = $1 AND status = 'ready_for_deletion' ORDER BY updated_at LIMIT $2",
            )
            .bind(website_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?,
        };
        rows_to_pages(rows)
    }

    #[instrument(skip(self, urls))]
    async fn update_pages_last_seen(&self, website_id: Uuid, urls: &[String], ts: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE pages SET last_seen = $3, missing_count = 0, updated_at = NOW() WHERE website_id = $1 AND url = ANY($2)",
        )
        .bind(website_id)
        .bind(urls)
        .bind(ts)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    #[instrument(skip(self, urls))]
    async fn increment_missing_count(&self, website_id: Uuid, urls: &[String]) -> Result<()> {
        sqlx::query(
            "UPDATE pages SET missing_count = missing_count + 1, updated_at = NOW() WHERE website_id = $1 AND url = ANY($2)",
        )
        .bind(website_id)
        .bind(urls)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_pages_past_deletion_threshold(&self, website_id: Uuid, threshold: i32) -> Result<Vec<Page>> {
        let rows = sqlx::query_as::<_, PageRow>(
            "SELECT * FROM pages WHERE website_id = $1 AND missing_count >= $2 AND status != 'deleted'",
        )
        .bind(website_id)
        .bind(threshold)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows_to_pages(rows)
    }

    #[instrument(skip(self, ids))]
    async fn mark_pages_deleted(&self, ids: &[Uuid]) -> Result<()> {
        sqlx::query(
            "UPDATE pages SET status = 'deleted', search_file_id = NULL, search_file_name = NULL, updated_at = NOW() WHERE id = ANY($1)",
        )
        .bind(ids)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    #[instrument(skip(self, patch))]
    async fn update_page(&self, id: Uuid, patch: PageUpdate) -> Result<Page> {
        let current = self
            .get_page(id)
            .await?
            .ok_or_else(|| CoreError::NotFound { what: format!("page {id}") })?;

        let status = patch.status.unwrap_or(current.status);
        let title = patch.title.unwrap_or(current.title);
        let content_hash = patch.content_hash.unwrap_or(current.content_hash);
        let markdown = patch.markdown.unwrap_or(current.markdown);
        let last_http_status = patch.last_http_status.unwrap_or(current.last_http_status);
        let firecrawl_scrape_count = patch.firecrawl_scrape_count.unwrap_or(current.firecrawl_scrape_count);
        let missing_count = patch.missing_count.unwrap_or(current.missing_count);
        let last_scraped = patch.last_scraped.unwrap_or(current.last_scraped);
        let last_seen = patch.last_seen.unwrap_or(current.last_seen);
        let search_file_id = patch.search_file_id.unwrap_or(current.search_file_id);
        let search_file_name = patch.search_file_name.unwrap_or(current.search_file_name);
        let metadata = patch.metadata.unwrap_or(current.metadata);
        let created_by_ingestion_id = patch.created_by_ingestion_id.unwrap_or(current.created_by_ingestion_id);
        let created_by_sync_id = patch.created_by_sync_id.unwrap_or(current.created_by_sync_id);
        let last_updated_by_sync_id = patch.last_updated_by_sync_id.unwrap_or(current.last_updated_by_sync_id);
        let firecrawl_batch_id = patch.firecrawl_batch_id.unwrap_or(current.firecrawl_batch_id);
        let error_message = patch.error_message.unwrap_or(current.error_message);

        sqlx::query_as::<_, PageRow>(
            r#"
            UPDATE pages SET
                status = $2, title = $3, content_hash = $4, markdown = $5,
                last_http_status = $6, firecrawl_scrape_count = $7, missing_count = $8,
                last_scraped = $9, last_seen = $10, search_file_id = $11, search_file_name = $12,
                metadata = $13, created_by_ingestion_id = $14, created_by_sync_id = $15,
                last_updated_by_sync_id = $16, firecrawl_batch_id = $17, error_message = $18,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(title)
        .bind(content_hash)
        .bind(markdown)
        .bind(last_http_status)
        .bind(firecrawl_scrape_count)
        .bind(missing_count)
        .bind(last_scraped)
        .bind(last_seen)
        .bind(search_file_id)
        .bind(search_file_name)
        .bind(metadata)
        .bind(created_by_ingestion_id)
        .bind(created_by_sync_id)
        .bind(last_updated_by_sync_id)
        .bind(firecrawl_batch_id)
        .bind(error_message)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)
        .and_then(Page::try_from)
    }
}

async fn insert_page(pool: &PgPool, page: &Page) -> Result<Page> {
    sqlx::query_as::<_, PageRow>(
        r#"
        INSERT INTO pages (
            id, website_id, url, path, title, status, content_hash, markdown,
            last_http_status, firecrawl_scrape_count, missing_count, last_scraped,
            last_seen, search_file_id, search_file_name, metadata,
            created_by_ingestion_id, created_by_sync_id, last_updated_by_sync_id,
            firecrawl_batch_id, error_message, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23)
        RETURNING *
        "#,
    )
    .bind(page.id)
    .bind(page.website_id)
    .bind(&page.url)
    .bind(&page.path)
    .bind(&page.title)
    .bind(page.status.to_string())
    .bind(&page.content_hash)
    .bind(&page.markdown)
    .bind(page.last_http_status)
    .bind(page.firecrawl_scrape_count)
    .bind(page.missing_count)
    .bind(page.last_scraped)
    .bind(page.last_seen)
    .bind(&page.search_file_id)
    .bind(&page.search_file_name)
    .bind(&page.metadata)
    .bind(page.created_by_ingestion_id)
    .bind(page.created_by_sync_id)
    .bind(page.last_updated_by_sync_id)
    .bind(&page.firecrawl_batch_id)
    .bind(&page.error_message)
    .bind(page.created_at)
    .bind(page.updated_at)
    .fetch_one(pool)
    .await
    .map_err(storage_err)
    .and_then(Page::try_from)
}

async fn ready_query(
    pool: &PgPool,
    website_id: Uuid,
    status: PageStatus,
    opts: &ReadyPagesOptions,
) -> Result<Vec<Page>> {
    let limit = opts.limit.map(|l| l as i64).unwrap_or(i64::MAX);
    let rows = match opts.job_id {
        Some(job_id) => sqlx::query_as::<_, PageRow>(
            r#"
            SELECT * FROM pages
            WHERE website_id = $1 AND status = $2 AND search_file_id IS NULL
            AND markdown IS NOT NULL AND length(trim(markdown)) > 0 AND content_hash IS NOT NULL
            AND (created_by_ingestion_id = $3 OR created_by_sync_id = $3 OR last_updated_by_sync_id = $3)
            ORDER BY updated_at
            LIMIT $4
            "#,
        )
        .bind(website_id)
        .bind(status.to_string())
        .bind(job_id)
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(storage_err)?,
        None => sqlx::query_as::<_, PageRow>(
            r#"
            SELECT * FROM pages
            WHERE website_id = $1 AND status = $2 AND search_file_id IS NULL
            AND markdown IS NOT NULL AND length(trim(markdown)) > 0 AND content_hash IS NOT NULL
            ORDER BY updated_at
            LIMIT $3
            "#,
        )
        .bind(website_id)
        .bind(status.to_string())
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(storage_err)?,
    };
    rows_to_pages(rows)
}

#[async_trait]
impl JobStore for PostgresStore {
    #[instrument(skip(self))]
    async fn create_job(&self, website_id: Uuid, process_type: ProcessType) -> Result<ProcessJob> {
        let job = ProcessJob::new(website_id, process_type);
        sqlx::query_as::<_, ProcessJobRow>(
            r#"
            INSERT INTO process_jobs (
                id, website_id, process_type, status, started_at, completed_at,
                urls_discovered, urls_updated, urls_deleted, urls_errored,
                firecrawl_batch_ids, errors, metadata
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(job.website_id)
        .bind(job.process_type.to_string())
        .bind(job.status.to_string())
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.urls_discovered)
        .bind(job.urls_updated)
        .bind(job.urls_deleted)
        .bind(job.urls_errored)
        .bind(&job.firecrawl_batch_ids)
        .bind(&job.errors)
        .bind(&job.metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)
        .and_then(ProcessJob::try_from)
    }

    #[instrument(skip(self, job))]
    async fn update_job(&self, job: &ProcessJob) -> Result<ProcessJob> {
        sqlx::query_as::<_, ProcessJobRow>(
            r#"
            UPDATE process_jobs SET
                status = $2, completed_at = $3, urls_discovered = $4, urls_updated = $5,
                urls_deleted = $6, urls_errored = $7, firecrawl_batch_ids = $8,
                errors = $9, metadata = $10
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(job.status.to_string())
        .bind(job.completed_at)
        .bind(job.urls_discovered)
        .bind(job.urls_updated)
        .bind(job.urls_deleted)
        .bind(job.urls_errored)
        .bind(&job.firecrawl_batch_ids)
        .bind(&job.errors)
        .bind(&job.metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)
        .and_then(ProcessJob::try_from)
    }

    #[instrument(skip(self))]
    async fn get_job(&self, id: Uuid) -> Result<Option<ProcessJob>> {
        sqlx::query_as::<_, ProcessJobRow>("SELECT * FROM process_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?
            .map(ProcessJob::try_from)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn list_jobs_by_website(
        &self,
        website_id: Uuid,
        process_type: Option<ProcessType>,
        limit: Option<usize>,
    ) -> Result<Vec<ProcessJob>> {
        let limit = limit.map(|l| l as i64).unwrap_or(i64::MAX);
        let rows = match process_type {
            Some(process_type) => sqlx::query_as::<_, ProcessJobRow>(
                "SELECT * FROM process_jobs WHERE website_id = $1 AND process_type = $2 ORDER BY started_at DESC LIMIT $3",
            )
            .bind(website_id)
            .bind(process_type.to_string())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?,
            None => sqlx::query_as::<_, ProcessJobRow>(
                "SELECT * FROM process_jobs WHERE website_id = $1 ORDER BY started_at DESC LIMIT $2",
            )
            .bind(website_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?,
        };
        rows_to_jobs(rows)
    }
}
