//! Site corpus core: the multi-phase content pipeline and reconciliation
//! state machine that ingests public websites, stores their content as
//! addressable Markdown artifacts, and maintains a vector-indexed corpus
//! for grounded question answering.
//!
//! This crate is the **core** described by the interface contract: the job
//! lifecycle (ingestion -> indexing -> sync), the page lifecycle state
//! machine, the two-phase write discipline, content-change reconciliation,
//! and external-search-store synchronization. The relational store, the
//! web-crawling service, and the semantic search service are external
//! collaborators the core depends on only through the traits in
//! [`traits`]; a host application wires up concrete implementations (see
//! [`stores::memory::MemoryPageStore`] for local/dev use, and
//! [`stores::postgres::PostgresStore`] behind the `postgres` feature for
//! production; [`crawlers::firecrawl::FirecrawlCrawler`] behind the
//! `firecrawl` feature is the one `Crawler` this crate ships).
//!
//! Entry points:
//! - [`job_engine::JobEngine`] -- `ingest`, `sync`, `index`,
//!   `recover_ingestion`.
//! - [`query::QueryFacade`] -- `ask`, `check_existing_content`,
//!   `summarize_topic`, `find_mentions`, `search_with_filter`.

pub mod config;
pub mod crawlers;
pub mod error;
pub mod hash;
pub mod job_engine;
pub mod query;
pub mod stores;
pub mod traits;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub mod url;

pub use config::CoreConfig;
pub use error::{CoreError, Result, SecurityError};
pub use job_engine::{IndexOptions, IndexResult, IngestResult, JobEngine, RecoveryOutcome, RecoveryStatus, SyncResult};
pub use query::{AnswerResult, QueryFacade};
pub use types::job::{JobError, ProcessJob, ProcessStatus, ProcessType};
pub use types::page::{Page, PageStatus};
pub use types::website::Website;
