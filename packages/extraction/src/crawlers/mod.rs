//! Concrete `Crawler` implementations.
//!
//! [`traits::crawler::Crawler`](crate::traits::crawler::Crawler) is the only
//! surface the Job Engine depends on; this module holds the one production
//! adapter this crate ships, behind the `firecrawl` feature. A host that
//! talks to a different crawling service supplies its own `Crawler` impl
//! instead.

#[cfg(feature = "firecrawl")]
pub mod firecrawl;

#[cfg(feature = "firecrawl")]
pub use firecrawl::FirecrawlCrawler;
