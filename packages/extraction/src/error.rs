//! Typed errors for the site corpus core library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so host applications
//! get strongly-typed, composable error handling instead of an opaque chain.

use thiserror::Error;

/// Errors returned by Job Engine and Query Facade operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The page/website/job store rejected or failed an operation.
    #[error("store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The crawler collaborator failed.
    #[error("crawler error: {0}")]
    Crawler(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The semantic search store collaborator failed.
    #[error("search store error: {0}")]
    Search(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A URL or input argument failed validation before any row was written.
    #[error("validation error: {reason}")]
    Validation { reason: String },

    /// A referenced website or job does not exist.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// The website resolved by `website_ref` has never been indexed.
    #[error("website not indexed: {base_domain}")]
    NotIndexed { base_domain: String },

    /// A batch or polling operation did not complete before its deadline.
    #[error("deadline exceeded waiting for {what}")]
    DeadlineExceeded { what: String },

    /// URL/SSRF validation failed.
    #[error("security error: {0}")]
    Security(#[from] SecurityError),

    /// JSON (de)serialization of job metadata or search payloads failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Security-related errors, primarily for SSRF protection on crawled URLs.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// URL scheme not allowed (e.g. `file://`, `ftp://`).
    #[error("disallowed URL scheme: {0}")]
    DisallowedScheme(String),

    /// Host is blocked (e.g. localhost, internal IPs, metadata services).
    #[error("blocked host: {0}")]
    BlockedHost(String),

    /// IP falls in a blocked CIDR range (e.g. 10.0.0.0/8).
    #[error("blocked IP range: {0}")]
    BlockedCidr(String),

    /// URL has no host component.
    #[error("URL has no host")]
    NoHost,

    /// DNS resolution failed while checking for rebinding.
    #[error("DNS resolution failed: {0}")]
    DnsResolution(String),

    /// URL failed to parse.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Result type alias for security validation.
pub type SecurityResult<T> = std::result::Result<T, SecurityError>;
