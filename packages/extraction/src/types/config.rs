//! Discovery-scoped options passed into Job Engine operations.

/// Options for a crawler `map` call (§6 Crawler collaborator).
#[derive(Debug, Clone)]
pub struct MapOptions {
    /// Optional keyword filter passed through to the crawler's own search.
    pub search: Option<String>,
    /// Whether to include pages on subdomains of the seed's host.
    pub include_subdomains: bool,
    /// Maximum URLs to return. Defaults to 5000.
    pub limit: usize,
    /// Per-call timeout, if the crawler supports one.
    pub timeout: Option<std::time::Duration>,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            search: None,
            include_subdomains: true,
            limit: 5000,
            timeout: None,
        }
    }
}

/// A metadata filter scoping a query to pages under a path prefix, used by
/// `QueryFacade::search_with_filter`.
#[derive(Debug, Clone)]
pub struct PathFilter {
    pub path_prefix: String,
}

impl PathFilter {
    pub fn new(path_prefix: impl Into<String>) -> Self {
        Self {
            path_prefix: path_prefix.into(),
        }
    }

    /// The metadata filter expression sent to the search store, equivalent
    /// to `path LIKE "<prefix>%"`.
    pub fn as_metadata_filter(&self) -> String {
        format!("path LIKE \"{}%\"", self.path_prefix)
    }
}
