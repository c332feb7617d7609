//! Query Facade: resolve a user-supplied URL/domain to a registered
//! website, then delegate grounded question answering and filtered search
//! to the semantic search store.
//!
//! Holds the same two collaborators the Job Engine holds a superset of --
//! the page store (for website resolution only) and the search store (for
//! the actual query) -- so a host can construct a `QueryFacade` without
//! wiring up a crawler at all.

use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{CoreError, Result};
use crate::traits::search::{Citation, GroundedAnswer, QueryOptions, SearchStore};
use crate::traits::store::PageStoreAdapter;
use crate::types::config::PathFilter;
use crate::types::website::Website;

const MAX_QUESTION_LEN: usize = 5000;

lazy_static! {
    static ref MULTI_NEWLINE: Regex = Regex::new(r"\n{3,}").unwrap();
    static ref MULTI_SPACE: Regex = Regex::new(r"[ \t]{3,}").unwrap();
    static ref URL_TOKEN: Regex = Regex::new(r"https?://[^\s<>\x22']+").unwrap();
}

/// The Query Facade. Resolves `website_ref` strings (a full URL or a bare
/// domain) to a registered [`Website`] and forwards to the search store.
pub struct QueryFacade {
    store: Arc<dyn PageStoreAdapter>,
    search: Arc<dyn SearchStore>,
}

/// A resolved answer: the search store's grounded response plus the
/// citations extracted from it.
#[derive(Debug, Clone)]
pub struct AnswerResult {
    pub answer: String,
    pub citations: Vec<Citation>,
}

impl QueryFacade {
    pub fn new(store: Arc<dyn PageStoreAdapter>, search: Arc<dyn SearchStore>) -> Self {
        Self { store, search }
    }

    /// Resolve `website_ref` (full URL or bare domain) to its base domain,
    /// look up the registered website, and error with a caller-actionable
    /// message when it isn't indexed yet.
    async fn resolve(&self, website_ref: &str) -> Result<Website> {
        let host = crate::url::normalize(website_ref)
            .ok()
            .and_then(|url| crate::url::extract_domain(&url).ok())
            .or_else(|| crate::url::extract_domain(&format!("https://{website_ref}")).ok())
            .ok_or_else(|| CoreError::Validation {
                reason: format!("'{website_ref}' is not a valid URL or domain"),
            })?;
        let base_domain = crate::url::extract_base_domain(&host);

        let website = self
            .store
            .get_website_by_base_domain(&base_domain)
            .await?
            .ok_or_else(|| CoreError::Validation {
                reason: format!(
                    "'{base_domain}' has not been ingested yet -- run ingestion first to index this domain"
                ),
            })?;

        if website.search_store_id.is_none() {
            return Err(CoreError::NotIndexed { base_domain });
        }

        Ok(website)
    }

    fn validate_question(question: &str) -> Result<String> {
        let trimmed = question.trim();
        if trimmed.is_empty() {
            return Err(CoreError::Validation {
                reason: "question must not be empty".to_string(),
            });
        }
        if trimmed.chars().count() > MAX_QUESTION_LEN {
            return Err(CoreError::Validation {
                reason: format!("question exceeds {MAX_QUESTION_LEN} characters"),
            });
        }
        Ok(trimmed.to_string())
    }

    /// Ask a grounded question scoped to the website resolved from
    /// `website_ref`.
    pub async fn ask(&self, question: &str, website_ref: &str) -> Result<AnswerResult> {
        let question = Self::validate_question(question)?;
        let website = self.resolve(website_ref).await?;
        let store_id = website.search_store_id.expect("checked in resolve()");

        let grounded = self.search.query(&store_id, &question, &QueryOptions::default()).await?;
        Ok(Self::finish_answer(grounded))
    }

    /// `search_with_filter`: same resolution as `ask`, plus a metadata filter
    /// scoping results to pages whose path starts with `path_prefix`.
    pub async fn search_with_filter(&self, question: &str, path_prefix: &str, website_ref: &str) -> Result<AnswerResult> {
        let question = Self::validate_question(question)?;
        let website = self.resolve(website_ref).await?;
        let store_id = website.search_store_id.expect("checked in resolve()");

        let filter = PathFilter::new(path_prefix);
        let options = QueryOptions {
            metadata_filter: Some(filter.as_metadata_filter()),
        };
        let grounded = self.search.query(&store_id, &question, &options).await?;
        // Same whitespace cleaning as `ask`, so behavior doesn't depend on
        // which entry point a caller used.
        Ok(Self::finish_answer(grounded))
    }

    /// `check_existing_content`: ask whether a topic is already covered.
    pub async fn check_existing_content(&self, topic: &str, website_ref: &str) -> Result<AnswerResult> {
        let question = format!(
            "Does this site already have content about \"{topic}\"? \
             Answer with a clear yes or no, and cite the specific pages that cover it, if any."
        );
        self.ask(&question, website_ref).await
    }

    /// `summarize_topic`: a structured summarization prompt around `ask`.
    pub async fn summarize_topic(&self, topic: &str, website_ref: &str) -> Result<AnswerResult> {
        let question = format!(
            "Summarize everything this site says about \"{topic}\" in a few concise paragraphs, \
             citing the pages you drew from."
        );
        self.ask(&question, website_ref).await
    }

    /// `find_mentions`: a structured prompt searching for any of several
    /// keywords.
    pub async fn find_mentions(&self, keywords: &[String], website_ref: &str) -> Result<AnswerResult> {
        if keywords.is_empty() {
            return Err(CoreError::Validation {
                reason: "find_mentions requires at least one keyword".to_string(),
            });
        }
        let list = keywords.join(", ");
        let question = format!(
            "List every page on this site that mentions any of the following: {list}. \
             For each match, say which keyword(s) it covers."
        );
        self.ask(&question, website_ref).await
    }

    fn finish_answer(grounded: GroundedAnswer) -> AnswerResult {
        AnswerResult {
            answer: clean_answer(&grounded.answer),
            citations: extract_citations(grounded.citations),
        }
    }
}

/// Collapse runs of 3+ newlines to 2, runs of 3+ spaces/tabs to 1, trim each
/// line, and trim the whole string.
pub fn clean_answer(raw: &str) -> String {
    let collapsed_newlines = MULTI_NEWLINE.replace_all(raw, "\n\n");
    let collapsed_spaces = MULTI_SPACE.replace_all(&collapsed_newlines, " ");
    collapsed_spaces
        .lines()
        .map(|line| line.trim())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Fill in missing citation URLs by extracting the first `https?://...`
/// token from the cited text, stripping trailing fragments and a trailing
/// `)`.
fn extract_citations(citations: Vec<Citation>) -> Vec<Citation> {
    citations
        .into_iter()
        .map(|mut c| {
            if c.url.is_none() {
                if let Some(text) = c.snippet.as_deref().or(c.title.as_deref()) {
                    c.url = extract_first_url(text);
                }
            }
            c
        })
        .collect()
}

fn extract_first_url(text: &str) -> Option<String> {
    let found = URL_TOKEN.find(text)?.as_str();
    let without_fragment = found.split('#').next().unwrap_or(found);
    Some(without_fragment.trim_end_matches(')').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_answer_collapses_whitespace() {
        let raw = "Line one.\n\n\n\nLine two.   has   spaces\t\t\tand tabs.  ";
        let cleaned = clean_answer(raw);
        assert_eq!(cleaned, "Line one.\n\nLine two. has spaces and tabs.");
    }

    #[test]
    fn clean_answer_trims_each_line() {
        let raw = "  leading\ntrailing  \n";
        assert_eq!(clean_answer(raw), "leading\ntrailing");
    }

    #[test]
    fn extract_first_url_strips_fragment_and_trailing_paren() {
        assert_eq!(
            extract_first_url("see (https://example.com/about#section)"),
            Some("https://example.com/about".to_string())
        );
    }

    #[test]
    fn extract_first_url_returns_none_without_a_url() {
        assert_eq!(extract_first_url("no links here"), None);
    }

    #[test]
    fn extract_citations_fills_missing_url_from_snippet() {
        let citations = vec![Citation {
            url: None,
            title: Some("About".to_string()),
            snippet: Some("Read more at https://example.com/about".to_string()),
        }];
        let filled = extract_citations(citations);
        assert_eq!(filled[0].url.as_deref(), Some("https://example.com/about"));
    }
}
