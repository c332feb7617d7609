//! URL Normalizer & Domain Scoper.
//!
//! Normalization is a pure function: same input always yields the same
//! canonical form, which is what lets `PageStoreAdapter` use it as the
//! dedup key for `(website_id, url)`.

use url::Url;

use crate::error::{SecurityError, SecurityResult};

/// Canonicalize a URL: lowercase scheme and host, preserve path case, strip
/// the default port for the scheme, drop a trailing `/` on the root path,
/// drop a trailing `#fragment`. The query string is preserved verbatim.
pub fn normalize(raw: &str) -> SecurityResult<String> {
    let mut parsed = Url::parse(raw)?;

    let scheme = parsed.scheme().to_ascii_lowercase();
    parsed
        .set_scheme(&scheme)
        .map_err(|_| SecurityError::UrlParse(url::ParseError::EmptyHost))?;

    if let Some(host) = parsed.host_str() {
        let lower = host.to_ascii_lowercase();
        if lower != host {
            parsed.set_host(Some(&lower))?;
        }
    } else {
        return Err(SecurityError::NoHost);
    }

    // Strip the default port for the scheme so `:443`/`:80` don't create a
    // distinct identity from the portless form.
    let default_port = match parsed.scheme() {
        "https" => Some(443),
        "http" => Some(80),
        _ => None,
    };
    if parsed.port() == default_port {
        let _ = parsed.set_port(None);
    }

    parsed.set_fragment(None);

    if parsed.path() == "/" {
        // `Url` always reports at least "/" for the root; nothing to strip
        // beyond that -- a bare `https://example.com` and
        // `https://example.com/` are already the same canonical form.
    } else if parsed.path().ends_with('/') {
        let trimmed = parsed.path().trim_end_matches('/').to_string();
        parsed.set_path(&trimmed);
    }

    Ok(parsed.to_string())
}

/// The exact host component of a URL (no scoping applied).
pub fn extract_domain(raw: &str) -> SecurityResult<String> {
    let parsed = Url::parse(raw)?;
    parsed
        .host_str()
        .map(|h| h.to_ascii_lowercase())
        .ok_or(SecurityError::NoHost)
}

/// Reduce a host to its base domain: `www.a.b` -> `a.b`. Any other
/// subdomain, including multi-label `www.a.b.c`, is returned unchanged --
/// only an exact three-label host with `www` as the leftmost label is
/// folded.
pub fn extract_base_domain(host: &str) -> String {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() == 3 && labels[0].eq_ignore_ascii_case("www") {
        format!("{}.{}", labels[1], labels[2])
    } else {
        host.to_string()
    }
}

/// True if `url`'s host is `base` or `www.` + `base`. Every other subdomain
/// prefix (`blog.base`, `x.a.base`, ...) is excluded, even though it might
/// share the same base domain under `extract_base_domain`.
pub fn is_url_in_base_domain(raw: &str, base: &str) -> bool {
    match extract_domain(raw) {
        Ok(host) => host == base || host == format!("www.{base}"),
        Err(_) => false,
    }
}

/// Lazily filter an iterator of URLs down to those in `base`'s domain.
pub fn filter_by_domain<'a, I>(urls: I, base: &'a str) -> impl Iterator<Item = String> + 'a
where
    I: IntoIterator<Item = String> + 'a,
{
    urls.into_iter().filter(move |u| is_url_in_base_domain(u, base))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_lowercases_scheme_and_host() {
        assert_eq!(
            normalize("HTTPS://Example.COM/Path").unwrap(),
            "https://example.com/Path"
        );
    }

    #[test]
    fn normalize_strips_default_port() {
        assert_eq!(normalize("https://example.com:443/").unwrap(), "https://example.com/");
        assert_eq!(normalize("http://example.com:80/x").unwrap(), "http://example.com/x");
        assert_eq!(
            normalize("https://example.com:8443/x").unwrap(),
            "https://example.com:8443/x"
        );
    }

    #[test]
    fn normalize_strips_root_trailing_slash_but_preserves_query() {
        assert_eq!(normalize("https://example.com/").unwrap(), "https://example.com/");
        assert_eq!(
            normalize("https://example.com/about/?x=1").unwrap(),
            "https://example.com/about?x=1"
        );
    }

    #[test]
    fn normalize_strips_fragment() {
        assert_eq!(
            normalize("https://example.com/about#section").unwrap(),
            "https://example.com/about"
        );
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize("HTTPS://Example.com:443/About/#x").unwrap();
        let twice = normalize(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn base_domain_folds_www_only() {
        assert_eq!(extract_base_domain("www.a.b"), "a.b");
        assert_eq!(extract_base_domain("x.a.b"), "x.a.b");
        assert_eq!(extract_base_domain("a.b"), "a.b");
        assert_eq!(extract_base_domain("www.a.b.c"), "www.a.b.c");
    }

    #[test]
    fn base_domain_is_idempotent() {
        for host in ["www.a.b", "x.a.b", "a.b"] {
            let once = extract_base_domain(host);
            assert_eq!(extract_base_domain(&once), once);
        }
    }

    #[test]
    fn in_base_domain_accepts_apex_and_www_only() {
        assert!(is_url_in_base_domain("https://a.b/", "a.b"));
        assert!(is_url_in_base_domain("https://www.a.b/", "a.b"));
        assert!(!is_url_in_base_domain("https://x.a.b/", "a.b"));
        assert!(!is_url_in_base_domain("https://blog.a.b/", "a.b"));
    }

    #[test]
    fn filter_by_domain_excludes_other_subdomains() {
        let urls = vec![
            "https://www.example.com/".to_string(),
            "https://example.com/about".to_string(),
            "https://blog.example.com/post".to_string(),
        ];
        let filtered: Vec<_> = filter_by_domain(urls, "example.com").collect();
        assert_eq!(filtered.len(), 2);
    }
}
