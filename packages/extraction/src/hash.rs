//! Content Hasher (§4.1): canonicalize and hash a page's markdown.
//!
//! Canonicalization is deliberately minimal -- strip a leading UTF-8 BOM and
//! nothing else. No whitespace collapsing, no case folding: the hash is a
//! change-detection fingerprint, not a normalized comparison key, and any
//! extra normalization here would mask upstream rendering differences that
//! sync is supposed to catch.

use sha2::{Digest, Sha256};

const BOM: char = '\u{feff}';

/// Strip a leading byte-order mark, if present.
pub fn canonicalize(markdown: &str) -> &str {
    markdown.strip_prefix(BOM).unwrap_or(markdown)
}

/// SHA-256 hex digest of the canonicalized markdown.
pub fn hash(markdown: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonicalize(markdown).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hashes `markdown` and reports whether it differs from `stored_hash`.
/// Returns the new hash alongside the comparison so callers that need both
/// (the common case: store the new hash, act on whether it changed) don't
/// have to hash twice.
pub fn changed(markdown: &str, stored_hash: &str) -> (String, bool) {
    let new_hash = hash(markdown);
    let is_changed = new_hash != stored_hash;
    (new_hash, is_changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_256_bit_hex() {
        let digest = hash("# Hello");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn bom_does_not_affect_hash() {
        let with_bom = format!("{BOM}# Hello");
        assert_eq!(hash(&with_bom), hash("# Hello"));
    }

    #[test]
    fn whitespace_difference_still_changes_hash() {
        // Deliberately not normalized: trailing space is a real change.
        let (new_hash, is_changed) = changed("# Hello ", &hash("# Hello"));
        assert!(is_changed);
        assert_eq!(new_hash, hash("# Hello "));
    }

    #[test]
    fn identical_content_is_unchanged() {
        let digest = hash("same content");
        let (new_hash, is_changed) = changed("same content", &digest);
        assert!(!is_changed);
        assert_eq!(new_hash, digest);
    }
}
