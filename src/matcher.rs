//! Watchlist matching, snippets, content hashing and secret redaction.
//!
//! All functions here are pure. The pipeline builds one [`Watchlist`] per
//! process so patterns are compiled once; [`find_matches`] is the
//! uncompiled convenience form with identical semantics.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use tracing::warn;

/// Keywords plus the subset of configured patterns that compiled.
#[derive(Debug, Clone, Default)]
pub struct Watchlist {
    keywords: Vec<String>,
    patterns: Vec<(String, Regex)>,
}

impl Watchlist {
    /// Build a watchlist. Invalid patterns are logged and skipped.
    pub fn new(keywords: &[String], patterns: &[String]) -> Self {
        let compiled = patterns
            .iter()
            .filter(|p| !p.is_empty())
            .filter_map(|p| match Regex::new(p) {
                Ok(rx) => Some((p.clone(), rx)),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "skipping invalid watchlist pattern");
                    None
                }
            })
            .collect();

        Self {
            keywords: keywords.to_vec(),
            patterns: compiled,
        }
    }

    /// Returns `(keyword_hits, pattern_hits)`.
    ///
    /// Keywords match by case-insensitive containment, in configured order,
    /// without deduplication. Patterns are searched in the unmodified text and
    /// reported by their source string.
    pub fn find_matches(&self, text: &str) -> (Vec<String>, Vec<String>) {
        let lowered = text.to_lowercase();
        let keyword_hits = self
            .keywords
            .iter()
            .filter(|kw| !kw.is_empty() && lowered.contains(&kw.to_lowercase()))
            .cloned()
            .collect();

        let pattern_hits = self
            .patterns
            .iter()
            .filter(|(_, rx)| rx.is_match(text))
            .map(|(src, _)| src.clone())
            .collect();

        (keyword_hits, pattern_hits)
    }
}

pub fn find_matches(
    text: &str,
    keywords: &[String],
    patterns: &[String],
) -> (Vec<String>, Vec<String>) {
    Watchlist::new(keywords, patterns).find_matches(text)
}

/// Strip NUL bytes and surrounding whitespace.
pub fn normalize_text(text: &str) -> String {
    text.replace('\0', "").trim().to_string()
}

/// Length-limited snippet (in characters) of the normalized text.
///
/// Text longer than `max_chars` keeps its first `max_chars - 3` characters
/// followed by `...`. The result never exceeds `max_chars` characters.
pub fn snippet(text: &str, max_chars: usize) -> String {
    let normalized = normalize_text(text);
    if normalized.chars().count() <= max_chars {
        return normalized;
    }
    if max_chars <= 3 {
        return normalized.chars().take(max_chars).collect();
    }
    let mut out: String = normalized.chars().take(max_chars - 3).collect();
    out.push_str("...");
    out
}

/// Lowercase hex SHA-256 of the UTF-8 text.
pub fn content_hash(text: &str) -> String {
    sha256_hex(text.as_bytes())
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn secret_regex() -> &'static Regex {
    static SECRET: OnceLock<Regex> = OnceLock::new();
    SECRET.get_or_init(|| {
        Regex::new(r"(?i)\b(api[_-]?key|token|password)\b\s*[:=]\s*(\S{6,})")
            .expect("secret pattern is valid")
    })
}

/// Replace `key=value` style secrets with `key=<redacted:N>`.
pub fn redact_secrets(text: &str) -> String {
    secret_regex()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            format!("{}=<redacted:{}>", &caps[1], caps[2].chars().count())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_keyword_case_insensitive_in_order() {
        let (kw, rx) = find_matches(
            "Exploit detected in CVE",
            &strings(&["exploit", "backdoor"]),
            &[],
        );
        assert_eq!(kw, vec!["exploit"]);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_keyword_hits_keep_config_order_and_duplicates() {
        let (kw, _) = find_matches(
            "leak of the Backdoor and a LEAK",
            &strings(&["backdoor", "leak", "Leak", ""]),
            &[],
        );
        assert_eq!(kw, vec!["backdoor", "leak", "Leak"]);
    }

    #[test]
    fn test_invalid_pattern_is_skipped() {
        let (_, rx) = find_matches(
            "see CVE-2024-12345 for details",
            &[],
            &strings(&["CVE-(\\d{4}", "CVE-\\d{4}-\\d+"]),
        );
        assert_eq!(rx, vec!["CVE-\\d{4}-\\d+"]);
    }

    #[test]
    fn test_pattern_matches_unmodified_text() {
        let (_, rx) = find_matches("Token ABC", &[], &strings(&["ABC", "abc"]));
        assert_eq!(rx, vec!["ABC"]);
    }

    #[test]
    fn test_snippet_short_text_unchanged() {
        assert_eq!(snippet("  hello\0 world \n", 280), "hello world");
    }

    #[test]
    fn test_snippet_truncates_with_ellipsis() {
        let text = "a".repeat(300);
        let s = snippet(&text, 280);
        assert_eq!(s.chars().count(), 280);
        assert!(s.ends_with("..."));
        assert_eq!(&s[..277], &text[..277]);
    }

    #[test]
    fn test_snippet_never_exceeds_limit() {
        let text = "ünïcödé text that is long enough to be truncated";
        for max in 0..text.chars().count() + 2 {
            let s = snippet(text, max);
            assert!(s.chars().count() <= max, "max={} got {:?}", max, s);
            if normalize_text(text).chars().count() <= max {
                assert_eq!(s, normalize_text(text));
            }
        }
    }

    #[test]
    fn test_content_hash_known_vectors() {
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            content_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_redact_secrets() {
        assert_eq!(
            redact_secrets("config api_key=abcdef123 next"),
            "config api_key=<redacted:9> next"
        );
        assert_eq!(redact_secrets("Password: hunter22"), "Password=<redacted:8>");
        assert_eq!(redact_secrets("token=short"), "token=short");
        assert_eq!(redact_secrets("nothing here"), "nothing here");
    }
}
