//! Core data models used throughout osintwatch.
//!
//! [`Item`]s are produced by sources and consumed once by the pipeline;
//! [`Evidence`] and [`HistoryEntry`] are the persisted ledger rows.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::ioc::Indicators;

/// One unit of fetched content before persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    /// Canonical locator of the content (entry link or page URL).
    pub origin: String,
    pub title: Option<String>,
    /// Raw extracted body; may be empty.
    pub text: String,
    /// Source-specific metadata.
    pub extra: Map<String, Value>,
}

/// One persisted, deduplicated, hash-chained observation.
#[derive(Debug, Clone, Serialize)]
pub struct Evidence {
    pub id: i64,
    pub source: String,
    pub origin: String,
    pub title: Option<String>,
    /// RFC 3339 timestamp exactly as it was hashed.
    pub observed_at: String,
    pub content_hash: String,
    pub snippet: Option<String>,
    pub keywords: Vec<String>,
    pub regexes: Vec<String>,
    pub extra: Map<String, Value>,
    pub prev_hash: Option<String>,
    pub evidence_hash: String,
}

impl Evidence {
    /// `high` when the title carries a CRITICAL/HIGH/URGENT marker, else `info`.
    pub fn severity(&self) -> &'static str {
        severity_of(self.title.as_deref())
    }

    /// Compact hit summary, e.g. `kw:2 rx:1 ioc:3`, or `-` when nothing matched.
    pub fn hit_summary(&self) -> String {
        let mut hits = Vec::new();
        if !self.keywords.is_empty() {
            hits.push(format!("kw:{}", self.keywords.len()));
        }
        if !self.regexes.is_empty() {
            hits.push(format!("rx:{}", self.regexes.len()));
        }
        if let Some(iocs) = self.extra.get("iocs").and_then(|v| v.as_object()) {
            if !iocs.is_empty() {
                hits.push(format!("ioc:{}", iocs.len()));
            }
        }
        if hits.is_empty() {
            "-".to_string()
        } else {
            hits.join(" ")
        }
    }
}

pub const SEVERITY_MARKERS: [&str; 3] = ["CRITICAL", "HIGH", "URGENT"];

pub fn severity_of(title: Option<&str>) -> &'static str {
    let upper = title.unwrap_or("").to_uppercase();
    if SEVERITY_MARKERS.iter().any(|m| upper.contains(m)) {
        "high"
    } else {
        "info"
    }
}

/// Full-text snapshot stored alongside each new evidence row.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub source: String,
    pub origin: String,
    pub observed_at: String,
    pub content_hash: String,
    pub content_text: String,
}

/// Payload handed to alert sinks for every alert-worthy item.
#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    pub source: String,
    pub origin: String,
    pub title: Option<String>,
    pub keywords: Vec<String>,
    pub regexes: Vec<String>,
    pub iocs: Indicators,
    /// Snippet with secrets redacted.
    pub snippet: String,
}
