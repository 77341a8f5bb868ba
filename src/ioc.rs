//! Indicator-of-compromise extraction.

use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

/// Kinds of indicators recognized in observed text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorKind {
    Ipv4,
    Domain,
    Email,
    Md5,
    Sha256,
    Btc,
}

impl IndicatorKind {
    pub const ALL: [IndicatorKind; 6] = [
        IndicatorKind::Ipv4,
        IndicatorKind::Domain,
        IndicatorKind::Email,
        IndicatorKind::Md5,
        IndicatorKind::Sha256,
        IndicatorKind::Btc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorKind::Ipv4 => "ipv4",
            IndicatorKind::Domain => "domain",
            IndicatorKind::Email => "email",
            IndicatorKind::Md5 => "md5",
            IndicatorKind::Sha256 => "sha256",
            IndicatorKind::Btc => "btc",
        }
    }

    fn pattern(&self) -> &'static str {
        match self {
            IndicatorKind::Ipv4 => r"\b(?:[0-9]{1,3}\.){3}[0-9]{1,3}\b",
            IndicatorKind::Domain => {
                r"(?i)\b(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,}\b"
            }
            IndicatorKind::Email => r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
            IndicatorKind::Md5 => r"(?i)\b[a-f0-9]{32}\b",
            IndicatorKind::Sha256 => r"(?i)\b[a-f0-9]{64}\b",
            IndicatorKind::Btc => r"(?i)\b[13][a-km-zA-HJ-NP-Z1-9]{25,34}\b",
        }
    }
}

/// Kind → sorted unique matches. Kinds without matches are absent.
pub type Indicators = BTreeMap<IndicatorKind, Vec<String>>;

fn compiled() -> &'static [(IndicatorKind, Regex)] {
    static PATTERNS: OnceLock<Vec<(IndicatorKind, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        IndicatorKind::ALL
            .iter()
            .map(|kind| {
                let rx = Regex::new(kind.pattern()).expect("indicator pattern is valid");
                (*kind, rx)
            })
            .collect()
    })
}

pub fn extract_indicators(text: &str) -> Indicators {
    let mut out = Indicators::new();
    for (kind, rx) in compiled() {
        let hits: BTreeSet<String> = rx.find_iter(text).map(|m| m.as_str().to_string()).collect();
        if !hits.is_empty() {
            out.insert(*kind, hits.into_iter().collect());
        }
    }
    out
}

/// JSON object form used in evidence `extra` and alert payloads.
pub fn to_json(indicators: &Indicators) -> serde_json::Value {
    let map = indicators
        .iter()
        .map(|(kind, hits)| (kind.as_str().to_string(), serde_json::json!(hits)))
        .collect::<serde_json::Map<_, _>>();
    serde_json::Value::Object(map)
}
