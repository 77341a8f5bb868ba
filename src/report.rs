//! Read-only queries over the evidence ledger.
//!
//! Used by the `recent`, `get` and `verify` commands and by the HTTP API.
//! Nothing here writes to the database.

use anyhow::{bail, Result};
use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashMap;

use crate::config::Config;
use crate::diff::{compute_diff, DiffSummary};
use crate::evidence::{row_to_evidence, EvidenceStore, EVIDENCE_COLUMNS};
use crate::models::Evidence;
use crate::sources::{build_sources, Source};

pub const DEFAULT_LIST_LIMIT: i64 = 100;
pub const ALERT_LIMIT: i64 = 50;
const HISTORY_ROWS: i64 = 5;
const HISTORY_TEXT_CHARS: usize = 500;
const DIFF_CONTEXT_LINES: usize = 3;

/// Filters for [`list_evidence`]. Empty strings are treated as unset.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EvidenceFilter {
    pub search: Option<String>,
    pub severity: Option<String>,
    pub source: Option<String>,
    pub limit: Option<i64>,
}

/// An evidence row plus its derived severity.
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceView {
    #[serde(flatten)]
    pub evidence: Evidence,
    pub severity: &'static str,
}

impl From<Evidence> for EvidenceView {
    fn from(evidence: Evidence) -> Self {
        let severity = evidence.severity();
        Self { evidence, severity }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryView {
    pub content_hash: String,
    pub observed_at: String,
    /// First 500 characters of the stored text.
    pub content_text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvidenceDetail {
    #[serde(flatten)]
    pub view: EvidenceView,
    /// Newest first, at most five entries.
    pub history: Vec<HistoryView>,
    /// Change between the two most recent history versions, if there are two.
    pub diff: Option<DiffSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total_evidence: i64,
    pub high_severity_count: i64,
    pub active_sources: i64,
    pub recent_activity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceStat {
    pub name: String,
    pub evidence_count: i64,
    pub last_observed: Option<String>,
}

/// A high-severity evidence row presented as an alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertEntry {
    pub id: i64,
    pub message: String,
    /// `critical` when the title carries CRITICAL, otherwise `high`.
    pub severity: &'static str,
    pub timestamp: String,
    pub source: String,
}

/// A configured or previously seen source with its ledger counts.
#[derive(Debug, Clone, Serialize)]
pub struct SourceOverview {
    pub name: String,
    pub kind: Option<&'static str>,
    pub url: Option<String>,
    pub interval_seconds: Option<u64>,
    pub evidence_count: i64,
    pub last_observed: Option<String>,
    pub status: &'static str,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// `%needle%` with LIKE wildcards in the needle escaped by `\`.
fn contains_pattern(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len() + 2);
    out.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

/// Evidence newest first, optionally filtered.
pub async fn list_evidence(pool: &SqlitePool, filter: &EvidenceFilter) -> Result<Vec<Evidence>> {
    let limit = filter.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if limit <= 0 {
        bail!("limit must be > 0");
    }

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {} FROM evidence WHERE 1 = 1",
        EVIDENCE_COLUMNS
    ));
    if let Some(search) = non_empty(&filter.search) {
        let pattern = contains_pattern(search);
        qb.push(" AND (title LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR snippet LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
    if let Some(severity) = non_empty(&filter.severity) {
        qb.push(" AND title LIKE ")
            .push_bind(contains_pattern(&severity.to_uppercase()))
            .push(" ESCAPE '\\'");
    }
    if let Some(source) = non_empty(&filter.source) {
        qb.push(" AND source = ").push_bind(source.to_string());
    }
    qb.push(" ORDER BY observed_at DESC, id DESC LIMIT ")
        .push_bind(limit);

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter().map(row_to_evidence).collect()
}

/// One evidence row with its recent history, or `None` if the id is unknown.
pub async fn get_evidence(pool: &SqlitePool, id: i64) -> Result<Option<EvidenceDetail>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM evidence WHERE id = ?",
        EVIDENCE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let evidence = row_to_evidence(&row)?;

    let store = EvidenceStore::new(pool.clone());
    let history = store
        .history(&evidence.source, &evidence.origin, HISTORY_ROWS)
        .await?;

    let diff = match history.as_slice() {
        [newest, previous, ..] => Some(compute_diff(
            &previous.content_text,
            &newest.content_text,
            DIFF_CONTEXT_LINES,
        )),
        _ => None,
    };

    let history = history
        .into_iter()
        .map(|h| HistoryView {
            content_hash: h.content_hash,
            observed_at: h.observed_at,
            content_text: h.content_text.chars().take(HISTORY_TEXT_CHARS).collect(),
        })
        .collect();

    Ok(Some(EvidenceDetail {
        view: evidence.into(),
        history,
        diff,
    }))
}

pub async fn stats(pool: &SqlitePool) -> Result<Stats> {
    let total_evidence: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM evidence")
        .fetch_one(pool)
        .await?;
    let high_severity_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM evidence WHERE title LIKE '%CRITICAL%' OR title LIKE '%HIGH%'",
    )
    .fetch_one(pool)
    .await?;
    let active_sources: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT source) FROM evidence")
        .fetch_one(pool)
        .await?;

    // observed_at is fixed-width RFC 3339 in UTC, so text order is time order.
    let since = (Utc::now() - ChronoDuration::days(1)).to_rfc3339_opts(SecondsFormat::Micros, false);
    let recent_activity: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM evidence WHERE observed_at >= ?")
            .bind(since)
            .fetch_one(pool)
            .await?;

    Ok(Stats {
        total_evidence,
        high_severity_count,
        active_sources,
        recent_activity,
    })
}

/// The newest high-severity rows (title contains CRITICAL or HIGH).
pub async fn alerts(pool: &SqlitePool) -> Result<Vec<AlertEntry>> {
    let rows = sqlx::query(
        "SELECT id, source, title, observed_at FROM evidence \
         WHERE title LIKE '%CRITICAL%' OR title LIKE '%HIGH%' \
         ORDER BY observed_at DESC, id DESC LIMIT ?",
    )
    .bind(ALERT_LIMIT)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let source: String = row.get("source");
            let title: String = row.get::<Option<String>, _>("title").unwrap_or_default();
            let severity = if title.to_uppercase().contains("CRITICAL") {
                "critical"
            } else {
                "high"
            };
            AlertEntry {
                id: row.get("id"),
                message: format!("High severity evidence from {}: {}", source, title),
                severity,
                timestamp: row.get("observed_at"),
                source,
            }
        })
        .collect())
}

/// Per-source counts, most evidence first.
pub async fn source_stats(pool: &SqlitePool) -> Result<Vec<SourceStat>> {
    let rows = sqlx::query(
        "SELECT source, COUNT(*) AS n, MAX(observed_at) AS last_observed \
         FROM evidence GROUP BY source ORDER BY n DESC, source ASC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| SourceStat {
            name: row.get("source"),
            evidence_count: row.get("n"),
            last_observed: row.get("last_observed"),
        })
        .collect())
}

/// Configured sources first (in configuration order), then any source
/// names that only appear in the ledger.
pub async fn source_overview(pool: &SqlitePool, config: &Config) -> Result<Vec<SourceOverview>> {
    let mut counts: HashMap<String, SourceStat> = source_stats(pool)
        .await?
        .into_iter()
        .map(|s| (s.name.clone(), s))
        .collect();

    let mut out = Vec::new();
    for scheduled in build_sources(config) {
        let source = &scheduled.source;
        let stat = counts.remove(source.name());
        out.push(overview(
            source.name().to_string(),
            Some(source.kind()),
            Some(source.url().to_string()),
            Some(scheduled.interval.as_secs()),
            stat,
        ));
    }

    let mut leftovers: Vec<SourceStat> = counts.into_values().collect();
    leftovers.sort_by(|a, b| a.name.cmp(&b.name));
    for stat in leftovers {
        out.push(overview(stat.name.clone(), None, None, None, Some(stat)));
    }
    Ok(out)
}

fn overview(
    name: String,
    kind: Option<&'static str>,
    url: Option<String>,
    interval_seconds: Option<u64>,
    stat: Option<SourceStat>,
) -> SourceOverview {
    let (evidence_count, last_observed) = stat
        .map(|s| (s.evidence_count, s.last_observed))
        .unwrap_or((0, None));
    SourceOverview {
        name,
        kind,
        url,
        interval_seconds,
        evidence_count,
        last_observed,
        status: if evidence_count > 0 { "active" } else { "idle" },
    }
}

// ============ CLI output ============

/// `2024-05-01T12:00:00.123456+00:00` → `2024-05-01T12:00:00Z`
fn short_time(observed_at: &str) -> String {
    match observed_at.get(..19) {
        Some(prefix) => format!("{}Z", prefix),
        None => observed_at.to_string(),
    }
}

fn clip(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Print the most recent evidence (the `recent` command).
pub async fn run_recent(config: &Config, limit: i64) -> Result<()> {
    let store = EvidenceStore::open(&config.app.db_path).await?;
    let filter = EvidenceFilter {
        limit: Some(limit),
        ..EvidenceFilter::default()
    };
    let rows = list_evidence(store.pool(), &filter).await?;

    println!("Recent evidence (limit={})", limit);
    println!("{:<21} {:<20} {:<14} TITLE/ORIGIN", "WHEN", "SOURCE", "HITS");
    for ev in &rows {
        let label = ev.title.as_deref().filter(|t| !t.is_empty()).unwrap_or(&ev.origin);
        println!(
            "{:<21} {:<20} {:<14} {}",
            short_time(&ev.observed_at),
            clip(&ev.source, 20),
            ev.hit_summary(),
            clip(label, 160)
        );
    }
    if rows.is_empty() {
        println!("(no evidence yet)");
    }

    store.pool().close().await;
    Ok(())
}

/// Print one evidence row with its history (the `get` command).
pub async fn run_get(config: &Config, id: i64) -> Result<()> {
    let store = EvidenceStore::open(&config.app.db_path).await?;
    let detail = get_evidence(store.pool(), id).await?;
    store.pool().close().await;

    let Some(detail) = detail else {
        bail!("evidence not found: {}", id);
    };
    let ev = &detail.view.evidence;

    println!("--- Evidence {} ---", ev.id);
    println!("source:        {}", ev.source);
    println!("origin:        {}", ev.origin);
    println!("title:         {}", ev.title.as_deref().unwrap_or("(untitled)"));
    println!("severity:      {}", detail.view.severity);
    println!("observed_at:   {}", ev.observed_at);
    println!("content_hash:  {}", ev.content_hash);
    println!("keywords:      {:?}", ev.keywords);
    println!("regexes:       {:?}", ev.regexes);
    println!("prev_hash:     {}", ev.prev_hash.as_deref().unwrap_or("(none)"));
    println!("evidence_hash: {}", ev.evidence_hash);
    println!("extra:         {}", serde_json::Value::Object(ev.extra.clone()));
    println!();
    println!("--- Snippet ---");
    println!("{}", ev.snippet.as_deref().unwrap_or(""));
    println!();

    println!("--- History ({}) ---", detail.history.len());
    for h in &detail.history {
        println!("[{}] {}", short_time(&h.observed_at), h.content_hash);
    }
    if let Some(diff) = &detail.diff {
        println!();
        println!(
            "--- Latest change: +{} -{} (ratio {:.2}) ---",
            diff.additions, diff.deletions, diff.change_ratio
        );
        println!("{}", diff.diff_text);
    }
    Ok(())
}

/// Verify the hash chain (the `verify` command). Fails if the chain is broken.
pub async fn run_verify(config: &Config) -> Result<()> {
    let store = EvidenceStore::open(&config.app.db_path).await?;
    let report = store.verify_chain().await?;
    store.pool().close().await;

    match report.first_break {
        None => {
            println!("chain ok: {} rows verified", report.rows_checked);
            Ok(())
        }
        Some(brk) => {
            println!(
                "chain BROKEN at id {} after {} valid rows: {}",
                brk.id, report.rows_checked, brk.reason
            );
            bail!("evidence chain verification failed")
        }
    }
}
