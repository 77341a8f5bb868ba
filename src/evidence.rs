//! Deduplicating, hash-chained evidence store.
//!
//! The store is the only writer of the `evidence` and `content_history`
//! tables. Every new row commits to the `evidence_hash` of the row inserted
//! just before it (store-wide, across all sources), forming one append-only
//! chain. Re-observing identical content at the same origin is a no-op.
//!
//! # Canonical form
//!
//! `evidence_hash` is the SHA-256 hex digest of this JSON object, encoded
//! with sorted keys and no insignificant whitespace:
//!
//! ```text
//! {"content_hash","extra","keywords","observed_at","origin","prev_hash",
//!  "regexes","snippet","source","title","v":1}
//! ```
//!
//! `observed_at` is hashed exactly as stored (RFC 3339, microseconds,
//! `+00:00` offset).

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::db;
use crate::matcher::sha256_hex;
use crate::migrate::run_migrations;
use crate::models::{Evidence, HistoryEntry};

const CHAIN_VERSION: u32 = 1;

pub(crate) const EVIDENCE_COLUMNS: &str = "id, source, origin, title, observed_at, content_hash, \
     snippet, keywords_json, regexes_json, extra_json, prev_hash, evidence_hash";

/// A candidate observation submitted to [`EvidenceStore::upsert_evidence`].
#[derive(Debug, Clone, Default)]
pub struct NewEvidence {
    pub source: String,
    pub origin: String,
    pub title: Option<String>,
    pub content_hash: String,
    pub snippet: Option<String>,
    pub keywords: Vec<String>,
    pub regexes: Vec<String>,
    pub extra: Map<String, Value>,
    /// Full text; when present a history row is written with the evidence.
    pub content_text: Option<String>,
}

/// Result of [`EvidenceStore::verify_chain`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainReport {
    pub rows_checked: u64,
    pub first_break: Option<ChainBreak>,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.first_break.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainBreak {
    pub id: i64,
    pub reason: String,
}

/// Shared handle to the ledger. Cloning is cheap; all clones share one
/// writer lock, which serializes the read-prev-hash-then-insert sequence.
#[derive(Clone)]
pub struct EvidenceStore {
    pool: SqlitePool,
    writer: Arc<Mutex<()>>,
}

impl EvidenceStore {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect_path(path).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Wrap an already-migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            writer: Arc::new(Mutex::new(())),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a new evidence row unless `(source, origin, content_hash)`
    /// already exists. Returns whether a row was inserted.
    pub async fn upsert_evidence(&self, new: NewEvidence) -> Result<bool> {
        let _guard = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            "SELECT id FROM evidence WHERE source = ? AND origin = ? AND content_hash = ?",
        )
        .bind(&new.source)
        .bind(&new.origin)
        .bind(&new.content_hash)
        .fetch_optional(&mut *tx)
        .await?;
        if existing.is_some() {
            return Ok(false);
        }

        let prev_hash: Option<String> =
            sqlx::query_scalar("SELECT evidence_hash FROM evidence ORDER BY id DESC LIMIT 1")
                .fetch_optional(&mut *tx)
                .await?;

        let mut row = Evidence {
            id: 0,
            source: new.source,
            origin: new.origin,
            title: new.title,
            observed_at: now_rfc3339(),
            content_hash: new.content_hash,
            snippet: new.snippet,
            keywords: new.keywords,
            regexes: new.regexes,
            extra: new.extra,
            prev_hash,
            evidence_hash: String::new(),
        };
        row.evidence_hash = compute_evidence_hash(&row);

        let inserted = sqlx::query(
            "INSERT INTO evidence (source, origin, title, observed_at, content_hash, snippet, \
             keywords_json, regexes_json, extra_json, prev_hash, evidence_hash) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.source)
        .bind(&row.origin)
        .bind(&row.title)
        .bind(&row.observed_at)
        .bind(&row.content_hash)
        .bind(&row.snippet)
        .bind(serde_json::to_string(&row.keywords)?)
        .bind(serde_json::to_string(&row.regexes)?)
        .bind(serde_json::to_string(&row.extra)?)
        .bind(&row.prev_hash)
        .bind(&row.evidence_hash)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            // Another process won the race for the same triple.
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => return Ok(false),
            Err(e) => return Err(e).context("failed to insert evidence"),
        }

        if let Some(text) = &new.content_text {
            sqlx::query(
                "INSERT INTO content_history (source, origin, observed_at, content_hash, content_text) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&row.source)
            .bind(&row.origin)
            .bind(&row.observed_at)
            .bind(&row.content_hash)
            .bind(text)
            .execute(&mut *tx)
            .await
            .context("failed to insert content history")?;
        }

        tx.commit().await?;
        debug!(source = %row.source, origin = %row.origin, hash = %row.evidence_hash, "evidence appended");
        Ok(true)
    }

    /// `evidence_hash` of the most recently inserted row.
    pub async fn latest_hash(&self) -> Result<Option<String>> {
        let hash = sqlx::query_scalar("SELECT evidence_hash FROM evidence ORDER BY id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(hash)
    }

    pub async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM evidence")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Recompute every `evidence_hash` in id order and check each link.
    /// Stops at the first inconsistency.
    pub async fn verify_chain(&self) -> Result<ChainReport> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM evidence ORDER BY id ASC",
            EVIDENCE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut expected_prev: Option<String> = None;
        let mut checked = 0u64;
        for row in &rows {
            let id: i64 = row.get("id");
            let ev = match row_to_evidence(row) {
                Ok(ev) => ev,
                Err(e) => return Ok(broken(checked, id, format!("undecodable row: {}", e))),
            };
            if ev.prev_hash != expected_prev {
                return Ok(broken(
                    checked,
                    id,
                    format!(
                        "prev_hash {} does not match previous evidence_hash {}",
                        ev.prev_hash.as_deref().unwrap_or("(none)"),
                        expected_prev.as_deref().unwrap_or("(none)")
                    ),
                ));
            }
            let recomputed = compute_evidence_hash(&ev);
            if recomputed != ev.evidence_hash {
                return Ok(broken(
                    checked,
                    id,
                    format!(
                        "stored evidence_hash {} but fields hash to {}",
                        ev.evidence_hash, recomputed
                    ),
                ));
            }
            checked += 1;
            expected_prev = Some(ev.evidence_hash);
        }

        Ok(ChainReport {
            rows_checked: checked,
            first_break: None,
        })
    }

    /// History rows for one origin, newest first.
    pub async fn history(&self, source: &str, origin: &str, limit: i64) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            "SELECT source, origin, observed_at, content_hash, content_text FROM content_history \
             WHERE source = ? AND origin = ? ORDER BY observed_at DESC, id DESC LIMIT ?",
        )
        .bind(source)
        .bind(origin)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| HistoryEntry {
                source: row.get("source"),
                origin: row.get("origin"),
                observed_at: row.get("observed_at"),
                content_hash: row.get("content_hash"),
                content_text: row.get("content_text"),
            })
            .collect())
    }
}

fn broken(checked: u64, id: i64, reason: String) -> ChainReport {
    ChainReport {
        rows_checked: checked,
        first_break: Some(ChainBreak { id, reason }),
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// SHA-256 over the canonical serialization of the row's chained fields.
/// `id` and `evidence_hash` itself are not part of the payload.
pub fn compute_evidence_hash(ev: &Evidence) -> String {
    let payload = json!({
        "v": CHAIN_VERSION,
        "source": ev.source,
        "origin": ev.origin,
        "title": ev.title,
        "observed_at": ev.observed_at,
        "content_hash": ev.content_hash,
        "prev_hash": ev.prev_hash,
        "snippet": ev.snippet,
        "keywords": ev.keywords,
        "regexes": ev.regexes,
        "extra": ev.extra,
    });
    // serde_json maps are key-sorted and `to_string` is compact.
    sha256_hex(payload.to_string().as_bytes())
}

/// Decode a row selected with [`EVIDENCE_COLUMNS`].
pub(crate) fn row_to_evidence(row: &SqliteRow) -> Result<Evidence> {
    let keywords_json: String = row.get("keywords_json");
    let regexes_json: String = row.get("regexes_json");
    let extra_json: String = row.get("extra_json");

    Ok(Evidence {
        id: row.get("id"),
        source: row.get("source"),
        origin: row.get("origin"),
        title: row.get("title"),
        observed_at: row.get("observed_at"),
        content_hash: row.get("content_hash"),
        snippet: row.get("snippet"),
        keywords: serde_json::from_str(&keywords_json).context("keywords_json")?,
        regexes: serde_json::from_str(&regexes_json).context("regexes_json")?,
        extra: serde_json::from_str(&extra_json).context("extra_json")?,
        prev_hash: row.get("prev_hash"),
        evidence_hash: row.get("evidence_hash"),
    })
}
