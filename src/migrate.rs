use anyhow::Result;
use sqlx::SqlitePool;

/// Create the evidence ledger and content history tables. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // AUTOINCREMENT keeps ids strictly increasing even after deletions,
    // which the hash chain relies on for ordering.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS evidence (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            origin TEXT NOT NULL,
            title TEXT,
            observed_at TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            snippet TEXT,
            keywords_json TEXT NOT NULL DEFAULT '[]',
            regexes_json TEXT NOT NULL DEFAULT '[]',
            extra_json TEXT NOT NULL DEFAULT '{}',
            prev_hash TEXT,
            evidence_hash TEXT NOT NULL,
            UNIQUE(source, origin, content_hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            origin TEXT NOT NULL,
            observed_at TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            content_text TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS ix_evidence_observed_at ON evidence(observed_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS ix_evidence_source ON evidence(source)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS ix_evidence_origin ON evidence(origin)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS ix_hist_source_origin ON content_history(source, origin)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS ix_hist_observed_at ON content_history(observed_at)")
        .execute(pool)
        .await?;

    Ok(())
}
