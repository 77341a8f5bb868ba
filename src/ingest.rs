//! Ingestion pipeline orchestration.
//!
//! One pass over one source: fetch → match → hash/snippet → IOC extraction →
//! enrichment → evidence upsert → alert dispatch. A fetch failure aborts
//! only that source's pass; enrichment and alert failures never abort
//! anything.

use anyhow::{bail, Result};
use futures::future::join_all;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::alerts::{AlertDispatcher, DispatchOutcome};
use crate::config::Config;
use crate::enrich::{extract_domain, Enricher, NetworkEnricher, NoopEnricher};
use crate::evidence::{EvidenceStore, NewEvidence};
use crate::ioc::{self, extract_indicators};
use crate::matcher::{content_hash, redact_secrets, snippet, Watchlist};
use crate::models::{AlertEvent, Item};
use crate::scheduler::JobRunner;
use crate::sources::{build_sources, Source};

/// Enrichment results keyed by host, kept for one pass.
type EnrichmentCache = HashMap<String, Map<String, Value>>;

/// Counts for one pass over one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub items: usize,
    pub inserted: usize,
    pub hits: usize,
    pub alerts_delivered: usize,
    pub alerts_failed: usize,
}

pub struct Pipeline {
    store: EvidenceStore,
    watchlist: Watchlist,
    max_snippet_chars: usize,
    enricher: Arc<dyn Enricher>,
    alerts: AlertDispatcher,
}

impl Pipeline {
    pub fn new(
        store: EvidenceStore,
        watchlist: Watchlist,
        max_snippet_chars: usize,
        enricher: Arc<dyn Enricher>,
        alerts: AlertDispatcher,
    ) -> Self {
        Self {
            store,
            watchlist,
            max_snippet_chars,
            enricher,
            alerts,
        }
    }

    /// Open the store and build every collaborator from configuration.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store = EvidenceStore::open(&config.app.db_path).await?;
        let watchlist = Watchlist::new(&config.matching.keywords, &config.matching.regex);
        let enricher: Arc<dyn Enricher> = if config.enrichment.enabled {
            Arc::new(NetworkEnricher::new(&config.enrichment)?)
        } else {
            Arc::new(NoopEnricher)
        };
        let alerts = AlertDispatcher::from_config(&config.alerts)?;
        Ok(Self::new(
            store,
            watchlist,
            config.matching.max_snippet_chars,
            enricher,
            alerts,
        ))
    }

    pub fn store(&self) -> &EvidenceStore {
        &self.store
    }

    /// Run one pass over `source`.
    ///
    /// Alert deliveries run concurrently with item processing and are
    /// joined before returning so their outcome lands in the summary.
    pub async fn process_source(&self, source: &dyn Source) -> Result<PassSummary> {
        let items = source.fetch().await?;
        let mut summary = PassSummary {
            items: items.len(),
            ..PassSummary::default()
        };

        let mut cache = EnrichmentCache::new();
        let mut deliveries = Vec::new();
        for item in items {
            let (inserted, event) = self.store_item(source.name(), item, &mut cache).await?;
            if inserted {
                summary.inserted += 1;
            }
            if let Some(event) = event {
                summary.hits += 1;
                if !self.alerts.is_empty() {
                    let alerts = self.alerts.clone();
                    deliveries.push(tokio::spawn(async move { alerts.dispatch(&event).await }));
                }
            }
        }

        for joined in join_all(deliveries).await {
            let outcome: DispatchOutcome = joined.unwrap_or_else(|e| {
                warn!(error = %e, "alert task aborted");
                DispatchOutcome {
                    delivered: 0,
                    failed: 1,
                }
            });
            summary.alerts_delivered += outcome.delivered;
            summary.alerts_failed += outcome.failed;
        }

        Ok(summary)
    }

    /// Store one item. Returns whether evidence was inserted and, when the
    /// item matched anything, the alert event for it.
    pub async fn process_item(
        &self,
        source_name: &str,
        item: Item,
    ) -> Result<(bool, Option<AlertEvent>)> {
        self.store_item(source_name, item, &mut EnrichmentCache::new())
            .await
    }

    async fn enrichment(&self, origin: &str, cache: &mut EnrichmentCache) -> Map<String, Value> {
        let Some(host) = extract_domain(origin) else {
            return self.enricher.enrich(origin).await;
        };
        if let Some(hit) = cache.get(&host) {
            return hit.clone();
        }
        let fresh = self.enricher.enrich(origin).await;
        cache.insert(host, fresh.clone());
        fresh
    }

    async fn store_item(
        &self,
        source_name: &str,
        item: Item,
        cache: &mut EnrichmentCache,
    ) -> Result<(bool, Option<AlertEvent>)> {
        let (keywords, regexes) = self.watchlist.find_matches(&item.text);
        let hash = content_hash(&item.text);
        let snip = snippet(&item.text, self.max_snippet_chars);
        let iocs = extract_indicators(&item.text);

        let mut extra = item.extra;
        extra.extend(self.enrichment(&item.origin, cache).await);
        if !iocs.is_empty() {
            extra.insert("iocs".to_string(), ioc::to_json(&iocs));
        }

        let inserted = self
            .store
            .upsert_evidence(NewEvidence {
                source: source_name.to_string(),
                origin: item.origin.clone(),
                title: item.title.clone(),
                content_hash: hash,
                snippet: Some(snip.clone()),
                keywords: keywords.clone(),
                regexes: regexes.clone(),
                extra,
                content_text: Some(item.text),
            })
            .await?;
        if inserted {
            info!(source = source_name, origin = %item.origin, "NEW");
        }

        if keywords.is_empty() && regexes.is_empty() && iocs.is_empty() {
            return Ok((inserted, None));
        }

        warn!(
            source = source_name,
            origin = %item.origin,
            kw = ?keywords,
            rx = regexes.len(),
            ioc = !iocs.is_empty(),
            "HIT"
        );
        let event = AlertEvent {
            source: source_name.to_string(),
            origin: item.origin,
            title: item.title,
            keywords,
            regexes,
            iocs,
            snippet: redact_secrets(&snip),
        };
        Ok((inserted, Some(event)))
    }
}

/// Run every configured source once (the `once` command).
///
/// A failing source is reported and the remaining sources still run; the
/// command fails at the end if any source failed.
pub async fn run_once(config: &Config) -> Result<()> {
    let pipeline = Pipeline::from_config(config).await?;
    let sources = build_sources(config);
    if sources.is_empty() {
        println!("No sources configured.");
        return Ok(());
    }

    let mut failed = 0usize;
    for scheduled in &sources {
        let source = &scheduled.source;
        match pipeline.process_source(source).await {
            Ok(s) => {
                println!(
                    "{:<24} items: {:>4}  new: {:>4}  hits: {:>4}  alerts: {}/{}",
                    source.job_id(),
                    s.items,
                    s.inserted,
                    s.hits,
                    s.alerts_delivered,
                    s.alerts_delivered + s.alerts_failed
                );
            }
            Err(e) => {
                failed += 1;
                error!(job = %source.job_id(), error = %format!("{:#}", e), "source failed");
                println!("{:<24} FAILED: {:#}", source.job_id(), e);
            }
        }
    }

    pipeline.store().pool().close().await;
    if failed > 0 {
        bail!("{} of {} sources failed", failed, sources.len());
    }
    println!("ok");
    Ok(())
}

/// Schedule every configured source and run until Ctrl-C (the `daemon` command).
pub async fn run_daemon(config: &Config) -> Result<()> {
    let pipeline = Arc::new(Pipeline::from_config(config).await?);
    let runner = JobRunner::new();

    for scheduled in build_sources(config) {
        let job_id = scheduled.source.job_id();
        let source = Arc::new(scheduled.source);
        let pipeline = pipeline.clone();
        runner.add_interval_job(&job_id, scheduled.interval, move || {
            let pipeline = pipeline.clone();
            let source = source.clone();
            async move {
                let s = pipeline.process_source(&*source).await?;
                info!(
                    job = %source.job_id(),
                    items = s.items,
                    new = s.inserted,
                    hits = s.hits,
                    "pass complete"
                );
                anyhow::Ok(())
            }
        })?;
    }

    info!(jobs = runner.job_ids().len(), "daemon running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    runner.shutdown();
    Ok(())
}
