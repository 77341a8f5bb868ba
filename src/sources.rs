//! Source abstraction and construction from configuration.
//!
//! A [`Source`] yields the [`Item`]s currently visible at one configured
//! origin. Every call to [`Source::fetch`] performs exactly one external
//! request; sources never loop, follow links, or discover new URLs. The
//! scheduler is responsible for calling `fetch` again later.
//!
//! Three variants exist, collected in [`ConfiguredSource`]:
//!
//! | Kind    | Type | Items per fetch |
//! |---------|------|-----------------|
//! | `rss`   | [`FeedSource`] | one per feed entry with a link |
//! | `http`  | [`PageSource`] | exactly one |
//! | `onion` | [`OnionSource`] | exactly one, fetched through the SOCKS proxy |

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::config::{Config, SourceEntry};
use crate::models::Item;
use crate::source_feed::FeedSource;
use crate::source_onion::{OnionSource, TorControl};
use crate::source_page::PageSource;
use crate::transport::Transport;

pub const DEFAULT_RSS_INTERVAL: u64 = 1800;
pub const DEFAULT_HTTP_INTERVAL: u64 = 3600;
pub const DEFAULT_ONION_INTERVAL: u64 = 3600;

const DEFAULT_RSS_TIMEOUT: u64 = 15;
const DEFAULT_HTTP_TIMEOUT: u64 = 20;
const DEFAULT_ONION_TIMEOUT: u64 = 30;

/// One configured origin that can be polled for items.
///
/// Network and parse failures are returned as errors; implementations do
/// not suppress them.
#[async_trait]
pub trait Source: Send + Sync {
    /// Configured source name, recorded on every evidence row.
    fn name(&self) -> &str;

    /// Short kind label: `rss`, `http` or `onion`.
    fn kind(&self) -> &'static str;

    /// The exact URL this source fetches.
    fn url(&self) -> &str;

    /// Stable job identity, `"{kind}:{name}"`.
    fn job_id(&self) -> String {
        format!("{}:{}", self.kind(), self.name())
    }

    /// Fetch the items currently visible at this origin.
    async fn fetch(&self) -> Result<Vec<Item>>;
}

/// A source built from configuration, tagged by variant.
pub enum ConfiguredSource {
    Feed(FeedSource),
    Page(PageSource),
    Onion(OnionSource),
}

impl ConfiguredSource {
    fn inner(&self) -> &dyn Source {
        match self {
            ConfiguredSource::Feed(s) => s as &dyn Source,
            ConfiguredSource::Page(s) => s as &dyn Source,
            ConfiguredSource::Onion(s) => s as &dyn Source,
        }
    }
}

#[async_trait]
impl Source for ConfiguredSource {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn kind(&self) -> &'static str {
        self.inner().kind()
    }

    fn url(&self) -> &str {
        self.inner().url()
    }

    async fn fetch(&self) -> Result<Vec<Item>> {
        match self {
            ConfiguredSource::Feed(s) => s.fetch().await,
            ConfiguredSource::Page(s) => s.fetch().await,
            ConfiguredSource::Onion(s) => s.fetch().await,
        }
    }
}

/// A source together with how often it should be polled.
pub struct ScheduledSource {
    pub source: ConfiguredSource,
    pub interval: Duration,
}

/// Build every configured source, each with its own private transport.
pub fn build_sources(config: &Config) -> Vec<ScheduledSource> {
    let mut out = Vec::new();

    for entry in &config.sources.rss {
        let transport = transport_for(config, entry, DEFAULT_RSS_TIMEOUT);
        out.push(ScheduledSource {
            source: ConfiguredSource::Feed(FeedSource::new(&entry.name, &entry.url, transport)),
            interval: interval_for(entry, DEFAULT_RSS_INTERVAL),
        });
    }

    for entry in &config.sources.http {
        let transport = transport_for(config, entry, DEFAULT_HTTP_TIMEOUT);
        out.push(ScheduledSource {
            source: ConfiguredSource::Page(PageSource::new(&entry.name, &entry.url, transport)),
            interval: interval_for(entry, DEFAULT_HTTP_INTERVAL),
        });
    }

    let onion = &config.sources.onion_allowlist;
    for entry in &onion.targets {
        let transport = transport_for(config, entry, DEFAULT_ONION_TIMEOUT);
        let control = onion.renew_circuit.then(|| {
            TorControl::new(
                ("127.0.0.1", onion.tor_control_port),
                onion.tor_control_password.clone(),
                Duration::from_secs(onion.circuit_settle_secs),
            )
        });
        out.push(ScheduledSource {
            source: ConfiguredSource::Onion(OnionSource::new(
                &entry.name,
                &entry.url,
                &onion.tor_socks5,
                control,
                transport,
            )),
            interval: interval_for(entry, DEFAULT_ONION_INTERVAL),
        });
    }

    out
}

fn transport_for(config: &Config, entry: &SourceEntry, default_timeout: u64) -> Transport {
    let timeout = Duration::from_secs(entry.timeout_secs.unwrap_or(default_timeout));
    Transport::new(&config.transport, timeout)
}

fn interval_for(entry: &SourceEntry, default_secs: u64) -> Duration {
    Duration::from_secs(entry.interval_seconds.unwrap_or(default_secs))
}

/// Print every configured source (the `sources` command).
pub fn list_sources(config: &Config) -> Result<()> {
    let sources = build_sources(config);
    if sources.is_empty() {
        println!("No sources configured.");
        return Ok(());
    }

    println!("{:<6} {:<24} {:>10}  URL", "KIND", "NAME", "INTERVAL");
    for s in &sources {
        println!(
            "{:<6} {:<24} {:>9}s  {}",
            s.source.kind(),
            s.source.name(),
            s.interval.as_secs(),
            s.source.url()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn test_build_sources_from_config() {
        let cfg = parse_config(
            r#"
[[sources.rss]]
name = "feed"
url = "https://example.com/feed.xml"

[[sources.http]]
name = "page"
url = "https://example.com/"
interval_seconds = 60

[sources.onion_allowlist]
renew_circuit = true

[[sources.onion_allowlist.targets]]
name = "hidden"
url = "http://exampleexampleexample.onion/"
"#,
        )
        .unwrap();

        let sources = build_sources(&cfg);
        let ids: Vec<String> = sources.iter().map(|s| s.source.job_id()).collect();
        assert_eq!(ids, vec!["rss:feed", "http:page", "onion:hidden"]);

        let intervals: Vec<u64> = sources.iter().map(|s| s.interval.as_secs()).collect();
        assert_eq!(intervals, vec![1800, 60, 3600]);

        assert!(matches!(sources[0].source, ConfiguredSource::Feed(_)));
        assert!(matches!(sources[2].source, ConfiguredSource::Onion(_)));
        assert_eq!(sources[1].source.url(), "https://example.com/");
    }

    #[test]
    fn test_no_sources() {
        let cfg = parse_config("").unwrap();
        assert!(build_sources(&cfg).is_empty());
    }
}
