//! Syndication feed source (RSS 2.0, Atom, JSON Feed).

use anyhow::{Context, Result};
use async_trait::async_trait;
use feed_rs::model::Entry;
use serde_json::{json, Map};

use crate::extract::flatten_fragment;
use crate::models::Item;
use crate::sources::Source;
use crate::transport::{RequestOptions, Transport};

pub struct FeedSource {
    name: String,
    url: String,
    transport: Transport,
}

impl FeedSource {
    pub fn new(name: &str, url: &str, transport: Transport) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            transport,
        }
    }
}

#[async_trait]
impl Source for FeedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "rss"
    }

    fn url(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<Vec<Item>> {
        let response = self
            .transport
            .get(&self.url, RequestOptions::default())
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("feed '{}': fetch failed", self.name))?;

        parse_feed(&response.body, &self.url)
            .with_context(|| format!("feed '{}': could not parse {}", self.name, self.url))
    }
}

/// Parse a feed document into items. Entries without a link are skipped.
pub fn parse_feed(body: &[u8], feed_url: &str) -> Result<Vec<Item>> {
    let feed = feed_rs::parser::parse(body)?;
    Ok(feed
        .entries
        .iter()
        .filter_map(|entry| entry_to_item(entry, feed_url))
        .collect())
}

fn entry_to_item(entry: &Entry, feed_url: &str) -> Option<Item> {
    let origin = entry
        .links
        .iter()
        .map(|l| l.href.trim())
        .find(|href| !href.is_empty())?
        .to_string();

    let title = entry
        .title
        .as_ref()
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty());

    let summary = entry
        .summary
        .as_ref()
        .map(|s| flatten_fragment(&s.content))
        .filter(|s| !s.is_empty());

    let text = summary
        .or_else(|| title.clone())
        .unwrap_or_default();

    let mut extra = Map::new();
    extra.insert("feed".to_string(), json!(feed_url));

    Some(Item {
        origin,
        title,
        text,
        extra,
    })
}
