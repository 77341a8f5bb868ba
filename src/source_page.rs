//! Single static page source.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Map};

use crate::extract::html_to_text;
use crate::models::Item;
use crate::sources::Source;
use crate::transport::{RequestOptions, Transport};

pub struct PageSource {
    name: String,
    url: String,
    transport: Transport,
}

impl PageSource {
    pub fn new(name: &str, url: &str, transport: Transport) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            transport,
        }
    }
}

#[async_trait]
impl Source for PageSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "http"
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
            .with_context(|| format!("page '{}': fetch failed", self.name))?;

        let mut extra = Map::new();
        extra.insert("type".to_string(), json!("http"));
        Ok(vec![page_item(&self.url, &response.text(), extra)])
    }
}

/// Build the single item for a fetched page. The origin is always the
/// configured URL, never the post-redirect one.
pub(crate) fn page_item(url: &str, html: &str, extra: Map<String, serde_json::Value>) -> Item {
    let page = html_to_text(html);
    Item {
        origin: url.to_string(),
        title: page.title,
        text: page.text,
        extra,
    }
}
