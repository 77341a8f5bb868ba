//! Shallow HTML text extraction.
//!
//! Pages are reduced to an optional `<title>` plus all visible text nodes,
//! each trimmed and joined with single spaces. No rendering, no scripting.

use scraper::{Html, Node, Selector};
use std::sync::OnceLock;

/// Elements whose text content is never part of the flattened output.
const SKIPPED_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

/// Title and flattened text of a full HTML document.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub title: Option<String>,
    pub text: String,
}

fn title_selector() -> &'static Selector {
    static TITLE: OnceLock<Selector> = OnceLock::new();
    TITLE.get_or_init(|| Selector::parse("title").expect("title selector"))
}

pub fn html_to_text(html: &str) -> PageText {
    let document = Html::parse_document(html);

    let title = document
        .select(title_selector())
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    PageText {
        title,
        text: flatten(&document),
    }
}

/// Flatten an HTML fragment (e.g. a feed entry summary) to plain text.
pub fn flatten_fragment(fragment: &str) -> String {
    flatten(&Html::parse_fragment(fragment))
}

fn flatten(document: &Html) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for node in document.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let skipped = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| SKIPPED_ELEMENTS.contains(&e.name()))
        });
        if skipped {
            continue;
        }
        let piece = text.trim();
        if !piece.is_empty() {
            parts.push(piece);
        }
    }
    parts.join(" ")
}
