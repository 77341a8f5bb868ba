//! Line-based change summaries between two versions of a page.

use serde::Serialize;
use similar::{ChangeTag, TextDiff};

const MAX_DIFF_CHARS: usize = 20_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffSummary {
    /// Unified diff, capped at 20000 characters.
    pub diff_text: String,
    pub additions: usize,
    pub deletions: usize,
    /// `(additions + deletions) / max(old line count, 1)`
    pub change_ratio: f64,
}

pub fn compute_diff(old_text: &str, new_text: &str, context_lines: usize) -> DiffSummary {
    let diff = TextDiff::from_lines(old_text, new_text);

    let mut additions = 0;
    let mut deletions = 0;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => additions += 1,
            ChangeTag::Delete => deletions += 1,
            ChangeTag::Equal => {}
        }
    }

    let full = diff
        .unified_diff()
        .context_radius(context_lines)
        .header("previous", "current")
        .to_string();
    let diff_text: String = full.chars().take(MAX_DIFF_CHARS).collect();

    let old_lines = old_text.lines().count().max(1);
    DiffSummary {
        diff_text,
        additions,
        deletions,
        change_ratio: (additions + deletions) as f64 / old_lines as f64,
    }
}
