//! 📜 Blob hits → code snippets.
//!
//! 🎬 *[a search for `render` returns a 4,000 line file. the user wants three lines of it.]*
//! *[which three? the ones with the marker on them. not the first `render` we trip over.]*
//!
//! A blob hit carries the full file `content` in `_source` and, when the
//! backend highlighted something, the same content again with markers wrapped
//! around the matches. We find the first start marker in the highlighted copy,
//! count newlines in front of it to get its line, and cut a small window of the
//! original content that ends on that line.
//!
//! Counting lines in front of the marker (instead of searching the plain content
//! for the matched term) is what keeps a repeated term from being pinned to an
//! earlier, unmarked line.

use anyhow::{Context, Result};
use memchr::{memchr_iter, memmem};
use serde::Serialize;
use serde_json::Value;

use super::highlight::HIGHLIGHT_START_TAG;
use super::query::{SearchHit, lookup};

/// 📏 Lines of leading context shown above the matched line.
pub const SNIPPET_LEADING_LINES: usize = 2;

/// 📜 One blob (or wiki page) search result, ready to render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FoundBlob {
    pub path: String,
    pub basename: String,
    pub ref_name: String,
    /// 1-based line number of the first line in `data`.
    pub startline: usize,
    /// 1-based line number carrying the highlight, when the backend highlighted anything.
    pub highlight_line: Option<usize>,
    pub data: String,
    pub project_id: Option<u64>,
}

/// 🔍 Rebuild a snippet from a blob hit.
///
/// `project_id` overrides the project recorded in the document, for callers that
/// already know which project they searched.
pub fn parse_search_result(hit: &SearchHit, project_id: Option<u64>) -> Result<FoundBlob> {
    let blob = lookup(&hit.source, "blob")
        .with_context(|| format!("💀 hit '{}' has no blob in its _source. A blob hit without a blob.", hit.id))?;
    let content = blob.get("content").and_then(Value::as_str).unwrap_or_default();
    let path = blob
        .get("path")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let ref_name = blob
        .get("commit_sha")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let highlighted_line = hit
        .highlight
        .get("blob.content")
        .and_then(|fragments| fragments.first())
        .and_then(|fragment| marked_line_index(fragment));

    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let last_line = lines.len().saturating_sub(1);
    let found = highlighted_line.unwrap_or(0).min(last_line);
    let from = found.saturating_sub(SNIPPET_LEADING_LINES);
    let data = lines
        .get(from..=found)
        .map(|window| window.concat())
        .unwrap_or_default();

    Ok(FoundBlob {
        basename: basename(&path).to_string(),
        path,
        ref_name,
        startline: from + 1,
        highlight_line: highlighted_line.map(|_| found + 1),
        data,
        project_id: project_id.or_else(|| hit.source.get("project_id").and_then(Value::as_u64)),
    })
}

/// 🧭 0-based index of the line holding the first start marker, if any.
fn marked_line_index(highlighted: &str) -> Option<usize> {
    let marker = memmem::find(highlighted.as_bytes(), HIGHLIGHT_START_TAG.as_bytes())?;
    Some(memchr_iter(b'\n', &highlighted.as_bytes()[..marker]).count())
}

/// ✂️ The path without its final extension: `app/models/user.rb` → `app/models/user`.
///
/// Dotfiles keep their name (`config/.env` stays put). One reverse scan for the
/// last separator, one for the last dot in the file name. Linear, whatever the path
/// looks like.
pub fn basename(path: &str) -> &str {
    let file_start = path.rfind('/').map_or(0, |separator| separator + 1);
    match path[file_start..].rfind('.') {
        None | Some(0) => path,
        Some(dot) => &path[..file_start + dot],
    }
}
