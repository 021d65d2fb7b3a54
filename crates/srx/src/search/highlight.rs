//! ✨ Highlight reconstruction.
//!
//! The backend hands back text with matched terms wrapped in marker tokens.
//! We strip the markers, remember where they were (byte ranges in the plain
//! text), and rebuild safe HTML from those ranges. Marker scanning is `memmem`,
//! linear in the fragment length, no regex anywhere near it.

use std::ops::Range;

use memchr::memmem;

/// 🏷️ Start marker the backend wraps around matches.
pub const HIGHLIGHT_START_TAG: &str = "gitlabelasticsearch→";
/// 🏷️ End marker.
pub const HIGHLIGHT_END_TAG: &str = "←gitlabelasticsearch";

const HTML_OPEN: &str = r#"<span class="gl-text-gray-900 gl-font-weight-bold">"#;
const HTML_CLOSE: &str = "</span>";

/// ✨ Plain text plus the byte ranges that were highlighted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Highlighted {
    pub plain: String,
    pub spans: Vec<Range<usize>>,
}

impl Highlighted {
    /// 🔍 Strip markers out of a returned fragment.
    ///
    /// An unterminated start marker highlights through to the end of the text.
    /// Stray end markers are dropped.
    pub fn parse(marked: &str) -> Self {
        let start_finder = memmem::Finder::new(HIGHLIGHT_START_TAG);
        let end_finder = memmem::Finder::new(HIGHLIGHT_END_TAG);
        let bytes = marked.as_bytes();

        let mut plain = String::with_capacity(marked.len());
        let mut spans = Vec::new();
        let mut cursor = 0;

        while let Some(found) = start_finder.find(&bytes[cursor..]) {
            let start = cursor + found;
            push_without_stray_ends(&mut plain, &marked[cursor..start], &end_finder);
            let inner_start = start + HIGHLIGHT_START_TAG.len();
            let inner_end = end_finder
                .find(&bytes[inner_start..])
                .map(|offset| inner_start + offset)
                .unwrap_or(marked.len());

            let span_start = plain.len();
            plain.push_str(&marked[inner_start..inner_end]);
            if plain.len() > span_start {
                spans.push(span_start..plain.len());
            }
            cursor = (inner_end + HIGHLIGHT_END_TAG.len()).min(marked.len());
        }
        push_without_stray_ends(&mut plain, &marked[cursor..], &end_finder);

        Self { plain, spans }
    }

    /// 🧱 Escaped HTML with highlighted ranges wrapped in a bold span.
    pub fn to_html(&self) -> String {
        let mut html = String::with_capacity(self.plain.len() + self.spans.len() * 64);
        let mut cursor = 0;
        for span in &self.spans {
            escape_html_into(&mut html, &self.plain[cursor..span.start]);
            html.push_str(HTML_OPEN);
            escape_html_into(&mut html, &self.plain[span.clone()]);
            html.push_str(HTML_CLOSE);
            cursor = span.end;
        }
        escape_html_into(&mut html, &self.plain[cursor..]);
        html
    }
}

fn push_without_stray_ends(plain: &mut String, segment: &str, end_finder: &memmem::Finder<'_>) {
    let mut rest = segment;
    while let Some(found) = end_finder.find(rest.as_bytes()) {
        plain.push_str(&rest[..found]);
        rest = &rest[found + HIGHLIGHT_END_TAG.len()..];
    }
    plain.push_str(rest);
}

/// 🧼 Minimal HTML escaping for text nodes.
pub fn escape_html_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
}

/// 🖍️ Wrap every case-insensitive occurrence of any token in markers.
///
/// This is what a backend does to a field when asked to highlight it. The
/// in-memory backend uses it so tests see the same shape a cluster returns.
pub fn mark_tokens(text: &str, tokens: &[String]) -> Option<String> {
    let lowered = text.to_ascii_lowercase();
    let mut ranges: Vec<Range<usize>> = Vec::new();
    for token in tokens.iter().filter(|token| !token.is_empty()) {
        for found in memmem::find_iter(lowered.as_bytes(), token.as_bytes()) {
            ranges.push(found..found + token.len());
        }
    }
    if ranges.is_empty() {
        return None;
    }
    ranges.sort_by_key(|range| range.start);

    // 🧹 overlapping matches merge into one highlighted run
    let mut merged: Vec<Range<usize>> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
            _ => merged.push(range),
        }
    }

    let mut marked = String::with_capacity(text.len() + merged.len() * 48);
    let mut cursor = 0;
    for range in merged {
        marked.push_str(&text[cursor..range.start]);
        marked.push_str(HIGHLIGHT_START_TAG);
        marked.push_str(&text[range.clone()]);
        marked.push_str(HIGHLIGHT_END_TAG);
        cursor = range.end;
    }
    marked.push_str(&text[cursor..]);
    Some(marked)
}
