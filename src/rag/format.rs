use serde::Serialize;
use std::collections::HashSet;

use super::chunk::Chunk;

pub const UNKNOWN_PAGE: &str = "?";
pub const TRUNCATION_MARKER: char = '…';

/// Context block for the prompt plus the citations it refers to.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FormattedContext {
    pub text: String,
    pub citations: Vec<String>,
}

/// Format retrieved chunks as `- (source, p.N) snippet` lines, one per chunk in
/// input order. Citations are `source (p.N)`, de-duplicated by first occurrence.
pub fn format_context<'a, I>(chunks: I, snippet_chars: usize) -> FormattedContext
where
    I: IntoIterator<Item = &'a Chunk>,
{
    let mut lines = Vec::new();
    let mut citations = Vec::new();
    let mut seen = HashSet::new();

    for chunk in chunks {
        let source = chunk.source_name();
        let page = chunk
            .display_page()
            .map(|p| p.to_string())
            .unwrap_or_else(|| UNKNOWN_PAGE.to_string());

        lines.push(format!("- ({}, p.{}) {}", source, page, snippet(&chunk.text, snippet_chars)));

        let citation = format!("{source} (p.{page})");
        if seen.insert(citation.clone()) {
            citations.push(citation);
        }
    }

    FormattedContext { text: lines.join("\n"), citations }
}

/// Flatten newlines and cap the snippet at `limit` characters.
fn snippet(text: &str, limit: usize) -> String {
    let flat = text.replace("\r\n", " ").replace('\n', " ");
    if flat.chars().count() <= limit {
        return flat;
    }
    let mut cut: String = flat.chars().take(limit).collect();
    cut.truncate(cut.trim_end().len());
    cut.push(TRUNCATION_MARKER);
    cut
}
