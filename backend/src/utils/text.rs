//! Text normalization and hashing helpers shared by connectors and dedupe.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

static MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@([A-Za-z0-9_][A-Za-z0-9_.]{1,63})").expect("mention regex"));

/// Hash value used for items whose normalized content is empty.
///
/// Empty documents must never collide with each other across channels, so
/// they hash to a sentinel that the content-hash dedupe stage skips.
pub const EMPTY_CONTENT_HASH: &str = "empty";

/// Collapse all whitespace runs to single spaces and trim.
///
/// Identical visible text must produce identical output regardless of
/// upstream formatting (newlines, tabs, double spaces).
pub fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip HTML tags and entities, returning plain text.
pub fn strip_html(input: &str) -> String {
    if !input.contains('<') {
        return input.to_string();
    }
    let fragment = scraper::Html::parse_fragment(input);
    fragment.root_element().text().collect::<Vec<_>>().join(" ")
}

/// Content hash over the canonical text form: HTML-stripped and
/// whitespace-collapsed. Empty content hashes to [`EMPTY_CONTENT_HASH`].
pub fn content_hash(content: &str) -> String {
    let normalized = normalize_whitespace(&strip_html(content));
    if normalized.is_empty() {
        return EMPTY_CONTENT_HASH.to_string();
    }
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(input: &str, max_chars: usize) -> &str {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => &input[..idx],
        None => input,
    }
}

/// First `max_chars` characters, whitespace-collapsed, for synthesized
/// titles of title-less posts.
pub fn title_from_content(content: &str, max_chars: usize) -> String {
    let normalized = normalize_whitespace(content);
    truncate_chars(&normalized, max_chars).to_string()
}

/// Case-folded title prefix used as the title-similarity pre-filter key.
pub fn title_prefix(title: &str, prefix_chars: usize) -> String {
    truncate_chars(&normalize_whitespace(title), prefix_chars).to_lowercase()
}

/// All `@handle` mentions in a text, lowercased, without the `@`.
pub fn extract_mentions(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    MENTION_RE
        .captures_iter(text)
        .map(|c| c[1].to_lowercase())
        .filter(|h| seen.insert(h.clone()))
        .collect()
}
