//! Helpers for sanitizing data before it enters tracing span attributes.
//!
//! Uploaded filenames may carry client directory paths and section content
//! is customer data; spans only ever see the redacted forms.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Returns only the last path component of an uploaded filename.
///
/// Handles both `/` and `\` separators since browsers on Windows may send
/// full client paths.
pub fn redact_filename(filename: &str) -> String {
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if name.is_empty() {
        "<unknown>".to_string()
    } else {
        name.to_string()
    }
}

/// First `max_chars` characters of `text` on one line, with `...` appended
/// when truncated.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = flat.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Short deterministic fingerprint of content for correlating log lines
/// without logging the content itself.
pub fn fingerprint(content: &str) -> String {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
