//! Length limiting for vendor fields.
//!
//! Both variants cut on character boundaries and append a single `…`.
//! A result is never longer than the limit, so truncating twice at the same
//! limit is a no-op.

/// Marker appended to truncated text.
pub const ELLIPSIS: char = '…';

/// Truncates `text` to at most `max_chars` Unicode scalar values.
///
/// Returns the (possibly unchanged) text and whether it was cut.
pub fn truncate(text: &str, max_chars: usize) -> (String, bool) {
    if text.chars().count() <= max_chars {
        return (text.to_string(), false);
    }
    if max_chars == 0 {
        return (String::new(), true);
    }
    let mut out: String = text.chars().take(max_chars - 1).collect();
    out.push(ELLIPSIS);
    (out, true)
}

/// Truncates `text` so its UTF-8 encoding fits in `max_bytes`.
///
/// Used for vendors that limit payload fields in bytes. Never splits a
/// multi-byte character; when the limit cannot hold the ellipsis itself the
/// text is cut without it.
pub fn truncate_bytes(text: &str, max_bytes: usize) -> (String, bool) {
    if text.len() <= max_bytes {
        return (text.to_string(), false);
    }
    let marker_len = ELLIPSIS.len_utf8();
    let budget = max_bytes.saturating_sub(marker_len);
    let with_marker = max_bytes >= marker_len;
    let budget = if with_marker { budget } else { max_bytes };

    let cut = text
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .take_while(|end| *end <= budget)
        .last()
        .unwrap_or(0);

    let mut out = text[..cut].to_string();
    if with_marker {
        out.push(ELLIPSIS);
    }
    (out, true)
}
