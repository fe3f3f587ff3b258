//! String utility functions

/// Truncate to at most `max_bytes` bytes without splitting a UTF-8 character.
///
/// Returns `None` when the input already fits.
pub fn truncate_utf8(text: &str, max_bytes: usize) -> Option<&str> {
    if text.len() <= max_bytes {
        return None;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    Some(&text[..end])
}

/// Truncate to at most `max_chars` characters.
///
/// Returns `None` when the input already fits.
pub fn truncate_chars(text: &str, max_chars: usize) -> Option<&str> {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => Some(&text[..idx]),
        None => None,
    }
}

/// Lowercase hex check with an exact length
pub fn is_lower_hex(text: &str, len: usize) -> bool {
    text.len() == len && text.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
