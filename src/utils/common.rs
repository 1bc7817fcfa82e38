//! Common utility functions used across the worker

/// Maximum number of characters of child process output returned to callers.
pub const EXCERPT_CHARS: usize = 500;

/// Return at most `max_chars` leading characters of `text`.
///
/// Cuts on a character boundary so multi-byte output never panics.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Decode raw process output and cut it down to [`EXCERPT_CHARS`].
pub fn output_excerpt(bytes: &[u8]) -> String {
    excerpt(&String::from_utf8_lossy(bytes), EXCERPT_CHARS)
}
