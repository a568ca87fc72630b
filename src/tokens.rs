//! Thin wrapper around tiktoken for fast, cached token counting.

use once_cell::sync::Lazy;
use std::sync::Mutex;
use tiktoken_rs::{cl100k_base, CoreBPE};
use tracing::warn;

/// Cached encoder, created once per process. `None` if the tables failed to load.
static ENCODER: Lazy<Option<Mutex<CoreBPE>>> = Lazy::new(|| match cl100k_base() {
    Ok(bpe) => Some(Mutex::new(bpe)),
    Err(e) => {
        warn!("cl100k encoder unavailable, falling back to estimates: {}", e);
        None
    }
});

/// Count tokens for a piece of UTF-8 text.
pub fn count_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    match ENCODER.as_ref().and_then(|m| m.lock().ok()) {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => estimate_tokens(text),
    }
}

/// Rough 4-characters-per-token estimate.
fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_tokens_basic() {
        assert_eq!(count_tokens(""), 0);
        assert_eq!(count_tokens("Hello"), 1);
        assert_eq!(count_tokens("Hello, world!"), 4);
    }

    #[test]
    fn test_count_tokens_grows_with_text() {
        let short = count_tokens("Remember this: alpha.");
        let long = count_tokens(&"Remember this: alpha. ".repeat(20));
        assert!(long > short);
    }

    #[test]
    fn test_estimate_is_never_zero_for_text() {
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
    }
}
