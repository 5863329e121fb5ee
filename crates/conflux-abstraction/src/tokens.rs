//! Approximate token measurement.

/// Characters per token used when no better ratio is configured.
pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

/// Estimates the token count of `text`.
///
/// Rough approximation: one token per `chars_per_token` characters, rounded
/// up. Longer text never measures less than shorter text.
pub fn approximate_tokens(text: &str, chars_per_token: usize) -> usize {
    text.chars().count().div_ceil(chars_per_token.max(1))
}
