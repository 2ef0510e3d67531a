//! Approximate token counting shared by the truncator and vault.
//!
//! No provider's exact tokenizer is bundled — this is the same
//! characters-per-token heuristic the vault uses for chunk sizing
//! (spec §4.5 "token counts are estimates, not exact").

/// Matches `vault::chunk::CHARS_PER_TOKEN` so a chunk's stored size and the
/// truncator's budget accounting agree.
pub const CHARS_PER_TOKEN: usize = 4;

/// Safety margin applied on top of the raw chars-per-token estimate, so the
/// budget check (I7) errs toward truncating too early rather than too late.
pub const SAFETY_MULTIPLIER: f64 = 1.1;

/// Estimate the token count of `text`: `ceil(chars / CHARS_PER_TOKEN) * 1.1`,
/// rounded up. Ceil-dividing first so a non-empty string never estimates to
/// zero tokens, then applying the safety multiplier.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let raw = text.len().div_ceil(CHARS_PER_TOKEN);
    ((raw as f64) * SAFETY_MULTIPLIER).ceil() as usize
}

/// Estimate the token count of a full chat message list by summing content
/// length plus a small fixed per-message overhead for role/formatting
/// tokens, mirroring how providers bill a few tokens per message boundary.
pub fn estimate_messages_tokens<'a>(contents: impl IntoIterator<Item = &'a str>) -> usize {
    const PER_MESSAGE_OVERHEAD: usize = 4;
    contents
        .into_iter()
        .map(|c| estimate_tokens(c) + PER_MESSAGE_OVERHEAD)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero_tokens() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn estimate_rounds_up_then_applies_safety_multiplier() {
        // 5 chars / 4 -> ceil 2, * 1.1 -> 2.2, ceil -> 3
        assert_eq!(estimate_tokens("abcde"), 3);
    }

    #[test]
    fn messages_include_per_message_overhead() {
        let total = estimate_messages_tokens(["hi", "there"]);
        // "hi": 2 chars -> ceil 1 -> *1.1 -> ceil 2; "there": 5 chars -> ceil 2 -> *1.1 -> ceil 3
        assert_eq!(total, (2 + 4) + (3 + 4));
    }
}
