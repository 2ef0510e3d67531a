//! C5 — Truncator: keeps `messages_tokens + memory_tokens <= 0.95 * W`,
//! where `W` is the target model's context window (spec §4.5).
//!
//! Drops in a fixed priority order, oldest-first within each category
//! (spec §4.5):
//! 1. Oldest conversation messages, never dropping the system message nor
//!    the single most recent message.
//! 2. Archive-age memory chunks (age > 3 days).
//! 3. Long-term-window chunks (4h–3d).
//! 4. Working-window chunks (15m–4h).
//! 5. Hot-window chunks (<15m) — last resort.
//! 6. If the budget is still exceeded, hard-truncate the oldest remaining
//!    message's content by characters.

use crate::model_caps::resolve_context_window;

/// Fraction of the context window the truncator is allowed to fill, leaving
/// headroom for the model's own per-message formatting overhead.
pub const BUDGET_FRACTION: f64 = 0.95;

/// Age thresholds for the memory-chunk drop categories (spec §4.5). Distinct
/// from `kronos::window::WindowConfig`'s (configurable) retrieval windows —
/// the truncator's drop order is a fixed, non-configurable priority scheme.
pub const ARCHIVE_AGE_MS: i64 = 3 * 24 * 3_600_000;
pub const LONGTERM_AGE_MS: i64 = 4 * 3_600_000;
pub const WORKING_AGE_MS: i64 = 15 * 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum DropCategory {
    Hot,
    Working,
    LongTerm,
    Archive,
}

fn categorize(age_ms: i64) -> DropCategory {
    if age_ms > ARCHIVE_AGE_MS {
        DropCategory::Archive
    } else if age_ms > LONGTERM_AGE_MS {
        DropCategory::LongTerm
    } else if age_ms > WORKING_AGE_MS {
        DropCategory::Working
    } else {
        DropCategory::Hot
    }
}

/// One retrieved memory chunk's size and age, as the truncator needs to know
/// it to place the chunk in a drop category.
#[derive(Debug, Clone, Copy)]
pub struct MemoryChunkInfo {
    pub tokens: usize,
    pub age_ms: i64,
}

#[derive(Debug, Clone)]
pub struct TruncationPlan {
    /// Indices into the original message list that were dropped entirely.
    pub dropped_message_indices: Vec<usize>,
    /// Indices into the original memory-chunk list that were dropped.
    pub dropped_chunk_indices: Vec<usize>,
    /// If `Some(n)`, the message at this original index must additionally
    /// have its content hard-truncated to `n` estimated tokens.
    pub hard_truncate: Option<(usize, usize)>,
    /// Whether the plan fits within budget (false only if even the hard
    /// truncation step couldn't bring it under budget, e.g. a single
    /// enormous system message).
    pub fits: bool,
}

/// Compute the usable input-token budget for `model`: `0.95 * W`, minus a
/// reservation for the model's own output, and never below zero.
/// `context_window_override` lets a caller pin a specific window size
/// instead of looking one up by model name (e.g. a custom/self-hosted model).
pub fn usable_budget(model: &str, context_window_override: Option<u32>, max_output_reserve: u32) -> u64 {
    let window = resolve_context_window(model, context_window_override) as f64;
    let budget = (window * BUDGET_FRACTION) - max_output_reserve as f64;
    budget.max(0.0) as u64
}

/// `message_tokens` is ordered oldest-to-newest. `system_index` is the index
/// of a leading system message, if the conversation has one (never dropped).
/// `memory_chunks` need not be pre-sorted; the drop order is computed from
/// each chunk's `age_ms`, not its position in the slice.
pub fn plan_truncation(message_tokens: &[usize], system_index: Option<usize>, memory_chunks: &[MemoryChunkInfo], budget: u64) -> TruncationPlan {
    let last_index = message_tokens.len().saturating_sub(1);
    let mut dropped_messages: Vec<usize> = Vec::new();
    let mut dropped_chunks: Vec<usize> = Vec::new();

    let messages_total = |dropped: &[usize]| -> u64 {
        message_tokens.iter().enumerate().filter(|(i, _)| !dropped.contains(i)).map(|(_, t)| *t as u64).sum()
    };
    let memory_total = |dropped: &[usize]| -> u64 {
        memory_chunks.iter().enumerate().filter(|(i, _)| !dropped.contains(i)).map(|(_, c)| c.tokens as u64).sum()
    };
    let total = |dm: &[usize], dc: &[usize]| messages_total(dm) + memory_total(dc);

    if total(&dropped_messages, &dropped_chunks) <= budget {
        return TruncationPlan { dropped_message_indices: dropped_messages, dropped_chunk_indices: dropped_chunks, hard_truncate: None, fits: true };
    }

    // Step 1: drop oldest messages first, never the system message or the
    // single most recent message.
    for i in 0..message_tokens.len() {
        if total(&dropped_messages, &dropped_chunks) <= budget {
            break;
        }
        if Some(i) == system_index || i == last_index {
            continue;
        }
        dropped_messages.push(i);
    }
    if total(&dropped_messages, &dropped_chunks) <= budget {
        return TruncationPlan { dropped_message_indices: dropped_messages, dropped_chunk_indices: dropped_chunks, hard_truncate: None, fits: true };
    }

    // Steps 2-5: drop memory chunks by category (archive -> long-term ->
    // working -> hot), oldest-first within each category.
    for category in [DropCategory::Archive, DropCategory::LongTerm, DropCategory::Working, DropCategory::Hot] {
        let mut candidates: Vec<usize> = memory_chunks
            .iter()
            .enumerate()
            .filter(|(i, c)| !dropped_chunks.contains(i) && categorize(c.age_ms) == category)
            .map(|(i, _)| i)
            .collect();
        candidates.sort_by_key(|&i| std::cmp::Reverse(memory_chunks[i].age_ms));

        for idx in candidates {
            if total(&dropped_messages, &dropped_chunks) <= budget {
                break;
            }
            dropped_chunks.push(idx);
        }
        if total(&dropped_messages, &dropped_chunks) <= budget {
            break;
        }
    }
    if total(&dropped_messages, &dropped_chunks) <= budget {
        return TruncationPlan { dropped_message_indices: dropped_messages, dropped_chunk_indices: dropped_chunks, hard_truncate: None, fits: true };
    }

    // Step 6: hard-truncate the oldest remaining (undropped) message.
    let remaining_oldest = (0..message_tokens.len()).find(|i| !dropped_messages.contains(i));
    if let Some(idx) = remaining_oldest {
        let others: u64 = messages_total(&dropped_messages) - message_tokens[idx] as u64;
        let memory = memory_total(&dropped_chunks);
        let allowance = budget.saturating_sub(others + memory);
        let fits = allowance > 0 || (others + memory) <= budget;
        return TruncationPlan {
            dropped_message_indices: dropped_messages,
            dropped_chunk_indices: dropped_chunks,
            hard_truncate: Some((idx, allowance as usize)),
            fits,
        };
    }

    TruncationPlan { dropped_message_indices: dropped_messages, dropped_chunk_indices: dropped_chunks, hard_truncate: None, fits: false }
}

/// Hard-truncate `content` to approximately `max_tokens` estimated tokens,
/// cutting at a UTF-8 char boundary, keeping the tail (the most recent part
/// of a message is usually the most relevant to the live turn).
pub fn hard_truncate_content(content: &str, max_tokens: usize) -> String {
    let max_chars = max_tokens * crate::tokenizer::CHARS_PER_TOKEN;
    if content.len() <= max_chars {
        return content.to_string();
    }
    let mut start = content.len() - max_chars;
    while start < content.len() && !content.is_char_boundary(start) {
        start += 1;
    }
    content[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(tokens: usize, age_ms: i64) -> MemoryChunkInfo {
        MemoryChunkInfo { tokens, age_ms }
    }

    #[test]
    fn no_truncation_needed_when_under_budget() {
        let plan = plan_truncation(&[10, 20], None, &[chunk(5, 0), chunk(5, 0)], 1000);
        assert!(plan.fits);
        assert!(plan.dropped_message_indices.is_empty());
        assert!(plan.dropped_chunk_indices.is_empty());
    }

    #[test]
    fn drops_oldest_messages_before_any_memory_chunk() {
        // Two chunks, both HOT (age 0); two messages. Over budget but
        // dropping the oldest non-system, non-last message alone fits.
        let plan = plan_truncation(&[50, 50, 5], Some(0), &[chunk(10, 0), chunk(10, 0)], 75);
        assert_eq!(plan.dropped_message_indices, vec![1]);
        assert!(plan.dropped_chunk_indices.is_empty());
    }

    #[test]
    fn archive_age_chunks_drop_before_hot_chunks() {
        // A HOT chunk (age 0) and an ARCHIVE chunk (age > 3d); only enough
        // budget for one of the two chunk tokens after messages.
        let hot = chunk(50, 0);
        let archive = chunk(50, ARCHIVE_AGE_MS + 1);
        let plan = plan_truncation(&[5], Some(0), &[hot, archive], 55);
        assert_eq!(plan.dropped_chunk_indices, vec![1]);
    }

    #[test]
    fn never_drops_system_or_latest_message() {
        let plan = plan_truncation(&[5, 100, 100, 100, 5], Some(0), &[], 20);
        assert!(!plan.dropped_message_indices.contains(&0));
        assert!(!plan.dropped_message_indices.contains(&4));
    }

    #[test]
    fn falls_back_to_hard_truncate_when_nothing_else_fits() {
        let plan = plan_truncation(&[1000], None, &[], 10);
        assert!(plan.hard_truncate.is_some());
    }

    #[test]
    fn hard_truncate_keeps_tail_and_respects_char_boundary() {
        let s = "hello world this is a test";
        let truncated = hard_truncate_content(s, 2); // 8 chars
        assert!(s.ends_with(&truncated));
        assert!(truncated.len() <= 8);
    }

    #[test]
    fn usable_budget_reserves_output_and_applies_fraction() {
        let budget = usable_budget("gpt-4o", None, 1000);
        assert_eq!(budget, (128_000.0 * 0.95 - 1000.0) as u64);
    }
}
