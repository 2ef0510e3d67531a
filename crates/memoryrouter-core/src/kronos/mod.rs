//! C3 — KRONOS: time-windowed, recency-aware retrieval over a vault.
//!
//! Ties `vault::search`'s cosine ranking to the window/slot-allocation and
//! temporal-intent logic below. Grounded on the teacher's
//! `engine/engram/mod.rs` module layout (a dedicated `temporal_search`
//! submodule feeding a higher-level retrieval entry point).

pub mod temporal;
pub mod window;

use crate::types::RecencyBias;
use crate::vault::{ScoredChunk, SearchFilter, Vault};
use temporal::{detect_intent, temporal_range, TemporalIntent};
use window::{allocate_slots, SlotAllocation, WindowConfig};

/// Retrieve up to `total_k` chunks from `vault`, relevant to `query_embedding`
/// and `query_text`, respecting `bias` and any temporal phrase detected in
/// `query_text` (spec §4.3).
pub fn retrieve(
    vault: &Vault,
    query_embedding: &[f32],
    query_text: &str,
    cfg: &WindowConfig,
    bias: RecencyBias,
    now_ms: i64,
    total_k: usize,
) -> Vec<ScoredChunk> {
    if total_k == 0 {
        return Vec::new();
    }

    // An explicit date range derived from the query text (spec §4.3 "derive
    // explicit min/max from the phrase") takes priority over window-based
    // allocation entirely: the caller asked about a specific calendar range,
    // not "recent" vs. "distant".
    if let Some((min_ts_ms, max_ts_ms)) = temporal_range(query_text, now_ms) {
        return vault.search(query_embedding, SearchFilter { min_ts_ms, max_ts_ms }, total_k);
    }

    let intent = detect_intent(query_text);
    let alloc = effective_allocation(total_k, bias, intent);
    let bounds = cfg.bounds();

    let mut merged = Vec::with_capacity(total_k);
    merged.extend(vault.search(
        query_embedding,
        SearchFilter {
            min_ts_ms: now_ms - bounds.hot.1,
            max_ts_ms: now_ms - bounds.hot.0,
        },
        alloc.hot,
    ));
    merged.extend(vault.search(
        query_embedding,
        SearchFilter {
            min_ts_ms: now_ms - bounds.working.1,
            max_ts_ms: now_ms - bounds.working.0,
        },
        alloc.working,
    ));
    merged.extend(vault.search(
        query_embedding,
        SearchFilter {
            min_ts_ms: now_ms - bounds.long_term.1,
            max_ts_ms: now_ms - bounds.long_term.0,
        },
        alloc.long_term,
    ));

    // Merged by score; recency only breaks ties between otherwise-equal
    // scores, it never reweights the ranking (spec §4.3).
    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.chunk.created_at_ms.cmp(&a.chunk.created_at_ms))
    });
    merged.truncate(total_k);
    merged
}

/// Resolve the slot allocation actually used: the configured `bias`, unless
/// the query text carries an explicit temporal intent, in which case that
/// intent overrides the allocation shape for this single request only.
fn effective_allocation(total_k: usize, bias: RecencyBias, intent: TemporalIntent) -> SlotAllocation {
    match intent {
        TemporalIntent::Recent => allocate_slots(total_k, RecencyBias::High),
        TemporalIntent::Distant => {
            let reversed = allocate_slots(total_k, RecencyBias::High);
            SlotAllocation {
                hot: reversed.long_term,
                working: reversed.working,
                long_term: reversed.hot,
            }
        }
        TemporalIntent::Recent2 | TemporalIntent::None => allocate_slots(total_k, bias),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn seed(vault: &Vault, ages_ms: &[i64], now_ms: i64) {
        for (i, age) in ages_ms.iter().enumerate() {
            let mut v = vec![0.0f32; 4];
            v[0] = 1.0;
            vault
                .store(v, format!("chunk {i}"), Role::User, "m".into(), "r".into(), now_ms - age)
                .unwrap();
        }
    }

    #[test]
    fn retrieve_returns_at_most_total_k() {
        let vault = Vault::new(4);
        let now = 1_000_000_000i64;
        seed(&vault, &[1_000, 2 * 3_600_000, 5 * 24 * 3_600_000], now);
        let query = vec![1.0f32, 0.0, 0.0, 0.0];
        let cfg = WindowConfig::default();
        let results = retrieve(&vault, &query, "what did we discuss?", &cfg, RecencyBias::Medium, now, 2);
        assert!(results.len() <= 2);
    }

    #[test]
    fn retrieve_zero_k_is_empty() {
        let vault = Vault::new(4);
        let results = retrieve(&vault, &[1.0, 0.0, 0.0, 0.0], "hi", &WindowConfig::default(), RecencyBias::Medium, 0, 0);
        assert!(results.is_empty());
    }

    #[test]
    fn distant_intent_favours_long_term_slots() {
        let alloc_normal = effective_allocation(7, RecencyBias::Medium, TemporalIntent::None);
        let alloc_distant = effective_allocation(7, RecencyBias::Medium, TemporalIntent::Distant);
        assert!(alloc_distant.long_term > alloc_normal.long_term);
    }

    #[test]
    fn merge_ranks_by_score_and_only_breaks_ties_by_recency() {
        let vault = Vault::new(4);
        let now = 1_000_000_000i64;
        // Both chunks share the same embedding (identical cosine score) and
        // fall in the same (HOT) window, so the only thing that can separate
        // them is recency as a tiebreaker.
        seed(&vault, &[2 * 3_600_000, 1_000], now);
        let query = vec![1.0f32, 0.0, 0.0, 0.0];
        let results = retrieve(&vault, &query, "what did we discuss?", &WindowConfig::default(), RecencyBias::Medium, now, 2);
        assert_eq!(results[0].chunk.content, "chunk 1"); // the younger of the two equal-score chunks
    }

    #[test]
    fn explicit_date_phrase_overrides_window_allocation() {
        let vault = Vault::new(4);
        let now = 20 * 24 * 3_600_000i64;
        // One chunk 10 days old (inside "last week"'s 7-day window is false,
        // so it must NOT come back), one chunk 3 days old (must come back).
        seed(&vault, &[10 * 24 * 3_600_000, 3 * 24 * 3_600_000], now);
        let query = vec![1.0f32, 0.0, 0.0, 0.0];
        let results = retrieve(&vault, &query, "what did I say last week?", &WindowConfig::default(), RecencyBias::Medium, now, 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.content, "chunk 1");
    }
}
