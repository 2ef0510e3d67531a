//! Blocked-user cache (spec §3, §4.7). A process-wide fast-reject path keyed
//! by memory-key: once a key has failed a balance check or resolved to a
//! suspended account, subsequent requests within the TTL short-circuit with
//! the same error and never touch the store. Grounded on the teacher's
//! in-memory `CircuitBreaker` in `engine/http.rs` — an atomics/mutex-guarded
//! table of per-key state with a time-based recovery window, generalised
//! from per-provider breakers to per-memory-key blocks.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::PaymentRequiredKind;

pub const BALANCE_BLOCK_TTL: Duration = Duration::from_secs(5 * 60);
pub const SUSPENDED_BLOCK_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
pub enum BlockEntry {
    Suspended,
    Payment { kind: PaymentRequiredKind, balance_cents: i64, free_tokens_remaining: u64 },
}

struct Slot {
    entry: BlockEntry,
    expires_at: Instant,
}

/// Last-writer-wins under concurrent inserts, per spec §4.9 "Shared
/// resources" — acceptable since a block is a conservative re-derivation of
/// state the store already holds, never the source of truth for it.
pub struct BlockedCache {
    entries: Mutex<HashMap<String, Slot>>,
}

impl BlockedCache {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    /// Returns the still-live block for `memory_key`, if any, pruning it out
    /// once expired.
    pub fn check(&self, memory_key: &str) -> Option<BlockEntry> {
        let mut entries = self.entries.lock();
        match entries.get(memory_key) {
            Some(slot) if slot.expires_at > Instant::now() => Some(slot.entry.clone()),
            Some(_) => {
                entries.remove(memory_key);
                None
            }
            None => None,
        }
    }

    pub fn block_suspended(&self, memory_key: &str) {
        self.insert(memory_key, BlockEntry::Suspended, SUSPENDED_BLOCK_TTL);
    }

    pub fn block_payment(&self, memory_key: &str, kind: PaymentRequiredKind, balance_cents: i64, free_tokens_remaining: u64) {
        self.insert(memory_key, BlockEntry::Payment { kind, balance_cents, free_tokens_remaining }, BALANCE_BLOCK_TTL);
    }

    fn insert(&self, memory_key: &str, entry: BlockEntry, ttl: Duration) {
        self.entries.lock().insert(memory_key.to_string(), Slot { entry, expires_at: Instant::now() + ttl });
    }

    pub fn clear(&self, memory_key: &str) {
        self.entries.lock().remove(memory_key);
    }
}

impl Default for BlockedCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_key_has_no_block() {
        let cache = BlockedCache::new();
        assert!(cache.check("mk_unknown").is_none());
    }

    #[test]
    fn payment_block_is_returned_until_cleared() {
        let cache = BlockedCache::new();
        cache.block_payment("mk_1", PaymentRequiredKind::NoPaymentMethod, 0, 0);
        assert!(matches!(cache.check("mk_1"), Some(BlockEntry::Payment { kind: PaymentRequiredKind::NoPaymentMethod, .. })));
        cache.clear("mk_1");
        assert!(cache.check("mk_1").is_none());
    }

    #[test]
    fn suspended_block_is_distinct_from_payment_block() {
        let cache = BlockedCache::new();
        cache.block_suspended("mk_2");
        assert!(matches!(cache.check("mk_2"), Some(BlockEntry::Suspended)));
    }
}
