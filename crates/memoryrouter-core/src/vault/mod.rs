//! C2 — Vault: per `(memory-key, scope)` isolated store of memory chunks.
//!
//! Grounded on the teacher's `engine/sessions/memories.rs` (cosine-similarity
//! search over embeddings) and the "vaults as actors" design note (§9):
//! one mutex-guarded state per vault, many readers, single writer.

pub mod chunk;
pub mod registry;

use crate::embedder::cosine_similarity;
use crate::error::{RouterError, RouterResult};
use crate::types::Role;
use chunk::{accumulate, content_hash, split_oversized, Buffer, Chunk, DEDUP_WINDOW};
use parking_lot::Mutex;
use std::collections::VecDeque;

pub use registry::VaultRegistry;

/// Inclusive min/max timestamp window plus result cap for `search`.
#[derive(Debug, Clone, Copy)]
pub struct SearchFilter {
    pub min_ts_ms: i64,
    pub max_ts_ms: i64,
}

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VaultStats {
    pub vector_count: usize,
    pub dims: usize,
    pub oldest_ts_ms: Option<i64>,
    pub newest_ts_ms: Option<i64>,
    pub total_tokens: usize,
}

struct VaultState {
    chunks: Vec<Chunk>,
    buffer: Buffer,
    next_id: u64,
    /// Content hashes of the most recent `DEDUP_WINDOW` inserts, for
    /// best-effort dedup (spec §3 Chunk invariant).
    recent_hashes: VecDeque<String>,
}

pub struct Vault {
    dims: usize,
    state: Mutex<VaultState>,
}

impl Vault {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            state: Mutex::new(VaultState {
                chunks: Vec::new(),
                buffer: Buffer::default(),
                next_id: 1,
                recent_hashes: VecDeque::with_capacity(DEDUP_WINDOW),
            }),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Append a chunk with a fresh monotonic id. Rejects a vector whose
    /// dimension doesn't match the vault's declared `dims`.
    pub fn store(
        &self,
        embedding: Vec<f32>,
        content: String,
        role: Role,
        model: String,
        request_id: String,
        now_ms: i64,
    ) -> RouterResult<u64> {
        if embedding.len() != self.dims {
            return Err(RouterError::DimensionMismatch {
                expected: self.dims,
                actual: embedding.len(),
            });
        }
        let hash = content_hash(&content);
        let mut state = self.state.lock();

        if state.recent_hashes.contains(&hash) {
            // Best-effort dedup: return the existing chunk's id rather than
            // inserting a duplicate within the short recent-inserts window.
            if let Some(existing) = state.chunks.iter().rev().find(|c| c.content_hash == hash) {
                return Ok(existing.id);
            }
        }

        let id = state.next_id;
        state.next_id += 1;
        state.chunks.push(Chunk {
            id,
            role,
            content,
            content_hash: hash.clone(),
            created_at_ms: now_ms,
            model,
            request_id,
            embedding,
        });
        state.recent_hashes.push_back(hash);
        if state.recent_hashes.len() > DEDUP_WINDOW {
            state.recent_hashes.pop_front();
        }
        Ok(id)
    }

    /// Feed `content` into the buffer; returns any complete chunk prefixes
    /// the caller must now embed and `store`.
    pub fn store_chunked(&self, content: &str, role: Role, now_ms: i64) -> Vec<String> {
        let mut state = self.state.lock();
        accumulate(&mut state.buffer, content, role, now_ms)
    }

    pub fn search(&self, query: &[f32], filter: SearchFilter, limit: usize) -> Vec<ScoredChunk> {
        let state = self.state.lock();
        let mut scored: Vec<ScoredChunk> = state
            .chunks
            .iter()
            .filter(|c| c.created_at_ms >= filter.min_ts_ms && c.created_at_ms <= filter.max_ts_ms)
            .map(|c| ScoredChunk {
                score: cosine_similarity(query, &c.embedding),
                chunk: c.clone(),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.chunk.created_at_ms.cmp(&a.chunk.created_at_ms))
        });
        scored.truncate(limit);
        scored
    }

    /// Drops all chunks and empties the buffer atomically.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.chunks.clear();
        state.buffer = Buffer::default();
        state.recent_hashes.clear();
        state.next_id = 1;
    }

    /// Rehydrates a freshly-created vault from its chunk-mirror (spec §6).
    /// Silently skips any chunk whose embedding doesn't match `self.dims` —
    /// a model/dimension change between restarts invalidates that row, and
    /// retrieval simply treats it as if it were never stored.
    pub fn restore(&self, chunks: Vec<Chunk>) {
        let mut state = self.state.lock();
        for chunk in chunks {
            if chunk.embedding.len() != self.dims {
                continue;
            }
            state.next_id = state.next_id.max(chunk.id + 1);
            state.recent_hashes.push_back(chunk.content_hash.clone());
            state.chunks.push(chunk);
        }
        while state.recent_hashes.len() > DEDUP_WINDOW {
            state.recent_hashes.pop_front();
        }
    }

    /// Snapshot for re-embedding under a new model.
    pub fn export(&self) -> Vec<Chunk> {
        self.state.lock().chunks.clone()
    }

    /// Same data, used before a dimension change: `exportRaw -> reset ->
    /// re-embed -> store...`. Identical to `export` in-process; kept as a
    /// distinct name because callers use it to signal intent (the dimension
    /// check in `store` does not apply to reads).
    pub fn export_raw(&self) -> Vec<Chunk> {
        self.export()
    }

    /// Current unflushed buffer text + its role, for the `[MOST RECENT]`
    /// injection block (spec §4.4 "Memory block formatting"). `None` if the
    /// buffer is empty — a fresh vault, or one that just flushed a chunk and
    /// has nothing pending yet.
    pub fn buffer_preview(&self) -> Option<(String, Role)> {
        let state = self.state.lock();
        if state.buffer.text.trim().is_empty() {
            return None;
        }
        state.buffer.role.map(|role| (state.buffer.text.clone(), role))
    }

    pub fn stats(&self) -> VaultStats {
        let state = self.state.lock();
        if state.chunks.is_empty() {
            return VaultStats {
                vector_count: 0,
                dims: self.dims,
                ..Default::default()
            };
        }
        let oldest = state.chunks.iter().map(|c| c.created_at_ms).min();
        let newest = state.chunks.iter().map(|c| c.created_at_ms).max();
        let total_tokens: usize = state
            .chunks
            .iter()
            .map(|c| c.content.len().div_ceil(chunk::CHARS_PER_TOKEN))
            .sum();
        VaultStats {
            vector_count: state.chunks.len(),
            dims: self.dims,
            oldest_ts_ms: oldest,
            newest_ts_ms: newest,
            total_tokens,
        }
    }
}

/// Upstream-facing normaliser for bulk import (spec §4.2 "Normalisation on
/// bulk import"): combine small records until ~TARGET_TOKENS, split any
/// record bigger than 1.5x TARGET_TOKENS.
pub fn normalize_bulk_records(records: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let mut acc = String::new();
    for record in records {
        for piece in split_oversized(record) {
            if piece.len().div_ceil(chunk::CHARS_PER_TOKEN) >= chunk::TARGET_TOKENS {
                if !acc.is_empty() {
                    out.push(std::mem::take(&mut acc));
                }
                out.push(piece);
                continue;
            }
            if !acc.is_empty() {
                acc.push('\n');
            }
            acc.push_str(&piece);
            if acc.len().div_ceil(chunk::CHARS_PER_TOKEN) >= chunk::TARGET_TOKENS {
                out.push(std::mem::take(&mut acc));
            }
        }
    }
    if !acc.is_empty() {
        out.push(acc);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(x: f32, n: usize) -> Vec<f32> {
        let mut vec = vec![0.0; n];
        vec[0] = x;
        vec[1] = 1.0;
        vec
    }

    #[test]
    fn store_rejects_dimension_mismatch() {
        let vault = Vault::new(4);
        let err = vault
            .store(vec![1.0, 2.0], "x".into(), Role::User, "m".into(), "r".into(), 0)
            .unwrap_err();
        assert!(matches!(err, RouterError::DimensionMismatch { .. }));
    }

    #[test]
    fn ids_strictly_increase() {
        let vault = Vault::new(4);
        let a = vault.store(v(1.0, 4), "a".into(), Role::User, "m".into(), "r".into(), 0).unwrap();
        let b = vault.store(v(2.0, 4), "b".into(), Role::User, "m".into(), "r".into(), 1).unwrap();
        assert!(b > a);
    }

    #[test]
    fn dedup_returns_existing_id_within_window() {
        let vault = Vault::new(4);
        let a = vault
            .store(v(1.0, 4), "same text".into(), Role::User, "m".into(), "r".into(), 0)
            .unwrap();
        let b = vault
            .store(v(1.0, 4), "same text".into(), Role::User, "m".into(), "r".into(), 1)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(vault.stats().vector_count, 1);
    }

    #[test]
    fn search_respects_time_filter() {
        let vault = Vault::new(4);
        vault.store(v(1.0, 4), "old".into(), Role::User, "m".into(), "r".into(), 100).unwrap();
        vault.store(v(1.0, 4), "new".into(), Role::User, "m".into(), "r".into(), 9000).unwrap();
        let results = vault.search(&v(1.0, 4), SearchFilter { min_ts_ms: 5000, max_ts_ms: 10000 }, 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.content, "new");
    }

    #[test]
    fn reset_clears_everything() {
        let vault = Vault::new(4);
        vault.store(v(1.0, 4), "x".into(), Role::User, "m".into(), "r".into(), 0).unwrap();
        vault.reset();
        assert_eq!(vault.stats().vector_count, 0);
    }

    #[test]
    fn export_raw_preserves_fields_across_reset_reimport() {
        let vault = Vault::new(4);
        vault.store(v(1.0, 4), "keep me".into(), Role::Assistant, "gpt".into(), "req1".into(), 42).unwrap();
        let snapshot = vault.export_raw();
        vault.reset();
        for c in &snapshot {
            vault
                .store(v(9.0, 8), c.content.clone(), c.role, c.model.clone(), c.request_id.clone(), c.created_at_ms)
                .ok();
        }
        // dims changed (4 -> 8) intentionally exercised via reset + new dims vault in practice;
        // here we just assert content/role/model/timestamp survived the round trip.
        let vault8 = Vault::new(8);
        for c in &snapshot {
            vault8
                .store(v(9.0, 8), c.content.clone(), c.role, c.model.clone(), c.request_id.clone(), c.created_at_ms)
                .unwrap();
        }
        let restored = &vault8.export()[0];
        assert_eq!(restored.content, "keep me");
        assert_eq!(restored.model, "gpt");
        assert_eq!(restored.created_at_ms, 42);
    }

    #[test]
    fn buffer_preview_is_none_when_empty() {
        let vault = Vault::new(4);
        assert!(vault.buffer_preview().is_none());
    }

    #[test]
    fn buffer_preview_reflects_pending_text() {
        let vault = Vault::new(4);
        vault.store_chunked("still accumulating", Role::User, 0);
        let (text, role) = vault.buffer_preview().unwrap();
        assert_eq!(text, "still accumulating");
        assert_eq!(role, Role::User);
    }

    #[test]
    fn normalize_bulk_combines_small_records() {
        let records: Vec<String> = (0..5).map(|i| format!("record {i}")).collect();
        let out = normalize_bulk_records(&records);
        assert_eq!(out.len(), 1);
    }
}
