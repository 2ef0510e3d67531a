//! C9 — Request orchestrator: ties C1–C8 together in the strict order spec
//! §4.9 lays out. The HTTP layer (axum handlers in the `memoryrouter-server`
//! binary) parses headers/body and calls into [`Engine`]; nothing here knows
//! about axum, so the pipeline can be exercised directly in tests.

use std::sync::Arc;
use std::time::Instant;

use crate::cache::{BlockEntry, BlockedCache};
use crate::config::RouterConfig;
use crate::error::{RouterError, RouterResult};
use crate::kronos::window::WindowConfig;
use crate::providers::{build_raw_target, build_target, detect_provider, Dispatcher, GoogleVerb, ProviderCredential, ProviderKeySet};
use crate::store::auth::UserContext;
use crate::store::billing::{NoPaymentProcessor, PaymentProcessor};
use crate::store::usage::UsageEvent;
use crate::store::Store;
use crate::tokenizer::estimate_tokens;
use crate::transformer::format::{format_memory_block, MemoryStyle};
use crate::truncator::{plan_truncation, usable_budget, MemoryChunkInfo};
use crate::types::{MemoryMode, RecencyBias, Role, Scope};
use crate::vault::registry::VaultRegistry;
use crate::vault::{ScoredChunk, Vault};
use crate::embedder::Embedder;

/// Everything resolved from the inbound auth headers (spec §4.9 step 1).
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub memory_key: String,
    pub user_id: String,
    /// `true` when auth arrived via `X-Memory-Key`, which means the
    /// `Authorization` header (if present) is the caller's own upstream
    /// credential and must be forwarded verbatim rather than resolved
    /// through the user's stored provider keys.
    pub pass_through: bool,
}

/// Per-request knobs parsed from headers/body (spec §4.4, §4.9 step 2).
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub mode: MemoryMode,
    pub bias: RecencyBias,
    pub context_limit: Option<u32>,
    pub store_input: bool,
    pub store_response: bool,
    pub session_id: Option<String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            mode: MemoryMode::Default,
            bias: RecencyBias::Medium,
            context_limit: None,
            store_input: true,
            store_response: true,
            session_id: None,
        }
    }
}

/// The result of the retrieve+format+truncate pipeline (spec §4.9 steps 4–6),
/// carrying everything the response-header set (§4.9 step 6) needs.
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    pub memory_block: Option<String>,
    pub tokens_retrieved: u64,
    pub chunks_retrieved: u64,
    pub tokens_injected: u64,
    pub truncated: bool,
    pub truncated_details: Option<String>,
}

/// Timing captured across the pipeline, surfaced as `X-MR-Processing-Ms` /
/// `X-Provider-Response-Ms` / `X-Total-Ms`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestTimings {
    pub mr_processing_ms: u64,
    pub provider_response_ms: u64,
}

pub struct Engine {
    pub cfg: RouterConfig,
    pub store: Store,
    pub vaults: VaultRegistry,
    pub embedder: Arc<dyn Embedder>,
    pub dispatcher: Dispatcher,
    pub blocked: BlockedCache,
    pub payment_processor: Arc<dyn PaymentProcessor>,
}

impl Engine {
    pub fn new(cfg: RouterConfig, store: Store, vaults: VaultRegistry, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            cfg,
            store,
            vaults,
            embedder,
            dispatcher: Dispatcher::new(),
            blocked: BlockedCache::new(),
            payment_processor: Arc::new(NoPaymentProcessor),
        }
    }

    /// Swaps in a real payment processor (e.g. a Stripe-backed one) for the
    /// auto-reup path. Without this, auto-reup always fails closed.
    pub fn with_payment_processor(mut self, processor: Arc<dyn PaymentProcessor>) -> Self {
        self.payment_processor = processor;
        self
    }

    /// Step 1. `bearer`/`x_api_key`/`x_memory_key` are the three header forms
    /// the spec recognises; the first non-empty one wins in that order. The
    /// blocked-user cache is consulted first so a key suspended in the last
    /// 30 minutes rejects instantly, without a store round-trip (spec §4.7
    /// "Blocked cache").
    pub fn authenticate(&self, bearer: Option<&str>, x_api_key: Option<&str>, x_memory_key: Option<&str>) -> RouterResult<AuthOutcome> {
        let (raw_key, pass_through) = if let Some(k) = x_memory_key.filter(|s| !s.is_empty()) {
            (k, true)
        } else if let Some(k) = bearer.filter(|s| !s.is_empty()) {
            (k, false)
        } else if let Some(k) = x_api_key.filter(|s| !s.is_empty()) {
            (k, false)
        } else {
            return Err(RouterError::AuthMissing);
        };

        if !raw_key.starts_with("mk_") {
            return Err(RouterError::AuthInvalid);
        }

        if let Some(BlockEntry::Suspended) = self.blocked.check(raw_key) {
            return Err(RouterError::AuthInactive);
        }

        let ctx: UserContext = self.store.lookup_memory_key(raw_key)?.ok_or(RouterError::AuthInvalid)?;
        if !ctx.active {
            self.blocked.block_suspended(raw_key);
            return Err(RouterError::AuthInactive);
        }

        Ok(AuthOutcome { memory_key: ctx.memory_key, user_id: ctx.user_id, pass_through })
    }

    /// Step 3. Fast-rejects from the blocked cache before touching the
    /// store; on a fresh `PaymentRequired` from the billing checkpoint,
    /// blocks `memory_key` for 5 minutes (spec §4.7 rules 4-5). Delegates to
    /// the billing store otherwise, which fails open on DB errors.
    pub fn ensure_balance(&self, memory_key: &str, user_id: &str, projected_tokens: u64) -> RouterResult<()> {
        if let Some(BlockEntry::Payment { kind, balance_cents, free_tokens_remaining }) = self.blocked.check(memory_key) {
            return Err(RouterError::PaymentRequired { kind, balance_cents, free_tokens_remaining });
        }

        match self.store.ensure_balance_with_processor(&self.cfg.billing, user_id, projected_tokens, self.payment_processor.as_ref()) {
            Err(RouterError::PaymentRequired { kind, balance_cents, free_tokens_remaining }) => {
                self.blocked.block_payment(memory_key, kind, balance_cents, free_tokens_remaining);
                Err(RouterError::PaymentRequired { kind, balance_cents, free_tokens_remaining })
            }
            other => other,
        }
    }

    /// Step 4. Embeds `query_text`, fans out across KRONOS windows for the
    /// vault at `(memory_key, scope)`, formats a memory block in `style`
    /// (the house style for the target model, see
    /// [`crate::transformer::format::memory_style_for_model`]), and reports
    /// the raw (pre-truncation) token/chunk counts. The truncator runs
    /// separately, over the combined message+memory budget — see
    /// [`Engine::truncate`].
    pub async fn retrieve(
        &self,
        memory_key: &str,
        scope: &Scope,
        query_text: &str,
        style: MemoryStyle,
        bias: RecencyBias,
        total_k: usize,
        now_ms: i64,
    ) -> RouterResult<(Option<String>, Vec<ScoredChunk>, Option<(String, Role)>)> {
        let embedding = self.embedder.embed(query_text).await?;
        let vault = self.vault_for(memory_key, scope);
        let window_cfg = WindowConfig {
            hot_window_hours: self.cfg.kronos.hot_window_hours,
            working_window_days: self.cfg.kronos.working_window_days,
            longterm_window_days: self.cfg.kronos.longterm_window_days,
        };
        let chunks = crate::kronos::retrieve(&vault, &embedding, query_text, &window_cfg, bias, now_ms, total_k);
        let recent_buffer = vault.buffer_preview();
        let block = format_memory_block(&chunks, recent_buffer.as_ref().map(|(t, r)| (t.as_str(), *r)), style, now_ms);
        Ok((block, chunks, recent_buffer))
    }

    /// Step 4 (continued), step 6 truncation bookkeeping. Given the
    /// request's message token counts (oldest-to-newest) and the chunks
    /// `retrieve` returned, drop messages/chunks per the fixed priority order
    /// in `truncator` until the budget for `model` is respected. Returns the
    /// indices to drop from each list plus a human-readable details string
    /// for `X-MemoryRouter-Truncated-Details`.
    pub fn truncate(
        &self,
        model: &str,
        context_limit: Option<u32>,
        message_tokens: &[usize],
        system_index: Option<usize>,
        chunks: &[ScoredChunk],
        now_ms: i64,
    ) -> (Vec<usize>, Vec<usize>, Option<(usize, usize)>, bool) {
        let budget = usable_budget(model, context_limit, crate::model_caps::resolve_max_output_tokens(model, None));
        let chunk_infos: Vec<MemoryChunkInfo> = chunks
            .iter()
            .map(|sc| MemoryChunkInfo {
                tokens: estimate_tokens(&sc.chunk.content),
                age_ms: (now_ms - sc.chunk.created_at_ms).max(0),
            })
            .collect();
        let plan = plan_truncation(message_tokens, system_index, &chunk_infos, budget);
        let was_truncated = !plan.dropped_message_indices.is_empty() || !plan.dropped_chunk_indices.is_empty() || plan.hard_truncate.is_some();
        (plan.dropped_message_indices, plan.dropped_chunk_indices, plan.hard_truncate, was_truncated)
    }

    /// Returns the vault for `(memory_key, scope)`, rehydrating it from the
    /// chunk-mirror the first time this process sees it (spec §6). A store
    /// error here is logged and otherwise ignored — retrieval degrades to
    /// "no memory yet" rather than failing the request.
    fn vault_for(&self, memory_key: &str, scope: &Scope) -> Arc<Vault> {
        let (vault, created) = self.vaults.get_or_create_fresh(memory_key, scope);
        if created {
            match self.store.load_vault_chunks(memory_key, &scope.as_key()) {
                Ok(chunks) if !chunks.is_empty() => vault.restore(chunks),
                Ok(_) => {}
                Err(e) => log::warn!("failed to rehydrate vault {memory_key}/{}: {e}", scope.as_key()),
            }
        }
        vault
    }

    /// Resolve the credential to dispatch with: a per-request bring-your-own
    /// key (`X-Provider-Key`) wins, else the user's stored key for `tag`.
    pub fn resolve_credential(&self, tag: crate::types::ProviderTag, keys: &ProviderKeySet, bring_your_own: Option<&str>) -> RouterResult<ProviderCredential> {
        if let Some(k) = bring_your_own {
            return Ok(if tag == crate::types::ProviderTag::Azure { ProviderCredential::parse_azure(k) } else { ProviderCredential::new(k) });
        }
        keys.get(tag).cloned().ok_or_else(|| RouterError::Validation(format!("no provider key configured for {}", tag.as_str())))
    }

    /// Step 5. Resolve provider + endpoint for `model` and forward `body`.
    pub async fn dispatch(&self, model: &str, keys: &ProviderKeySet, bring_your_own: Option<&str>, body: &serde_json::Value, stream: bool) -> RouterResult<(reqwest::Response, crate::types::ProviderTag, Instant)> {
        let (tag, resolved_model) = detect_provider(model);
        let cred = self.resolve_credential(tag, keys, bring_your_own)?;
        let google_verb = if stream { GoogleVerb::StreamGenerate } else { GoogleVerb::Generate };
        let target = build_target(tag, &resolved_model, &cred, stream, google_verb);
        let started = Instant::now();
        let resp = self.dispatcher.send(tag, &target, body).await?;
        Ok((resp, tag, started))
    }

    /// Memory-free pass-through dispatch for `/embeddings` and `/completions`
    /// (spec §6): same provider resolution as [`Engine::dispatch`], but hits
    /// `suffix` instead of `/chat/completions` and never touches the body.
    /// Anthropic and Google don't expose these in OpenAI shape, so they're
    /// rejected up front rather than silently misrouted.
    pub async fn dispatch_raw(&self, model: &str, suffix: &str, keys: &ProviderKeySet, bring_your_own: Option<&str>, body: &serde_json::Value) -> RouterResult<(reqwest::Response, crate::types::ProviderTag)> {
        let (tag, _) = detect_provider(model);
        if matches!(tag, crate::types::ProviderTag::Anthropic | crate::types::ProviderTag::Google) {
            return Err(RouterError::Validation(format!("{} does not support {suffix}", tag.as_str())));
        }
        let cred = self.resolve_credential(tag, keys, bring_your_own)?;
        let target = build_raw_target(tag, suffix, &cred);
        let resp = self.dispatcher.send(tag, &target, body).await?;
        Ok((resp, tag))
    }

    /// Step 7. Runs after the response is sent to the client: chunk and
    /// store `content` into the vault, record a usage event, then settle
    /// billing. Errors here are logged by the caller and never surfaced —
    /// this method returns `RouterResult` only so the caller has something
    /// to log.
    pub async fn store_turn_and_bill(
        &self,
        memory_key: &str,
        user_id: &str,
        scope: &Scope,
        content: &str,
        role: Role,
        now_ms: i64,
        usage: UsageEvent<'_>,
    ) -> RouterResult<()> {
        let vault = self.vault_for(memory_key, scope);
        let scope_key = scope.as_key();
        let pieces = vault.store_chunked(content, role, now_ms);
        for piece in pieces {
            let embedding = self.embedder.embed(&piece).await?;
            let content_hash = crate::vault::chunk::content_hash(&piece);
            let request_id = uuid::Uuid::new_v4().to_string();
            let id = vault.store(embedding.clone(), piece.clone(), role, usage.model.to_string(), request_id.clone(), now_ms)?;
            let mirrored = crate::vault::chunk::Chunk {
                id,
                role,
                content: piece,
                content_hash,
                created_at_ms: now_ms,
                model: usage.model.to_string(),
                request_id,
                embedding,
            };
            if let Err(e) = self.store.mirror_chunk(memory_key, &scope_key, &mirrored) {
                log::warn!("failed to mirror chunk for {memory_key}/{scope_key}: {e}");
            }
        }

        self.store.record_usage_event(&usage)?;
        let total_tokens = usage.input_tokens + usage.output_tokens;
        self.store.record_usage_and_deduct(&self.cfg.billing, user_id, total_tokens)?;
        self.store.reup_with_processor(user_id, self.payment_processor.as_ref())?;
        Ok(())
    }

    /// `/memory/upload` bulk import (spec §4.2 Normalisation on bulk import,
    /// §6 wire format). Records are grouped by contiguous role so the
    /// combine-small/split-oversized normaliser never blends a user turn
    /// into an assistant one; each group's first record supplies the
    /// timestamp for every piece the normaliser produces from it, since a
    /// merged piece has no single "true" original timestamp. No billing —
    /// bulk import isn't request/response token usage, just storage.
    pub async fn bulk_import(&self, memory_key: &str, scope: &Scope, records: Vec<BulkRecord>, default_now_ms: i64) -> RouterResult<usize> {
        let vault = self.vault_for(memory_key, scope);
        let scope_key = scope.as_key();
        let mut stored = 0usize;

        for group in group_by_role(records) {
            let role = group[0].role;
            let group_ts = group[0].timestamp_ms.unwrap_or(default_now_ms);
            let contents: Vec<String> = group.into_iter().map(|r| r.content).collect();
            let pieces = crate::vault::normalize_bulk_records(&contents);

            for piece in pieces {
                let embedding = self.embedder.embed(&piece).await?;
                let content_hash = crate::vault::chunk::content_hash(&piece);
                let request_id = uuid::Uuid::new_v4().to_string();
                let id = vault.store(embedding.clone(), piece.clone(), role, "bulk-import".to_string(), request_id.clone(), group_ts)?;
                let mirrored = crate::vault::chunk::Chunk {
                    id,
                    role,
                    content: piece,
                    content_hash,
                    created_at_ms: group_ts,
                    model: "bulk-import".to_string(),
                    request_id,
                    embedding,
                };
                if let Err(e) = self.store.mirror_chunk(memory_key, &scope_key, &mirrored) {
                    log::warn!("failed to mirror chunk for {memory_key}/{scope_key}: {e}");
                }
                stored += 1;
            }
        }
        Ok(stored)
    }

    /// Admin `/admin/reembed` (spec §6 "Iterates all vaults for reembed"):
    /// re-runs every stored chunk's content through the current embedder,
    /// dropping and re-mirroring the vault's rows in place. A chunk whose
    /// new embedding doesn't match the vault's declared dims (spec line 229
    /// `DimensionMismatch`) is counted rather than aborting the whole sweep —
    /// one bad chunk shouldn't block re-embedding the rest of the fleet.
    pub async fn reembed_all(&self) -> RouterResult<ReembedReport> {
        let mut report = ReembedReport::default();
        for (memory_key, scope_key, vault) in self.vaults.all_vaults() {
            let chunks = vault.export();
            vault.reset();
            self.store.clear_vault_chunks(&memory_key, &scope_key)?;

            for chunk in chunks {
                let embedding = match self.embedder.embed(&chunk.content).await {
                    Ok(e) => e,
                    Err(e) => {
                        log::warn!("reembed failed for {memory_key}/{scope_key}#{}: {e}", chunk.id);
                        report.failed += 1;
                        continue;
                    }
                };
                match vault.store(embedding.clone(), chunk.content.clone(), chunk.role, chunk.model.clone(), chunk.request_id.clone(), chunk.created_at_ms) {
                    Ok(id) => {
                        let mirrored = crate::vault::chunk::Chunk { id, embedding, ..chunk };
                        if let Err(e) = self.store.mirror_chunk(&memory_key, &scope_key, &mirrored) {
                            log::warn!("failed to mirror reembedded chunk for {memory_key}/{scope_key}: {e}");
                        }
                        report.reembedded += 1;
                    }
                    Err(RouterError::DimensionMismatch { .. }) => report.dimension_mismatches += 1,
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(report)
    }

    /// Admin `/admin/clear` (spec §6): drops every in-process vault for
    /// `memory_key` and the chunk-mirror rows backing them, across every
    /// scope the registry currently tracks for that key.
    pub fn clear_memory_key(&self, memory_key: &str) -> RouterResult<()> {
        for scope_key in self.vaults.scope_keys_for(memory_key) {
            self.store.clear_vault_chunks(memory_key, &scope_key)?;
        }
        self.vaults.reset_all_for_key(memory_key);
        Ok(())
    }
}

/// Summary returned by [`Engine::reembed_all`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReembedReport {
    pub reembedded: usize,
    pub dimension_mismatches: usize,
    pub failed: usize,
}

/// One normalised record from a `/memory/upload` JSONL line (spec §6 wire format).
#[derive(Debug, Clone)]
pub struct BulkRecord {
    pub content: String,
    pub role: Role,
    pub timestamp_ms: Option<i64>,
}

fn group_by_role(records: Vec<BulkRecord>) -> Vec<Vec<BulkRecord>> {
    let mut groups: Vec<Vec<BulkRecord>> = Vec::new();
    for record in records {
        match groups.last_mut() {
            Some(group) if group[0].role == record.role => group.push(record),
            _ => groups.push(vec![record]),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::FakeEmbedder;

    fn engine() -> Engine {
        let cfg = RouterConfig::default();
        let store = Store::open_in_memory().unwrap();
        let vaults = VaultRegistry::new(16);
        let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder { dims: 16 });
        Engine::new(cfg, store, vaults, embedder)
    }

    #[test]
    fn authenticate_rejects_missing_headers() {
        let e = engine();
        let err = e.authenticate(None, None, None).unwrap_err();
        assert!(matches!(err, RouterError::AuthMissing));
    }

    #[test]
    fn authenticate_rejects_unknown_key() {
        let e = engine();
        let err = e.authenticate(Some("mk_doesnotexist"), None, None).unwrap_err();
        assert!(matches!(err, RouterError::AuthInvalid));
    }

    #[test]
    fn authenticate_accepts_valid_bearer_key() {
        let e = engine();
        let key = e.store.create_memory_key("user1").unwrap();
        let outcome = e.authenticate(Some(&key), None, None).unwrap();
        assert_eq!(outcome.user_id, "user1");
        assert!(!outcome.pass_through);
    }

    #[test]
    fn x_memory_key_sets_pass_through() {
        let e = engine();
        let key = e.store.create_memory_key("user1").unwrap();
        let outcome = e.authenticate(None, None, Some(&key)).unwrap();
        assert!(outcome.pass_through);
    }

    #[test]
    fn authenticate_rejects_inactive_key() {
        let e = engine();
        let key = e.store.create_memory_key("user1").unwrap();
        e.store.set_memory_key_active(&key, false).unwrap();
        let err = e.authenticate(Some(&key), None, None).unwrap_err();
        assert!(matches!(err, RouterError::AuthInactive));
    }

    #[test]
    fn authenticate_short_circuits_on_cached_suspension() {
        let e = engine();
        let key = e.store.create_memory_key("user1").unwrap();
        e.store.set_memory_key_active(&key, false).unwrap();
        e.authenticate(Some(&key), None, None).unwrap_err();
        // Reactivate behind the store's back; the cached block still wins
        // until its TTL expires, so the store is never consulted again.
        e.store.set_memory_key_active(&key, true).unwrap();
        let err = e.authenticate(Some(&key), None, None).unwrap_err();
        assert!(matches!(err, RouterError::AuthInactive));
    }

    #[test]
    fn ensure_balance_blocks_memory_key_after_payment_required() {
        let e = engine();
        let key = e.store.create_memory_key("user1").unwrap();
        let huge = e.cfg.billing.free_tier_tokens + 10_000_000;
        e.ensure_balance(&key, "user1", huge).unwrap_err();
        // Credit the account behind the cache's back; the cached block still
        // wins until its TTL expires.
        e.store.credit_balance_cents("user1").unwrap();
        let err = e.ensure_balance(&key, "user1", huge).unwrap_err();
        assert!(matches!(err, RouterError::PaymentRequired { .. }));
    }

    #[tokio::test]
    async fn retrieve_returns_no_block_when_vault_is_empty() {
        let e = engine();
        let (block, chunks, recent_buffer) = e
            .retrieve("mk_1", &Scope::Core, "what did we discuss?", MemoryStyle::Markdown, RecencyBias::Medium, 5, 1_000_000)
            .await
            .unwrap();
        assert!(block.is_none());
        assert!(chunks.is_empty());
        assert!(recent_buffer.is_none());
    }

    #[test]
    fn truncate_reports_no_truncation_under_budget() {
        let e = engine();
        let (dropped_msgs, dropped_chunks, hard, truncated) = e.truncate("gpt-4o", None, &[10, 10], Some(0), &[], 0);
        assert!(dropped_msgs.is_empty());
        assert!(dropped_chunks.is_empty());
        assert!(hard.is_none());
        assert!(!truncated);
    }

    #[test]
    fn resolve_credential_prefers_bring_your_own() {
        let e = engine();
        let keys = ProviderKeySet::new();
        let cred = e.resolve_credential(crate::types::ProviderTag::OpenAi, &keys, Some("sk-byo")).unwrap();
        assert_eq!(cred.api_key, "sk-byo");
    }

    #[test]
    fn resolve_credential_fails_without_any_key() {
        let e = engine();
        let keys = ProviderKeySet::new();
        let err = e.resolve_credential(crate::types::ProviderTag::OpenAi, &keys, None).unwrap_err();
        assert!(matches!(err, RouterError::Validation(_)));
    }

    #[tokio::test]
    async fn store_turn_and_bill_mirrors_chunks_to_the_store() {
        let e = engine();
        e.store.create_memory_key("user1").unwrap();
        let ev = UsageEvent {
            memory_key: "mk_1",
            session_id: None,
            model: "gpt-4o",
            provider: "openai",
            input_tokens: 10,
            output_tokens: 5,
            memory_tokens_retrieved: 0,
            memory_tokens_injected: 0,
            mr_processing_ms: 0,
            provider_response_ms: 0,
            created_at_ms: 1000,
        };
        e.store_turn_and_bill("mk_1", "user1", &Scope::Core, "hello there", Role::User, 1000, ev).await.unwrap();
        let mirrored = e.store.load_vault_chunks("mk_1", "core").unwrap();
        assert_eq!(mirrored.len(), 1);
        assert_eq!(mirrored[0].content, "hello there");
    }

    #[tokio::test]
    async fn vault_rehydrates_from_mirror_on_first_access_in_a_new_registry() {
        let cfg = RouterConfig::default();
        let store = Store::open_in_memory().unwrap();
        store.create_memory_key("user1").unwrap();
        store
            .mirror_chunk(
                "mk_1",
                "core",
                &crate::vault::chunk::Chunk {
                    id: 1,
                    role: Role::User,
                    content: "remembered".into(),
                    content_hash: crate::vault::chunk::content_hash("remembered"),
                    created_at_ms: 0,
                    model: "m".into(),
                    request_id: "r".into(),
                    embedding: vec![0.0; 16],
                },
            )
            .unwrap();

        // A fresh registry over the same store simulates a process restart.
        let vaults = VaultRegistry::new(16);
        let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder { dims: 16 });
        let e2 = Engine::new(cfg, store, vaults, embedder);
        let (_block, chunks, _recent_buffer) = e2
            .retrieve("mk_1", &Scope::Core, "what did we discuss?", MemoryStyle::Markdown, RecencyBias::Medium, 5, 1_000_000)
            .await
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk.content, "remembered");
    }

    #[tokio::test]
    async fn bulk_import_stores_and_mirrors_records() {
        let e = engine();
        e.store.create_memory_key("user1").unwrap();
        let records = vec![
            BulkRecord { content: "first memory".into(), role: Role::User, timestamp_ms: Some(100) },
            BulkRecord { content: "second memory".into(), role: Role::User, timestamp_ms: Some(200) },
            BulkRecord { content: "a reply".into(), role: Role::Assistant, timestamp_ms: Some(300) },
        ];
        let stored = e.bulk_import("mk_1", &Scope::Core, records, 0).await.unwrap();
        assert_eq!(stored, 2);
        let mirrored = e.store.load_vault_chunks("mk_1", "core").unwrap();
        assert_eq!(mirrored.len(), 2);
        assert!(mirrored.iter().any(|c| c.role == Role::Assistant && c.content == "a reply"));
    }

    #[test]
    fn group_by_role_splits_on_role_change() {
        let records = vec![
            BulkRecord { content: "a".into(), role: Role::User, timestamp_ms: None },
            BulkRecord { content: "b".into(), role: Role::User, timestamp_ms: None },
            BulkRecord { content: "c".into(), role: Role::Assistant, timestamp_ms: None },
            BulkRecord { content: "d".into(), role: Role::User, timestamp_ms: None },
        ];
        let groups = group_by_role(records);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[1].len(), 1);
        assert_eq!(groups[2].len(), 1);
    }
}
