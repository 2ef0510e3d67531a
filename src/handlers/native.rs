//! `POST /v1/messages` (Anthropic) and `POST /v1/models/{model}:generateContent`
//! (Google) — the two native-shaped endpoints (spec §4.6, §4.9). Unlike
//! `chat.rs`, these never cross-format translate: the request body is
//! forwarded unchanged except for memory injection, and the provider's
//! response is returned byte-for-byte (spec §4.6 "Non-conversion rule").

use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures::StreamExt;
use memoryrouter_core::error::RouterError;
use memoryrouter_core::orchestrator::RetrievalOutcome;
use memoryrouter_core::providers::{drain_sse_lines, StreamAccumulator};
use memoryrouter_core::store::usage::UsageEvent;
use memoryrouter_core::tokenizer::estimate_tokens;
use memoryrouter_core::types::{BodyShape, ProviderTag, Role, Scope};
use serde_json::Value;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::handlers::common::{
    apply_truncation, build_query_text, build_response_headers, extract_conversation, extract_memory_key_headers, extract_response_text_and_usage,
    last_user_text, message_token_counts,
};
use crate::http_error::ApiError;
use crate::options::{clamp_context_limit, extract_options};
use crate::state::AppState;

pub async fn messages(State(state): State<AppState>, headers: HeaderMap, Json(mut body): Json<Value>) -> Result<Response, ApiError> {
    let model = body.get("model").and_then(Value::as_str).ok_or_else(|| RouterError::Validation("missing model".into()))?.to_string();
    let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
    handle_native(state, headers, &mut body, &model, BodyShape::Anthropic, ProviderTag::Anthropic, stream).await
}

/// `model_action` is the whole final path segment, e.g.
/// `gemini-1.5-pro:generateContent` or `gemini-1.5-pro:streamGenerateContent`
/// — axum's router captures it as one param since it contains no `/`.
pub async fn generate_content(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(model_action): Path<String>,
    Json(mut body): Json<Value>,
) -> Result<Response, ApiError> {
    let (model, action) = model_action.rsplit_once(':').unwrap_or((model_action.as_str(), "generateContent"));
    let stream = action == "streamGenerateContent";
    handle_native(state, headers, &mut body, model, BodyShape::Google, ProviderTag::Google, stream).await
}

async fn handle_native(state: AppState, headers: HeaderMap, body: &mut Value, model: &str, shape: BodyShape, tag: ProviderTag, stream: bool) -> Result<Response, ApiError> {
    let started = Instant::now();
    let now_ms = now_ms();

    let (bearer, x_api_key, x_memory_key) = extract_memory_key_headers(&headers);
    let auth = state.engine.authenticate(bearer.as_deref(), x_api_key.as_deref(), x_memory_key.as_deref())?;

    let opts = extract_options(&headers, body);

    let projected_tokens = estimate_tokens(&body.to_string()) as u64;
    state.engine.ensure_balance(&auth.memory_key, &auth.user_id, projected_tokens)?;

    let scope = Scope::from_session_id(opts.session_id.as_deref());
    let conv = extract_conversation(shape, body);

    let mut retrieval = RetrievalOutcome::default();
    let mut memory_block: Option<String> = None;
    let array_key = conv.array_key;
    let style = memoryrouter_core::transformer::memory_style_for_model(model);

    if opts.mode.retrieves() {
        let query_text = build_query_text(&conv);
        let total_k = clamp_context_limit(opts.context_limit);
        let (_block, chunks, recent_buffer) = state.engine.retrieve(&auth.memory_key, &scope, &query_text, style, opts.bias, total_k, now_ms).await?;
        retrieval.chunks_retrieved = chunks.len() as u64;
        retrieval.tokens_retrieved = chunks.iter().map(|c| estimate_tokens(&c.chunk.content) as u64).sum();

        let message_tokens = message_token_counts(&conv);
        let (dropped_messages, dropped_chunks, hard_truncate, truncated) =
            state.engine.truncate(model, opts.context_limit, &message_tokens, conv.system_index, &chunks, now_ms);

        let surviving: Vec<_> = chunks.into_iter().enumerate().filter(|(i, _)| !dropped_chunks.contains(i)).map(|(_, c)| c).collect();
        retrieval.tokens_injected = surviving.iter().map(|c| estimate_tokens(&c.chunk.content) as u64).sum();
        let recent_buffer_ref = recent_buffer.as_ref().map(|(t, r)| (t.as_str(), *r));
        memory_block = memoryrouter_core::transformer::format_memory_block(&surviving, recent_buffer_ref, style, now_ms);
        retrieval.truncated = truncated;
        if truncated {
            retrieval.truncated_details = Some(format!(
                "dropped_messages={} dropped_chunks={} hard_truncated={}",
                dropped_messages.len(),
                dropped_chunks.len(),
                hard_truncate.is_some()
            ));
        }

        apply_truncation(body, array_key, &dropped_messages, hard_truncate);
    }

    memoryrouter_core::transformer::inject_memory(body, shape, memory_block.as_deref());

    let keys = state.engine.store.provider_keys_for_user(&auth.user_id)?;
    let bring_your_own = headers.get("x-provider-key").and_then(|v| v.to_str().ok()).map(str::to_string);

    let mr_processing_ms = started.elapsed().as_millis() as u64;
    let dispatch_started = Instant::now();
    let (resp, tag, _) = state.engine.dispatch(model, &keys, bring_your_own.as_deref(), body, stream).await?;
    let status = axum::http::StatusCode::from_u16(resp.status().as_u16()).unwrap_or(axum::http::StatusCode::OK);

    let response_headers_base = |provider_response_ms: u64| {
        build_response_headers(mr_processing_ms, provider_response_ms, &auth.memory_key, opts.mode, opts.session_id.as_deref(), &retrieval)
    };

    if stream {
        let provider_response_ms = dispatch_started.elapsed().as_millis() as u64;
        let response_headers = response_headers_base(provider_response_ms);

        let engine = state.engine.clone();
        let memory_key = auth.memory_key.clone();
        let user_id = auth.user_id.clone();
        let scope = scope.clone();
        let model_for_usage = model.to_string();
        let provider = tag.as_str().to_string();
        let stores = opts.mode.stores();
        let store_input = opts.store_input;
        let store_response = opts.store_response;
        let user_text = last_user_text(&conv);
        let tokens_retrieved = retrieval.tokens_retrieved;
        let tokens_injected = retrieval.tokens_injected;

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Bytes>();

        tokio::spawn(async move {
            let mut provider_stream = resp.bytes_stream();
            let mut buf = String::new();
            let mut acc = StreamAccumulator::new();
            while let Some(next) = provider_stream.next().await {
                let Ok(chunk) = next else { break };
                // Native endpoints forward every byte verbatim; parsing only
                // feeds the billing accumulator, it never touches what's sent.
                buf.push_str(&String::from_utf8_lossy(&chunk));
                for line in drain_sse_lines(&mut buf) {
                    acc.feed(&line, shape);
                }
                let _ = tx.send(chunk);
            }
            drop(tx);

            let (text, usage) = acc.finish();
            if !stores {
                return;
            }
            let usage = usage.unwrap_or_default();
            let ev = UsageEvent {
                memory_key: &memory_key,
                session_id: None,
                model: &model_for_usage,
                provider: &provider,
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                memory_tokens_retrieved: tokens_retrieved,
                memory_tokens_injected: tokens_injected,
                mr_processing_ms,
                provider_response_ms,
                created_at_ms: now_ms,
            };
            if store_input {
                if let Some(text) = &user_text {
                    let _ = engine.store_turn_and_bill(&memory_key, &user_id, &scope, text, Role::User, now_ms, ev_clone(&ev)).await;
                }
            }
            if store_response && !text.is_empty() {
                let _ = engine.store_turn_and_bill(&memory_key, &user_id, &scope, &text, Role::Assistant, now_ms, ev).await;
            }
        });

        let body_stream = UnboundedReceiverStream::new(rx).map(Ok::<_, std::io::Error>);
        let axum_body = axum::body::Body::from_stream(body_stream);
        return Ok((status, response_headers, axum_body).into_response());
    }

    let provider_response_ms = dispatch_started.elapsed().as_millis() as u64;
    let response_bytes = resp.bytes().await.map_err(RouterError::Network)?;
    let response_headers = response_headers_base(provider_response_ms);

    if opts.mode.stores() {
        let provider_json: Value = serde_json::from_slice(&response_bytes).unwrap_or(Value::Null);
        let engine = state.engine.clone();
        let memory_key = auth.memory_key.clone();
        let user_id = auth.user_id.clone();
        let scope = scope.clone();
        let provider = tag.as_str().to_string();
        let model_for_usage = model.to_string();
        let user_text = last_user_text(&conv);
        let (assistant_text, usage) = extract_response_text_and_usage(shape, &provider_json);
        let usage = usage.unwrap_or_default();
        let tokens_retrieved = retrieval.tokens_retrieved;
        let tokens_injected = retrieval.tokens_injected;
        let store_input = opts.store_input;
        let store_response = opts.store_response;

        tokio::spawn(async move {
            let ev = UsageEvent {
                memory_key: &memory_key,
                session_id: None,
                model: &model_for_usage,
                provider: &provider,
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                memory_tokens_retrieved: tokens_retrieved,
                memory_tokens_injected: tokens_injected,
                mr_processing_ms,
                provider_response_ms,
                created_at_ms: now_ms,
            };
            if store_input {
                if let Some(text) = &user_text {
                    let _ = engine.store_turn_and_bill(&memory_key, &user_id, &scope, text, Role::User, now_ms, ev_clone(&ev)).await;
                }
            }
            if store_response && !assistant_text.is_empty() {
                let _ = engine.store_turn_and_bill(&memory_key, &user_id, &scope, &assistant_text, Role::Assistant, now_ms, ev).await;
            }
        });
    }

    Ok((status, response_headers, axum::body::Bytes::from(response_bytes)).into_response())
}

fn ev_clone<'a>(ev: &UsageEvent<'a>) -> UsageEvent<'a> {
    UsageEvent {
        memory_key: ev.memory_key,
        session_id: ev.session_id,
        model: ev.model,
        provider: ev.provider,
        input_tokens: ev.input_tokens,
        output_tokens: ev.output_tokens,
        memory_tokens_retrieved: ev.memory_tokens_retrieved,
        memory_tokens_injected: ev.memory_tokens_injected,
        mr_processing_ms: ev.mr_processing_ms,
        provider_response_ms: ev.provider_response_ms,
        created_at_ms: ev.created_at_ms,
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_action_splits_on_last_colon() {
        let (model, action) = "gemini-1.5-pro:streamGenerateContent".rsplit_once(':').unwrap();
        assert_eq!(model, "gemini-1.5-pro");
        assert_eq!(action, "streamGenerateContent");
    }

    #[test]
    fn model_with_no_colon_defaults_missing() {
        let model_action = "gemini-1.5-pro".to_string();
        let (model, action) = model_action.rsplit_once(':').unwrap_or((model_action.as_str(), "generateContent"));
        assert_eq!(model, "gemini-1.5-pro");
        assert_eq!(action, "generateContent");
    }
}
