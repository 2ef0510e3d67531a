//! `POST /v1/chat/completions` — the OpenAI-shaped, multi-provider endpoint
//! (spec §4.9, §6). When the resolved provider isn't OpenAI-compatible, the
//! request is translated to that provider's native shape before dispatch and
//! its response translated back (spec §4.6); the native-shape handlers in
//! `native.rs` skip that translation entirely.

use std::time::Instant;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures::StreamExt;
use memoryrouter_core::error::RouterError;
use memoryrouter_core::orchestrator::RetrievalOutcome;
use memoryrouter_core::providers::{detect_provider, from_provider_response, remap_stream_event, shape_for_tag, to_provider_request, drain_sse_lines, StreamAccumulator};
use memoryrouter_core::store::usage::UsageEvent;
use memoryrouter_core::tokenizer::estimate_tokens;
use memoryrouter_core::types::{BodyShape, Role, Scope};
use serde_json::Value;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::handlers::common::{
    apply_truncation, build_query_text, build_response_headers, extract_conversation, extract_memory_key_headers, extract_response_text_and_usage,
    last_user_text, message_token_counts,
};
use crate::http_error::ApiError;
use crate::options::{clamp_context_limit, extract_options};
use crate::state::AppState;

pub async fn chat_completions(State(state): State<AppState>, headers: HeaderMap, Json(mut body): Json<Value>) -> Result<Response, ApiError> {
    let started = Instant::now();
    let now_ms = now_ms();

    let (bearer, x_api_key, x_memory_key) = extract_memory_key_headers(&headers);
    let auth = state.engine.authenticate(bearer.as_deref(), x_api_key.as_deref(), x_memory_key.as_deref())?;

    let opts = extract_options(&headers, &mut body);
    let model = body.get("model").and_then(Value::as_str).ok_or_else(|| RouterError::Validation("missing model".into()))?.to_string();

    let projected_tokens = estimate_tokens(&body.to_string()) as u64;
    state.engine.ensure_balance(&auth.memory_key, &auth.user_id, projected_tokens)?;

    let scope = Scope::from_session_id(opts.session_id.as_deref());
    let conv = extract_conversation(BodyShape::OpenAi, &body);

    let mut retrieval = RetrievalOutcome::default();
    let mut memory_block: Option<String> = None;

    let style = memoryrouter_core::transformer::memory_style_for_model(&model);

    if opts.mode.retrieves() {
        let query_text = build_query_text(&conv);
        let total_k = clamp_context_limit(opts.context_limit);
        let (_block, chunks, recent_buffer) = state
            .engine
            .retrieve(&auth.memory_key, &scope, &query_text, style, opts.bias, total_k, now_ms)
            .await?;
        retrieval.chunks_retrieved = chunks.len() as u64;
        retrieval.tokens_retrieved = chunks.iter().map(|c| estimate_tokens(&c.chunk.content) as u64).sum();

        let message_tokens = message_token_counts(&conv);
        let (dropped_messages, dropped_chunks, hard_truncate, truncated) =
            state.engine.truncate(&model, opts.context_limit, &message_tokens, conv.system_index, &chunks, now_ms);

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

        apply_truncation(&mut body, "messages", &dropped_messages, hard_truncate);
    }

    memoryrouter_core::transformer::inject_memory(&mut body, BodyShape::OpenAi, memory_block.as_deref());

    let keys = state.engine.store.provider_keys_for_user(&auth.user_id)?;
    let bring_your_own = headers.get("x-provider-key").and_then(|v| v.to_str().ok()).map(str::to_string);
    let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);

    let (tag, _) = detect_provider(&model);
    let dispatch_body = to_provider_request(tag, &body);
    let bill_shape = shape_for_tag(tag);

    let mr_processing_ms = started.elapsed().as_millis() as u64;
    let dispatch_started = Instant::now();
    let (resp, tag, _) = state.engine.dispatch(&model, &keys, bring_your_own.as_deref(), &dispatch_body, stream).await?;
    let status = axum::http::StatusCode::from_u16(resp.status().as_u16()).unwrap_or(axum::http::StatusCode::OK);

    if stream {
        let provider_response_ms = dispatch_started.elapsed().as_millis() as u64;
        let response_headers = build_response_headers(mr_processing_ms, provider_response_ms, &auth.memory_key, opts.mode, opts.session_id.as_deref(), &retrieval);

        let engine = state.engine.clone();
        let memory_key = auth.memory_key.clone();
        let user_id = auth.user_id.clone();
        let scope = scope.clone();
        let model_for_usage = model.clone();
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
                buf.push_str(&String::from_utf8_lossy(&chunk));
                for line in drain_sse_lines(&mut buf) {
                    if line == "[DONE]" {
                        let _ = tx.send(Bytes::from_static(b"data: [DONE]\n\n"));
                        continue;
                    }
                    acc.feed(&line, bill_shape);
                    if let Ok(v) = serde_json::from_str::<Value>(&line) {
                        if let Some(remapped) = remap_stream_event(tag, &v) {
                            let data = format!("data: {remapped}\n\n");
                            let _ = tx.send(Bytes::from(data));
                        }
                    }
                }
            }
            if bill_shape != BodyShape::OpenAi {
                let _ = tx.send(Bytes::from_static(b"data: [DONE]\n\n"));
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
    let provider_json: Value = serde_json::from_slice(&response_bytes).unwrap_or(Value::Null);
    let client_json = from_provider_response(tag, &model, &provider_json);

    let response_headers = build_response_headers(mr_processing_ms, provider_response_ms, &auth.memory_key, opts.mode, opts.session_id.as_deref(), &retrieval);

    if opts.mode.stores() {
        let engine = state.engine.clone();
        let memory_key = auth.memory_key.clone();
        let user_id = auth.user_id.clone();
        let scope = scope.clone();
        let provider = tag.as_str().to_string();
        let user_text = last_user_text(&conv);
        let (assistant_text, usage) = extract_response_text_and_usage(bill_shape, &provider_json);
        let usage = usage.unwrap_or_default();
        let tokens_retrieved = retrieval.tokens_retrieved;
        let tokens_injected = retrieval.tokens_injected;
        let store_input = opts.store_input;
        let store_response = opts.store_response;

        tokio::spawn(async move {
            let ev = UsageEvent {
                memory_key: &memory_key,
                session_id: None,
                model: &model,
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

    Ok((status, response_headers, Json(client_json)).into_response())
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
