//! `POST /v1/embeddings`, `/v1/completions`, `/v1/audio/*`, `/v1/images/*` —
//! provider pass-through with no memory injection, no storage, no billing
//! (spec §6). Authentication still runs so a revoked or suspended memory key
//! can't use MemoryRouter as a free relay to a configured provider key.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use memoryrouter_core::error::RouterError;
use serde_json::Value;

use crate::handlers::common::extract_memory_key_headers;
use crate::http_error::ApiError;
use crate::state::AppState;

/// `POST /v1/embeddings` and `POST /v1/completions`: the body is JSON and
/// always carries a `model` field, so provider resolution works exactly like
/// the chat endpoint, just against a different suffix with no memory step.
pub async fn json_passthrough(State(state): State<AppState>, headers: HeaderMap, suffix: &'static str, Json(body): Json<Value>) -> Result<Response, ApiError> {
    let (bearer, x_api_key, x_memory_key) = extract_memory_key_headers(&headers);
    let auth = state.engine.authenticate(bearer.as_deref(), x_api_key.as_deref(), x_memory_key.as_deref())?;

    let model = body.get("model").and_then(Value::as_str).ok_or_else(|| RouterError::Validation("missing model".into()))?.to_string();
    let keys = state.engine.store.provider_keys_for_user(&auth.user_id)?;
    let bring_your_own = headers.get("x-provider-key").and_then(|v| v.to_str().ok()).map(str::to_string);

    let (resp, _tag) = state.engine.dispatch_raw(&model, suffix, &keys, bring_your_own.as_deref(), &body).await?;
    let status = axum::http::StatusCode::from_u16(resp.status().as_u16()).unwrap_or(axum::http::StatusCode::OK);
    let bytes = resp.bytes().await.map_err(RouterError::Network)?;
    Ok((status, bytes).into_response())
}

pub async fn embeddings(state: State<AppState>, headers: HeaderMap, body: Json<Value>) -> Result<Response, ApiError> {
    json_passthrough(state, headers, "/embeddings", body).await
}

pub async fn completions(state: State<AppState>, headers: HeaderMap, body: Json<Value>) -> Result<Response, ApiError> {
    json_passthrough(state, headers, "/completions", body).await
}

/// `POST /v1/audio/*rest` and `POST /v1/images/*rest`: multipart bodies
/// (transcription/TTS/image-gen uploads) aren't JSON, so the provider can't
/// be resolved from a `model` field without decoding the form. Callers pass
/// it via `X-Model` instead; defaults to OpenAI, the only provider most of
/// these routes exist for in practice.
pub async fn raw_passthrough(State(state): State<AppState>, headers: HeaderMap, Path(rest): Path<String>, family: &'static str, body: Bytes) -> Result<Response, ApiError> {
    let (bearer, x_api_key, x_memory_key) = extract_memory_key_headers(&headers);
    let auth = state.engine.authenticate(bearer.as_deref(), x_api_key.as_deref(), x_memory_key.as_deref())?;

    let model = headers.get("x-model").and_then(|v| v.to_str().ok()).unwrap_or("gpt-4o").to_string();
    let (tag, _) = memoryrouter_core::providers::detect_provider(&model);
    if matches!(tag, memoryrouter_core::types::ProviderTag::Anthropic | memoryrouter_core::types::ProviderTag::Google) {
        return Err(RouterError::Validation(format!("{} does not support /{family}/{rest}", tag.as_str())).into());
    }

    let keys = state.engine.store.provider_keys_for_user(&auth.user_id)?;
    let bring_your_own = headers.get("x-provider-key").and_then(|v| v.to_str().ok()).map(str::to_string);
    let cred = state.engine.resolve_credential(tag, &keys, bring_your_own.as_deref())?;

    let suffix = format!("/{family}/{rest}");
    let target = memoryrouter_core::providers::build_raw_target(tag, &suffix, &cred);
    let content_type = headers.get(axum::http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or("application/octet-stream").to_string();

    let resp = state.engine.dispatcher.send_bytes(tag, &target, &content_type, body).await?;
    let status = axum::http::StatusCode::from_u16(resp.status().as_u16()).unwrap_or(axum::http::StatusCode::OK);
    let response_content_type = resp.headers().get(axum::http::header::CONTENT_TYPE).cloned();
    let bytes = resp.bytes().await.map_err(RouterError::Network)?;

    let mut response = (status, bytes).into_response();
    if let Some(ct) = response_content_type {
        response.headers_mut().insert(axum::http::header::CONTENT_TYPE, ct);
    }
    Ok(response)
}

pub async fn audio(state: State<AppState>, headers: HeaderMap, path: Path<String>, body: Bytes) -> Result<Response, ApiError> {
    raw_passthrough(state, headers, path, "audio", body).await
}

pub async fn images(state: State<AppState>, headers: HeaderMap, path: Path<String>, body: Bytes) -> Result<Response, ApiError> {
    raw_passthrough(state, headers, path, "images", body).await
}
