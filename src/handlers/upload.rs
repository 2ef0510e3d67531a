//! `POST /v1/memory/upload` — bulk JSONL import (spec §4.2, §6). One JSON
//! object per line: `{"content": string, "role"?: "user"|"assistant"|"system",
//! "timestamp"?: number}`. Gated on a payment method being on file so free
//! tier can't be used as unlimited bulk storage.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use memoryrouter_core::error::{PaymentRequiredKind, RouterError};
use memoryrouter_core::orchestrator::BulkRecord;
use memoryrouter_core::types::{Role, Scope};
use serde::Deserialize;
use serde_json::json;

use crate::handlers::common::extract_memory_key_headers;
use crate::http_error::ApiError;
use crate::state::AppState;

/// Hard per-request cap (spec §6 "Hard limit 100000 lines/request").
const MAX_LINES: usize = 100_000;

#[derive(Deserialize)]
struct UploadLine {
    content: String,
    role: Option<String>,
    timestamp: Option<i64>,
}

pub async fn memory_upload(State(state): State<AppState>, headers: HeaderMap, body: String) -> Result<Response, ApiError> {
    let (bearer, x_api_key, x_memory_key) = extract_memory_key_headers(&headers);
    let auth = state.engine.authenticate(bearer.as_deref(), x_api_key.as_deref(), x_memory_key.as_deref())?;

    if !state.engine.store.has_payment_method(&auth.user_id)? {
        return Err(RouterError::PaymentRequired {
            kind: PaymentRequiredKind::NoPaymentMethod,
            balance_cents: 0,
            free_tokens_remaining: 0,
        }
        .into());
    }

    let lines: Vec<&str> = body.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() > MAX_LINES {
        return Err(RouterError::Validation(format!("too many lines: {} > {MAX_LINES}", lines.len())).into());
    }

    let mut records = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        let parsed: UploadLine = serde_json::from_str(line).map_err(|e| RouterError::Validation(format!("line {}: {e}", i + 1)))?;
        records.push(BulkRecord {
            content: parsed.content,
            role: parsed.role.as_deref().map(Role::from_str_loose).unwrap_or(Role::User),
            timestamp_ms: parsed.timestamp,
        });
    }

    let session_id = headers.get("x-session-id").and_then(|v| v.to_str().ok()).map(str::to_string);
    let scope = Scope::from_session_id(session_id.as_deref());
    let now_ms = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0);

    let record_count = records.len();
    let stored = state.engine.bulk_import(&auth.memory_key, &scope, records, now_ms).await?;

    Ok((axum::http::StatusCode::OK, Json(json!({ "lines_received": record_count, "chunks_stored": stored }))).into_response())
}
