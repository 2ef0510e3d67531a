//! `/v1/admin/*` — reembed, clear, list, provider-key CRUD, debug-storage
//! (spec §6). Gated on `X-Admin-Secret` matching the server's configured
//! secret, or on the caller authenticating with a memory key prefixed
//! `mk_admin` — so an operator can mint an admin-scoped key through the
//! same auth path every other request uses instead of distributing the
//! process-wide secret.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use memoryrouter_core::error::RouterError;
use memoryrouter_core::providers::ProviderCredential;
use memoryrouter_core::types::ProviderTag;
use serde::Deserialize;
use serde_json::json;

use crate::handlers::common::extract_memory_key_headers;
use crate::http_error::ApiError;
use crate::state::AppState;

/// Checks `X-Admin-Secret` first so a misconfigured/missing secret doesn't
/// force every admin call through the full memory-key auth path; falls back
/// to the normal authenticate-then-check-prefix route otherwise.
fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    if let Some(secret) = &state.admin_secret {
        let supplied = headers.get("x-admin-secret").and_then(|v| v.to_str().ok());
        if supplied == Some(secret.as_str()) {
            return Ok(());
        }
    }
    let (bearer, x_api_key, x_memory_key) = extract_memory_key_headers(headers);
    let auth = state.engine.authenticate(bearer.as_deref(), x_api_key.as_deref(), x_memory_key.as_deref())?;
    if auth.memory_key.starts_with("mk_admin") {
        return Ok(());
    }
    Err(RouterError::AuthInvalid.into())
}

#[derive(Deserialize)]
pub struct ListQuery {
    user_id: Option<String>,
}

pub async fn list(State(state): State<AppState>, headers: HeaderMap, Query(q): Query<ListQuery>) -> Result<Response, ApiError> {
    require_admin(&state, &headers)?;
    let rows = state.engine.store.list_memory_keys(q.user_id.as_deref())?;
    let keys: Vec<_> = rows
        .into_iter()
        .map(|(memory_key, user_id, active)| json!({ "memory_key": memory_key, "user_id": user_id, "active": active }))
        .collect();
    Ok((axum::http::StatusCode::OK, Json(json!({ "memory_keys": keys }))).into_response())
}

#[derive(Deserialize)]
pub struct ClearBody {
    memory_key: String,
}

pub async fn clear(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<ClearBody>) -> Result<Response, ApiError> {
    require_admin(&state, &headers)?;
    state.engine.clear_memory_key(&body.memory_key)?;
    Ok((axum::http::StatusCode::OK, Json(json!({ "cleared": body.memory_key }))).into_response())
}

pub async fn reembed(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    require_admin(&state, &headers)?;
    let report = state.engine.reembed_all().await?;
    Ok((
        axum::http::StatusCode::OK,
        Json(json!({
            "reembedded": report.reembedded,
            "dimension_mismatches": report.dimension_mismatches,
            "failed": report.failed,
        })),
    )
        .into_response())
}

pub async fn debug_storage(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    require_admin(&state, &headers)?;
    Ok((
        axum::http::StatusCode::OK,
        Json(json!({ "vault_count": state.engine.vaults.vault_count() })),
    )
        .into_response())
}

#[derive(Deserialize)]
pub struct ProviderKeyBody {
    user_id: String,
    provider: String,
    api_key: Option<String>,
    azure_endpoint: Option<String>,
}

/// `POST /v1/admin/provider-keys`: upsert a provider key for `user_id`.
pub async fn upsert_provider_key(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<ProviderKeyBody>) -> Result<Response, ApiError> {
    require_admin(&state, &headers)?;
    let tag = ProviderTag::from_tag(&body.provider).ok_or_else(|| RouterError::Validation(format!("unknown provider {}", body.provider)))?;
    let api_key = body.api_key.ok_or_else(|| RouterError::Validation("missing api_key".into()))?;
    let mut cred = ProviderCredential::new(api_key);
    cred.azure_endpoint = body.azure_endpoint;
    state.engine.store.upsert_provider_key(&body.user_id, tag, &cred)?;
    Ok((axum::http::StatusCode::OK, Json(json!({ "stored": true }))).into_response())
}

/// `DELETE /v1/admin/provider-keys`: same body shape, `api_key` ignored.
pub async fn delete_provider_key(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<ProviderKeyBody>) -> Result<Response, ApiError> {
    require_admin(&state, &headers)?;
    let tag = ProviderTag::from_tag(&body.provider).ok_or_else(|| RouterError::Validation(format!("unknown provider {}", body.provider)))?;
    state.engine.store.delete_provider_key(&body.user_id, tag)?;
    Ok((axum::http::StatusCode::OK, Json(json!({ "deleted": true }))).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_prefix_check_matches_mk_admin_keys() {
        assert!("mk_admin_abc123".starts_with("mk_admin"));
        assert!(!"mk_regularkey".starts_with("mk_admin"));
    }
}
