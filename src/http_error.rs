//! Maps [`RouterError`] onto the HTTP status/body contract in spec §7.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use memoryrouter_core::error::{PaymentRequiredKind, RouterError};
use serde_json::json;

pub struct ApiError(pub RouterError);

impl From<RouterError> for ApiError {
    fn from(e: RouterError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, body) = match &self.0 {
            RouterError::AuthMissing => (StatusCode::UNAUTHORIZED, "auth_missing", json!({})),
            RouterError::AuthInvalid => (StatusCode::UNAUTHORIZED, "auth_invalid", json!({})),
            RouterError::AuthInactive => (StatusCode::UNAUTHORIZED, "auth_inactive", json!({})),
            RouterError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", json!({ "message": msg })),
            RouterError::PaymentRequired { kind, balance_cents, free_tokens_remaining } => (
                StatusCode::PAYMENT_REQUIRED,
                payment_kind_str(*kind),
                json!({
                    "balance_cents": balance_cents,
                    "free_tokens_remaining": free_tokens_remaining,
                    "top_up_url": "https://memoryrouter.dev/billing",
                }),
            ),
            RouterError::ProviderConnect { provider, message } => (
                StatusCode::BAD_GATEWAY,
                "provider_connect",
                json!({ "provider": provider, "message": message }),
            ),
            RouterError::ProviderError { provider, status, body } => {
                let code = StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY);
                return (code, Json(json!({ "error": { "kind": "provider_error", "provider": provider, "provider_error": body } }))).into_response();
            }
            RouterError::DimensionMismatch { expected, actual } => (
                StatusCode::CONFLICT,
                "dimension_mismatch",
                json!({ "expected": expected, "actual": actual }),
            ),
            RouterError::RetrievalUnavailable(msg) => (StatusCode::OK, "retrieval_unavailable", json!({ "message": msg })),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal", json!({})),
        };

        let mut payload = json!({ "error": { "kind": kind, "message": self.0.to_string() } });
        if let Some(extra) = body.as_object() {
            payload["error"].as_object_mut().unwrap().extend(extra.clone());
        }
        (status, Json(payload)).into_response()
    }
}

fn payment_kind_str(kind: PaymentRequiredKind) -> &'static str {
    match kind {
        PaymentRequiredKind::NoPaymentMethod => "no_payment_method",
        PaymentRequiredKind::PaymentFailed => "payment_failed",
        PaymentRequiredKind::CapReached => "cap_reached",
        PaymentRequiredKind::Blocked => "blocked",
    }
}
