//! Single canonical error enum for the engine, built with `thiserror`.
//!
//! Variants are coarse-grained by domain. `#[from]` wires std/external error
//! conversions automatically. No variant carries secret material (API keys)
//! in its message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Auth missing")]
    AuthMissing,

    #[error("Auth invalid")]
    AuthInvalid,

    #[error("Auth inactive")]
    AuthInactive,

    #[error("Payment required: {kind}")]
    PaymentRequired {
        kind: PaymentRequiredKind,
        balance_cents: i64,
        free_tokens_remaining: u64,
    },

    #[error("Provider connect failed: {provider}: {message}")]
    ProviderConnect { provider: String, message: String },

    #[error("Provider error ({status}): {provider}")]
    ProviderError {
        provider: String,
        status: u16,
        body: String,
    },

    /// Vault write rejected a vector whose dimension doesn't match the vault.
    /// Never surfaced on the request path — only from explicit vault writes.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentRequiredKind {
    NoPaymentMethod,
    PaymentFailed,
    CapReached,
    Blocked,
}

impl std::fmt::Display for PaymentRequiredKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentRequiredKind::NoPaymentMethod => "no_payment_method",
            PaymentRequiredKind::PaymentFailed => "payment_failed",
            PaymentRequiredKind::CapReached => "cap_reached",
            PaymentRequiredKind::Blocked => "blocked",
        };
        write!(f, "{s}")
    }
}

pub type RouterResult<T> = Result<T, RouterError>;

impl From<String> for RouterError {
    fn from(s: String) -> Self {
        RouterError::Internal(s)
    }
}

impl From<&str> for RouterError {
    fn from(s: &str) -> Self {
        RouterError::Internal(s.to_string())
    }
}
