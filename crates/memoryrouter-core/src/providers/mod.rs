//! C6 — Provider dispatcher: detect provider from model, build an
//! authenticated request, forward it, and expose the pieces the server
//! needs to tee a streaming response (spec §4.6).
//!
//! Grounded on the teacher's `engine/providers/{openai,anthropic,google}.rs`
//! adapters, generalised from typed `Message`/`StreamChunk` conversion to
//! pass-through `serde_json::Value` forwarding — MemoryRouter's native
//! endpoints must not transform the body at all (spec §4.6 "Non-conversion
//! rule"), so there is nothing here resembling `format_messages`.

pub mod credential;
pub mod crossformat;
pub mod detect;
pub mod stream;
pub mod target;

pub use credential::{ProviderCredential, ProviderKeySet};
pub use crossformat::{from_provider_response, remap_stream_event, shape_for_tag, to_provider_request};
pub use detect::{detect_provider, remap_xai_alias};
pub use stream::{drain_sse_lines, StreamAccumulator};
pub use target::{build_raw_target, build_target, DispatchTarget, GoogleVerb};

pub mod http_util;

use crate::error::{RouterError, RouterResult};
use crate::types::ProviderTag;
use http_util::{is_retryable_status, parse_retry_after, retry_delay, CircuitBreaker, MAX_RETRIES};
use serde_json::Value;
use std::time::Duration;

/// One breaker per provider tag, mirroring the teacher's per-provider
/// `static ... CIRCUIT: LazyLock<CircuitBreaker>` but collapsed into a
/// single table keyed by the closed `ProviderTag` enum instead of one
/// static per module.
struct Circuits {
    openai: CircuitBreaker,
    anthropic: CircuitBreaker,
    openrouter: CircuitBreaker,
    google: CircuitBreaker,
    xai: CircuitBreaker,
    cerebras: CircuitBreaker,
    deepseek: CircuitBreaker,
    azure: CircuitBreaker,
    ollama: CircuitBreaker,
    mistral: CircuitBreaker,
}

static CIRCUITS: Circuits = Circuits {
    openai: CircuitBreaker::new(5, 60),
    anthropic: CircuitBreaker::new(5, 60),
    openrouter: CircuitBreaker::new(5, 60),
    google: CircuitBreaker::new(5, 60),
    xai: CircuitBreaker::new(5, 60),
    cerebras: CircuitBreaker::new(5, 60),
    deepseek: CircuitBreaker::new(5, 60),
    azure: CircuitBreaker::new(5, 60),
    ollama: CircuitBreaker::new(5, 60),
    mistral: CircuitBreaker::new(5, 60),
};

fn circuit_for(tag: ProviderTag) -> &'static CircuitBreaker {
    match tag {
        ProviderTag::OpenAi => &CIRCUITS.openai,
        ProviderTag::Anthropic => &CIRCUITS.anthropic,
        ProviderTag::OpenRouter => &CIRCUITS.openrouter,
        ProviderTag::Google => &CIRCUITS.google,
        ProviderTag::Xai => &CIRCUITS.xai,
        ProviderTag::Cerebras => &CIRCUITS.cerebras,
        ProviderTag::DeepSeek => &CIRCUITS.deepseek,
        ProviderTag::Azure => &CIRCUITS.azure,
        ProviderTag::Ollama => &CIRCUITS.ollama,
        ProviderTag::Mistral => &CIRCUITS.mistral,
    }
}

pub struct Dispatcher {
    client: reqwest::Client,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(180))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Forward `body` to `target`. Retries transient failures (connection
    /// errors, 429/5xx) before any response bytes have been read; once a
    /// success status is returned the caller owns the response stream and no
    /// further retry happens here (spec §5 "each streaming read" is
    /// independently retriable at the transport layer, not at this layer).
    pub async fn send(&self, tag: ProviderTag, target: &DispatchTarget, body: &Value) -> RouterResult<reqwest::Response> {
        let breaker = circuit_for(tag);
        if let Err(msg) = breaker.check() {
            return Err(RouterError::ProviderConnect { provider: tag.as_str().to_string(), message: msg });
        }

        let mut retry_after: Option<u64> = None;
        let mut last_err: Option<RouterError> = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(retry_delay(attempt - 1, retry_after.take())).await;
            }

            let mut req = self.client.post(&target.url);
            for (k, v) in &target.headers {
                req = req.header(k, v);
            }
            let resp = match req.json(body).send().await {
                Ok(r) => r,
                Err(e) => {
                    breaker.record_failure();
                    last_err = Some(RouterError::ProviderConnect { provider: tag.as_str().to_string(), message: e.to_string() });
                    if attempt < MAX_RETRIES {
                        continue;
                    }
                    return Err(last_err.unwrap());
                }
            };

            if resp.status().is_success() {
                breaker.record_success();
                return Ok(resp);
            }

            let status = resp.status().as_u16();
            retry_after = resp.headers().get("retry-after").and_then(|v| v.to_str().ok()).and_then(parse_retry_after);
            breaker.record_failure();

            if status == 401 || status == 403 {
                let text = resp.text().await.unwrap_or_default();
                return Err(RouterError::ProviderError { provider: tag.as_str().to_string(), status, body: text });
            }
            if is_retryable_status(status) && attempt < MAX_RETRIES {
                continue;
            }
            let text = resp.text().await.unwrap_or_default();
            return Err(RouterError::ProviderError { provider: tag.as_str().to_string(), status, body: text });
        }

        Err(last_err.unwrap_or_else(|| RouterError::Internal("dispatch retries exhausted".into())))
    }

    /// Forward a raw, non-JSON body (multipart audio/image uploads) to
    /// `target` with `content_type` preserved. Same circuit breaker as
    /// [`Dispatcher::send`]; no retries, since re-sending a large multipart
    /// body on a transient failure is rarely worth the bandwidth.
    pub async fn send_bytes(&self, tag: ProviderTag, target: &DispatchTarget, content_type: &str, body: bytes::Bytes) -> RouterResult<reqwest::Response> {
        let breaker = circuit_for(tag);
        if let Err(msg) = breaker.check() {
            return Err(RouterError::ProviderConnect { provider: tag.as_str().to_string(), message: msg });
        }

        let mut req = self.client.post(&target.url).header("Content-Type", content_type).body(body);
        for (k, v) in &target.headers {
            if k.eq_ignore_ascii_case("content-type") {
                continue;
            }
            req = req.header(k, v);
        }

        match req.send().await {
            Ok(resp) if resp.status().is_success() => {
                breaker.record_success();
                Ok(resp)
            }
            Ok(resp) => {
                breaker.record_failure();
                let status = resp.status().as_u16();
                let text = resp.text().await.unwrap_or_default();
                Err(RouterError::ProviderError { provider: tag.as_str().to_string(), status, body: text })
            }
            Err(e) => {
                breaker.record_failure();
                Err(RouterError::ProviderConnect { provider: tag.as_str().to_string(), message: e.to_string() })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_for_is_stable_per_tag() {
        let a = circuit_for(ProviderTag::OpenAi);
        let b = circuit_for(ProviderTag::OpenAi);
        assert!(std::ptr::eq(a, b));
        let c = circuit_for(ProviderTag::Anthropic);
        assert!(!std::ptr::eq(a, c));
    }
}
