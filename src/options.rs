//! Header + body option extraction (spec §4.4 "Recognised memory options").
//! Body fields win over headers when both are present.

use axum::http::HeaderMap;
use memoryrouter_core::orchestrator::RequestOptions;
use memoryrouter_core::types::{MemoryMode, RecencyBias};
use serde_json::Value;

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).filter(|s| !s.is_empty())
}

fn header_bool(headers: &HeaderMap, name: &str) -> Option<bool> {
    header_str(headers, name).map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

/// Parse options from headers, then let same-named fields in `body` override
/// them, then strip those MR-only fields out of `body` in place (spec §4.4
/// "Extract step ... strip MR-specific fields from the clone").
pub fn extract_options(headers: &HeaderMap, body: &mut Value) -> RequestOptions {
    let mut opts = RequestOptions {
        mode: header_str(headers, "x-memory-mode").map(MemoryMode::parse).unwrap_or_default(),
        bias: RecencyBias::Medium,
        context_limit: header_str(headers, "x-context-limit").and_then(|s| s.parse::<u32>().ok()),
        store_input: header_bool(headers, "x-store-input").unwrap_or(true),
        store_response: header_bool(headers, "x-store-response").unwrap_or(true),
        session_id: header_str(headers, "x-session-id").map(str::to_string),
    };

    if let Some(obj) = body.as_object_mut() {
        if let Some(v) = obj.remove("mode").and_then(|v| v.as_str().map(str::to_string)) {
            opts.mode = MemoryMode::parse(&v);
        }
        if let Some(v) = obj.remove("recencyBias").and_then(|v| v.as_str().map(str::to_string)) {
            opts.bias = RecencyBias::parse(&v);
        }
        if let Some(v) = obj.remove("contextLimit").and_then(|v| v.as_u64()) {
            opts.context_limit = Some(v as u32);
        }
        if let Some(v) = obj.remove("storeInput").and_then(|v| v.as_bool()) {
            opts.store_input = v;
        }
        if let Some(v) = obj.remove("storeResponse").and_then(|v| v.as_bool()) {
            opts.store_response = v;
        }
        if let Some(v) = obj.remove("sessionId").and_then(|v| v.as_str().map(str::to_string)) {
            opts.session_id = Some(v);
        }
    }

    opts
}

/// `contextLimit` clamped to the spec's documented range, with its default.
pub fn clamp_context_limit(limit: Option<u32>) -> usize {
    limit.unwrap_or(30).clamp(1, 100_000) as usize
}

/// Strip any `memory: false`-flagged messages from storage consideration
/// without touching what gets forwarded to the provider (spec §4.4
/// "never from forwarding"). Returns the indices, within `messages`, that
/// are excluded from storage.
pub fn storage_excluded_indices(messages: &[Value]) -> Vec<usize> {
    messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.get("memory").and_then(Value::as_bool) == Some(false))
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn body_mode_overrides_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-memory-mode", "read".parse().unwrap());
        let mut body = json!({ "mode": "write" });
        let opts = extract_options(&headers, &mut body);
        assert_eq!(opts.mode, MemoryMode::Write);
        assert!(body.get("mode").is_none());
    }

    #[test]
    fn defaults_when_nothing_set() {
        let headers = HeaderMap::new();
        let mut body = json!({});
        let opts = extract_options(&headers, &mut body);
        assert_eq!(opts.mode, MemoryMode::Default);
        assert!(opts.store_input);
        assert!(opts.store_response);
    }

    #[test]
    fn context_limit_clamps_to_range() {
        assert_eq!(clamp_context_limit(Some(0)), 1);
        assert_eq!(clamp_context_limit(Some(500_000)), 100_000);
        assert_eq!(clamp_context_limit(None), 30);
    }

    #[test]
    fn per_message_memory_false_is_excluded_from_storage() {
        let messages = vec![json!({"role": "user", "content": "a"}), json!({"role": "user", "content": "b", "memory": false})];
        assert_eq!(storage_excluded_indices(&messages), vec![1]);
    }
}
