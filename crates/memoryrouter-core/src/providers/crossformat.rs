//! Request/response translation between the OpenAI chat-completion shape and
//! Anthropic/Google native shapes, used only by the OpenAI-shaped endpoint
//! when the resolved provider isn't OpenAI-compatible (spec §4.6
//! "Non-conversion rule": native endpoints skip this entirely).
//!
//! Grounded on the same per-provider adapter split as `target.rs` and
//! `stream.rs` — one function per direction per shape, no shared trait.

use crate::types::{BodyShape, ProviderTag, Role};
use serde_json::{json, Value};

const DEFAULT_MAX_TOKENS: u64 = 4096;

/// The native body shape a dispatched provider actually speaks, for picking
/// the right response parser (spec §4.6: only Anthropic and Google have
/// their own native shape; everything else is OpenAI-compatible).
pub fn shape_for_tag(tag: ProviderTag) -> BodyShape {
    match tag {
        ProviderTag::Anthropic => BodyShape::Anthropic,
        ProviderTag::Google => BodyShape::Google,
        _ => BodyShape::OpenAi,
    }
}

/// Translate an OpenAI chat-completion request body into the shape `tag`
/// expects. A no-op for OpenAI-compatible tags (openai, openrouter, xai,
/// cerebras, deepseek, mistral, azure, ollama).
pub fn to_provider_request(tag: ProviderTag, body: &Value) -> Value {
    match tag {
        ProviderTag::Anthropic => openai_to_anthropic(body),
        ProviderTag::Google => openai_to_google(body),
        _ => body.clone(),
    }
}

/// Translate a completed (non-streaming) provider response body back into
/// OpenAI chat-completion shape. A no-op for OpenAI-compatible tags.
pub fn from_provider_response(tag: ProviderTag, model: &str, body: &Value) -> Value {
    match tag {
        ProviderTag::Anthropic => anthropic_to_openai_response(model, body),
        ProviderTag::Google => google_to_openai_response(model, body),
        _ => body.clone(),
    }
}

fn openai_to_anthropic(body: &Value) -> Value {
    let messages = body.get("messages").and_then(Value::as_array).cloned().unwrap_or_default();
    let mut system_parts = Vec::new();
    let mut converted = Vec::new();
    for m in messages {
        let role = m.get("role").and_then(Value::as_str).unwrap_or("user");
        let content = m.get("content").cloned().unwrap_or(Value::Null);
        if role == "system" {
            if let Some(s) = content.as_str() {
                system_parts.push(s.to_string());
            }
            continue;
        }
        let role = if role == "assistant" { "assistant" } else { "user" };
        converted.push(json!({ "role": role, "content": content }));
    }

    let mut out = json!({
        "model": body.get("model").cloned().unwrap_or(Value::Null),
        "messages": converted,
        "max_tokens": body.get("max_tokens").and_then(Value::as_u64).unwrap_or(DEFAULT_MAX_TOKENS),
    });
    if !system_parts.is_empty() {
        out["system"] = Value::String(system_parts.join("\n\n"));
    }
    if let Some(temp) = body.get("temperature") {
        out["temperature"] = temp.clone();
    }
    if let Some(stream) = body.get("stream") {
        out["stream"] = stream.clone();
    }
    out
}

fn openai_to_google(body: &Value) -> Value {
    let messages = body.get("messages").and_then(Value::as_array).cloned().unwrap_or_default();
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();
    for m in messages {
        let role = m.get("role").and_then(Value::as_str).unwrap_or("user");
        let text = m.get("content").and_then(Value::as_str).unwrap_or_default().to_string();
        if role == "system" {
            if !text.is_empty() {
                system_parts.push(text);
            }
            continue;
        }
        let role = if role == "assistant" { "model" } else { "user" };
        contents.push(json!({ "role": role, "parts": [{ "text": text }] }));
    }

    let mut out = json!({ "contents": contents });
    if !system_parts.is_empty() {
        out["systemInstruction"] = json!({ "parts": [{ "text": system_parts.join("\n\n") }] });
    }
    let mut generation_config = serde_json::Map::new();
    if let Some(max_tokens) = body.get("max_tokens").and_then(Value::as_u64) {
        generation_config.insert("maxOutputTokens".to_string(), json!(max_tokens));
    }
    if let Some(temp) = body.get("temperature") {
        generation_config.insert("temperature".to_string(), temp.clone());
    }
    if !generation_config.is_empty() {
        out["generationConfig"] = Value::Object(generation_config);
    }
    out
}

fn anthropic_to_openai_response(model: &str, body: &Value) -> Value {
    let text = body["content"]
        .as_array()
        .map(|blocks| blocks.iter().filter_map(|b| b.get("text").and_then(Value::as_str)).collect::<Vec<_>>().join(""))
        .unwrap_or_default();
    let finish_reason = match body["stop_reason"].as_str() {
        Some("end_turn") | Some("stop_sequence") => "stop",
        Some("max_tokens") => "length",
        Some("tool_use") => "tool_calls",
        _ => "stop",
    };
    let input = body["usage"]["input_tokens"].as_u64().unwrap_or(0);
    let output = body["usage"]["output_tokens"].as_u64().unwrap_or(0);

    json!({
        "id": body.get("id").cloned().unwrap_or(json!("")),
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": Role::Assistant.as_str(), "content": text },
            "finish_reason": finish_reason,
        }],
        "usage": {
            "prompt_tokens": input,
            "completion_tokens": output,
            "total_tokens": input + output,
        },
    })
}

fn google_to_openai_response(model: &str, body: &Value) -> Value {
    let text = body["candidates"][0]["content"]["parts"]
        .as_array()
        .map(|parts| parts.iter().filter_map(|p| p.get("text").and_then(Value::as_str)).collect::<Vec<_>>().join(""))
        .unwrap_or_default();
    let finish_reason = match body["candidates"][0]["finishReason"].as_str() {
        Some("MAX_TOKENS") => "length",
        _ => "stop",
    };
    let input = body["usageMetadata"]["promptTokenCount"].as_u64().unwrap_or(0);
    let output = body["usageMetadata"]["candidatesTokenCount"].as_u64().unwrap_or(0);

    json!({
        "id": "",
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": Role::Assistant.as_str(), "content": text },
            "finish_reason": finish_reason,
        }],
        "usage": {
            "prompt_tokens": input,
            "completion_tokens": output,
            "total_tokens": input + output,
        },
    })
}

/// Remap one already-parsed provider SSE payload into an OpenAI-style SSE
/// data line, for streaming requests dispatched through the OpenAI-shaped
/// endpoint to a non-OpenAI-compatible provider. `None` means "emit nothing
/// for this event" (e.g. Anthropic's `message_start`).
pub fn remap_stream_event(tag: ProviderTag, v: &Value) -> Option<Value> {
    match tag {
        ProviderTag::Anthropic => remap_anthropic_event(v),
        ProviderTag::Google => remap_google_event(v),
        _ => Some(v.clone()),
    }
}

fn remap_anthropic_event(v: &Value) -> Option<Value> {
    match v["type"].as_str().unwrap_or("") {
        "content_block_delta" => {
            let text = v["delta"]["text"].as_str().unwrap_or_default();
            Some(json!({ "choices": [{ "index": 0, "delta": { "content": text } }] }))
        }
        "message_delta" => {
            let output = v["usage"]["output_tokens"].as_u64();
            let finish_reason = v["delta"]["stop_reason"].as_str();
            Some(json!({
                "choices": [{ "index": 0, "delta": {}, "finish_reason": finish_reason }],
                "usage": output.map(|o| json!({ "completion_tokens": o })),
            }))
        }
        _ => None,
    }
}

fn remap_google_event(v: &Value) -> Option<Value> {
    let text = v["candidates"][0]["content"]["parts"]
        .as_array()
        .map(|parts| parts.iter().filter_map(|p| p.get("text").and_then(Value::as_str)).collect::<Vec<_>>().join(""))
        .unwrap_or_default();
    let usage = v.get("usageMetadata").map(|m| {
        let input = m["promptTokenCount"].as_u64().unwrap_or(0);
        let output = m["candidatesTokenCount"].as_u64().unwrap_or(0);
        json!({ "prompt_tokens": input, "completion_tokens": output, "total_tokens": input + output })
    });
    Some(json!({ "choices": [{ "index": 0, "delta": { "content": text } }], "usage": usage }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_to_anthropic_moves_system_message_out_of_array() {
        let body = json!({
            "model": "claude-3-5-sonnet",
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "hi"}
            ]
        });
        let out = openai_to_anthropic(&body);
        assert_eq!(out["system"], "be terse");
        assert_eq!(out["messages"].as_array().unwrap().len(), 1);
        assert_eq!(out["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn openai_to_google_maps_assistant_role_to_model() {
        let body = json!({
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"}
            ]
        });
        let out = openai_to_google(&body);
        let contents = out["contents"].as_array().unwrap();
        assert_eq!(contents[1]["role"], "model");
    }

    #[test]
    fn anthropic_response_maps_content_blocks_to_openai_message() {
        let body = json!({
            "id": "msg_1",
            "content": [{"type": "text", "text": "hi there"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 5, "output_tokens": 3}
        });
        let out = anthropic_to_openai_response("claude-3-5-sonnet", &body);
        assert_eq!(out["choices"][0]["message"]["content"], "hi there");
        assert_eq!(out["usage"]["total_tokens"], 8);
    }

    #[test]
    fn google_response_maps_candidate_parts_to_openai_message() {
        let body = json!({
            "candidates": [{"content": {"parts": [{"text": "bonjour"}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2, "totalTokenCount": 6}
        });
        let out = google_to_openai_response("gemini-1.5-pro", &body);
        assert_eq!(out["choices"][0]["message"]["content"], "bonjour");
        assert_eq!(out["usage"]["total_tokens"], 6);
    }

    #[test]
    fn remap_anthropic_content_delta_to_openai_chunk() {
        let v = json!({"type": "content_block_delta", "delta": {"type": "text_delta", "text": "Hi"}});
        let remapped = remap_stream_event(ProviderTag::Anthropic, &v).unwrap();
        assert_eq!(remapped["choices"][0]["delta"]["content"], "Hi");
    }

    #[test]
    fn remap_anthropic_message_start_is_suppressed() {
        let v = json!({"type": "message_start"});
        assert!(remap_stream_event(ProviderTag::Anthropic, &v).is_none());
    }
}
