//! Shape-aware helpers shared by the chat/native handlers: pulling a query
//! string and per-message token counts out of a request body, and writing
//! truncation decisions back into it (spec §4.3 "last ≤3 turns", §4.5).

use axum::http::HeaderMap;
use memoryrouter_core::orchestrator::RetrievalOutcome;
use memoryrouter_core::tokenizer::estimate_tokens;
use memoryrouter_core::truncator::hard_truncate_content;
use memoryrouter_core::types::{BodyShape, MemoryMode, Role};
use serde_json::Value;

/// One conversation turn as seen by the truncator: its role, text, and the
/// index into the body's message/content array it came from.
pub struct Turn {
    pub role: Role,
    pub text: String,
}

/// Everything `extract_conversation` needs to hand back: the array key to
/// mutate (`"messages"` or `"contents"`), the turns in array order, and the
/// array index of a leading system message (OpenAI only — Anthropic/Google
/// carry system text outside the array entirely).
pub struct Conversation {
    pub array_key: &'static str,
    pub turns: Vec<Turn>,
    pub system_index: Option<usize>,
    pub system_text: Option<String>,
}

fn content_text(v: &Value) -> String {
    if let Some(s) = v.as_str() {
        return s.to_string();
    }
    if let Some(arr) = v.as_array() {
        return arr
            .iter()
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n");
    }
    String::new()
}

fn set_content_text(v: &mut Value, text: &str) {
    if v.is_string() {
        *v = Value::String(text.to_string());
        return;
    }
    if let Some(arr) = v.as_array_mut() {
        if let Some(first) = arr.first_mut() {
            first["text"] = Value::String(text.to_string());
            return;
        }
    }
    *v = Value::String(text.to_string());
}

/// Extract the conversation out of `body` for `shape`. System text for
/// Anthropic/Google comes from the top-level `system` / `systemInstruction`
/// fields rather than the array.
pub fn extract_conversation(shape: BodyShape, body: &Value) -> Conversation {
    match shape {
        BodyShape::OpenAi => {
            let messages = body.get("messages").and_then(Value::as_array).cloned().unwrap_or_default();
            let system_index = messages.iter().position(|m| m.get("role").and_then(Value::as_str) == Some("system"));
            let turns = messages
                .iter()
                .map(|m| Turn {
                    role: Role::from_str_loose(m.get("role").and_then(Value::as_str).unwrap_or("user")),
                    text: content_text(m.get("content").unwrap_or(&Value::Null)),
                })
                .collect();
            let system_text = system_index.map(|i| turns_text(&turns, i));
            Conversation { array_key: "messages", turns, system_index, system_text }
        }
        BodyShape::Anthropic => {
            let messages = body.get("messages").and_then(Value::as_array).cloned().unwrap_or_default();
            let turns = messages
                .iter()
                .map(|m| Turn {
                    role: Role::from_str_loose(m.get("role").and_then(Value::as_str).unwrap_or("user")),
                    text: content_text(m.get("content").unwrap_or(&Value::Null)),
                })
                .collect();
            let system_text = body.get("system").map(content_text).filter(|s| !s.is_empty());
            Conversation { array_key: "messages", turns, system_index: None, system_text }
        }
        BodyShape::Google => {
            let contents = body.get("contents").and_then(Value::as_array).cloned().unwrap_or_default();
            let turns = contents
                .iter()
                .map(|c| Turn {
                    role: Role::from_str_loose(c.get("role").and_then(Value::as_str).unwrap_or("user")),
                    text: c
                        .get("parts")
                        .and_then(Value::as_array)
                        .map(|parts| parts.iter().filter_map(|p| p.get("text").and_then(Value::as_str)).collect::<Vec<_>>().join("\n"))
                        .unwrap_or_default(),
                })
                .collect();
            let system_text = body
                .get("systemInstruction")
                .and_then(|si| si.get("parts"))
                .and_then(Value::as_array)
                .map(|parts| parts.iter().filter_map(|p| p.get("text").and_then(Value::as_str)).collect::<Vec<_>>().join("\n"))
                .filter(|s| !s.is_empty());
            Conversation { array_key: "contents", turns, system_index: None, system_text }
        }
    }
}

fn turns_text(turns: &[Turn], index: usize) -> String {
    turns.get(index).map(|t| t.text.clone()).unwrap_or_default()
}

/// Build the text KRONOS embeds as its query: system instruction text (if
/// any) followed by the last up to 3 conversation turns (spec §4.9 step 4).
pub fn build_query_text(conv: &Conversation) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(sys) = &conv.system_text {
        parts.push(sys.clone());
    }
    let last_n = conv.turns.iter().rev().take(3).rev();
    for turn in last_n {
        if !turn.text.is_empty() {
            parts.push(turn.text.clone());
        }
    }
    parts.join("\n")
}

/// Estimated token counts per turn, spec §4.5 formula: `ceil(chars/4)*1.1 + 4`.
/// `estimate_tokens` already applies the `*1.1` safety multiplier; this only
/// adds the per-message overhead.
pub fn message_token_counts(conv: &Conversation) -> Vec<usize> {
    conv.turns.iter().map(|t| estimate_tokens(&t.text) + 4).collect()
}

/// The last user turn's text, used for storage (spec §4.9 step 7).
pub fn last_user_text(conv: &Conversation) -> Option<String> {
    conv.turns.iter().rev().find(|t| t.role == Role::User).map(|t| t.text.clone()).filter(|s| !s.is_empty())
}

/// Apply a truncation plan back into `body`'s message/content array:
/// removes `dropped_indices` entirely, then hard-truncates the surviving
/// message at `hard_truncate.0` to `hard_truncate.1` estimated tokens.
pub fn apply_truncation(body: &mut Value, array_key: &str, dropped_indices: &[usize], hard_truncate: Option<(usize, usize)>) {
    let Some(array) = body.get_mut(array_key).and_then(Value::as_array_mut) else { return };

    if let Some((idx, max_tokens)) = hard_truncate {
        if let Some(msg) = array.get_mut(idx) {
            let key = if array_key == "contents" { None } else { Some("content") };
            match key {
                Some(k) => {
                    if let Some(content) = msg.get(k).cloned() {
                        let text = content_text(&content);
                        let truncated = hard_truncate_content(&text, max_tokens);
                        set_content_text(msg.get_mut(k).unwrap(), &truncated);
                    }
                }
                None => {
                    if let Some(parts) = msg.get_mut("parts").and_then(Value::as_array_mut) {
                        if let Some(first) = parts.first_mut() {
                            let text = first.get("text").and_then(Value::as_str).unwrap_or_default().to_string();
                            first["text"] = Value::String(hard_truncate_content(&text, max_tokens));
                        }
                    }
                }
            }
        }
    }

    let mut kept = Vec::with_capacity(array.len());
    for (i, item) in array.drain(..).enumerate() {
        if !dropped_indices.contains(&i) {
            kept.push(item);
        }
    }
    *array = kept;
}

/// Pull the assistant's full text and usage counters out of a completed
/// (non-streaming) provider response body, per shape. Mirrors the delta
/// extraction `StreamAccumulator` does for SSE, but reads the whole message
/// at once.
pub fn extract_response_text_and_usage(shape: BodyShape, v: &Value) -> (String, Option<memoryrouter_core::types::TokenUsage>) {
    use memoryrouter_core::types::TokenUsage;
    match shape {
        BodyShape::OpenAi => {
            let text = v["choices"][0]["message"]["content"].as_str().unwrap_or_default().to_string();
            let usage = v.get("usage").map(|u| TokenUsage {
                input_tokens: u["prompt_tokens"].as_u64().unwrap_or(0),
                output_tokens: u["completion_tokens"].as_u64().unwrap_or(0),
                total_tokens: u["total_tokens"].as_u64().unwrap_or(0),
            });
            (text, usage)
        }
        BodyShape::Anthropic => {
            let text = v["content"]
                .as_array()
                .map(|blocks| blocks.iter().filter_map(|b| b.get("text").and_then(Value::as_str)).collect::<Vec<_>>().join(""))
                .unwrap_or_default();
            let usage = v.get("usage").map(|u| {
                let input = u["input_tokens"].as_u64().unwrap_or(0);
                let output = u["output_tokens"].as_u64().unwrap_or(0);
                TokenUsage { input_tokens: input, output_tokens: output, total_tokens: input + output }
            });
            (text, usage)
        }
        BodyShape::Google => {
            let text = v["candidates"][0]["content"]["parts"]
                .as_array()
                .map(|parts| parts.iter().filter_map(|p| p.get("text").and_then(Value::as_str)).collect::<Vec<_>>().join(""))
                .unwrap_or_default();
            let usage = v.get("usageMetadata").map(|m| {
                let input = m["promptTokenCount"].as_u64().unwrap_or(0);
                let output = m["candidatesTokenCount"].as_u64().unwrap_or(0);
                TokenUsage { input_tokens: input, output_tokens: output, total_tokens: m["totalTokenCount"].as_u64().unwrap_or(input + output) }
            });
            (text, usage)
        }
    }
}

/// First non-empty value among `Authorization: Bearer ...`, `x-api-key`, and
/// `X-Memory-Key`, stripped of any `Bearer ` prefix.
pub fn extract_memory_key_headers(headers: &HeaderMap) -> (Option<String>, Option<String>, Option<String>) {
    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim_start_matches("Bearer ").trim().to_string());
    let x_api_key = headers.get("x-api-key").and_then(|v| v.to_str().ok()).map(str::to_string);
    let x_memory_key = headers.get("x-memory-key").and_then(|v| v.to_str().ok()).map(str::to_string);
    (bearer, x_api_key, x_memory_key)
}

/// Build the response headers enumerated in spec §4.9 step 6.
#[allow(clippy::too_many_arguments)]
pub fn build_response_headers(
    mr_processing_ms: u64,
    provider_response_ms: u64,
    memory_key: &str,
    mode: MemoryMode,
    session_id: Option<&str>,
    retrieval: &RetrievalOutcome,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let insert = |headers: &mut HeaderMap, name: &'static str, value: String| {
        if let Ok(v) = axum::http::HeaderValue::from_str(&value) {
            headers.insert(name, v);
        }
    };
    insert(&mut headers, "x-mr-processing-ms", mr_processing_ms.to_string());
    insert(&mut headers, "x-provider-response-ms", provider_response_ms.to_string());
    insert(&mut headers, "x-total-ms", (mr_processing_ms + provider_response_ms).to_string());
    insert(&mut headers, "x-memory-tokens-retrieved", retrieval.tokens_retrieved.to_string());
    insert(&mut headers, "x-memory-chunks-retrieved", retrieval.chunks_retrieved.to_string());
    insert(&mut headers, "x-memory-tokens-injected", retrieval.tokens_injected.to_string());
    insert(&mut headers, "x-memory-mode", mode.as_str().to_string());
    insert(&mut headers, "x-memory-key", memory_key.to_string());
    if let Some(sid) = session_id {
        insert(&mut headers, "x-session-id", sid.to_string());
    }
    if retrieval.truncated {
        insert(&mut headers, "x-memoryrouter-truncated", "true".to_string());
        if let Some(details) = &retrieval.truncated_details {
            insert(&mut headers, "x-memoryrouter-truncated-details", details.clone());
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn openai_conversation_finds_system_message() {
        let body = json!({
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"}
            ]
        });
        let conv = extract_conversation(BodyShape::OpenAi, &body);
        assert_eq!(conv.system_index, Some(0));
        assert_eq!(conv.turns.len(), 3);
    }

    #[test]
    fn query_text_includes_system_and_last_turns() {
        let body = json!({"system": "be terse", "messages": [{"role": "user", "content": "a"}, {"role": "assistant", "content": "b"}]});
        let conv = extract_conversation(BodyShape::Anthropic, &body);
        let q = build_query_text(&conv);
        assert!(q.contains("be terse"));
        assert!(q.contains('a'));
        assert!(q.contains('b'));
    }

    #[test]
    fn apply_truncation_drops_indices_and_shrinks_survivor() {
        let mut body = json!({
            "messages": [
                {"role": "system", "content": "sys"},
                {"role": "user", "content": "old message that is kept but shrunk"},
                {"role": "user", "content": "dropped"},
                {"role": "user", "content": "latest"}
            ]
        });
        apply_truncation(&mut body, "messages", &[2], Some((1, 2)));
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert!(messages[1]["content"].as_str().unwrap().len() <= 8);
    }

    #[test]
    fn last_user_text_finds_most_recent_user_turn() {
        let body = json!({"messages": [{"role": "user", "content": "first"}, {"role": "assistant", "content": "reply"}, {"role": "user", "content": "second"}]});
        let conv = extract_conversation(BodyShape::OpenAi, &body);
        assert_eq!(last_user_text(&conv).as_deref(), Some("second"));
    }
}
