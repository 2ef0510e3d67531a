//! C4 — Memory transformer: splices a formatted memory block into the
//! provider-appropriate system/instruction field of an inbound request body.
//!
//! Pure JSON manipulation, no network I/O — grounded on the teacher's
//! `format_messages`/`add_turn_cache_breakpoints` functions in
//! `engine/providers/openai.rs` and `anthropic.rs`, which mutate a request
//! body in place ahead of dispatch.

pub mod format;
pub mod shape;

pub use format::{format_memory_block, memory_style_for_model, MemoryStyle};
pub use shape::detect_body_shape;

use crate::types::BodyShape;
use serde_json::{json, Value};

/// Mutates `body` in place, injecting `memory_block` into the
/// shape-appropriate system/instruction field. A no-op if `memory_block` is
/// `None`.
pub fn inject_memory(body: &mut Value, shape: BodyShape, memory_block: Option<&str>) {
    let Some(block) = memory_block else { return };
    match shape {
        BodyShape::OpenAi => inject_openai(body, block),
        BodyShape::Anthropic => inject_anthropic(body, block),
        BodyShape::Google => inject_google(body, block),
    }
}

fn inject_openai(body: &mut Value, block: &str) {
    let messages = body
        .as_object_mut()
        .and_then(|o| o.get_mut("messages"))
        .and_then(|m| m.as_array_mut());
    let Some(messages) = messages else { return };

    if let Some(first) = messages.first_mut() {
        if first.get("role").and_then(|r| r.as_str()) == Some("system") {
            let existing = first.get("content").and_then(|c| c.as_str()).unwrap_or_default();
            let merged = format!("{block}\n\n{existing}");
            first["content"] = Value::String(merged);
            return;
        }
    }
    messages.insert(0, json!({ "role": "system", "content": block }));
}

fn inject_anthropic(body: &mut Value, block: &str) {
    let Some(obj) = body.as_object_mut() else { return };
    match obj.get_mut("system") {
        Some(Value::String(existing)) => {
            *existing = format!("{block}\n\n{existing}");
        }
        Some(Value::Array(blocks)) => {
            blocks.insert(0, json!({ "type": "text", "text": block }));
        }
        _ => {
            obj.insert("system".to_string(), Value::String(block.to_string()));
        }
    }
}

fn inject_google(body: &mut Value, block: &str) {
    let Some(obj) = body.as_object_mut() else { return };
    match obj.get_mut("systemInstruction") {
        Some(instr) => {
            let parts = instr
                .as_object_mut()
                .and_then(|o| o.get_mut("parts"))
                .and_then(|p| p.as_array_mut());
            if let Some(parts) = parts {
                parts.insert(0, json!({ "text": block }));
            } else {
                *instr = json!({ "parts": [{ "text": block }] });
            }
        }
        None => {
            obj.insert(
                "systemInstruction".to_string(),
                json!({ "parts": [{ "text": block }] }),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_inserts_new_system_message() {
        let mut body = json!({ "model": "gpt-4", "messages": [{ "role": "user", "content": "hi" }] });
        inject_memory(&mut body, BodyShape::OpenAi, Some("remembered stuff"));
        assert_eq!(body["messages"][0]["role"], "system");
        assert!(body["messages"][0]["content"].as_str().unwrap().contains("remembered stuff"));
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn openai_merges_into_existing_system_message() {
        let mut body = json!({
            "messages": [
                { "role": "system", "content": "be concise" },
                { "role": "user", "content": "hi" }
            ]
        });
        inject_memory(&mut body, BodyShape::OpenAi, Some("remembered stuff"));
        let content = body["messages"][0]["content"].as_str().unwrap();
        assert!(content.contains("be concise"));
        assert!(content.contains("remembered stuff"));
        assert!(content.find("remembered stuff").unwrap() < content.find("be concise").unwrap());
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn anthropic_merges_into_string_system() {
        let mut body = json!({ "system": "be terse", "messages": [] });
        inject_memory(&mut body, BodyShape::Anthropic, Some("remembered stuff"));
        let system = body["system"].as_str().unwrap();
        assert!(system.contains("be terse"));
        assert!(system.contains("remembered stuff"));
        assert!(system.find("remembered stuff").unwrap() < system.find("be terse").unwrap());
    }

    #[test]
    fn anthropic_sets_system_when_absent() {
        let mut body = json!({ "messages": [] });
        inject_memory(&mut body, BodyShape::Anthropic, Some("remembered stuff"));
        assert_eq!(body["system"], "remembered stuff");
    }

    #[test]
    fn anthropic_unshifts_into_existing_array_system() {
        let mut body = json!({ "system": [{ "type": "text", "text": "be terse" }] });
        inject_memory(&mut body, BodyShape::Anthropic, Some("remembered stuff"));
        let blocks = body["system"].as_array().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0]["text"], "remembered stuff");
        assert_eq!(blocks[1]["text"], "be terse");
    }

    #[test]
    fn google_unshifts_into_existing_parts() {
        let mut body = json!({ "systemInstruction": { "parts": [{ "text": "be terse" }] } });
        inject_memory(&mut body, BodyShape::Google, Some("remembered stuff"));
        let parts = body["systemInstruction"]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["text"], "remembered stuff");
        assert_eq!(parts[1]["text"], "be terse");
    }

    #[test]
    fn none_block_is_noop() {
        let mut body = json!({ "messages": [{ "role": "user", "content": "hi" }] });
        let before = body.clone();
        inject_memory(&mut body, BodyShape::OpenAi, None);
        assert_eq!(body, before);
    }
}
