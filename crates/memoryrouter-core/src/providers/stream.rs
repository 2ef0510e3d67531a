//! Server-sent-event line splitting and per-shape assistant-text/usage
//! extraction, used by the dispatcher's streaming tee (spec §4.6, §4.9 step 7).
//!
//! Grounded on the teacher's `byte_stream.next()` SSE loop in
//! `engine/providers/openai.rs` / `anthropic.rs`: buffer raw bytes, split on
//! `\n`, strip the `data: ` prefix, feed each payload to a shape-specific
//! parser.

use crate::types::{BodyShape, TokenUsage};
use serde_json::Value;

/// Pull complete `data: ...` lines out of `buffer`, leaving any trailing
/// partial line for the next read. Mutates `buffer` in place.
pub fn drain_sse_lines(buffer: &mut String) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.find('\n') {
        let line = buffer[..pos].trim().to_string();
        *buffer = buffer[pos + 1..].to_string();
        if let Some(data) = line.strip_prefix("data:") {
            let data = data.trim();
            if !data.is_empty() {
                lines.push(data.to_string());
            }
        }
    }
    lines
}

/// Accumulates assistant text and the last-seen usage counters across a
/// full SSE stream, for one provider shape.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    usage: Option<TokenUsage>,
    input_tokens_seen: u64,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one SSE data payload (the part after `data:`, already trimmed).
    /// `"[DONE]"` (OpenAI's sentinel) is ignored.
    pub fn feed(&mut self, payload: &str, shape: BodyShape) {
        if payload == "[DONE]" {
            return;
        }
        let Ok(v) = serde_json::from_str::<Value>(payload) else { return };
        match shape {
            BodyShape::OpenAi => self.feed_openai(&v),
            BodyShape::Anthropic => self.feed_anthropic(&v),
            BodyShape::Google => self.feed_google(&v),
        }
    }

    fn feed_openai(&mut self, v: &Value) {
        if let Some(delta) = v["choices"][0]["delta"]["content"].as_str() {
            self.text.push_str(delta);
        }
        if let Some(u) = v.get("usage") {
            let input = u["prompt_tokens"].as_u64().unwrap_or(0);
            let output = u["completion_tokens"].as_u64().unwrap_or(0);
            if input > 0 || output > 0 {
                self.usage = Some(TokenUsage {
                    input_tokens: input,
                    output_tokens: output,
                    total_tokens: u["total_tokens"].as_u64().unwrap_or(input + output),
                });
            }
        }
    }

    fn feed_anthropic(&mut self, v: &Value) {
        match v["type"].as_str().unwrap_or("") {
            "content_block_delta" => {
                let delta = &v["delta"];
                if let Some(t) = delta["text"].as_str() {
                    self.text.push_str(t);
                }
            }
            "message_start" => {
                if let Some(input) = v["message"]["usage"]["input_tokens"].as_u64() {
                    self.input_tokens_seen = input;
                }
            }
            "message_delta" => {
                if let Some(output) = v["usage"]["output_tokens"].as_u64() {
                    self.usage = Some(TokenUsage {
                        input_tokens: self.input_tokens_seen,
                        output_tokens: output,
                        total_tokens: self.input_tokens_seen + output,
                    });
                }
            }
            _ => {}
        }
    }

    fn feed_google(&mut self, v: &Value) {
        if let Some(parts) = v["candidates"][0]["content"]["parts"].as_array() {
            for part in parts {
                if let Some(t) = part["text"].as_str() {
                    self.text.push_str(t);
                }
            }
        }
        if let Some(meta) = v.get("usageMetadata") {
            let input = meta["promptTokenCount"].as_u64().unwrap_or(0);
            let output = meta["candidatesTokenCount"].as_u64().unwrap_or(0);
            self.usage = Some(TokenUsage {
                input_tokens: input,
                output_tokens: output,
                total_tokens: meta["totalTokenCount"].as_u64().unwrap_or(input + output),
            });
        }
    }

    pub fn finish(self) -> (String, Option<TokenUsage>) {
        (self.text, self.usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_complete_lines_and_keeps_partial_tail() {
        let mut buf = "data: {\"a\":1}\ndata: {\"b\":2}\ndata: partial".to_string();
        let lines = drain_sse_lines(&mut buf);
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
        assert_eq!(buf, "data: partial");
    }

    #[test]
    fn openai_accumulates_delta_text_and_usage() {
        let mut acc = StreamAccumulator::new();
        acc.feed(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#, BodyShape::OpenAi);
        acc.feed(r#"{"choices":[{"delta":{"content":"lo"}}]}"#, BodyShape::OpenAi);
        acc.feed(r#"{"choices":[{"delta":{}}],"usage":{"prompt_tokens":10,"completion_tokens":2}}"#, BodyShape::OpenAi);
        let (text, usage) = acc.finish();
        assert_eq!(text, "Hello");
        assert_eq!(usage.unwrap().total_tokens, 12);
    }

    #[test]
    fn anthropic_accumulates_text_delta_and_usage_across_events() {
        let mut acc = StreamAccumulator::new();
        acc.feed(r#"{"type":"message_start","message":{"usage":{"input_tokens":50}}}"#, BodyShape::Anthropic);
        acc.feed(r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"Hi"}}"#, BodyShape::Anthropic);
        acc.feed(r#"{"type":"message_delta","usage":{"output_tokens":3}}"#, BodyShape::Anthropic);
        let (text, usage) = acc.finish();
        assert_eq!(text, "Hi");
        let u = usage.unwrap();
        assert_eq!(u.input_tokens, 50);
        assert_eq!(u.output_tokens, 3);
    }

    #[test]
    fn google_accumulates_parts_text_and_usage_metadata() {
        let mut acc = StreamAccumulator::new();
        acc.feed(r#"{"candidates":[{"content":{"parts":[{"text":"Bon"}]}}]}"#, BodyShape::Google);
        acc.feed(r#"{"candidates":[{"content":{"parts":[{"text":"jour"}]}}],"usageMetadata":{"promptTokenCount":5,"candidatesTokenCount":2,"totalTokenCount":7}}"#, BodyShape::Google);
        let (text, usage) = acc.finish();
        assert_eq!(text, "Bonjour");
        assert_eq!(usage.unwrap().total_tokens, 7);
    }

    #[test]
    fn done_sentinel_is_ignored_not_an_error() {
        let mut acc = StreamAccumulator::new();
        acc.feed("[DONE]", BodyShape::OpenAi);
        assert_eq!(acc.finish().0, "");
    }
}
