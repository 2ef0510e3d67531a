//! Renders retrieved chunks into a provider-styled memory block (spec §4.4).
//!
//! The house style is keyed on the target model/provider, not on the wire
//! shape of the inbound request: Claude and Gemini both read naturally as
//! XML asides, GPT and Grok read naturally as a markdown-ish preamble, Llama
//! favours plain bracket tags. Anything else defaults to XML.

use chrono::{TimeZone, Utc};

use crate::types::Role;
use crate::vault::ScoredChunk;

/// The instruction line appended after the rendered chunks (spec §4.4
/// "injected instruction"). Kept style-agnostic; every house style wraps
/// the same sentence.
const USE_NATURALLY: &str = "Use this context naturally in your response. Do not explicitly mention memory unless asked.";

/// House style for the injected memory block, keyed on the target model
/// (spec §4.4: "XML for Claude and Gemini, markdown for GPT/Grok, bracket
/// tags for Llama, XML as default").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryStyle {
    Xml,
    Markdown,
    Bracket,
}

/// Resolve the house style for `model` by the same substring heuristics
/// `providers::detect_provider` uses to resolve a provider tag, but keyed
/// directly on model family rather than provider — Llama has no `ProviderTag`
/// of its own (it's dispatched through whichever provider hosts it).
pub fn memory_style_for_model(model: &str) -> MemoryStyle {
    let lower = model.to_ascii_lowercase();
    if lower.contains("llama") {
        MemoryStyle::Bracket
    } else if lower.starts_with("claude") || lower.contains("claude") {
        MemoryStyle::Xml
    } else if lower.starts_with("gemini") || lower.contains("gemini") {
        MemoryStyle::Xml
    } else if lower.starts_with("gpt") || lower.starts_with("o1") || lower.starts_with("o3") || lower.starts_with("grok") || lower.contains("grok") {
        MemoryStyle::Markdown
    } else {
        MemoryStyle::Xml
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

/// Render `chunks` (already ordered by relevance) as a single block of text
/// to inject into the request's system/instruction field, with the vault's
/// current unflushed buffer (if any) rendered first and labelled
/// `[MOST RECENT]` (spec §4.4 "Memory block formatting ... Contents: the
/// `[MOST RECENT]` buffer block first"). Returns `None` if there's nothing
/// to inject at all.
pub fn format_memory_block(chunks: &[ScoredChunk], recent_buffer: Option<(&str, Role)>, style: MemoryStyle, now_ms: i64) -> Option<String> {
    let mut lines: Vec<String> = Vec::new();

    if let Some((text, role)) = recent_buffer.filter(|(t, _)| !t.trim().is_empty()) {
        let who = role_label(role);
        lines.push(match style {
            MemoryStyle::Xml => format!("  <memory role=\"{who}\" when=\"MOST RECENT\">{text}</memory>"),
            MemoryStyle::Markdown => format!("- (MOST RECENT, {who}) {text}"),
            MemoryStyle::Bracket => format!("[MOST RECENT] {who}: {text}"),
        });
    }

    lines.extend(chunks.iter().map(|sc| {
        let relative = relative_time(now_ms - sc.chunk.created_at_ms);
        let absolute = absolute_local_time(sc.chunk.created_at_ms);
        let who = role_label(sc.chunk.role);
        match style {
            MemoryStyle::Xml => format!("  <memory role=\"{who}\" when=\"{relative}\" at=\"{absolute}\">{}</memory>", sc.chunk.content),
            MemoryStyle::Markdown => format!("- ({relative}, {absolute}, {who}) {}", sc.chunk.content),
            MemoryStyle::Bracket => format!("[{relative} — {absolute}] {who}: {}", sc.chunk.content),
        }
    }));

    if lines.is_empty() {
        return None;
    }
    let body = lines.join("\n\n---\n\n");

    Some(match style {
        MemoryStyle::Xml => format!("<memories>\n{body}\n</memories>\n\n{USE_NATURALLY}"),
        MemoryStyle::Markdown => format!("Relevant memory from earlier conversation:\n{body}\n\n{USE_NATURALLY}"),
        MemoryStyle::Bracket => format!("Relevant memory from earlier conversation:\n{body}\n\n{USE_NATURALLY}"),
    })
}

/// Coarse relative-time label: "just now", "12 min ago", "3 hours ago",
/// "5 days ago", "2 weeks ago", "3 months ago", "1 year ago" (spec §4.4).
pub fn relative_time(age_ms: i64) -> String {
    let age_ms = age_ms.max(0);
    let secs = age_ms / 1000;
    if secs < 60 {
        "just now".to_string()
    } else if secs < 3600 {
        format!("{} min ago", secs / 60)
    } else if secs < 86_400 {
        format!("{} hours ago", secs / 3600)
    } else if secs < 7 * 86_400 {
        format!("{} days ago", secs / 86_400)
    } else if secs < 30 * 86_400 {
        format!("{} weeks ago", secs / (7 * 86_400))
    } else if secs < 365 * 86_400 {
        format!("{} months ago", secs / (30 * 86_400))
    } else {
        format!("{} years ago", secs / (365 * 86_400))
    }
}

/// Absolute timestamp rendered as UTC (deployments without a configured
/// per-user timezone fall back to it rather than guessing one).
pub fn absolute_local_time(created_at_ms: i64) -> String {
    Utc.timestamp_millis_opt(created_at_ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "unknown time".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::ScoredChunk;
    use crate::vault::chunk::Chunk;

    fn chunk(content: &str, created_at_ms: i64) -> ScoredChunk {
        ScoredChunk {
            score: 0.9,
            chunk: Chunk {
                id: 1,
                role: Role::User,
                content: content.to_string(),
                content_hash: "abc".into(),
                created_at_ms,
                model: "m".into(),
                request_id: "r".into(),
                embedding: vec![],
            },
        }
    }

    #[test]
    fn empty_chunks_and_no_buffer_yields_none() {
        assert!(format_memory_block(&[], None, MemoryStyle::Markdown, 0).is_none());
    }

    #[test]
    fn xml_style_uses_xml_tags() {
        let block = format_memory_block(&[chunk("hello", 0)], None, MemoryStyle::Xml, 1000).unwrap();
        assert!(block.contains("<memories>"));
        assert!(block.contains("<memory"));
    }

    #[test]
    fn block_carries_use_naturally_instruction() {
        let block = format_memory_block(&[chunk("hello", 0)], None, MemoryStyle::Markdown, 1000).unwrap();
        assert!(block.to_lowercase().contains("do not explicitly mention memory"));
    }

    #[test]
    fn multiple_chunks_are_separated_by_a_rule() {
        let block = format_memory_block(&[chunk("a", 0), chunk("b", 0)], None, MemoryStyle::Markdown, 1000).unwrap();
        assert!(block.contains("\n\n---\n\n"));
    }

    #[test]
    fn recent_buffer_is_rendered_first_and_labelled() {
        let block = format_memory_block(&[chunk("older", 0)], Some(("still typing", Role::User)), MemoryStyle::Markdown, 1000).unwrap();
        let buffer_pos = block.find("MOST RECENT").unwrap();
        let chunk_pos = block.find("older").unwrap();
        assert!(buffer_pos < chunk_pos);
    }

    #[test]
    fn blank_recent_buffer_is_ignored() {
        let block = format_memory_block(&[chunk("hello", 0)], Some(("   ", Role::User)), MemoryStyle::Markdown, 1000).unwrap();
        assert!(!block.contains("MOST RECENT"));
    }

    #[test]
    fn empty_chunks_with_recent_buffer_still_yields_a_block() {
        let block = format_memory_block(&[], Some(("pending text", Role::Assistant)), MemoryStyle::Xml, 0).unwrap();
        assert!(block.contains("pending text"));
    }

    #[test]
    fn relative_time_long_range_buckets() {
        assert_eq!(relative_time(10 * 86_400 * 1000), "1 weeks ago");
        assert_eq!(relative_time(60 * 86_400 * 1000), "2 months ago");
        assert_eq!(relative_time(400 * 86_400 * 1000), "1 years ago");
    }

    #[test]
    fn absolute_local_time_formats_as_utc() {
        let s = absolute_local_time(0);
        assert_eq!(s, "1970-01-01 00:00 UTC");
    }

    #[test]
    fn relative_time_buckets() {
        assert_eq!(relative_time(10_000), "just now");
        assert_eq!(relative_time(5 * 60 * 1000), "5 min ago");
        assert_eq!(relative_time(3 * 3600 * 1000), "3 hours ago");
        assert_eq!(relative_time(2 * 86_400 * 1000), "2 days ago");
    }

    #[test]
    fn memory_style_keys_on_model_not_wire_shape() {
        assert_eq!(memory_style_for_model("claude-3-5-sonnet-20241022"), MemoryStyle::Xml);
        assert_eq!(memory_style_for_model("gemini-1.5-pro"), MemoryStyle::Xml);
        assert_eq!(memory_style_for_model("gpt-4o"), MemoryStyle::Markdown);
        assert_eq!(memory_style_for_model("grok-3-beta"), MemoryStyle::Markdown);
        assert_eq!(memory_style_for_model("meta-llama/llama-3-70b-instruct"), MemoryStyle::Bracket);
        assert_eq!(memory_style_for_model("mistral-large-latest"), MemoryStyle::Xml);
    }
}
