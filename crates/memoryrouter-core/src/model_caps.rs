//! Per-model context-window and max-output-token registry, used by the
//! truncator (C5) to size its budget. Adapted from the teacher's
//! `engine/engram/model_caps.rs`: normalise the model name, then match by
//! exact name, then by longest-prefix family match, then fall back to a
//! conservative default.

use std::sync::LazyLock;

#[derive(Debug, Clone, Copy)]
pub struct ModelCaps {
    pub context_window: u32,
    pub max_output_tokens: u32,
}

struct ModelEntry {
    prefix: &'static str,
    caps: ModelCaps,
}

/// Fallback used when no registry entry matches at all.
pub const DEFAULT_CAPS: ModelCaps = ModelCaps {
    context_window: 32_000,
    max_output_tokens: 4_096,
};

/// Ordered most-specific-first; `resolve` takes the first prefix match.
static REGISTRY: LazyLock<Vec<ModelEntry>> = LazyLock::new(|| {
    vec![
        ModelEntry { prefix: "gpt-4o-mini", caps: ModelCaps { context_window: 128_000, max_output_tokens: 16_384 } },
        ModelEntry { prefix: "gpt-4o", caps: ModelCaps { context_window: 128_000, max_output_tokens: 16_384 } },
        ModelEntry { prefix: "gpt-4-turbo", caps: ModelCaps { context_window: 128_000, max_output_tokens: 4_096 } },
        ModelEntry { prefix: "gpt-4", caps: ModelCaps { context_window: 8_192, max_output_tokens: 4_096 } },
        ModelEntry { prefix: "gpt-3.5", caps: ModelCaps { context_window: 16_385, max_output_tokens: 4_096 } },
        ModelEntry { prefix: "o1-mini", caps: ModelCaps { context_window: 128_000, max_output_tokens: 65_536 } },
        ModelEntry { prefix: "o1", caps: ModelCaps { context_window: 200_000, max_output_tokens: 100_000 } },
        ModelEntry { prefix: "o3", caps: ModelCaps { context_window: 200_000, max_output_tokens: 100_000 } },
        ModelEntry { prefix: "claude-3-5-haiku", caps: ModelCaps { context_window: 200_000, max_output_tokens: 8_192 } },
        ModelEntry { prefix: "claude-3-5-sonnet", caps: ModelCaps { context_window: 200_000, max_output_tokens: 8_192 } },
        ModelEntry { prefix: "claude-3-opus", caps: ModelCaps { context_window: 200_000, max_output_tokens: 4_096 } },
        ModelEntry { prefix: "claude-3", caps: ModelCaps { context_window: 200_000, max_output_tokens: 4_096 } },
        ModelEntry { prefix: "claude-2", caps: ModelCaps { context_window: 100_000, max_output_tokens: 4_096 } },
        ModelEntry { prefix: "gemini-1.5-pro", caps: ModelCaps { context_window: 2_000_000, max_output_tokens: 8_192 } },
        ModelEntry { prefix: "gemini-1.5-flash", caps: ModelCaps { context_window: 1_000_000, max_output_tokens: 8_192 } },
        ModelEntry { prefix: "gemini-2.0", caps: ModelCaps { context_window: 1_000_000, max_output_tokens: 8_192 } },
        ModelEntry { prefix: "gemini", caps: ModelCaps { context_window: 1_000_000, max_output_tokens: 8_192 } },
        ModelEntry { prefix: "grok-2", caps: ModelCaps { context_window: 131_072, max_output_tokens: 4_096 } },
        ModelEntry { prefix: "grok", caps: ModelCaps { context_window: 131_072, max_output_tokens: 4_096 } },
        ModelEntry { prefix: "deepseek-reasoner", caps: ModelCaps { context_window: 64_000, max_output_tokens: 8_192 } },
        ModelEntry { prefix: "deepseek-chat", caps: ModelCaps { context_window: 64_000, max_output_tokens: 8_192 } },
        ModelEntry { prefix: "mistral-large", caps: ModelCaps { context_window: 128_000, max_output_tokens: 4_096 } },
        ModelEntry { prefix: "mixtral", caps: ModelCaps { context_window: 32_768, max_output_tokens: 4_096 } },
        ModelEntry { prefix: "llama3.1", caps: ModelCaps { context_window: 128_000, max_output_tokens: 4_096 } },
        ModelEntry { prefix: "llama3", caps: ModelCaps { context_window: 8_192, max_output_tokens: 4_096 } },
        ModelEntry { prefix: "llama", caps: ModelCaps { context_window: 4_096, max_output_tokens: 2_048 } },
    ]
});

/// Lowercase and strip the date/variant suffixes providers tack onto model
/// ids (`-2024-11-20`, `-preview`, `-latest`, `-exp`), so `gpt-4o-2024-08-06`
/// matches the same registry entry as `gpt-4o`.
pub fn normalize_model_name(model: &str) -> String {
    let lower = model.to_ascii_lowercase();
    let mut s = lower.as_str();
    for suffix in ["-latest", "-preview", "-exp", "-experimental"] {
        if let Some(stripped) = s.strip_suffix(suffix) {
            s = stripped;
        }
    }
    // Strip a trailing date stamp like "-2024-11-20" or "-20241120".
    let re_date = regex::Regex::new(r"-\d{4}-\d{2}-\d{2}$|-\d{8}$").unwrap();
    re_date.replace(s, "").to_string()
}

/// Resolve capabilities for `model`: exact match first, then the longest
/// registry prefix the normalised name starts with, then `DEFAULT_CAPS`.
pub fn resolve_model_capabilities(model: &str) -> ModelCaps {
    let normalized = normalize_model_name(model);

    if let Some(entry) = REGISTRY.iter().find(|e| e.prefix == normalized) {
        return entry.caps;
    }

    REGISTRY
        .iter()
        .filter(|e| normalized.starts_with(e.prefix))
        .max_by_key(|e| e.prefix.len())
        .map(|e| e.caps)
        .unwrap_or(DEFAULT_CAPS)
}

pub fn resolve_context_window(model: &str, fallback: Option<u32>) -> u32 {
    fallback.unwrap_or_else(|| resolve_model_capabilities(model).context_window)
}

pub fn resolve_max_output_tokens(model: &str, fallback: Option<u32>) -> u32 {
    fallback.unwrap_or_else(|| resolve_model_capabilities(model).max_output_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_wins() {
        let caps = resolve_model_capabilities("gpt-4o");
        assert_eq!(caps.context_window, 128_000);
    }

    #[test]
    fn dated_suffix_normalises_to_family() {
        let caps = resolve_model_capabilities("gpt-4o-2024-08-06");
        assert_eq!(caps.context_window, 128_000);
    }

    #[test]
    fn longest_prefix_wins_over_shorter_family() {
        let caps = resolve_model_capabilities("claude-3-5-sonnet-20241022");
        assert_eq!(caps.max_output_tokens, 8_192);
    }

    #[test]
    fn unknown_model_gets_default() {
        let caps = resolve_model_capabilities("some-future-model-nobody-heard-of");
        assert_eq!(caps.context_window, DEFAULT_CAPS.context_window);
    }

    #[test]
    fn latest_suffix_is_stripped() {
        assert_eq!(normalize_model_name("gemini-1.5-pro-latest"), "gemini-1.5-pro");
    }
}
