//! Provider-tag resolution from a model string (spec §4.6).
//!
//! Explicit `<tag>/<name>` prefixes win outright; otherwise a fixed set of
//! substring heuristics guesses the provider family; anything unmatched
//! falls through to OpenRouter, which proxies almost every open model.

use crate::types::ProviderTag;

/// Resolve `(tag, resolved_model_name)` for `model`. The returned name has
/// any explicit `<tag>/` prefix stripped; heuristic matches keep the model
/// string as given.
pub fn detect_provider(model: &str) -> (ProviderTag, String) {
    if let Some((prefix, rest)) = model.split_once('/') {
        if let Some(tag) = ProviderTag::from_tag(prefix) {
            return (tag, rest.to_string());
        }
    }

    let lower = model.to_ascii_lowercase();
    let tag = if lower.starts_with("claude") {
        ProviderTag::Anthropic
    } else if lower.starts_with("gpt") || lower.starts_with("o1") || lower.starts_with("o3") {
        ProviderTag::OpenAi
    } else if lower.starts_with("gemini") {
        ProviderTag::Google
    } else if lower.starts_with("grok") {
        ProviderTag::Xai
    } else if lower.starts_with("deepseek") {
        ProviderTag::DeepSeek
    } else if lower.starts_with("mistral") || lower.starts_with("mixtral") || lower.starts_with("codestral") {
        ProviderTag::Mistral
    } else if lower.contains("llama") && lower.contains("cerebras") {
        ProviderTag::Cerebras
    } else {
        ProviderTag::OpenRouter
    };

    (tag, model.to_string())
}

/// xAI has renamed several model families; a request for an old alias is
/// remapped to the model xAI actually serves today (spec §4.6).
pub fn remap_xai_alias(model: &str) -> String {
    let lower = model.to_ascii_lowercase();
    if lower.starts_with("grok-2") {
        "grok-3-beta".to_string()
    } else if lower == "grok" {
        "grok-3-beta".to_string()
    } else {
        model.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_tag_prefix_wins() {
        let (tag, name) = detect_provider("openai/GPT-4");
        assert_eq!(tag, ProviderTag::OpenAi);
        assert_eq!(name, "GPT-4");
    }

    #[test]
    fn claude_heuristic() {
        assert_eq!(detect_provider("claude-3.5-sonnet").0, ProviderTag::Anthropic);
    }

    #[test]
    fn unprefixed_llama_falls_to_openrouter() {
        let (tag, name) = detect_provider("meta-llama/llama-3-70b-instruct");
        assert_eq!(tag, ProviderTag::OpenRouter);
        assert_eq!(name, "meta-llama/llama-3-70b-instruct");
    }

    #[test]
    fn llama_with_cerebras_hint_routes_to_cerebras() {
        assert_eq!(detect_provider("cerebras/llama-3.3-70b").0, ProviderTag::Cerebras);
    }

    #[test]
    fn empty_model_falls_back_to_openrouter() {
        assert_eq!(detect_provider("").0, ProviderTag::OpenRouter);
    }

    #[test]
    fn xai_alias_remap() {
        assert_eq!(remap_xai_alias("grok-2-1212"), "grok-3-beta");
        assert_eq!(remap_xai_alias("grok-3-beta"), "grok-3-beta");
    }
}
