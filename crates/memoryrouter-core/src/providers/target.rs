//! Endpoint + auth-header construction per provider tag (spec §4.6).
//!
//! One pure function per provider family, registered in a flat match rather
//! than a trait hierarchy (spec §9 "a flat registry keyed by tag is
//! sufficient").

use super::credential::ProviderCredential;
use super::detect::remap_xai_alias;
use crate::types::ProviderTag;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const AZURE_API_VERSION: &str = "2024-08-01-preview";

#[derive(Debug, Clone)]
pub struct DispatchTarget {
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// The model name actually sent on the wire (after alias remap / tag strip).
    pub wire_model: String,
}

/// `endpoint_kind` distinguishes the two Google verbs and is ignored by
/// every other provider.
pub enum GoogleVerb {
    Generate,
    StreamGenerate,
}

#[allow(clippy::too_many_arguments)]
pub fn build_target(
    tag: ProviderTag,
    model: &str,
    cred: &ProviderCredential,
    stream: bool,
    google_verb: GoogleVerb,
) -> DispatchTarget {
    match tag {
        ProviderTag::OpenAi | ProviderTag::OpenRouter | ProviderTag::Cerebras | ProviderTag::DeepSeek | ProviderTag::Mistral => {
            openai_compatible_target(tag, model, cred)
        }
        ProviderTag::Xai => {
            let wire_model = remap_xai_alias(model);
            let mut target = openai_compatible_target(tag, &wire_model, cred);
            target.wire_model = wire_model;
            target
        }
        ProviderTag::Anthropic => anthropic_target(model, cred),
        ProviderTag::Google => google_target(model, cred, stream, google_verb),
        ProviderTag::Azure => azure_target(model, cred),
        ProviderTag::Ollama => ollama_target(model, cred),
    }
}

fn base_url(tag: ProviderTag, cred: &ProviderCredential) -> String {
    cred.base_url_override.clone().unwrap_or_else(|| tag.default_base_url().to_string())
}

/// Endpoint builder for the memory-free pass-through routes (spec §6
/// `/embeddings`, `/audio/*`, `/images/*`, `/completions`): same base URL and
/// Bearer auth as the OpenAI-compatible chat endpoint, different suffix.
/// Anthropic and Google don't expose any of these in OpenAI shape, so callers
/// should reject those tags before reaching here.
pub fn build_raw_target(tag: ProviderTag, suffix: &str, cred: &ProviderCredential) -> DispatchTarget {
    let base = base_url(tag, cred);
    let url = format!("{}{}", base.trim_end_matches('/'), suffix);
    let mut headers = vec![("Authorization".to_string(), format!("Bearer {}", cred.api_key))];
    if tag == ProviderTag::OpenRouter {
        headers.push(("HTTP-Referer".to_string(), "https://memoryrouter.dev".to_string()));
        headers.push(("X-Title".to_string(), "MemoryRouter".to_string()));
    }
    DispatchTarget { url, headers, wire_model: String::new() }
}

fn openai_compatible_target(tag: ProviderTag, model: &str, cred: &ProviderCredential) -> DispatchTarget {
    let base = base_url(tag, cred);
    let url = format!("{}/chat/completions", base.trim_end_matches('/'));
    let mut headers = vec![
        ("Authorization".to_string(), format!("Bearer {}", cred.api_key)),
        ("Content-Type".to_string(), "application/json".to_string()),
    ];
    if tag == ProviderTag::OpenRouter {
        headers.push(("HTTP-Referer".to_string(), "https://memoryrouter.dev".to_string()));
        headers.push(("X-Title".to_string(), "MemoryRouter".to_string()));
    }
    DispatchTarget { url, headers, wire_model: model.to_string() }
}

/// OAuth tokens minted for Claude Code (`sk-ant-oat01-…`) use Bearer auth and
/// a set of beta headers instead of the ordinary `x-api-key` flow.
fn anthropic_target(model: &str, cred: &ProviderCredential) -> DispatchTarget {
    let base = base_url(ProviderTag::Anthropic, cred);
    let url = format!("{}/v1/messages", base.trim_end_matches('/'));
    let mut headers = vec![
        ("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()),
        ("Content-Type".to_string(), "application/json".to_string()),
    ];
    if cred.api_key.starts_with("sk-ant-oat01-") {
        headers.push(("Authorization".to_string(), format!("Bearer {}", cred.api_key)));
        headers.push(("anthropic-beta".to_string(), "oauth-2025-04-20".to_string()));
    } else {
        headers.push(("x-api-key".to_string(), cred.api_key.clone()));
    }
    DispatchTarget { url, headers, wire_model: model.to_string() }
}

fn google_target(model: &str, cred: &ProviderCredential, stream: bool, verb: GoogleVerb) -> DispatchTarget {
    let base = base_url(ProviderTag::Google, cred);
    let verb_str = match verb {
        GoogleVerb::Generate => "generateContent",
        GoogleVerb::StreamGenerate => "streamGenerateContent",
    };
    let mut url = format!("{}/models/{model}:{verb_str}", base.trim_end_matches('/'));
    if stream {
        url.push_str("?alt=sse");
    }
    let headers = vec![
        ("x-goog-api-key".to_string(), cred.api_key.clone()),
        ("Content-Type".to_string(), "application/json".to_string()),
    ];
    DispatchTarget { url, headers, wire_model: model.to_string() }
}

/// Azure's endpoint is either packed into the stored key as `"endpoint|key"`
/// (already split out into `cred.azure_endpoint` by the caller) or supplied
/// per-request via the body's `azure_endpoint` field, which the caller
/// threads through as `cred.base_url_override`.
fn azure_target(model: &str, cred: &ProviderCredential) -> DispatchTarget {
    let endpoint = cred
        .azure_endpoint
        .clone()
        .or_else(|| cred.base_url_override.clone())
        .unwrap_or_default();
    let url = format!(
        "{}/openai/deployments/{model}/chat/completions?api-version={AZURE_API_VERSION}",
        endpoint.trim_end_matches('/')
    );
    let headers = vec![
        ("api-key".to_string(), cred.api_key.clone()),
        ("Content-Type".to_string(), "application/json".to_string()),
    ];
    DispatchTarget { url, headers, wire_model: model.to_string() }
}

/// No auth. `base_url_override` carries `ollama_base_url` when the caller
/// wants a non-default local/remote Ollama instance.
fn ollama_target(model: &str, cred: &ProviderCredential) -> DispatchTarget {
    let base = base_url(ProviderTag::Ollama, cred);
    let url = format!("{}/api/chat", base.trim_end_matches('/'));
    let headers = vec![("Content-Type".to_string(), "application/json".to_string())];
    DispatchTarget { url, headers, wire_model: model.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_uses_bearer_auth() {
        let cred = ProviderCredential::new("sk-test");
        let t = build_target(ProviderTag::OpenAi, "gpt-4o", &cred, false, GoogleVerb::Generate);
        assert!(t.url.ends_with("/chat/completions"));
        assert!(t.headers.iter().any(|(k, v)| k == "Authorization" && v == "Bearer sk-test"));
    }

    #[test]
    fn openrouter_adds_referer_and_title() {
        let cred = ProviderCredential::new("sk-test");
        let t = build_target(ProviderTag::OpenRouter, "meta-llama/llama-3", &cred, false, GoogleVerb::Generate);
        assert!(t.headers.iter().any(|(k, _)| k == "HTTP-Referer"));
        assert!(t.headers.iter().any(|(k, _)| k == "X-Title"));
    }

    #[test]
    fn anthropic_uses_x_api_key_by_default() {
        let cred = ProviderCredential::new("sk-ant-123");
        let t = build_target(ProviderTag::Anthropic, "claude-3-5-sonnet", &cred, false, GoogleVerb::Generate);
        assert!(t.url.ends_with("/v1/messages"));
        assert!(t.headers.iter().any(|(k, v)| k == "x-api-key" && v == "sk-ant-123"));
    }

    #[test]
    fn anthropic_oauth_token_switches_to_bearer() {
        let cred = ProviderCredential::new("sk-ant-oat01-xyz");
        let t = build_target(ProviderTag::Anthropic, "claude-3-5-sonnet", &cred, false, GoogleVerb::Generate);
        assert!(t.headers.iter().any(|(k, v)| k == "Authorization" && v.contains("Bearer")));
        assert!(t.headers.iter().any(|(k, _)| k == "anthropic-beta"));
    }

    #[test]
    fn google_appends_alt_sse_when_streaming() {
        let cred = ProviderCredential::new("key");
        let t = build_target(ProviderTag::Google, "gemini-1.5-pro", &cred, true, GoogleVerb::StreamGenerate);
        assert!(t.url.contains("streamGenerateContent"));
        assert!(t.url.ends_with("?alt=sse"));
    }

    #[test]
    fn azure_builds_deployment_url_with_api_version() {
        let cred = ProviderCredential::parse_azure("https://my.openai.azure.com|sk-123");
        let t = build_target(ProviderTag::Azure, "gpt-4o", &cred, false, GoogleVerb::Generate);
        assert!(t.url.starts_with("https://my.openai.azure.com/openai/deployments/gpt-4o/chat/completions"));
        assert!(t.url.contains("api-version="));
    }

    #[test]
    fn xai_remaps_legacy_alias_in_url_and_wire_model() {
        let cred = ProviderCredential::new("key");
        let t = build_target(ProviderTag::Xai, "grok-2-1212", &cred, false, GoogleVerb::Generate);
        assert_eq!(t.wire_model, "grok-3-beta");
    }

    #[test]
    fn raw_target_appends_suffix_to_base_url() {
        let cred = ProviderCredential::new("sk-test");
        let t = build_raw_target(ProviderTag::OpenAi, "/embeddings", &cred);
        assert_eq!(t.url, "https://api.openai.com/v1/embeddings");
        assert!(t.headers.iter().any(|(k, v)| k == "Authorization" && v == "Bearer sk-test"));
    }
}
