//! Core wire-level types shared across the transformer, truncator, and
//! provider dispatcher. Independent of any specific provider's JSON shape.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderTag {
    OpenAi,
    Anthropic,
    OpenRouter,
    Google,
    Xai,
    Cerebras,
    DeepSeek,
    Azure,
    Ollama,
    Mistral,
}

impl ProviderTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderTag::OpenAi => "openai",
            ProviderTag::Anthropic => "anthropic",
            ProviderTag::OpenRouter => "openrouter",
            ProviderTag::Google => "google",
            ProviderTag::Xai => "xai",
            ProviderTag::Cerebras => "cerebras",
            ProviderTag::DeepSeek => "deepseek",
            ProviderTag::Azure => "azure",
            ProviderTag::Ollama => "ollama",
            ProviderTag::Mistral => "mistral",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag.to_ascii_lowercase().as_str() {
            "openai" => ProviderTag::OpenAi,
            "anthropic" => ProviderTag::Anthropic,
            "openrouter" => ProviderTag::OpenRouter,
            "google" => ProviderTag::Google,
            "xai" => ProviderTag::Xai,
            "cerebras" => ProviderTag::Cerebras,
            "deepseek" => ProviderTag::DeepSeek,
            "azure" => ProviderTag::Azure,
            "ollama" => ProviderTag::Ollama,
            "mistral" => ProviderTag::Mistral,
            _ => return None,
        })
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderTag::OpenAi => "https://api.openai.com/v1",
            ProviderTag::Anthropic => "https://api.anthropic.com",
            ProviderTag::OpenRouter => "https://openrouter.ai/api/v1",
            ProviderTag::Google => "https://generativelanguage.googleapis.com/v1beta",
            ProviderTag::Xai => "https://api.x.ai/v1",
            ProviderTag::Cerebras => "https://api.cerebras.ai/v1",
            ProviderTag::DeepSeek => "https://api.deepseek.com/v1",
            ProviderTag::Azure => "",
            ProviderTag::Ollama => "http://localhost:11434",
            ProviderTag::Mistral => "https://api.mistral.ai/v1",
        }
    }

    /// OpenAI-compatible wire format (everything dispatched through
    /// `/chat/completions` with Bearer auth). Anthropic and Google have
    /// their own native formats.
    pub fn is_openai_compatible(&self) -> bool {
        !matches!(self, ProviderTag::Anthropic | ProviderTag::Google)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    pub delta_text: Option<String>,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

impl Default for TokenUsage {
    fn default() -> Self {
        Self {
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
        }
    }
}

/// Author role of a stored chunk or conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn from_str_loose(s: &str) -> Self {
        match s {
            "assistant" | "model" => Role::Assistant,
            "system" => Role::System,
            _ => Role::User,
        }
    }
}

/// Recognised inbound body shapes (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyShape {
    OpenAi,
    Anthropic,
    Google,
}

/// Memory-handling mode resolved from headers/query/body (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryMode {
    #[default]
    Default,
    Read,
    Write,
    Off,
}

impl MemoryMode {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "read" => MemoryMode::Read,
            "write" => MemoryMode::Write,
            "off" | "none" => MemoryMode::Off,
            _ => MemoryMode::Default,
        }
    }

    pub fn retrieves(&self) -> bool {
        matches!(self, MemoryMode::Default | MemoryMode::Read)
    }

    pub fn stores(&self) -> bool {
        matches!(self, MemoryMode::Default | MemoryMode::Write)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryMode::Default => "default",
            MemoryMode::Read => "read",
            MemoryMode::Write => "write",
            MemoryMode::Off => "off",
        }
    }
}

/// Recency-bias setting controlling KRONOS's window allocation (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecencyBias {
    Low,
    #[default]
    Medium,
    High,
}

impl RecencyBias {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "low" => RecencyBias::Low,
            "high" => RecencyBias::High,
            _ => RecencyBias::Medium,
        }
    }
}

/// Vault scope: account-wide `core`, or a session-local vault.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Core,
    Session(String),
}

impl Scope {
    pub fn from_session_id(session_id: Option<&str>) -> Self {
        match session_id {
            Some(id) if !id.is_empty() => Scope::Session(id.to_string()),
            _ => Scope::Core,
        }
    }

    pub fn as_key(&self) -> String {
        match self {
            Scope::Core => "core".to_string(),
            Scope::Session(id) => format!("session:{id}"),
        }
    }

    /// Inverse of [`Scope::as_key`]. Used to rebuild a `Scope` from a
    /// chunk-mirror row's `scope` column (e.g. the CLI reembedding from cold
    /// storage, with no live `VaultRegistry` to ask).
    pub fn from_key(key: &str) -> Self {
        match key.strip_prefix("session:") {
            Some(id) => Scope::Session(id.to_string()),
            None => Scope::Core,
        }
    }
}

#[cfg(test)]
mod scope_tests {
    use super::Scope;

    #[test]
    fn from_key_round_trips_through_as_key() {
        assert_eq!(Scope::from_key("core").as_key(), "core");
        assert_eq!(Scope::from_key("session:abc").as_key(), "session:abc");
    }
}
