//! Per-request provider credentials (spec §3 "Provider key set").
//!
//! The opaque API key is never logged and never returned verbatim — callers
//! that need to show it back to a user must go through [`ProviderCredential::preview`].

use crate::types::ProviderTag;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ProviderCredential {
    pub api_key: String,
    /// Azure's endpoint is stored either packed into the key as
    /// `"endpoint|key"` or supplied per-request via `azure_endpoint` in the
    /// body; either is accepted (spec §4.6 azure row).
    pub azure_endpoint: Option<String>,
    /// Overrides the provider's default base URL (e.g. a self-hosted Ollama).
    pub base_url_override: Option<String>,
}

impl ProviderCredential {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self { api_key: api_key.into(), azure_endpoint: None, base_url_override: None }
    }

    /// Parse the `"endpoint|key"` packed form Azure keys are stored in.
    pub fn parse_azure(raw: &str) -> Self {
        match raw.split_once('|') {
            Some((endpoint, key)) => Self {
                api_key: key.to_string(),
                azure_endpoint: Some(endpoint.to_string()),
                base_url_override: None,
            },
            None => Self::new(raw),
        }
    }

    /// `first4…last4`, never the full key (spec §3 "never returned verbatim").
    pub fn preview(&self) -> String {
        let k = &self.api_key;
        if k.len() <= 8 {
            "****".to_string()
        } else {
            format!("{}…{}", &k[..4], &k[k.len() - 4..])
        }
    }
}

/// Mapping from provider tag to credential, scoped to one memory key
/// (spec §3 "Provider key set").
#[derive(Debug, Clone, Default)]
pub struct ProviderKeySet {
    keys: HashMap<ProviderTag, ProviderCredential>,
}

impl ProviderKeySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: ProviderTag, cred: ProviderCredential) {
        self.keys.insert(tag, cred);
    }

    pub fn get(&self, tag: ProviderTag) -> Option<&ProviderCredential> {
        self.keys.get(&tag)
    }
}
