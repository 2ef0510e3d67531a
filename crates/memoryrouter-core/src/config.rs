//! Deployment configuration.
//!
//! Loaded from a TOML file (defaulted per-section with `#[serde(default)]`)
//! then overlaid with `MEMORYROUTER_*` environment variables — the same
//! file-then-env-override layering aigent's `LlmConfig.ollama_base_url` uses.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub server: ServerConfig,
    pub embedder: EmbedderConfig,
    pub kronos: KronosConfig,
    pub billing: BillingConfig,
    pub db: DbConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            embedder: EmbedderConfig::default(),
            kronos: KronosConfig::default(),
            billing: BillingConfig::default(),
            db: DbConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8088,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    /// Fixed per-deployment embedding dimension.
    pub dims: usize,
    /// Base URL of the embedding endpoint. Overridden by `MEMORYROUTER_EMBEDDER_ENDPOINT`.
    pub endpoint: String,
    pub model: String,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            dims: 1024,
            endpoint: "http://localhost:11434/api/embeddings".to_string(),
            model: "nomic-embed-text".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct KronosConfig {
    pub hot_window_hours: i64,
    pub working_window_days: i64,
    pub longterm_window_days: i64,
}

impl Default for KronosConfig {
    fn default() -> Self {
        Self {
            hot_window_hours: 4,
            working_window_days: 3,
            longterm_window_days: 90,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    /// Price in hundredths-of-a-cent per token (0.20 USD / 1M tokens).
    pub price_per_token_hundredths_cent: f64,
    pub free_tier_tokens: u64,
    pub default_auto_reup_cents: i64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            price_per_token_hundredths_cent: 0.002,
            free_tier_tokens: 50_000_000,
            default_auto_reup_cents: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub path: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: "memoryrouter.db".to_string(),
        }
    }
}

impl RouterConfig {
    /// Load from an optional TOML file, then apply `MEMORYROUTER_*` env overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)?;
                toml::from_str(&raw)?
            }
            _ => RouterConfig::default(),
        };

        if let Ok(v) = std::env::var("MEMORYROUTER_BIND_ADDRESS") {
            cfg.server.bind_address = v;
        }
        if let Ok(v) = std::env::var("MEMORYROUTER_PORT") {
            if let Ok(p) = v.parse() {
                cfg.server.port = p;
            }
        }
        if let Ok(v) = std::env::var("MEMORYROUTER_EMBEDDER_ENDPOINT") {
            cfg.embedder.endpoint = v;
        }
        if let Ok(v) = std::env::var("MEMORYROUTER_DB_PATH") {
            cfg.db.path = v;
        }

        Ok(cfg)
    }
}
