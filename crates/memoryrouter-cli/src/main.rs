//! MemoryRouter admin CLI (spec §0 "an admin CLI ... calls straight into the
//! core library, never re-derives business logic"). Every subcommand opens
//! the same SQLite file a running `memoryrouter` server points at and calls
//! the same `memoryrouter-core` methods the HTTP admin routes do.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use memoryrouter_core::embedder::{Embedder, HttpEmbedder};
use memoryrouter_core::orchestrator::Engine;
use memoryrouter_core::providers::ProviderCredential;
use memoryrouter_core::types::{ProviderTag, Scope};
use memoryrouter_core::{RouterConfig, Store, VaultRegistry};
use serde_json::json;

#[derive(Parser)]
#[command(name = "memoryrouter-cli", about = "Admin CLI for MemoryRouter", version)]
struct Cli {
    /// Path to the server's TOML config; defaults the same way the server does.
    #[arg(long, env = "MEMORYROUTER_CONFIG", default_value = "memoryrouter.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Memory-key CRUD.
    Key {
        #[command(subcommand)]
        cmd: KeyCommand,
    },
    /// Provider-key CRUD for a user's own upstream credentials.
    ProviderKey {
        #[command(subcommand)]
        cmd: ProviderKeyCommand,
    },
    /// Vault inspection and maintenance.
    Vault {
        #[command(subcommand)]
        cmd: VaultCommand,
    },
}

#[derive(Subcommand)]
enum KeyCommand {
    /// Mint a fresh memory key for a user.
    Create { #[arg(long)] user_id: String },
    /// List memory keys, optionally filtered to one user.
    List { #[arg(long)] user_id: Option<String> },
    /// Suspend a memory key.
    Deactivate { #[arg(long)] memory_key: String },
    /// Reinstate a suspended memory key.
    Activate { #[arg(long)] memory_key: String },
}

#[derive(Subcommand)]
enum ProviderKeyCommand {
    /// Store or replace a user's key for one provider.
    Set {
        #[arg(long)] user_id: String,
        #[arg(long)] provider: String,
        #[arg(long)] api_key: String,
        #[arg(long)] azure_endpoint: Option<String>,
    },
    /// Remove a user's key for one provider.
    Delete { #[arg(long)] user_id: String, #[arg(long)] provider: String },
    /// List a user's configured providers (previews only, never raw keys).
    List { #[arg(long)] user_id: String },
}

#[derive(Subcommand)]
enum VaultCommand {
    /// Print vector count / token count / time range for one vault.
    Stats {
        #[arg(long)] memory_key: String,
        #[arg(long, default_value = "core")] scope: String,
    },
    /// Drop a memory key's vaults and their chunk-mirror rows.
    Clear { #[arg(long)] memory_key: String },
    /// Re-embed every mirrored chunk under the configured embedder, across
    /// every vault on disk or (with `--memory-key`) just one.
    Reembed { #[arg(long)] memory_key: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let cfg = RouterConfig::load(Some(&cli.config)).context("loading config")?;
    let store = Store::open(&cfg.db.path).context("opening store")?;

    match cli.command {
        Command::Key { cmd } => run_key(&store, cmd),
        Command::ProviderKey { cmd } => run_provider_key(&store, cmd),
        Command::Vault { cmd } => run_vault(cfg, store, cmd).await,
    }
}

fn run_key(store: &Store, cmd: KeyCommand) -> Result<()> {
    match cmd {
        KeyCommand::Create { user_id } => {
            let key = store.create_memory_key(&user_id)?;
            println!("{}", json!({ "memory_key": key, "user_id": user_id }));
        }
        KeyCommand::List { user_id } => {
            let rows = store.list_memory_keys(user_id.as_deref())?;
            for (memory_key, user_id, active) in rows {
                println!("{}", json!({ "memory_key": memory_key, "user_id": user_id, "active": active }));
            }
        }
        KeyCommand::Deactivate { memory_key } => {
            store.set_memory_key_active(&memory_key, false)?;
            println!("{}", json!({ "memory_key": memory_key, "active": false }));
        }
        KeyCommand::Activate { memory_key } => {
            store.set_memory_key_active(&memory_key, true)?;
            println!("{}", json!({ "memory_key": memory_key, "active": true }));
        }
    }
    Ok(())
}

fn run_provider_key(store: &Store, cmd: ProviderKeyCommand) -> Result<()> {
    match cmd {
        ProviderKeyCommand::Set { user_id, provider, api_key, azure_endpoint } => {
            let tag = ProviderTag::from_tag(&provider).with_context(|| format!("unknown provider {provider}"))?;
            let mut cred = ProviderCredential::new(api_key);
            cred.azure_endpoint = azure_endpoint;
            store.upsert_provider_key(&user_id, tag, &cred)?;
            println!("{}", json!({ "user_id": user_id, "provider": provider, "stored": true }));
        }
        ProviderKeyCommand::Delete { user_id, provider } => {
            let tag = ProviderTag::from_tag(&provider).with_context(|| format!("unknown provider {provider}"))?;
            store.delete_provider_key(&user_id, tag)?;
            println!("{}", json!({ "user_id": user_id, "provider": provider, "deleted": true }));
        }
        ProviderKeyCommand::List { user_id } => {
            let previews = store.provider_key_previews(&user_id)?;
            for (tag, preview) in previews {
                println!("{}", json!({ "provider": tag.as_str(), "preview": preview }));
            }
        }
    }
    Ok(())
}

async fn run_vault(cfg: RouterConfig, store: Store, cmd: VaultCommand) -> Result<()> {
    let vaults = VaultRegistry::new(cfg.embedder.dims);

    match cmd {
        VaultCommand::Stats { memory_key, scope } => {
            let scope = Scope::from_key(&scope);
            let vault = vaults.get_or_create(&memory_key, &scope);
            vault.restore(store.load_vault_chunks(&memory_key, &scope.as_key())?);
            let stats = vault.stats();
            println!(
                "{}",
                json!({
                    "memory_key": memory_key,
                    "scope": scope.as_key(),
                    "vector_count": stats.vector_count,
                    "dims": stats.dims,
                    "oldest_ts_ms": stats.oldest_ts_ms,
                    "newest_ts_ms": stats.newest_ts_ms,
                    "total_tokens": stats.total_tokens,
                })
            );
        }
        VaultCommand::Clear { memory_key } => {
            for (_, scope_key) in store.distinct_vault_scopes(Some(&memory_key))? {
                store.clear_vault_chunks(&memory_key, &scope_key)?;
            }
            println!("{}", json!({ "memory_key": memory_key, "cleared": true }));
        }
        VaultCommand::Reembed { memory_key } => {
            for (mk, scope_key) in store.distinct_vault_scopes(memory_key.as_deref())? {
                let scope = Scope::from_key(&scope_key);
                let vault = vaults.get_or_create(&mk, &scope);
                vault.restore(store.load_vault_chunks(&mk, &scope_key)?);
            }

            let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(cfg.embedder.endpoint.clone(), cfg.embedder.model.clone(), cfg.embedder.dims));
            let engine = Engine::new(cfg, store, vaults, embedder);
            let report = engine.reembed_all().await?;
            println!(
                "{}",
                json!({
                    "reembedded": report.reembedded,
                    "dimension_mismatches": report.dimension_mismatches,
                    "failed": report.failed,
                })
            );
        }
    }
    Ok(())
}
