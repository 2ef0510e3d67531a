//! Memory-key and provider-key persistence (spec §3 "Memory key", "Provider
//! key set"). Grounded on the teacher's `trades.rs` insert/query style:
//! thin methods on `Store`, `rusqlite::params!` bind lists, `uuid` ids.

use super::Store;
use crate::error::{RouterError, RouterResult};
use crate::providers::{ProviderCredential, ProviderKeySet};
use crate::types::ProviderTag;
use rusqlite::{params, OptionalExtension};

pub struct UserContext {
    pub memory_key: String,
    pub user_id: String,
    pub active: bool,
}

impl Store {
    /// Mint a fresh memory key for `user_id`, creating the user row if it
    /// doesn't already exist. Prefix `mk_` per spec §3.
    pub fn create_memory_key(&self, user_id: &str) -> RouterResult<String> {
        let conn = self.conn.lock();
        conn.execute("INSERT OR IGNORE INTO users (id) VALUES (?1)", params![user_id])?;
        let key = format!("mk_{}", uuid::Uuid::new_v4().simple());
        conn.execute(
            "INSERT INTO memory_keys (memory_key, user_id, active) VALUES (?1, ?2, 1)",
            params![key, user_id],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO billing_accounts (user_id) VALUES (?1)",
            params![user_id],
        )?;
        Ok(key)
    }

    /// Resolve a bearer token to its owning user and active flag. `None` if
    /// the key doesn't exist at all (spec §7 `AuthInvalid`); a row with
    /// `active = 0` is returned so the caller can distinguish `AuthInactive`.
    pub fn lookup_memory_key(&self, memory_key: &str) -> RouterResult<Option<UserContext>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT memory_key, user_id, active FROM memory_keys WHERE memory_key = ?1",
                params![memory_key],
                |r| {
                    Ok(UserContext {
                        memory_key: r.get(0)?,
                        user_id: r.get(1)?,
                        active: r.get::<_, i64>(2)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn set_memory_key_active(&self, memory_key: &str, active: bool) -> RouterResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE memory_keys SET active = ?1 WHERE memory_key = ?2",
            params![active as i64, memory_key],
        )?;
        if changed == 0 {
            return Err(RouterError::Validation(format!("unknown memory key {memory_key}")));
        }
        Ok(())
    }

    pub fn upsert_provider_key(&self, user_id: &str, tag: ProviderTag, cred: &ProviderCredential) -> RouterResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO provider_keys (user_id, provider_tag, api_key, azure_endpoint)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, provider_tag) DO UPDATE SET api_key = excluded.api_key, azure_endpoint = excluded.azure_endpoint",
            params![user_id, tag.as_str(), cred.api_key, cred.azure_endpoint],
        )?;
        Ok(())
    }

    pub fn provider_keys_for_user(&self, user_id: &str) -> RouterResult<ProviderKeySet> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT provider_tag, api_key, azure_endpoint FROM provider_keys WHERE user_id = ?1")?;
        let rows = stmt.query_map(params![user_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, Option<String>>(2)?))
        })?;
        let mut set = ProviderKeySet::new();
        for row in rows {
            let (tag_str, api_key, azure_endpoint) = row?;
            if let Some(tag) = ProviderTag::from_tag(&tag_str) {
                let mut cred = ProviderCredential::new(api_key);
                cred.azure_endpoint = azure_endpoint;
                set.insert(tag, cred);
            }
        }
        Ok(set)
    }

    pub fn delete_provider_key(&self, user_id: &str, tag: ProviderTag) -> RouterResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM provider_keys WHERE user_id = ?1 AND provider_tag = ?2",
            params![user_id, tag.as_str()],
        )?;
        Ok(())
    }

    /// Admin `/admin/list` (spec §6): every memory key, optionally filtered
    /// to one `user_id`.
    pub fn list_memory_keys(&self, user_id: Option<&str>) -> RouterResult<Vec<(String, String, bool)>> {
        let conn = self.conn.lock();
        let mut stmt = match user_id {
            Some(_) => conn.prepare("SELECT memory_key, user_id, active FROM memory_keys WHERE user_id = ?1")?,
            None => conn.prepare("SELECT memory_key, user_id, active FROM memory_keys")?,
        };
        let map_row = |r: &rusqlite::Row| -> rusqlite::Result<(String, String, bool)> {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, i64>(2)? != 0))
        };
        let rows = match user_id {
            Some(uid) => stmt.query_map(params![uid], map_row)?.collect::<Result<Vec<_>, _>>()?,
            None => stmt.query_map([], map_row)?.collect::<Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    }

    /// Previews (`first4…last4`) only — never the raw key (spec §3).
    pub fn provider_key_previews(&self, user_id: &str) -> RouterResult<Vec<(ProviderTag, String)>> {
        let set = self.provider_keys_for_user(user_id)?;
        let mut out = Vec::new();
        for tag in [
            ProviderTag::OpenAi,
            ProviderTag::Anthropic,
            ProviderTag::OpenRouter,
            ProviderTag::Google,
            ProviderTag::Xai,
            ProviderTag::Cerebras,
            ProviderTag::DeepSeek,
            ProviderTag::Azure,
            ProviderTag::Ollama,
            ProviderTag::Mistral,
        ] {
            if let Some(cred) = set.get(tag) {
                out.push((tag, cred.preview()));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_lookup_memory_key_round_trips() {
        let store = Store::open_in_memory().unwrap();
        let key = store.create_memory_key("user1").unwrap();
        assert!(key.starts_with("mk_"));
        let ctx = store.lookup_memory_key(&key).unwrap().unwrap();
        assert_eq!(ctx.user_id, "user1");
        assert!(ctx.active);
    }

    #[test]
    fn unknown_memory_key_is_none() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.lookup_memory_key("mk_nope").unwrap().is_none());
    }

    #[test]
    fn deactivating_a_key_is_reflected_on_lookup() {
        let store = Store::open_in_memory().unwrap();
        let key = store.create_memory_key("user1").unwrap();
        store.set_memory_key_active(&key, false).unwrap();
        let ctx = store.lookup_memory_key(&key).unwrap().unwrap();
        assert!(!ctx.active);
    }

    #[test]
    fn provider_key_upsert_is_idempotent_and_previewable() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_provider_key("user1", ProviderTag::OpenAi, &ProviderCredential::new("sk-abcdefgh1234")).unwrap();
        store.upsert_provider_key("user1", ProviderTag::OpenAi, &ProviderCredential::new("sk-newkey12345678")).unwrap();
        let set = store.provider_keys_for_user("user1").unwrap();
        assert_eq!(set.get(ProviderTag::OpenAi).unwrap().api_key, "sk-newkey12345678");
        let previews = store.provider_key_previews("user1").unwrap();
        assert_eq!(previews.len(), 1);
        assert!(!previews[0].1.contains("newkey1234"));
    }
}
