//! Process-wide map of `(memory_key, scope) -> Vault`, one entry per logical
//! vault actor (spec §9 "Vaults as actors"). Grounded on the teacher's
//! `SessionStore { conn: Mutex<Connection> }` pattern, generalised from a
//! single guarded connection to a guarded map of guarded vaults.

use super::Vault;
use crate::types::Scope;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub struct VaultRegistry {
    dims: usize,
    vaults: Mutex<HashMap<(String, String), Arc<Vault>>>,
}

impl VaultRegistry {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            vaults: Mutex::new(HashMap::new()),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Returns the vault for `(memory_key, scope)`, creating an empty one on
    /// first access. Cheap: the map lock is held only long enough to clone
    /// the `Arc`, so concurrent requests against different vaults never
    /// contend with each other.
    pub fn get_or_create(&self, memory_key: &str, scope: &Scope) -> Arc<Vault> {
        self.get_or_create_fresh(memory_key, scope).0
    }

    /// Same as [`VaultRegistry::get_or_create`], but also reports whether
    /// this call minted the vault. Callers that mirror chunks to the
    /// relational store use the flag to rehydrate a freshly-created vault
    /// from its chunk-mirror exactly once (spec §6 "periodic persistence...
    /// chunk-mirror used for queryable retrieval fallback").
    pub fn get_or_create_fresh(&self, memory_key: &str, scope: &Scope) -> (Arc<Vault>, bool) {
        let key = (memory_key.to_string(), scope.as_key());
        let mut vaults = self.vaults.lock();
        let mut created = false;
        let vault = vaults
            .entry(key)
            .or_insert_with(|| {
                created = true;
                Arc::new(Vault::new(self.dims))
            })
            .clone();
        (vault, created)
    }

    /// Drops the core vault and every session vault for `memory_key`
    /// (spec §4.2 `reset`, account-scope variant).
    pub fn reset_all_for_key(&self, memory_key: &str) {
        let vaults = self.vaults.lock();
        for ((key, _), vault) in vaults.iter() {
            if key == memory_key {
                vault.reset();
            }
        }
    }

    /// Number of distinct vaults currently tracked (core + sessions, across
    /// all memory keys). Used by admin/debug surfaces.
    pub fn vault_count(&self) -> usize {
        self.vaults.lock().len()
    }

    /// Scope keys (`"core"`, `"session:..."`) currently tracked in-process
    /// for `memory_key`. Used by admin `reset` to also clear the
    /// chunk-mirror for every scope it touches in-memory.
    pub fn scope_keys_for(&self, memory_key: &str) -> Vec<String> {
        self.vaults
            .lock()
            .keys()
            .filter(|(key, _)| key == memory_key)
            .map(|(_, scope_key)| scope_key.clone())
            .collect()
    }

    /// Every `(memory_key, scope_key, vault)` currently tracked in-process.
    /// Used by admin `reembed` (spec §6 "Iterates all vaults for reembed").
    pub fn all_vaults(&self) -> Vec<(String, String, Arc<Vault>)> {
        self.vaults
            .lock()
            .iter()
            .map(|((key, scope_key), vault)| (key.clone(), scope_key.clone(), vault.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_idempotent_per_key() {
        let reg = VaultRegistry::new(4);
        let a = reg.get_or_create("mk1", &Scope::Core);
        let b = reg.get_or_create("mk1", &Scope::Core);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn different_scopes_get_different_vaults() {
        let reg = VaultRegistry::new(4);
        let core = reg.get_or_create("mk1", &Scope::Core);
        let session = reg.get_or_create("mk1", &Scope::Session("s1".into()));
        assert!(!Arc::ptr_eq(&core, &session));
        assert_eq!(reg.vault_count(), 2);
    }

    #[test]
    fn reset_all_for_key_clears_every_scope() {
        let reg = VaultRegistry::new(4);
        let core = reg.get_or_create("mk1", &Scope::Core);
        core.store(vec![1.0, 0.0, 0.0, 0.0], "x".into(), crate::types::Role::User, "m".into(), "r".into(), 0)
            .unwrap();
        reg.reset_all_for_key("mk1");
        assert_eq!(core.stats().vector_count, 0);
    }

    #[test]
    fn all_vaults_covers_every_memory_key_and_scope() {
        let reg = VaultRegistry::new(4);
        reg.get_or_create("mk1", &Scope::Core);
        reg.get_or_create("mk2", &Scope::Session("s1".into()));
        let all = reg.all_vaults();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|(k, s, _)| k == "mk1" && s == "core"));
    }
}
