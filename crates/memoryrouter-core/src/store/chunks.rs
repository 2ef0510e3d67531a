//! Chunk-mirror persistence (spec §6 "relational rows for ... a chunk-mirror
//! used for queryable retrieval fallback"). The vault itself is the
//! authoritative in-memory store for a running process; this table exists so
//! a vault can be rehydrated after a restart and so operators can inspect
//! stored memory with plain SQL without going through the HTTP surface.

use super::Store;
use crate::error::RouterResult;
use crate::types::Role;
use crate::vault::chunk::Chunk;
use rusqlite::params;

impl Store {
    /// Appends one chunk to the mirror. Called right after a successful
    /// in-memory `Vault::store`, so failures here are logged by the caller
    /// and never roll back the in-memory write — the mirror is a best-effort
    /// fallback, not the source of truth while the process is alive.
    pub fn mirror_chunk(&self, memory_key: &str, scope_key: &str, chunk: &Chunk) -> RouterResult<()> {
        let conn = self.conn.lock();
        let embedding = serde_json::to_string(&chunk.embedding)?;
        conn.execute(
            "INSERT INTO chunks (chunk_id, memory_key, scope, role, content, content_hash, created_at_ms, model, request_id, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(memory_key, scope, chunk_id) DO UPDATE SET content = excluded.content",
            params![
                chunk.id as i64,
                memory_key,
                scope_key,
                chunk.role.as_str(),
                chunk.content,
                chunk.content_hash,
                chunk.created_at_ms,
                chunk.model,
                chunk.request_id,
                embedding,
            ],
        )?;
        Ok(())
    }

    /// Loads every mirrored chunk for `(memory_key, scope_key)`, oldest
    /// first, to rehydrate a freshly-created vault.
    pub fn load_vault_chunks(&self, memory_key: &str, scope_key: &str) -> RouterResult<Vec<Chunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT chunk_id, role, content, content_hash, created_at_ms, model, request_id, embedding
             FROM chunks WHERE memory_key = ?1 AND scope = ?2 ORDER BY chunk_id ASC",
        )?;
        let rows = stmt.query_map(params![memory_key, scope_key], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, i64>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, String>(6)?,
                r.get::<_, String>(7)?,
            ))
        })?;

        let mut chunks = Vec::new();
        for row in rows {
            let (id, role, content, content_hash, created_at_ms, model, request_id, embedding_json) = row?;
            let embedding: Vec<f32> = serde_json::from_str(&embedding_json).unwrap_or_default();
            chunks.push(Chunk {
                id: id as u64,
                role: Role::from_str_loose(&role),
                content,
                content_hash,
                created_at_ms,
                model,
                request_id,
                embedding,
            });
        }
        Ok(chunks)
    }

    /// Drops every mirrored chunk for `(memory_key, scope_key)` (spec §4.2
    /// `reset`).
    pub fn clear_vault_chunks(&self, memory_key: &str, scope_key: &str) -> RouterResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM chunks WHERE memory_key = ?1 AND scope = ?2", params![memory_key, scope_key])?;
        Ok(())
    }

    /// Every `(memory_key, scope_key)` pair with at least one mirrored chunk,
    /// optionally narrowed to one `memory_key`. The CLI uses this to rebuild
    /// a `VaultRegistry` from cold storage — there's no live process to ask,
    /// so the chunk-mirror is the only source of which vaults exist.
    pub fn distinct_vault_scopes(&self, memory_key: Option<&str>) -> RouterResult<Vec<(String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = match memory_key {
            Some(_) => conn.prepare("SELECT DISTINCT memory_key, scope FROM chunks WHERE memory_key = ?1")?,
            None => conn.prepare("SELECT DISTINCT memory_key, scope FROM chunks")?,
        };
        let map_row = |r: &rusqlite::Row| -> rusqlite::Result<(String, String)> { Ok((r.get(0)?, r.get(1)?)) };
        let rows = match memory_key {
            Some(mk) => stmt.query_map(params![mk], map_row)?.collect::<Result<Vec<_>, _>>()?,
            None => stmt.query_map([], map_row)?.collect::<Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn chunk(id: u64, content: &str) -> Chunk {
        Chunk {
            id,
            role: Role::User,
            content: content.to_string(),
            content_hash: crate::vault::chunk::content_hash(content),
            created_at_ms: 1000,
            model: "m".into(),
            request_id: "r".into(),
            embedding: vec![1.0, 2.0, 3.0],
        }
    }

    #[test]
    fn mirror_round_trips_through_load() {
        let store = Store::open_in_memory().unwrap();
        store.mirror_chunk("mk_1", "core", &chunk(1, "hello")).unwrap();
        store.mirror_chunk("mk_1", "core", &chunk(2, "world")).unwrap();
        let loaded = store.load_vault_chunks("mk_1", "core").unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].content, "hello");
        assert_eq!(loaded[1].embedding, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn load_is_scoped_per_vault() {
        let store = Store::open_in_memory().unwrap();
        store.mirror_chunk("mk_1", "core", &chunk(1, "a")).unwrap();
        store.mirror_chunk("mk_1", "session:s1", &chunk(1, "b")).unwrap();
        assert_eq!(store.load_vault_chunks("mk_1", "core").unwrap().len(), 1);
        assert_eq!(store.load_vault_chunks("mk_1", "session:s1").unwrap().len(), 1);
    }

    #[test]
    fn clear_removes_only_that_vault() {
        let store = Store::open_in_memory().unwrap();
        store.mirror_chunk("mk_1", "core", &chunk(1, "a")).unwrap();
        store.mirror_chunk("mk_1", "session:s1", &chunk(1, "b")).unwrap();
        store.clear_vault_chunks("mk_1", "core").unwrap();
        assert!(store.load_vault_chunks("mk_1", "core").unwrap().is_empty());
        assert_eq!(store.load_vault_chunks("mk_1", "session:s1").unwrap().len(), 1);
    }

    #[test]
    fn distinct_vault_scopes_covers_every_mirrored_pair() {
        let store = Store::open_in_memory().unwrap();
        store.mirror_chunk("mk_1", "core", &chunk(1, "a")).unwrap();
        store.mirror_chunk("mk_1", "session:s1", &chunk(1, "b")).unwrap();
        store.mirror_chunk("mk_2", "core", &chunk(1, "c")).unwrap();
        assert_eq!(store.distinct_vault_scopes(None).unwrap().len(), 3);
        assert_eq!(store.distinct_vault_scopes(Some("mk_1")).unwrap().len(), 2);
    }
}
