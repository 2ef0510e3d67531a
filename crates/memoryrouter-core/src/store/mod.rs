//! Relational store for everything the request path needs to persist:
//! auth records, provider keys, billing, and usage. One guarded SQLite
//! connection, in the teacher's `SessionStore { conn: Mutex<Connection> }`
//! shape (`engine/sessions/mod.rs`), generalised to the router's own tables.

pub mod auth;
pub mod billing;
pub mod chunks;
mod schema;
pub mod usage;

use parking_lot::Mutex;
use rusqlite::Connection;

pub struct Store {
    pub(crate) conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &str) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        schema::run_migrations(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::run_migrations(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_runs_migrations_idempotently() {
        let store = Store::open_in_memory().unwrap();
        // Re-running migrations against the same connection must not error.
        super::schema::run_migrations(&store.conn.lock()).unwrap();
    }
}
