//! Database schema and migrations for the router's relational store.
//! Called once at startup by `Store::open()`. Adding a column or table:
//! append an idempotent `CREATE TABLE IF NOT EXISTS` at the end of
//! `run_migrations` — never edit existing statements in place.

use rusqlite::Connection;

pub(crate) fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
    conn.execute_batch("PRAGMA foreign_keys=ON;").ok();

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS memory_keys (
            memory_key TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (user_id) REFERENCES users(id)
        );

        CREATE INDEX IF NOT EXISTS idx_memory_keys_user ON memory_keys(user_id);

        CREATE TABLE IF NOT EXISTS provider_keys (
            user_id TEXT NOT NULL,
            provider_tag TEXT NOT NULL,
            api_key TEXT NOT NULL,
            azure_endpoint TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (user_id, provider_tag)
        );

        CREATE TABLE IF NOT EXISTS billing_accounts (
            user_id TEXT PRIMARY KEY,
            credit_balance_cents INTEGER NOT NULL DEFAULT 0,
            free_tier_tokens_used INTEGER NOT NULL DEFAULT 0,
            monthly_spend_cents INTEGER NOT NULL DEFAULT 0,
            monthly_cap_cents INTEGER,
            auto_reup_enabled INTEGER NOT NULL DEFAULT 0,
            auto_reup_amount_cents INTEGER NOT NULL DEFAULT 2000,
            auto_reup_trigger_cents INTEGER NOT NULL DEFAULT 500,
            payment_method_ref TEXT
        );

        CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            balance_after_cents INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_transactions_user ON transactions(user_id, created_at);

        CREATE TABLE IF NOT EXISTS usage_events (
            id TEXT PRIMARY KEY,
            memory_key TEXT NOT NULL,
            session_id TEXT,
            model TEXT NOT NULL,
            provider TEXT NOT NULL,
            input_tokens INTEGER NOT NULL,
            output_tokens INTEGER NOT NULL,
            memory_tokens_retrieved INTEGER NOT NULL DEFAULT 0,
            memory_tokens_injected INTEGER NOT NULL DEFAULT 0,
            mr_processing_ms INTEGER NOT NULL DEFAULT 0,
            provider_response_ms INTEGER NOT NULL DEFAULT 0,
            created_at_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_usage_events_key_time ON usage_events(memory_key, created_at_ms);

        CREATE TABLE IF NOT EXISTS usage_daily (
            date TEXT NOT NULL,
            memory_key TEXT NOT NULL,
            input_tokens INTEGER NOT NULL DEFAULT 0,
            output_tokens INTEGER NOT NULL DEFAULT 0,
            memory_tokens_retrieved INTEGER NOT NULL DEFAULT 0,
            memory_tokens_injected INTEGER NOT NULL DEFAULT 0,
            request_count INTEGER NOT NULL DEFAULT 0,
            avg_mr_processing_ms REAL NOT NULL DEFAULT 0,
            PRIMARY KEY (date, memory_key)
        );

        CREATE TABLE IF NOT EXISTS chunks (
            chunk_id INTEGER NOT NULL,
            memory_key TEXT NOT NULL,
            scope TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            created_at_ms INTEGER NOT NULL,
            model TEXT NOT NULL,
            request_id TEXT NOT NULL,
            embedding TEXT NOT NULL,
            PRIMARY KEY (memory_key, scope, chunk_id)
        );

        CREATE INDEX IF NOT EXISTS idx_chunks_vault_time ON chunks(memory_key, scope, created_at_ms);
        ",
    )?;
    Ok(())
}
