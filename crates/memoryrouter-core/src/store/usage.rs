//! C8 — Usage recorder (spec §4.8). Append-only `usage_events`, rolled up
//! into `usage_daily` on a schedule so dashboards don't have to scan raw
//! events past their 90-day retention window. Grounded on the teacher's
//! `daily_trade_summary` aggregate-query style in `engine/sessions/trades.rs`.

use super::Store;
use crate::error::RouterResult;
use rusqlite::params;

pub struct UsageEvent<'a> {
    pub memory_key: &'a str,
    pub session_id: Option<&'a str>,
    pub model: &'a str,
    pub provider: &'a str,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub memory_tokens_retrieved: u64,
    pub memory_tokens_injected: u64,
    pub mr_processing_ms: u64,
    pub provider_response_ms: u64,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub memory_tokens_retrieved: u64,
    pub memory_tokens_injected: u64,
    pub request_count: u64,
    pub avg_mr_processing_ms: f64,
}

const RAW_RETENTION_MS: i64 = 90 * 24 * 60 * 60 * 1000;
/// Events older than this are eligible for rollup into `usage_daily`
/// (spec §4.8: raw events are rolled up once they're no longer "today").
const ROLLUP_AGE_MS: i64 = 24 * 60 * 60 * 1000;

impl Store {
    pub fn record_usage_event(&self, ev: &UsageEvent<'_>) -> RouterResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO usage_events
                (id, memory_key, session_id, model, provider, input_tokens, output_tokens,
                 memory_tokens_retrieved, memory_tokens_injected, mr_processing_ms, provider_response_ms, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                uuid::Uuid::new_v4().to_string(),
                ev.memory_key,
                ev.session_id,
                ev.model,
                ev.provider,
                ev.input_tokens as i64,
                ev.output_tokens as i64,
                ev.memory_tokens_retrieved as i64,
                ev.memory_tokens_injected as i64,
                ev.mr_processing_ms as i64,
                ev.provider_response_ms as i64,
                ev.created_at_ms,
            ],
        )?;
        Ok(())
    }

    /// Aggregates every raw event older than [`ROLLUP_AGE_MS`] into
    /// `usage_daily` (idempotent via `ON CONFLICT DO UPDATE`), then deletes
    /// events past the 90-day raw retention window. `now_ms` is passed in —
    /// time never comes from inside the store.
    pub fn rollup_usage(&self, now_ms: i64) -> RouterResult<u64> {
        let conn = self.conn.lock();
        let cutoff = now_ms - ROLLUP_AGE_MS;

        let mut stmt = conn.prepare(
            "SELECT memory_key,
                    strftime('%Y-%m-%d', created_at_ms / 1000, 'unixepoch') AS day,
                    SUM(input_tokens), SUM(output_tokens),
                    SUM(memory_tokens_retrieved), SUM(memory_tokens_injected),
                    COUNT(*), AVG(mr_processing_ms)
             FROM usage_events
             WHERE created_at_ms < ?1
             GROUP BY memory_key, day",
        )?;
        let rows = stmt
            .query_map(params![cutoff], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, i64>(3)?,
                    r.get::<_, i64>(4)?,
                    r.get::<_, i64>(5)?,
                    r.get::<_, i64>(6)?,
                    r.get::<_, f64>(7)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        let mut rolled = 0u64;
        for (memory_key, day, input, output, retrieved, injected, count, avg_ms) in rows {
            conn.execute(
                "INSERT INTO usage_daily (date, memory_key, input_tokens, output_tokens, memory_tokens_retrieved, memory_tokens_injected, request_count, avg_mr_processing_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(date, memory_key) DO UPDATE SET
                    input_tokens = excluded.input_tokens,
                    output_tokens = excluded.output_tokens,
                    memory_tokens_retrieved = excluded.memory_tokens_retrieved,
                    memory_tokens_injected = excluded.memory_tokens_injected,
                    request_count = excluded.request_count,
                    avg_mr_processing_ms = excluded.avg_mr_processing_ms",
                params![day, memory_key, input, output, retrieved, injected, count, avg_ms],
            )?;
            rolled += count as u64;
        }

        conn.execute("DELETE FROM usage_events WHERE created_at_ms < ?1", params![cutoff])?;
        conn.execute("DELETE FROM usage_events WHERE created_at_ms < ?1", params![now_ms - RAW_RETENTION_MS])?;
        Ok(rolled)
    }

    /// Totals for one memory key over `[from_ms, to_ms)`, preferring the
    /// `usage_daily` rollup and falling back to raw `usage_events` for the
    /// still-unrolled tail (today's traffic).
    pub fn usage_totals(&self, memory_key: &str, from_ms: i64, to_ms: i64) -> RouterResult<UsageTotals> {
        let conn = self.conn.lock();
        let from_day = ms_to_day(from_ms);
        let to_day = ms_to_day(to_ms);

        let mut totals = conn.query_row(
            "SELECT COALESCE(SUM(input_tokens),0), COALESCE(SUM(output_tokens),0),
                    COALESCE(SUM(memory_tokens_retrieved),0), COALESCE(SUM(memory_tokens_injected),0),
                    COALESCE(SUM(request_count),0),
                    COALESCE(AVG(avg_mr_processing_ms),0.0)
             FROM usage_daily WHERE memory_key = ?1 AND date >= ?2 AND date < ?3",
            params![memory_key, from_day, to_day],
            |r| {
                Ok(UsageTotals {
                    input_tokens: r.get::<_, i64>(0)? as u64,
                    output_tokens: r.get::<_, i64>(1)? as u64,
                    memory_tokens_retrieved: r.get::<_, i64>(2)? as u64,
                    memory_tokens_injected: r.get::<_, i64>(3)? as u64,
                    request_count: r.get::<_, i64>(4)? as u64,
                    avg_mr_processing_ms: r.get(5)?,
                })
            },
        )?;

        let raw = conn.query_row(
            "SELECT COALESCE(SUM(input_tokens),0), COALESCE(SUM(output_tokens),0),
                    COALESCE(SUM(memory_tokens_retrieved),0), COALESCE(SUM(memory_tokens_injected),0),
                    COUNT(*), COALESCE(AVG(mr_processing_ms),0.0)
             FROM usage_events WHERE memory_key = ?1 AND created_at_ms >= ?2 AND created_at_ms < ?3",
            params![memory_key, from_ms, to_ms],
            |r| {
                Ok(UsageTotals {
                    input_tokens: r.get::<_, i64>(0)? as u64,
                    output_tokens: r.get::<_, i64>(1)? as u64,
                    memory_tokens_retrieved: r.get::<_, i64>(2)? as u64,
                    memory_tokens_injected: r.get::<_, i64>(3)? as u64,
                    request_count: r.get::<_, i64>(4)? as u64,
                    avg_mr_processing_ms: r.get(5)?,
                })
            },
        )?;

        totals.input_tokens += raw.input_tokens;
        totals.output_tokens += raw.output_tokens;
        totals.memory_tokens_retrieved += raw.memory_tokens_retrieved;
        totals.memory_tokens_injected += raw.memory_tokens_injected;
        totals.request_count += raw.request_count;
        if totals.request_count > 0 {
            let weighted = totals.avg_mr_processing_ms * (totals.request_count - raw.request_count) as f64
                + raw.avg_mr_processing_ms * raw.request_count as f64;
            totals.avg_mr_processing_ms = weighted / totals.request_count as f64;
        }
        Ok(totals)
    }

    /// Top-K memory keys by total tokens (input+output) in `usage_daily`
    /// over `[from_day, to_day)`, for admin/debug dashboards.
    pub fn top_usage_keys(&self, from_day: &str, to_day: &str, k: u32) -> RouterResult<Vec<(String, u64)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT memory_key, SUM(input_tokens + output_tokens) AS total
             FROM usage_daily WHERE date >= ?1 AND date < ?2
             GROUP BY memory_key ORDER BY total DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![from_day, to_day, k], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? as u64)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn ms_to_day(ms: i64) -> String {
    let dt = chrono::DateTime::from_timestamp_millis(ms).unwrap_or_default();
    dt.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(memory_key: &str, created_at_ms: i64, tokens: u64) -> UsageEvent<'_> {
        UsageEvent {
            memory_key,
            session_id: None,
            model: "gpt-4o-mini",
            provider: "openai",
            input_tokens: tokens,
            output_tokens: tokens,
            memory_tokens_retrieved: 10,
            memory_tokens_injected: 10,
            mr_processing_ms: 5,
            provider_response_ms: 200,
            created_at_ms,
        }
    }

    #[test]
    fn recorded_events_are_visible_via_raw_fallback() {
        let store = Store::open_in_memory().unwrap();
        store.record_usage_event(&event("mk_1", 1_000, 100)).unwrap();
        let totals = store.usage_totals("mk_1", 0, 2_000).unwrap();
        assert_eq!(totals.input_tokens, 100);
        assert_eq!(totals.request_count, 1);
    }

    #[test]
    fn rollup_moves_old_events_into_daily_and_removes_raw_rows() {
        let store = Store::open_in_memory().unwrap();
        let now_ms = 10 * 24 * 60 * 60 * 1000i64;
        store.record_usage_event(&event("mk_1", 0, 100)).unwrap();
        let rolled = store.rollup_usage(now_ms).unwrap();
        assert_eq!(rolled, 1);
        let totals = store.usage_totals("mk_1", 0, now_ms).unwrap();
        assert_eq!(totals.input_tokens, 100);
        assert_eq!(totals.request_count, 1);
    }

    #[test]
    fn rollup_is_idempotent_on_rerun() {
        let store = Store::open_in_memory().unwrap();
        let now_ms = 10 * 24 * 60 * 60 * 1000i64;
        store.record_usage_event(&event("mk_1", 0, 100)).unwrap();
        store.rollup_usage(now_ms).unwrap();
        store.rollup_usage(now_ms).unwrap();
        let totals = store.usage_totals("mk_1", 0, now_ms).unwrap();
        assert_eq!(totals.input_tokens, 100);
    }

    #[test]
    fn top_usage_keys_orders_by_total_tokens_desc() {
        let store = Store::open_in_memory().unwrap();
        let now_ms = 10 * 24 * 60 * 60 * 1000i64;
        store.record_usage_event(&event("mk_small", 0, 10)).unwrap();
        store.record_usage_event(&event("mk_big", 0, 1_000)).unwrap();
        store.rollup_usage(now_ms).unwrap();
        let top = store.top_usage_keys("1970-01-01", "1970-01-20", 10).unwrap();
        assert_eq!(top[0].0, "mk_big");
    }
}
