//! Temporal-intent detection and recency scoring, adapted from the teacher's
//! `engine/engram/temporal_search.rs` (`TemporalQuery` dispatch and
//! `recency_score` exponential decay).

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use std::sync::LazyLock;

/// What the query text is asking about, time-wise (spec §4.3 "temporal
/// phrase detection").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalIntent {
    /// No explicit temporal language detected; use the default allocation.
    None,
    /// "just now", "a minute ago", "earlier today" — bias hard toward HOT.
    Recent,
    /// "yesterday", "last week", "a few days ago" — bias toward WORKING.
    Recent2,
    /// "a while back", "a long time ago", "months ago" — bias toward LONG_TERM.
    Distant,
}

const RECENT_PHRASES: &[&str] = &[
    "just now", "a moment ago", "a minute ago", "right now", "just said", "earlier today",
];
const RECENT2_PHRASES: &[&str] = &[
    "yesterday", "last week", "a few days ago", "this week", "few days back", "last night",
];
const DISTANT_PHRASES: &[&str] = &[
    "a while back", "a long time ago", "months ago", "last year", "long ago", "way back",
];

/// Scan `query` (lowercased) for the phrase sets above, in most-specific-first
/// order. First match wins.
pub fn detect_intent(query: &str) -> TemporalIntent {
    let lower = query.to_ascii_lowercase();
    if RECENT_PHRASES.iter().any(|p| lower.contains(p)) {
        return TemporalIntent::Recent;
    }
    if DISTANT_PHRASES.iter().any(|p| lower.contains(p)) {
        return TemporalIntent::Distant;
    }
    if RECENT2_PHRASES.iter().any(|p| lower.contains(p)) {
        return TemporalIntent::Recent2;
    }
    TemporalIntent::None
}

/// The full phrase set spec §4.3 requires `hasTemporalIntent` to recognise,
/// case-insensitively — broader than the coarse Recent/Recent2/Distant split
/// above, which only feeds slot *allocation*.
const TEMPORAL_PHRASES: &[&str] = &[
    "last week", "yesterday", "earlier", "when did i", "when did we", "remember when",
    "previously", "before", "last month", "this morning", "tonight", "recently", "recent",
];

static DAYS_AGO_RE: LazyLock<regex::Regex> = LazyLock::new(|| regex::Regex::new(r"(\d+)\s+days?\s+ago").unwrap());
static MONTH_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\bin\s+(january|february|march|april|may|june|july|august|september|october|november|december)\b").unwrap()
});

/// `true` if `query` carries any of the spec's literal temporal phrases,
/// case-insensitively (spec §4.3, §8 scenario 1).
pub fn has_temporal_intent(query: &str) -> bool {
    let lower = query.to_ascii_lowercase();
    TEMPORAL_PHRASES.iter().any(|p| lower.contains(p)) || DAYS_AGO_RE.is_match(&lower) || MONTH_RE.is_match(&lower)
}

/// Explicit `[start, end)` millisecond bounds for a detected temporal phrase,
/// relative to `now_ms` (spec §8 scenario 1: `"last week"` at
/// `2026-01-25T12:00:00Z` yields `startDate.day=18`, `endDate.day=25`).
/// Returns `None` when the query has no phrase this function knows how to
/// turn into an explicit range (the caller falls back to window-based
/// allocation via [`detect_intent`] in that case).
pub fn temporal_range(query: &str, now_ms: i64) -> Option<(i64, i64)> {
    let now = Utc.timestamp_millis_opt(now_ms).single()?;
    let lower = query.to_ascii_lowercase();

    if lower.contains("last week") {
        return Some(((now - Duration::days(7)).timestamp_millis(), now.timestamp_millis()));
    }
    if lower.contains("yesterday") {
        return Some(day_bounds(now - Duration::days(1)));
    }
    if let Some(caps) = DAYS_AGO_RE.captures(&lower) {
        let n: i64 = caps[1].parse().ok()?;
        return Some(day_bounds(now - Duration::days(n)));
    }
    if lower.contains("last month") {
        let first_of_this_month = now.with_day(1)?;
        let last_month_end = first_of_this_month - Duration::milliseconds(1);
        let last_month_start = last_month_end.with_day(1)?.date_naive().and_hms_opt(0, 0, 0)?.and_utc();
        return Some((last_month_start.timestamp_millis(), first_of_this_month.timestamp_millis()));
    }
    if lower.contains("this morning") || lower.contains("tonight") {
        return Some(day_bounds(now));
    }
    None
}

/// `[start-of-day, end-of-day)` bounds in millis for the UTC calendar day
/// containing `t`.
fn day_bounds(t: DateTime<Utc>) -> (i64, i64) {
    let start = t.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc();
    let end = start + Duration::days(1);
    (start.timestamp_millis(), end.timestamp_millis())
}

/// Exponential recency decay: `0.5 ^ (age_hours / half_life_hours)`.
/// `age_ms` is `now - created_at`; always non-negative in practice but
/// clamped defensively.
pub fn recency_score(age_ms: i64, half_life_hours: f64) -> f64 {
    let age_hours = (age_ms.max(0) as f64) / 3_600_000.0;
    if half_life_hours <= 0.0 {
        return if age_hours == 0.0 { 1.0 } else { 0.0 };
    }
    0.5f64.powf(age_hours / half_life_hours)
}

/// Blend a similarity score with recency: `similarity * (1 - w) + recency * w`.
/// `w` is the recency weight in `[0, 1]`.
pub fn blend_with_recency(similarity: f64, age_ms: i64, half_life_hours: f64, weight: f64) -> f64 {
    let weight = weight.clamp(0.0, 1.0);
    similarity * (1.0 - weight) + recency_score(age_ms, half_life_hours) * weight
}
