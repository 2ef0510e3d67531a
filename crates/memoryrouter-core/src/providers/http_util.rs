//! Retry/backoff and circuit-breaker utilities shared by every provider
//! adapter. Ported near-verbatim from the teacher's `engine/http.rs`.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const MAX_RETRIES: u32 = 3;
pub const INITIAL_RETRY_DELAY_MS: u64 = 1_000;
pub const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Status codes worth retrying: rate limits and transient upstream failures.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504 | 529)
}

/// Delay before the next retry attempt, honouring a server-supplied
/// `Retry-After` value when present, else exponential backoff with jitter.
pub fn retry_delay(attempt: u32, retry_after_secs: Option<u64>) -> Duration {
    if let Some(secs) = retry_after_secs {
        return Duration::from_millis(apply_jitter(secs * 1000));
    }
    let exp = INITIAL_RETRY_DELAY_MS.saturating_mul(1u64 << attempt.min(5));
    Duration::from_millis(apply_jitter(exp.min(MAX_RETRY_DELAY_MS)))
}

/// +/- 25% jitter around `base_ms`, using a nanosecond timestamp as the
/// randomness source (no extra dependency for something this low-stakes).
fn apply_jitter(base_ms: u64) -> u64 {
    let jitter_frac = rand_jitter();
    let delta = (base_ms as f64 * 0.25 * jitter_frac) as i64;
    (base_ms as i64 + delta).max(0) as u64
}

/// Pseudo-random value in `[-1.0, 1.0]` derived from the current time's
/// nanosecond component.
fn rand_jitter() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    ((nanos % 2000) as f64 / 1000.0) - 1.0
}

/// Parse an HTTP `Retry-After` header value: either a delay in seconds or
/// (ignored here) an HTTP-date.
pub fn parse_retry_after(header_value: &str) -> Option<u64> {
    header_value.trim().parse::<u64>().ok()
}

/// Per-provider circuit breaker: trips after `threshold` consecutive
/// failures, refuses calls for `cooldown_secs`, then allows a trial request.
pub struct CircuitBreaker {
    consecutive_failures: AtomicU32,
    tripped_at: AtomicU64,
    threshold: u32,
    cooldown_secs: u64,
}

impl CircuitBreaker {
    pub const fn new(threshold: u32, cooldown_secs: u64) -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            tripped_at: AtomicU64::new(0),
            threshold,
            cooldown_secs,
        }
    }

    /// `Err(message)` if the breaker is open and the cooldown hasn't elapsed.
    pub fn check(&self) -> Result<(), String> {
        let tripped_at = self.tripped_at.load(Ordering::Relaxed);
        if tripped_at == 0 {
            return Ok(());
        }
        let now = now_secs();
        if now.saturating_sub(tripped_at) >= self.cooldown_secs {
            return Ok(());
        }
        Err(format!(
            "circuit open, retry in {}s",
            self.cooldown_secs.saturating_sub(now.saturating_sub(tripped_at))
        ))
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.tripped_at.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.threshold {
            self.tripped_at.store(now_secs(), Ordering::Relaxed);
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(200));
    }

    #[test]
    fn retry_after_overrides_backoff() {
        let d = retry_delay(0, Some(2));
        assert!(d.as_millis() >= 1_500 && d.as_millis() <= 2_500);
    }

    #[test]
    fn backoff_grows_with_attempt_and_caps() {
        let d0 = retry_delay(0, None);
        let d4 = retry_delay(4, None);
        assert!(d4 >= d0);
        assert!(d4.as_millis() as u64 <= MAX_RETRY_DELAY_MS + MAX_RETRY_DELAY_MS / 4 + 1);
    }

    #[test]
    fn parse_retry_after_parses_seconds() {
        assert_eq!(parse_retry_after("5"), Some(5));
        assert_eq!(parse_retry_after("not-a-number"), None);
    }

    #[test]
    fn breaker_trips_after_threshold_and_recovers_on_success() {
        let cb = CircuitBreaker::new(2, 60);
        assert!(cb.check().is_ok());
        cb.record_failure();
        assert!(cb.check().is_ok());
        cb.record_failure();
        assert!(cb.check().is_err());
        cb.record_success();
        assert!(cb.check().is_ok());
    }
}
