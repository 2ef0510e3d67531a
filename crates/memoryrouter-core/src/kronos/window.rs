//! Time-window classification and slot allocation (spec §4.3).
//!
//! Four windows relative to "now": HOT, WORKING, LONG_TERM, EXPIRED. Recall
//! draws from the first three in proportions set by the caller's recency
//! bias; EXPIRED chunks are never retrieved (they still count for stats).

use crate::types::RecencyBias;

const MS_PER_HOUR: i64 = 3_600_000;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWindow {
    Hot,
    Working,
    LongTerm,
    Expired,
}

/// Window boundary configuration, in hours/days (mirrors `KronosConfig`).
#[derive(Debug, Clone, Copy)]
pub struct WindowConfig {
    pub hot_window_hours: i64,
    pub working_window_days: i64,
    pub longterm_window_days: i64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            hot_window_hours: 4,
            working_window_days: 3,
            longterm_window_days: 90,
        }
    }
}

/// `[min_ms, max_ms)` bounds, measured in milliseconds of age (now - created_at).
pub struct WindowBounds {
    pub hot: (i64, i64),
    pub working: (i64, i64),
    pub long_term: (i64, i64),
}

impl WindowConfig {
    pub fn bounds(&self) -> WindowBounds {
        let hot_ms = self.hot_window_hours * MS_PER_HOUR;
        let working_ms = self.working_window_days * MS_PER_DAY;
        let longterm_ms = self.longterm_window_days * MS_PER_DAY;
        WindowBounds {
            hot: (0, hot_ms),
            working: (hot_ms, working_ms),
            long_term: (working_ms, longterm_ms),
        }
    }

    pub fn classify(&self, age_ms: i64) -> TimeWindow {
        let bounds = self.bounds();
        if age_ms <= bounds.hot.1 {
            TimeWindow::Hot
        } else if age_ms <= bounds.working.1 {
            TimeWindow::Working
        } else if age_ms <= bounds.long_term.1 {
            TimeWindow::LongTerm
        } else {
            TimeWindow::Expired
        }
    }
}

/// Per-window result-slot counts for a retrieval of `total` chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAllocation {
    pub hot: usize,
    pub working: usize,
    pub long_term: usize,
}

/// Split `total` slots across HOT/WORKING/LONG_TERM using the bias's weights
/// (low/medium: 1:1:1, high: 2:1:0.5). Each window gets the floor of its
/// share; any leftover slots all go to HOT, the most-recent window.
pub fn allocate_slots(total: usize, bias: RecencyBias) -> SlotAllocation {
    let weights: [f64; 3] = match bias {
        RecencyBias::Low | RecencyBias::Medium => [1.0, 1.0, 1.0],
        RecencyBias::High => [2.0, 1.0, 0.5],
    };
    let sum: f64 = weights.iter().sum();
    let raw: Vec<f64> = weights.iter().map(|w| total as f64 * w / sum).collect();
    let mut floors: Vec<usize> = raw.iter().map(|r| r.floor() as usize).collect();
    let remainder = total.saturating_sub(floors.iter().sum());
    floors[0] += remainder;

    SlotAllocation {
        hot: floors[0],
        working: floors[1],
        long_term: floors[2],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_hot_working_longterm_expired() {
        let cfg = WindowConfig::default();
        assert_eq!(cfg.classify(MS_PER_HOUR), TimeWindow::Hot);
        assert_eq!(cfg.classify(2 * MS_PER_DAY), TimeWindow::Working);
        assert_eq!(cfg.classify(10 * MS_PER_DAY), TimeWindow::LongTerm);
        assert_eq!(cfg.classify(200 * MS_PER_DAY), TimeWindow::Expired);
    }

    #[test]
    fn classify_is_inclusive_on_the_young_edge_of_each_window() {
        let cfg = WindowConfig::default();
        let bounds = cfg.bounds();
        assert_eq!(cfg.classify(bounds.hot.1), TimeWindow::Hot);
        assert_eq!(cfg.classify(bounds.working.1), TimeWindow::Working);
        assert_eq!(cfg.classify(bounds.long_term.1), TimeWindow::LongTerm);
        assert_eq!(cfg.classify(bounds.long_term.1 + 1), TimeWindow::Expired);
    }

    #[test]
    fn allocate_slots_even_split_sums_to_total() {
        let alloc = allocate_slots(10, RecencyBias::Medium);
        assert_eq!(alloc.hot + alloc.working + alloc.long_term, 10);
    }

    #[test]
    fn allocate_slots_medium_bias_remainder_goes_to_hot() {
        let alloc = allocate_slots(5, RecencyBias::Medium);
        assert_eq!(alloc, SlotAllocation { hot: 3, working: 1, long_term: 1 });
    }

    #[test]
    fn allocate_slots_high_bias_favours_hot() {
        let alloc = allocate_slots(7, RecencyBias::High);
        assert_eq!(alloc.hot + alloc.working + alloc.long_term, 7);
        assert!(alloc.hot >= alloc.working);
        assert!(alloc.working >= alloc.long_term);
    }

    #[test]
    fn allocate_slots_high_bias_remainder_goes_to_hot() {
        let alloc = allocate_slots(10, RecencyBias::High);
        assert_eq!(alloc, SlotAllocation { hot: 7, working: 2, long_term: 1 });
    }

    #[test]
    fn allocate_slots_handles_zero_total() {
        let alloc = allocate_slots(0, RecencyBias::Low);
        assert_eq!(alloc.hot + alloc.working + alloc.long_term, 0);
    }
}
