//! C7 — Balance checkpoint (spec §4.7). A charge-first prepaid ledger:
//! free tier tokens are consumed before any balance deduction, auto-reup
//! fires when the post-deduction balance drops under its trigger, and every
//! movement is appended to `transactions` for audit (teacher's
//! `trade_history` ledger in `engine/sessions/trades.rs`, generalised from
//! trade rows to balance movements).

use super::Store;
use crate::config::BillingConfig;
use crate::error::{PaymentRequiredKind, RouterError, RouterResult};
use rusqlite::params;

/// External collaborator: actually moves money. MemoryRouter only ever
/// calls `charge` off-session against a stored payment method; it never
/// retries a failed charge itself (spec §1 "external collaborators").
pub trait PaymentProcessor: Send + Sync {
    /// Charge `amount_cents` against `payment_method_ref`. Returns an opaque
    /// processor transaction id on success.
    fn charge(&self, payment_method_ref: &str, amount_cents: i64) -> RouterResult<String>;
}

/// Processor used when no payment method is on file, or in tests — every
/// charge fails closed rather than silently succeeding.
pub struct NoPaymentProcessor;

impl PaymentProcessor for NoPaymentProcessor {
    fn charge(&self, _payment_method_ref: &str, _amount_cents: i64) -> RouterResult<String> {
        Err(RouterError::PaymentRequired {
            kind: PaymentRequiredKind::NoPaymentMethod,
            balance_cents: 0,
            free_tokens_remaining: 0,
        })
    }
}

struct BillingRow {
    credit_balance_cents: i64,
    free_tier_tokens_used: u64,
    monthly_spend_cents: i64,
    monthly_cap_cents: Option<i64>,
    auto_reup_enabled: bool,
    auto_reup_amount_cents: i64,
    auto_reup_trigger_cents: i64,
    payment_method_ref: Option<String>,
}

pub fn estimate_cost_cents(cfg: &BillingConfig, tokens: u64) -> f64 {
    tokens as f64 * cfg.price_per_token_hundredths_cent / 100.0
}

impl Store {
    fn read_billing_row(conn: &rusqlite::Connection, user_id: &str) -> rusqlite::Result<BillingRow> {
        conn.query_row(
            "SELECT credit_balance_cents, free_tier_tokens_used, monthly_spend_cents, monthly_cap_cents,
                    auto_reup_enabled, auto_reup_amount_cents, auto_reup_trigger_cents, payment_method_ref
             FROM billing_accounts WHERE user_id = ?1",
            params![user_id],
            |r| {
                Ok(BillingRow {
                    credit_balance_cents: r.get(0)?,
                    free_tier_tokens_used: r.get::<_, i64>(1)? as u64,
                    monthly_spend_cents: r.get(2)?,
                    monthly_cap_cents: r.get(3)?,
                    auto_reup_enabled: r.get::<_, i64>(4)? != 0,
                    auto_reup_amount_cents: r.get(5)?,
                    auto_reup_trigger_cents: r.get(6)?,
                    payment_method_ref: r.get(7)?,
                })
            },
        )
    }

    /// Convenience wrapper over [`Store::ensure_balance_with_processor`] that
    /// fails closed with [`NoPaymentProcessor`] — auto-reup can never
    /// actually succeed through this path. Kept for tests and callers that
    /// don't have a live processor to hand.
    pub fn ensure_balance(&self, cfg: &BillingConfig, user_id: &str, projected_tokens: u64) -> RouterResult<()> {
        self.ensure_balance_with_processor(cfg, user_id, projected_tokens, &NoPaymentProcessor)
    }

    /// Pre-request gate (spec §4.7 `ensureBalance`). Projects the cost of
    /// `projected_tokens` against free-tier headroom then cash balance; an
    /// insufficient balance triggers auto-reup through `processor` before
    /// failing. DB errors fail open — a degraded ledger must never itself
    /// block every request.
    pub fn ensure_balance_with_processor(&self, cfg: &BillingConfig, user_id: &str, projected_tokens: u64, processor: &dyn PaymentProcessor) -> RouterResult<()> {
        let row = {
            let conn = self.conn.lock();
            match Self::read_billing_row(&conn, user_id) {
                Ok(r) => r,
                Err(e) => {
                    log::warn!("ensure_balance: fail-open after store error for {user_id}: {e}");
                    return Ok(());
                }
            }
        };

        let free_remaining = cfg.free_tier_tokens.saturating_sub(row.free_tier_tokens_used);
        if projected_tokens <= free_remaining {
            return Ok(());
        }

        let billable_tokens = projected_tokens - free_remaining;
        let projected_cents = estimate_cost_cents(cfg, billable_tokens);

        if let Some(cap) = row.monthly_cap_cents {
            if row.monthly_spend_cents as f64 + projected_cents > cap as f64 {
                return Err(RouterError::PaymentRequired {
                    kind: PaymentRequiredKind::CapReached,
                    balance_cents: row.credit_balance_cents,
                    free_tokens_remaining: free_remaining,
                });
            }
        }

        if row.credit_balance_cents as f64 >= projected_cents {
            return Ok(());
        }

        if row.auto_reup_enabled {
            if self.reup_with_processor(user_id, processor).is_ok() {
                let conn = self.conn.lock();
                if let Ok(refreshed) = Self::read_billing_row(&conn, user_id) {
                    if refreshed.credit_balance_cents as f64 >= projected_cents {
                        return Ok(());
                    }
                }
            }
        }

        let kind = if row.payment_method_ref.is_none() {
            PaymentRequiredKind::NoPaymentMethod
        } else {
            PaymentRequiredKind::PaymentFailed
        };
        Err(RouterError::PaymentRequired {
            kind,
            balance_cents: row.credit_balance_cents,
            free_tokens_remaining: free_remaining,
        })
    }

    /// Post-request settlement (spec §4.7 `recordUsageAndDeduct`). Consumes
    /// free-tier tokens first, deducts the remainder from the cash balance,
    /// never lets the balance go negative, and appends a ledger row.
    pub fn record_usage_and_deduct(&self, cfg: &BillingConfig, user_id: &str, total_tokens: u64) -> RouterResult<()> {
        let conn = self.conn.lock();
        let row = match Self::read_billing_row(&conn, user_id) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("record_usage_and_deduct: fail-open after store error for {user_id}: {e}");
                return Ok(());
            }
        };

        let free_remaining = cfg.free_tier_tokens.saturating_sub(row.free_tier_tokens_used);
        let free_consumed = total_tokens.min(free_remaining);
        let billable_tokens = total_tokens - free_consumed;
        let cost_cents = estimate_cost_cents(cfg, billable_tokens).round() as i64;
        let new_balance = (row.credit_balance_cents - cost_cents).max(0);

        conn.execute(
            "UPDATE billing_accounts
             SET free_tier_tokens_used = free_tier_tokens_used + ?1,
                 credit_balance_cents = ?2,
                 monthly_spend_cents = monthly_spend_cents + ?3
             WHERE user_id = ?4",
            params![free_consumed as i64, new_balance, cost_cents, user_id],
        )?;

        if cost_cents > 0 {
            conn.execute(
                "INSERT INTO transactions (id, user_id, kind, amount_cents, balance_after_cents)
                 VALUES (?1, ?2, 'usage', ?3, ?4)",
                params![uuid::Uuid::new_v4().to_string(), user_id, -cost_cents, new_balance],
            )?;
        }
        Ok(())
    }

    /// Charges `auto_reup_amount_cents` through `processor` when the balance
    /// has dropped at or below `auto_reup_trigger_cents` (spec §4.7
    /// `checkAndReupIfNeeded`). A failed charge is recorded but not retried
    /// here — the next request's `ensure_balance` call will surface it.
    pub fn reup_with_processor(&self, user_id: &str, processor: &dyn PaymentProcessor) -> RouterResult<()> {
        let conn = self.conn.lock();
        let row = Self::read_billing_row(&conn, user_id)?;

        if !row.auto_reup_enabled || row.credit_balance_cents > row.auto_reup_trigger_cents {
            return Ok(());
        }
        let Some(payment_method_ref) = row.payment_method_ref.clone() else {
            return Err(RouterError::PaymentRequired {
                kind: PaymentRequiredKind::NoPaymentMethod,
                balance_cents: row.credit_balance_cents,
                free_tokens_remaining: 0,
            });
        };

        let amount = row.auto_reup_amount_cents;
        match processor.charge(&payment_method_ref, amount) {
            Ok(_processor_ref) => {
                let new_balance = row.credit_balance_cents + amount;
                conn.execute(
                    "UPDATE billing_accounts SET credit_balance_cents = ?1 WHERE user_id = ?2",
                    params![new_balance, user_id],
                )?;
                conn.execute(
                    "INSERT INTO transactions (id, user_id, kind, amount_cents, balance_after_cents)
                     VALUES (?1, ?2, 'reup', ?3, ?4)",
                    params![uuid::Uuid::new_v4().to_string(), user_id, amount, new_balance],
                )?;
                Ok(())
            }
            Err(e) => {
                conn.execute(
                    "INSERT INTO transactions (id, user_id, kind, amount_cents, balance_after_cents)
                     VALUES (?1, ?2, 'reup_failed', 0, ?3)",
                    params![uuid::Uuid::new_v4().to_string(), user_id, row.credit_balance_cents],
                )?;
                Err(e)
            }
        }
    }

    /// Convenience wrapper used from `ensure_balance` that fails closed with
    /// [`NoPaymentProcessor`] — a live deployment wires a real processor in
    /// through [`Store::reup_with_processor`] directly.
    pub fn check_and_reup_if_needed(&self, user_id: &str) -> RouterResult<()> {
        self.reup_with_processor(user_id, &NoPaymentProcessor)
    }

    pub fn set_payment_method(&self, user_id: &str, payment_method_ref: &str) -> RouterResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE billing_accounts SET payment_method_ref = ?1 WHERE user_id = ?2",
            params![payment_method_ref, user_id],
        )?;
        Ok(())
    }

    pub fn set_auto_reup(&self, user_id: &str, enabled: bool, amount_cents: i64, trigger_cents: i64) -> RouterResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE billing_accounts
             SET auto_reup_enabled = ?1, auto_reup_amount_cents = ?2, auto_reup_trigger_cents = ?3
             WHERE user_id = ?4",
            params![enabled as i64, amount_cents, trigger_cents, user_id],
        )?;
        Ok(())
    }

    pub fn credit_balance_cents(&self, user_id: &str) -> RouterResult<i64> {
        let conn = self.conn.lock();
        Ok(Self::read_billing_row(&conn, user_id)?.credit_balance_cents)
    }

    /// Gate for `/memory/upload` (spec §6 "memory-key + payment method"):
    /// bulk import is blocked for accounts that have never attached a
    /// payment method, closing off free-tier tokens as an unlimited bulk
    /// storage dump.
    pub fn has_payment_method(&self, user_id: &str) -> RouterResult<bool> {
        let conn = self.conn.lock();
        Ok(Self::read_billing_row(&conn, user_id)?.payment_method_ref.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysSucceeds;
    impl PaymentProcessor for AlwaysSucceeds {
        fn charge(&self, _payment_method_ref: &str, _amount_cents: i64) -> RouterResult<String> {
            Ok("txn_1".to_string())
        }
    }

    fn setup() -> (Store, BillingConfig) {
        let store = Store::open_in_memory().unwrap();
        store.create_memory_key("user1").unwrap();
        (store, BillingConfig::default())
    }

    #[test]
    fn free_tier_covers_small_requests() {
        let (store, cfg) = setup();
        store.ensure_balance(&cfg, "user1", 1_000).unwrap();
    }

    #[test]
    fn deduction_consumes_free_tier_before_balance() {
        let (store, cfg) = setup();
        store.record_usage_and_deduct(&cfg, "user1", 10_000).unwrap();
        assert_eq!(store.credit_balance_cents("user1").unwrap(), 0);
    }

    #[test]
    fn balance_never_goes_negative() {
        let (store, cfg) = setup();
        store.record_usage_and_deduct(&cfg, "user1", cfg.free_tier_tokens + 10_000_000).unwrap();
        assert_eq!(store.credit_balance_cents("user1").unwrap(), 0);
    }

    #[test]
    fn exhausted_free_tier_without_payment_method_is_payment_required() {
        let (store, cfg) = setup();
        let err = store.ensure_balance(&cfg, "user1", cfg.free_tier_tokens + 10_000_000).unwrap_err();
        assert!(matches!(err, RouterError::PaymentRequired { kind: PaymentRequiredKind::NoPaymentMethod, .. }));
    }

    #[test]
    fn reup_with_processor_tops_up_balance_and_logs_transaction() {
        let (store, _cfg) = setup();
        store.set_payment_method("user1", "pm_123").unwrap();
        store.set_auto_reup("user1", true, 2_000, 500).unwrap();
        store.reup_with_processor("user1", &AlwaysSucceeds).unwrap();
        assert_eq!(store.credit_balance_cents("user1").unwrap(), 2_000);
    }

    #[test]
    fn reup_skipped_when_balance_above_trigger() {
        let (store, _cfg) = setup();
        store.set_payment_method("user1", "pm_123").unwrap();
        store.set_auto_reup("user1", true, 2_000, -1).unwrap();
        store.reup_with_processor("user1", &AlwaysSucceeds).unwrap();
        assert_eq!(store.credit_balance_cents("user1").unwrap(), 0);
    }
}
