//! Session-wide cost guard for vision calls.
//!
//! [`CostGuard`] is shared (via `Arc`) by every concurrent vision worker in a
//! session. Check-and-charge happens under one lock so two workers can never
//! both squeeze under the ceiling with the last unit. Once a charge is denied
//! the guard latches exhausted: every later call is denied too, even one that
//! would still fit.
//!
//! A charge is a reservation. When the reply arrives, [`CostGuard::settle`]
//! swaps the reservation for the real cost; a settled total at or past the
//! ceiling latches the guard too.

use crate::config::{BudgetUnit, CostBudget};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct GuardState {
    consumed: u64,
    charges: u64,
    denied: u64,
    exhausted: bool,
}

/// Point-in-time view of a [`CostGuard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub unit: BudgetUnit,
    pub ceiling: u64,
    pub consumed: u64,
    /// Successful charges (vision calls allowed).
    pub charges: u64,
    /// Denied charge attempts.
    pub denied: u64,
    pub exhausted: bool,
}

impl BudgetSnapshot {
    pub fn remaining(&self) -> u64 {
        self.ceiling.saturating_sub(self.consumed)
    }
}

/// Enforces a [`CostBudget`] across one session.
#[derive(Debug)]
pub struct CostGuard {
    budget: CostBudget,
    state: Mutex<GuardState>,
}

impl CostGuard {
    pub fn new(budget: CostBudget) -> Self {
        Self {
            budget,
            state: Mutex::new(GuardState::default()),
        }
    }

    pub fn budget(&self) -> CostBudget {
        self.budget
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GuardState> {
        // Plain counters: still consistent after a panic elsewhere.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Atomically charge `amount` units. Returns `false`, and latches the
    /// guard exhausted, when the charge would cross the ceiling or the guard
    /// is already exhausted.
    pub fn charge(&self, amount: u64) -> bool {
        let mut st = self.lock();
        if st.exhausted {
            st.denied += 1;
            return false;
        }
        match st.consumed.checked_add(amount) {
            Some(total) if total <= self.budget.ceiling => {
                st.consumed = total;
                st.charges += 1;
                debug!(
                    "Budget charge {} {}: {}/{} used",
                    amount, self.budget.unit, st.consumed, self.budget.ceiling
                );
                true
            }
            _ => {
                st.exhausted = true;
                st.denied += 1;
                warn!(
                    "Budget exhausted: {}/{} {} used, charge of {} denied",
                    st.consumed, self.budget.ceiling, self.budget.unit, amount
                );
                false
            }
        }
    }

    /// Charge the configured cost of one vision call.
    pub fn charge_call(&self) -> bool {
        self.charge(self.budget.cost_per_call)
    }

    /// Replace a `reserved` charge with the `actual` cost of the finished call.
    pub fn settle(&self, reserved: u64, actual: u64) {
        let mut st = self.lock();
        st.consumed = st.consumed.saturating_sub(reserved).saturating_add(actual);
        if actual != reserved {
            debug!(
                "Budget settle: reserved {} {}, actual {}, {}/{} used",
                reserved, self.budget.unit, actual, st.consumed, self.budget.ceiling
            );
        }
        if st.consumed >= self.budget.ceiling && !st.exhausted {
            st.exhausted = true;
            warn!(
                "Budget exhausted: {}/{} {} spent",
                st.consumed, self.budget.ceiling, self.budget.unit
            );
        }
    }

    /// Settle one call from its reported token usage.
    pub fn settle_call(&self, input_tokens: usize, output_tokens: usize) {
        self.settle(
            self.budget.cost_per_call,
            self.budget.actual_cost(input_tokens, output_tokens),
        );
    }

    /// Whether one more vision call would currently be permitted.
    ///
    /// Advisory only: concurrent workers may race past it, so the
    /// authoritative decision is always [`CostGuard::charge`].
    pub fn allowed(&self) -> bool {
        let st = self.lock();
        !st.exhausted
            && st
                .consumed
                .checked_add(self.budget.cost_per_call)
                .is_some_and(|t| t <= self.budget.ceiling)
    }

    pub fn is_exhausted(&self) -> bool {
        self.lock().exhausted
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        let st = self.lock();
        BudgetSnapshot {
            unit: self.budget.unit,
            ceiling: self.budget.ceiling,
            consumed: st.consumed,
            charges: st.charges,
            denied: st.denied,
            exhausted: st.exhausted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn charges_up_to_ceiling_then_denies() {
        let guard = CostGuard::new(CostBudget::calls(2));
        assert!(guard.allowed());
        assert!(guard.charge_call());
        assert!(guard.charge_call());
        assert!(!guard.allowed());
        assert!(!guard.charge_call());
        let snap = guard.snapshot();
        assert_eq!(snap.consumed, 2);
        assert_eq!(snap.charges, 2);
        assert_eq!(snap.denied, 1);
        assert!(snap.exhausted);
    }

    #[test]
    fn exhaustion_latches_even_for_small_charges() {
        let guard = CostGuard::new(CostBudget::tokens(10_000, 4_000));
        assert!(guard.charge_call());
        assert!(guard.charge_call());
        assert!(!guard.charge_call());
        // 2_000 tokens are left, but the session is over.
        assert!(!guard.charge(1));
        assert_eq!(guard.snapshot().remaining(), 2_000);
    }

    #[test]
    fn settling_real_usage_past_the_ceiling_latches() {
        let guard = CostGuard::new(CostBudget::tokens(3_000, 1_000));
        assert!(guard.charge_call());
        guard.settle_call(800, 9_000);
        let snap = guard.snapshot();
        assert_eq!(snap.consumed, 9_800);
        assert!(snap.exhausted);
        assert!(!guard.charge_call());
    }

    #[test]
    fn settling_below_the_reservation_frees_room() {
        let guard = CostGuard::new(CostBudget::tokens(2_500, 1_000));
        assert!(guard.charge_call());
        assert!(guard.charge_call());
        assert!(!guard.allowed());
        guard.settle_call(200, 100);
        assert_eq!(guard.snapshot().consumed, 1_300);
        assert!(guard.allowed());
        assert!(!guard.is_exhausted());
    }

    #[test]
    fn overflow_is_denied() {
        let guard = CostGuard::new(CostBudget::micro_usd(u64::MAX, 1));
        assert!(guard.charge(u64::MAX - 1));
        assert!(!guard.charge(u64::MAX));
    }

    #[test]
    fn zero_ceiling_denies_first_call() {
        let guard = CostGuard::new(CostBudget::calls(0));
        assert!(!guard.allowed());
        assert!(!guard.charge_call());
    }

    #[test]
    fn concurrent_charges_never_exceed_ceiling() {
        let guard = Arc::new(CostGuard::new(CostBudget::calls(25)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let g = Arc::clone(&guard);
                std::thread::spawn(move || (0..10).filter(|_| g.charge_call()).count())
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 25);
        let snap = guard.snapshot();
        assert_eq!(snap.consumed, 25);
        assert_eq!(snap.denied, 80 - 25);
    }
}
