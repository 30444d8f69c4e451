#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! Invocation budget types.
//!
//! A run may spend at most `limit` stage invocations. The count comes from the
//! append-only `invocations` ledger, so these types only carry the arithmetic.

use serde::{Deserialize, Serialize};

/// Default number of stage invocations allowed per run.
pub const DEFAULT_MAX_INVOCATIONS: u64 = 500;
/// Lower bound applied to configured limits.
pub const MIN_MAX_INVOCATIONS: u64 = 1;
/// Upper bound applied to configured limits.
pub const MAX_MAX_INVOCATIONS: u64 = 100_000;
/// Percentage of the limit at which the warning flag flips on.
pub const WARNING_THRESHOLD_PERCENT: u64 = 80;

/// Budget limit for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetLimit {
    max_invocations: u64,
}

impl BudgetLimit {
    /// Create a limit, clamped to `[MIN_MAX_INVOCATIONS, MAX_MAX_INVOCATIONS]`.
    #[must_use]
    pub fn new(max_invocations: u64) -> Self {
        Self {
            max_invocations: max_invocations.clamp(MIN_MAX_INVOCATIONS, MAX_MAX_INVOCATIONS),
        }
    }

    #[must_use]
    pub const fn max_invocations(&self) -> u64 {
        self.max_invocations
    }

    /// Evaluate a ledger count against this limit.
    #[must_use]
    pub const fn evaluate(&self, count: u64) -> BudgetCheck {
        BudgetCheck {
            count,
            limit: self.max_invocations,
            warning: count.saturating_mul(100)
                >= self.max_invocations.saturating_mul(WARNING_THRESHOLD_PERCENT),
        }
    }
}

impl Default for BudgetLimit {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_INVOCATIONS)
    }
}

/// Snapshot returned by the budget guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetCheck {
    /// Invocations recorded so far for the run.
    pub count: u64,
    /// Configured maximum.
    pub limit: u64,
    /// True from 80% of the limit onwards, including past the limit.
    pub warning: bool,
}

impl BudgetCheck {
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.count >= self.limit
    }

    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_limit_default() {
        assert_eq!(BudgetLimit::default().max_invocations(), 500);
    }

    #[test]
    fn test_budget_limit_is_clamped() {
        assert_eq!(BudgetLimit::new(0).max_invocations(), MIN_MAX_INVOCATIONS);
        assert_eq!(
            BudgetLimit::new(u64::MAX).max_invocations(),
            MAX_MAX_INVOCATIONS
        );
    }

    #[test]
    fn test_warning_flips_at_eighty_percent_and_stays_on() {
        let limit = BudgetLimit::new(10);
        assert!(!limit.evaluate(7).warning);
        assert!(limit.evaluate(8).warning);
        assert!(limit.evaluate(10).warning);
        assert!(limit.evaluate(25).warning);
    }

    #[test]
    fn test_exhaustion_starts_at_limit() {
        let limit = BudgetLimit::new(3);
        assert!(!limit.evaluate(2).is_exhausted());
        assert!(limit.evaluate(3).is_exhausted());
        assert_eq!(limit.evaluate(1).remaining(), 2);
        assert_eq!(limit.evaluate(9).remaining(), 0);
    }
}
