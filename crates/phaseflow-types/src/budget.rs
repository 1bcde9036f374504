//! Budget ledger carried inside `RunState`.

use serde::{Deserialize, Serialize};

/// Run-scoped consumption totals and the thresholds they are judged against.
///
/// Only the budget tracker in phaseflow-core mutates a ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetLedger {
    pub consumed_units: u64,
    /// Number of cost-bearing dispatches recorded.
    pub calls: u64,
    /// Hard ceiling. `None` disables budget enforcement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ceiling: Option<u64>,
    pub warning_pct: u8,
    pub approval_pct: u8,
    /// Set once the non-blocking warning notice has been emitted.
    #[serde(default)]
    pub warning_emitted: bool,
}

impl Default for BudgetLedger {
    fn default() -> Self {
        Self {
            consumed_units: 0,
            calls: 0,
            ceiling: None,
            warning_pct: 80,
            approval_pct: 90,
            warning_emitted: false,
        }
    }
}

impl BudgetLedger {
    pub fn with_ceiling(ceiling: Option<u64>, warning_pct: u8, approval_pct: u8) -> Self {
        Self {
            ceiling,
            warning_pct,
            approval_pct,
            ..Self::default()
        }
    }

    /// Whole percent of the ceiling consumed, or `None` without a ceiling.
    pub fn percent_used(&self) -> Option<u64> {
        self.ceiling.map(|ceiling| {
            if ceiling == 0 {
                100
            } else {
                self.consumed_units.saturating_mul(100) / ceiling
            }
        })
    }

    pub fn remaining(&self) -> Option<u64> {
        self.ceiling
            .map(|ceiling| ceiling.saturating_sub(self.consumed_units))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_used_without_ceiling_is_none() {
        let ledger = BudgetLedger::default();
        assert_eq!(ledger.percent_used(), None);
        assert_eq!(ledger.remaining(), None);
    }

    #[test]
    fn percent_used_rounds_down() {
        let mut ledger = BudgetLedger::with_ceiling(Some(1_000), 80, 90);
        ledger.consumed_units = 899;
        assert_eq!(ledger.percent_used(), Some(89));
        assert_eq!(ledger.remaining(), Some(101));
    }

    #[test]
    fn zero_ceiling_is_fully_used() {
        let ledger = BudgetLedger::with_ceiling(Some(0), 80, 90);
        assert_eq!(ledger.percent_used(), Some(100));
    }
}
