//! Resource budget tracking for runs.
//!
//! `BudgetTracker` is the only code that mutates a `BudgetLedger`. Before a
//! cost-bearing step the engine asks for a [`BudgetAssessment`]; after any
//! step that reports consumption it records the units. The warning notice
//! fires exactly once per run.

use phaseflow_types::budget::BudgetLedger;

/// What the engine should do before dispatching a cost-bearing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetAssessment {
    /// Below the warning threshold, or no ceiling configured.
    Proceed,
    /// Just crossed the warning threshold. Returned once per ledger.
    Notice { percent: u64 },
    /// At or above the approval threshold: pause for a budget decision.
    RequireApproval { percent: u64 },
    /// At or above the hard ceiling. Non-retryable.
    Exceeded { consumed: u64, ceiling: u64 },
}

pub struct BudgetTracker;

impl BudgetTracker {
    /// Assess a ledger before dispatch, latching the one-time warning.
    pub fn before_dispatch(ledger: &mut BudgetLedger) -> BudgetAssessment {
        let assessment = Self::assess(ledger);
        if let BudgetAssessment::Notice { .. } = assessment {
            ledger.warning_emitted = true;
        }
        assessment
    }

    /// Pure assessment. Returns `Notice` only while the warning has not yet
    /// been emitted; afterwards the warning band reads as `Proceed`.
    pub fn assess(ledger: &BudgetLedger) -> BudgetAssessment {
        let Some(ceiling) = ledger.ceiling else {
            return BudgetAssessment::Proceed;
        };
        if ledger.consumed_units >= ceiling {
            return BudgetAssessment::Exceeded {
                consumed: ledger.consumed_units,
                ceiling,
            };
        }

        let percent = ledger.percent_used().unwrap_or(0);
        if percent >= u64::from(ledger.approval_pct) {
            BudgetAssessment::RequireApproval { percent }
        } else if percent >= u64::from(ledger.warning_pct) && !ledger.warning_emitted {
            BudgetAssessment::Notice { percent }
        } else {
            BudgetAssessment::Proceed
        }
    }

    /// Record consumption from one step execution.
    ///
    /// Returns `Exceeded` when the new total meets or passes the ceiling.
    pub fn record(ledger: &mut BudgetLedger, units: u64) -> BudgetAssessment {
        ledger.consumed_units = ledger.consumed_units.saturating_add(units);
        ledger.calls += 1;
        match ledger.ceiling {
            Some(ceiling) if ledger.consumed_units >= ceiling => BudgetAssessment::Exceeded {
                consumed: ledger.consumed_units,
                ceiling,
            },
            _ => BudgetAssessment::Proceed,
        }
    }
}
