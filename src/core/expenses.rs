use super::error::SimResult;
use super::events::DueExpense;
use super::state::{PaidExpense, RunningTotals};
use super::tax::EARLY_WITHDRAWAL_AGE;
use super::types::TaxStatus;

fn withdrawal_sequence(totals: &RunningTotals, order: &[String]) -> Vec<usize> {
    let mut sequence: Vec<usize> = Vec::with_capacity(order.len());
    for id in order {
        match totals.position(id) {
            Some(idx) if !sequence.contains(&idx) => sequence.push(idx),
            _ => {}
        }
    }
    sequence
}

/// Value reachable through the withdrawal ordering.
pub fn liquidation_capacity(totals: &RunningTotals, order: &[String]) -> f64 {
    withdrawal_sequence(totals, order)
        .into_iter()
        .map(|idx| totals.investments[idx].value)
        .sum()
}

/// Sells holdings in `order` until `needed` has been raised or the ordering is
/// exhausted. Proceeds land in cash; returns the amount raised.
pub fn liquidate(
    totals: &mut RunningTotals,
    order: &[String],
    needed: f64,
    owner_age: u32,
) -> SimResult<f64> {
    let mut raised = 0.0;
    for idx in withdrawal_sequence(totals, order) {
        let remaining = needed - raised;
        if remaining <= 1e-9 {
            break;
        }
        let take = totals.investments[idx].value.min(remaining);
        if take <= 0.0 {
            continue;
        }

        let sale = totals.withdraw(idx, take)?;
        match totals.investments[idx].tax_status {
            TaxStatus::NonRetirement => totals.capital_gains += sale.gain(),
            TaxStatus::PreTax => totals.ordinary_income += sale.amount,
            TaxStatus::AfterTax => {}
        }
        if totals.investments[idx].tax_status.is_retirement() && owner_age < EARLY_WITHDRAWAL_AGE {
            totals.early_withdrawals += sale.amount;
        }
        totals.cash += sale.amount;
        raised += sale.amount;
    }
    Ok(raised)
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NonDiscretionaryOutcome {
    pub due: f64,
    pub paid: f64,
    pub tax_paid: f64,
    pub shortfall: f64,
}

/// Pays last year's tax bill and this year's non-discretionary expenses from
/// cash, then by liquidation. Whatever cannot be raised is a shortfall; the
/// tax is paid first and any unpaid part of it remains in `tax_owed`.
pub fn pay_non_discretionary(
    totals: &mut RunningTotals,
    due: &[DueExpense],
    order: &[String],
    owner_age: u32,
) -> SimResult<NonDiscretionaryOutcome> {
    let tax_due = totals.tax_owed.max(0.0);
    let expenses_due: f64 = due
        .iter()
        .filter(|e| !e.discretionary)
        .map(|e| e.amount)
        .sum();
    let total_due = tax_due + expenses_due;

    let mut outcome = NonDiscretionaryOutcome {
        due: total_due,
        ..NonDiscretionaryOutcome::default()
    };
    if total_due <= 0.0 {
        totals.tax_owed = 0.0;
        return Ok(outcome);
    }

    if totals.cash < total_due {
        let needed = total_due - totals.cash;
        liquidate(totals, order, needed, owner_age)?;
    }

    let payable = totals.cash.min(total_due);
    totals.cash -= payable;
    outcome.paid = payable;
    outcome.shortfall = (total_due - payable).max(0.0);
    outcome.tax_paid = tax_due.min(payable);
    // unpaid tax stays owed and is billed again next year
    totals.tax_owed = (tax_due - outcome.tax_paid).max(0.0);

    let mut left = payable - outcome.tax_paid;
    for expense in due.iter().filter(|e| !e.discretionary) {
        let amount = expense.amount.min(left);
        left -= amount;
        totals.paid_expenses.push(PaidExpense {
            name: expense.name.clone(),
            amount,
            discretionary: false,
        });
    }

    Ok(outcome)
}

/// Discretionary expenses in spending-priority order; items the ordering does
/// not mention follow in their original order.
pub fn spending_priority<'a>(due: &'a [DueExpense], spending_order: &[String]) -> Vec<&'a DueExpense> {
    let discretionary: Vec<&DueExpense> = due.iter().filter(|e| e.discretionary).collect();
    let mut ordered: Vec<&DueExpense> = Vec::with_capacity(discretionary.len());
    for name in spending_order {
        let Some(expense) = discretionary.iter().copied().find(|e| &e.name == name) else {
            continue;
        };
        if !ordered.iter().any(|e| e.name == expense.name) {
            ordered.push(expense);
        }
    }
    for expense in discretionary {
        if !ordered.iter().any(|e| e.name == expense.name) {
            ordered.push(expense);
        }
    }
    ordered
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscretionaryOutcome {
    pub due: f64,
    pub paid: f64,
    pub skipped: Vec<String>,
}

/// Pays discretionary items while total assets stay at or above `goal`. The
/// first item that would breach the goal or cannot be funded stops the loop.
pub fn pay_discretionary(
    totals: &mut RunningTotals,
    due: &[DueExpense],
    spending_order: &[String],
    withdrawal_order: &[String],
    owner_age: u32,
    goal: f64,
) -> SimResult<DiscretionaryOutcome> {
    let ordered = spending_priority(due, spending_order);
    let mut outcome = DiscretionaryOutcome {
        due: ordered.iter().map(|e| e.amount).sum(),
        ..DiscretionaryOutcome::default()
    };

    let mut halted = false;
    for expense in ordered {
        if halted {
            outcome.skipped.push(expense.name.clone());
            continue;
        }
        let amount = expense.amount.max(0.0);
        let fundable = totals.cash + liquidation_capacity(totals, withdrawal_order);
        if totals.total_assets() - amount < goal || fundable + 1e-9 < amount {
            halted = true;
            outcome.skipped.push(expense.name.clone());
            continue;
        }

        if totals.cash < amount {
            let needed = amount - totals.cash;
            liquidate(totals, withdrawal_order, needed, owner_age)?;
        }
        let paid = amount.min(totals.cash);
        totals.cash -= paid;
        outcome.paid += paid;
        totals.paid_expenses.push(PaidExpense {
            name: expense.name.clone(),
            amount: paid,
            discretionary: true,
        });
    }

    totals.discretionary_due += outcome.due;
    totals.discretionary_paid += outcome.paid;
    Ok(outcome)
}
