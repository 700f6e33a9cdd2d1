use std::collections::BTreeMap;

use super::error::SimResult;
use super::state::RunningTotals;
use super::tax::{RMD_START_AGE, distribution_period};
use super::types::TaxStatus;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferOutcome {
    pub total: f64,
    pub transfers: Vec<(String, String, f64)>,
}

fn pre_tax_sequence(totals: &RunningTotals, order: &[String]) -> Vec<String> {
    let mut sequence: Vec<String> = Vec::new();
    let is_pre_tax = |id: &str| {
        totals
            .position(id)
            .is_some_and(|idx| totals.investments[idx].tax_status == TaxStatus::PreTax)
    };

    for id in order {
        if is_pre_tax(id) && !sequence.contains(id) {
            sequence.push(id.clone());
        }
    }
    for investment in &totals.investments {
        if investment.tax_status == TaxStatus::PreTax && !sequence.contains(&investment.id) {
            sequence.push(investment.id.clone());
        }
    }
    sequence
}

/// Moves the required minimum distribution out of pre-tax holdings into
/// same-type non-retirement lots and books it as ordinary income.
pub fn perform_rmds(
    totals: &mut RunningTotals,
    order: &[String],
    age: u32,
    custom_table: Option<&BTreeMap<u32, f64>>,
) -> SimResult<TransferOutcome> {
    let mut outcome = TransferOutcome::default();
    if age < RMD_START_AGE {
        return Ok(outcome);
    }

    let pre_tax_total: f64 = totals
        .investments
        .iter()
        .filter(|i| i.tax_status == TaxStatus::PreTax)
        .map(|i| i.value)
        .sum();
    if pre_tax_total <= 0.0 {
        return Ok(outcome);
    }

    let required = pre_tax_total / distribution_period(custom_table, age);
    let mut remaining = required;

    for id in pre_tax_sequence(totals, order) {
        if remaining <= 1e-9 {
            break;
        }
        let Some(idx) = totals.position(&id) else {
            continue;
        };
        let take = totals.investments[idx].value.min(remaining);
        if take <= 0.0 {
            continue;
        }

        let sale = totals.withdraw(idx, take)?;
        let investment_type = totals.investments[idx].investment_type.clone();
        let target = totals.find_or_create_lot(&investment_type, TaxStatus::NonRetirement);
        totals.deposit(target, sale.amount);

        remaining -= sale.amount;
        outcome.total += sale.amount;
        outcome
            .transfers
            .push((id, totals.investments[target].id.clone(), sale.amount));
    }

    totals.ordinary_income += outcome.total;
    Ok(outcome)
}

/// Converts pre-tax holdings to after-tax, walking `totals.roth_order` until
/// `ceiling` is used up. Within a ceiling each conversion merges into the
/// after-tax lot of the same investment type. `None` means the income is
/// already in the top bracket: every ordered holding is converted into a
/// single after-tax lot (the first holding's type). Fully converted holdings
/// leave the ordering; the ordering left in `totals` is reused next year.
pub fn perform_roth_conversion(
    totals: &mut RunningTotals,
    ceiling: Option<f64>,
) -> SimResult<TransferOutcome> {
    let mut outcome = TransferOutcome::default();
    let mut remaining = ceiling.unwrap_or(f64::INFINITY).max(0.0);

    let order = std::mem::take(&mut totals.roth_order);
    let mut kept = Vec::with_capacity(order.len());
    let mut pending = order.into_iter();
    let mut consolidated: Option<usize> = None;

    while let Some(id) = pending.next() {
        let Some(idx) = totals.position(&id) else {
            continue;
        };
        if totals.investments[idx].tax_status != TaxStatus::PreTax {
            continue;
        }

        let value = totals.investments[idx].value;
        if value <= 1e-9 {
            kept.push(id);
            continue;
        }
        if remaining <= 1e-9 {
            kept.push(id);
            kept.extend(pending.by_ref());
            break;
        }

        let fits = value <= remaining;
        let amount = if fits { value } else { remaining };
        let sale = totals.withdraw(idx, amount)?;
        let target = match consolidated {
            Some(target) => target,
            None => {
                let investment_type = totals.investments[idx].investment_type.clone();
                let target = totals.find_or_create_lot(&investment_type, TaxStatus::AfterTax);
                if ceiling.is_none() {
                    consolidated = Some(target);
                }
                target
            }
        };
        totals.deposit(target, sale.amount);

        remaining -= sale.amount;
        outcome.total += sale.amount;
        outcome
            .transfers
            .push((id.clone(), totals.investments[target].id.clone(), sale.amount));

        if !fits {
            kept.push(id);
            kept.extend(pending.by_ref());
            break;
        }
    }

    totals.roth_order = kept;
    totals.ordinary_income += outcome.total;
    Ok(outcome)
}
