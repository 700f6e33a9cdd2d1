use std::collections::BTreeMap;

use super::error::{ConfigurationError, SimResult};
use super::events::EventWindow;
use super::rng::Rng;
use super::state::RunningTotals;
use super::types::{AllocationSpec, InvestEvent, Scenario, TaxStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GrowthOutcome {
    pub generated_income: f64,
    pub taxable_income: f64,
    pub value_change: f64,
    pub expenses: f64,
}

pub fn update_investments(
    scenario: &Scenario,
    totals: &mut RunningTotals,
    rng: &mut Rng,
) -> SimResult<GrowthOutcome> {
    let mut outcome = GrowthOutcome::default();

    for idx in 0..totals.investments.len() {
        let investment = &totals.investments[idx];
        let investment_type = scenario
            .investment_type(&investment.investment_type)
            .ok_or_else(|| ConfigurationError::UnknownInvestmentType {
                investment: investment.id.clone(),
                investment_type: investment.investment_type.clone(),
            })?;

        let opening = investment.value;
        let income = rng.sample_change(&investment_type.income_spec, opening);
        let change = rng.sample_change(&investment_type.return_spec, opening);
        let closing = opening + income + change;
        let drag = investment_type.expense_ratio.max(0.0) * (opening + closing.max(0.0)) / 2.0;
        let updated = (closing - drag).max(0.0);

        let tax_status = investment.tax_status;
        let id = investment.id.clone();
        if tax_status == TaxStatus::NonRetirement {
            if investment_type.taxable {
                totals.ordinary_income += income;
                outcome.taxable_income += income;
            }
            if income > 0.0 {
                *totals.cost_basis.entry(id).or_insert(0.0) += income;
            }
        }

        totals.investments[idx].value = updated;
        outcome.generated_income += income;
        outcome.value_change += updated - opening;
        outcome.expenses += drag;
    }

    Ok(outcome)
}

fn checked_weights(
    event: &str,
    weights: &BTreeMap<String, f64>,
) -> Result<(), ConfigurationError> {
    if weights.is_empty() {
        return Err(ConfigurationError::MalformedAllocation {
            event: event.to_string(),
            reason: "allocation is empty".to_string(),
        });
    }
    if let Some((id, w)) = weights.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
        return Err(ConfigurationError::MalformedAllocation {
            event: event.to_string(),
            reason: format!("weight {w} for '{id}' must be finite and >= 0"),
        });
    }
    Ok(())
}

pub fn validate_allocation(
    event: &str,
    spec: &AllocationSpec,
    known_ids: &[&str],
) -> Result<(), ConfigurationError> {
    match spec {
        AllocationSpec::Fixed { weights } => checked_weights(event, weights)?,
        AllocationSpec::GlidePath { start, end } => {
            checked_weights(event, start)?;
            checked_weights(event, end)?;
        }
    }
    if let Some(unknown) = spec.members().into_iter().find(|id| !known_ids.contains(id)) {
        return Err(ConfigurationError::MalformedAllocation {
            event: event.to_string(),
            reason: format!("unknown investment '{unknown}'"),
        });
    }
    Ok(())
}

/// Normalised target weights for `year`. Glide paths interpolate linearly from
/// the start map to the end map over the event's window.
pub fn weights_for_year(
    event: &str,
    spec: &AllocationSpec,
    window: EventWindow,
    year: i32,
) -> Result<BTreeMap<String, f64>, ConfigurationError> {
    let raw: BTreeMap<String, f64> = match spec {
        AllocationSpec::Fixed { weights } => weights.clone(),
        AllocationSpec::GlidePath { start, end } => {
            let t = window.elapsed_fraction(year);
            spec.members()
                .into_iter()
                .map(|id| {
                    let s = start.get(id).copied().unwrap_or(0.0);
                    let e = end.get(id).copied().unwrap_or(0.0);
                    (id.to_string(), s + (e - s) * t)
                })
                .collect()
        }
    };

    let sum: f64 = raw.values().sum();
    if !(sum > 1e-12) || raw.values().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(ConfigurationError::MalformedAllocation {
            event: event.to_string(),
            reason: "weights must be non-negative with a positive sum".to_string(),
        });
    }
    Ok(raw.into_iter().map(|(id, w)| (id, w / sum)).collect())
}

fn member_index(totals: &RunningTotals, event: &str, id: &str) -> Result<usize, ConfigurationError> {
    totals
        .position(id)
        .ok_or_else(|| ConfigurationError::MalformedAllocation {
            event: event.to_string(),
            reason: format!("unknown investment '{id}'"),
        })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvestOutcome {
    pub invested: f64,
    pub purchases: Vec<(String, f64)>,
}

/// Splits `excess` across targets, capping after-tax purchases at `after_tax_limit`
/// in total and handing the overflow to the other targets by weight.
pub fn plan_purchases(
    weights: &[(String, f64, TaxStatus)],
    excess: f64,
    after_tax_limit: f64,
) -> Vec<(String, f64)> {
    let mut purchases: Vec<(String, f64)> = weights
        .iter()
        .map(|(id, w, _)| (id.clone(), excess * w))
        .collect();

    let after_tax_total: f64 = weights
        .iter()
        .zip(&purchases)
        .filter(|((_, _, status), _)| *status == TaxStatus::AfterTax)
        .map(|(_, (_, amount))| amount)
        .sum();
    let limit = after_tax_limit.max(0.0);
    if after_tax_total <= limit {
        return purchases;
    }

    let scale = limit / after_tax_total;
    let overflow = after_tax_total - limit;
    let uncapped_weight: f64 = weights
        .iter()
        .filter(|(_, _, status)| *status != TaxStatus::AfterTax)
        .map(|(_, w, _)| w)
        .sum();

    for ((_, w, status), (_, amount)) in weights.iter().zip(purchases.iter_mut()) {
        if *status == TaxStatus::AfterTax {
            *amount *= scale;
        } else if uncapped_weight > 1e-12 {
            *amount += overflow * (w / uncapped_weight);
        }
    }
    purchases
}

pub fn run_invest_event(
    totals: &mut RunningTotals,
    event: &str,
    invest: &InvestEvent,
    window: EventWindow,
    year: i32,
    after_tax_limit: f64,
) -> SimResult<InvestOutcome> {
    let mut outcome = InvestOutcome::default();
    let excess = totals.cash - invest.max_cash.max(0.0);
    if excess <= 1e-9 {
        return Ok(outcome);
    }

    let weights = weights_for_year(event, &invest.allocation, window, year)?;
    let mut targets = Vec::with_capacity(weights.len());
    for (id, w) in weights {
        let idx = member_index(totals, event, &id)?;
        targets.push((id, w, totals.investments[idx].tax_status));
    }

    for (id, amount) in plan_purchases(&targets, excess, after_tax_limit) {
        if amount <= 0.0 {
            continue;
        }
        let idx = member_index(totals, event, &id)?;
        totals.deposit(idx, amount);
        outcome.invested += amount;
        outcome.purchases.push((id, amount));
    }

    totals.cash = (totals.cash - outcome.invested).max(0.0);
    Ok(outcome)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RebalanceOutcome {
    pub sold: f64,
    pub bought: f64,
    pub realized_gain: f64,
    pub trades: Vec<(String, f64)>,
}

/// Sells every over-target member first, then buys under-target members with
/// the proceeds. Gains are realised only on non-retirement holdings.
pub fn run_rebalance_event(
    totals: &mut RunningTotals,
    event: &str,
    spec: &AllocationSpec,
    window: EventWindow,
    year: i32,
) -> SimResult<RebalanceOutcome> {
    let mut outcome = RebalanceOutcome::default();
    let weights = weights_for_year(event, spec, window, year)?;

    let mut members = Vec::with_capacity(weights.len());
    for (id, w) in weights {
        let idx = member_index(totals, event, &id)?;
        members.push((idx, w));
    }
    let group_total: f64 = members
        .iter()
        .map(|(idx, _)| totals.investments[*idx].value)
        .sum();
    if group_total <= 1e-9 {
        return Ok(outcome);
    }

    let targets: Vec<(usize, f64)> = members
        .iter()
        .map(|(idx, w)| (*idx, group_total * w))
        .collect();

    let mut proceeds = 0.0;
    for (idx, target) in &targets {
        let surplus = totals.investments[*idx].value - target;
        if surplus <= 1e-9 {
            continue;
        }
        let sale = totals.withdraw(*idx, surplus)?;
        if totals.investments[*idx].tax_status == TaxStatus::NonRetirement {
            totals.capital_gains += sale.gain();
            outcome.realized_gain += sale.gain();
        }
        proceeds += sale.amount;
        outcome.sold += sale.amount;
        outcome
            .trades
            .push((totals.investments[*idx].id.clone(), -sale.amount));
    }

    for (idx, target) in &targets {
        let deficit = target - totals.investments[*idx].value;
        if deficit <= 1e-9 || proceeds <= 0.0 {
            continue;
        }
        let amount = deficit.min(proceeds);
        totals.deposit(*idx, amount);
        proceeds -= amount;
        outcome.bought += amount;
        outcome
            .trades
            .push((totals.investments[*idx].id.clone(), amount));
    }

    // Rounding residue stays with the household.
    totals.cash += proceeds.max(0.0);
    Ok(outcome)
}
