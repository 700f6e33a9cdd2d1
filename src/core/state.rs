use std::collections::BTreeMap;

use super::error::{SimResult, SimulationError};
use super::types::{HoldingSnapshot, Investment, Scenario, StrategyKind, TaxStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct PaidExpense {
    pub name: String,
    pub amount: f64,
    pub discretionary: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sale {
    pub amount: f64,
    pub basis_sold: f64,
}

impl Sale {
    pub fn gain(self) -> f64 {
        self.amount - self.basis_sold
    }
}

/// Mutable working state of one trial.
///
/// `previous_amounts` carries each income/expense series' amount from one
/// year to the next: processors read the previous value, then overwrite it
/// with the current year's amount before moving on.
#[derive(Debug, Clone)]
pub struct RunningTotals {
    pub cash: f64,
    pub ordinary_income: f64,
    pub capital_gains: f64,
    pub early_withdrawals: f64,
    pub social_security: f64,
    pub investments: Vec<Investment>,
    pub cost_basis: BTreeMap<String, f64>,
    pub paid_expenses: Vec<PaidExpense>,
    pub discretionary_paid: f64,
    pub discretionary_due: f64,
    pub previous_amounts: BTreeMap<String, f64>,
    pub roth_order: Vec<String>,
    pub tax_owed: f64,
    pub price_index: f64,
}

impl RunningTotals {
    pub fn from_scenario(scenario: &Scenario) -> Self {
        let mut totals = Self {
            cash: scenario.initial_cash.max(0.0),
            ordinary_income: 0.0,
            capital_gains: 0.0,
            early_withdrawals: 0.0,
            social_security: 0.0,
            investments: Vec::with_capacity(scenario.investments.len()),
            cost_basis: BTreeMap::new(),
            paid_expenses: Vec::new(),
            discretionary_paid: 0.0,
            discretionary_due: 0.0,
            previous_amounts: BTreeMap::new(),
            roth_order: scenario
                .strategy(StrategyKind::Roth)
                .map(|s| s.order.clone())
                .unwrap_or_default(),
            tax_owed: 0.0,
            price_index: 1.0,
        };
        for investment in &scenario.investments {
            totals.add_lot(investment.clone());
        }
        totals
    }

    pub fn begin_year(&mut self) {
        self.ordinary_income = 0.0;
        self.capital_gains = 0.0;
        self.early_withdrawals = 0.0;
        self.social_security = 0.0;
        self.paid_expenses.clear();
        self.discretionary_paid = 0.0;
        self.discretionary_due = 0.0;
    }

    pub fn total_investments(&self) -> f64 {
        self.investments.iter().map(|i| i.value).sum()
    }

    pub fn total_assets(&self) -> f64 {
        self.cash + self.total_investments()
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.investments.iter().position(|i| i.id == id)
    }

    pub fn basis_of(&self, id: &str) -> f64 {
        self.cost_basis.get(id).copied().unwrap_or(0.0)
    }

    /// Adds a lot and its cost-basis entry. Values are floored at zero and the
    /// basis defaults to the opening value.
    pub fn add_lot(&mut self, mut investment: Investment) -> usize {
        investment.value = investment.value.max(0.0);
        let basis = investment
            .cost_basis
            .take()
            .unwrap_or(investment.value)
            .max(0.0);
        self.cost_basis.insert(investment.id.clone(), basis);
        self.investments.push(investment);
        self.investments.len() - 1
    }

    pub fn find_or_create_lot(&mut self, investment_type: &str, tax_status: TaxStatus) -> usize {
        if let Some(idx) = self
            .investments
            .iter()
            .position(|i| i.investment_type == investment_type && i.tax_status == tax_status)
        {
            return idx;
        }

        let base_id = format!("{investment_type} {}", tax_status.label());
        let mut id = base_id.clone();
        let mut suffix = 2;
        while self.position(&id).is_some() {
            id = format!("{base_id} #{suffix}");
            suffix += 1;
        }
        self.add_lot(Investment::new(&id, investment_type, 0.0, tax_status))
    }

    pub fn deposit(&mut self, idx: usize, amount: f64) {
        if amount <= 0.0 {
            return;
        }
        let investment = &mut self.investments[idx];
        investment.value += amount;
        *self.cost_basis.entry(investment.id.clone()).or_insert(0.0) += amount;
    }

    /// Sells `amount` from the lot at `idx`, releasing the proportional share
    /// of its cost basis. Asking for more than the lot holds is an error.
    pub fn withdraw(&mut self, idx: usize, amount: f64) -> SimResult<Sale> {
        let investment = &mut self.investments[idx];
        if amount <= 0.0 || investment.value <= 0.0 {
            return Ok(Sale {
                amount: 0.0,
                basis_sold: 0.0,
            });
        }
        if amount > investment.value + 1e-6 {
            return Err(SimulationError::InsufficientFunds {
                holding: investment.id.clone(),
                requested: amount,
                available: investment.value,
            });
        }

        let amount = amount.min(investment.value);
        let value_before = investment.value;
        let basis = self.cost_basis.entry(investment.id.clone()).or_insert(0.0);
        let basis_sold = (*basis * (amount / value_before)).min(*basis).max(0.0);

        investment.value = (value_before - amount).max(0.0);
        *basis = (*basis - basis_sold).max(0.0);

        Ok(Sale { amount, basis_sold })
    }

    pub fn snapshot_holdings(&self) -> Vec<HoldingSnapshot> {
        self.investments
            .iter()
            .map(|i| HoldingSnapshot {
                id: i.id.clone(),
                investment_type: i.investment_type.clone(),
                tax_status: i.tax_status,
                value: i.value,
            })
            .collect()
    }
}
