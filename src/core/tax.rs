use std::collections::BTreeMap;

use super::types::{FilingStatus, TaxBracket, TaxTables};

pub const RMD_START_AGE: u32 = 73;
pub const EARLY_WITHDRAWAL_AGE: u32 = 59;

// IRS uniform lifetime table, (age, distribution period).
const UNIFORM_LIFETIME_TABLE: [(u32, f64); 46] = [
    (70, 27.4),
    (71, 26.5),
    (72, 25.6),
    (73, 24.7),
    (74, 23.8),
    (75, 22.9),
    (76, 22.0),
    (77, 21.2),
    (78, 20.3),
    (79, 19.5),
    (80, 18.7),
    (81, 17.9),
    (82, 17.1),
    (83, 16.3),
    (84, 15.5),
    (85, 14.8),
    (86, 14.1),
    (87, 13.4),
    (88, 12.7),
    (89, 12.0),
    (90, 11.4),
    (91, 10.8),
    (92, 10.2),
    (93, 9.6),
    (94, 9.1),
    (95, 8.6),
    (96, 8.1),
    (97, 7.6),
    (98, 7.1),
    (99, 6.7),
    (100, 6.3),
    (101, 5.9),
    (102, 5.5),
    (103, 5.2),
    (104, 4.9),
    (105, 4.5),
    (106, 4.2),
    (107, 3.9),
    (108, 3.7),
    (109, 3.4),
    (110, 3.1),
    (111, 2.9),
    (112, 2.6),
    (113, 2.4),
    (114, 2.1),
    (115, 1.9),
];

pub fn distribution_period(custom: Option<&BTreeMap<u32, f64>>, age: u32) -> f64 {
    if let Some(table) = custom.filter(|t| !t.is_empty()) {
        return table
            .range(..=age)
            .next_back()
            .or_else(|| table.iter().next())
            .map(|(_, period)| *period)
            .unwrap_or(1.0)
            .max(1e-9);
    }

    let first = UNIFORM_LIFETIME_TABLE[0];
    let last = UNIFORM_LIFETIME_TABLE[UNIFORM_LIFETIME_TABLE.len() - 1];
    let clamped = age.clamp(first.0, last.0);
    UNIFORM_LIFETIME_TABLE[(clamped - first.0) as usize].1
}

pub fn progressive_tax(brackets: &[TaxBracket], income: f64, price_index: f64) -> f64 {
    let income = income.max(0.0);
    let mut tax = 0.0;
    for bracket in brackets {
        let lower = bracket.lower * price_index;
        if income <= lower {
            continue;
        }
        let upper = bracket
            .upper
            .map(|u| u * price_index)
            .unwrap_or(f64::INFINITY);
        let taxed = income.min(upper) - lower;
        tax += taxed.max(0.0) * bracket.rate.clamp(0.0, 1.0);
    }
    tax
}

/// Headroom left in the bracket that contains `income`. `None` when the income
/// already sits in the unbounded top bracket.
pub fn bracket_headroom(brackets: &[TaxBracket], income: f64, price_index: f64) -> Option<f64> {
    if brackets.is_empty() {
        return Some(0.0);
    }

    // Brackets are ordered by lower bound.
    let income = income.max(0.0);
    for bracket in brackets {
        match bracket.upper.map(|u| u * price_index) {
            Some(upper) if income < upper => return Some(upper - income),
            Some(_) => continue,
            None => return None,
        }
    }
    Some(0.0)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TaxableYear {
    pub ordinary_income: f64,
    pub social_security: f64,
    pub capital_gains: f64,
    pub early_withdrawals: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TaxBill {
    pub federal: f64,
    pub state: f64,
    pub capital_gains: f64,
    pub early_withdrawal_penalty: f64,
}

impl TaxBill {
    pub fn total(self) -> f64 {
        self.federal + self.state + self.capital_gains + self.early_withdrawal_penalty
    }
}

pub fn taxable_ordinary_income(
    tables: &TaxTables,
    status: FilingStatus,
    price_index: f64,
    ordinary_income: f64,
    social_security: f64,
) -> f64 {
    let gross = ordinary_income
        + social_security.max(0.0) * tables.social_security_taxable_share.clamp(0.0, 1.0);
    let deduction = tables.standard_deduction(status).max(0.0) * price_index;
    (gross - deduction).max(0.0)
}

pub fn assess_annual_tax(
    tables: &TaxTables,
    status: FilingStatus,
    price_index: f64,
    year: &TaxableYear,
) -> TaxBill {
    let taxable = taxable_ordinary_income(
        tables,
        status,
        price_index,
        year.ordinary_income,
        year.social_security,
    );

    let federal = progressive_tax(tables.federal.for_status(status), taxable, price_index);
    let state = tables
        .state
        .as_ref()
        .map(|s| progressive_tax(s.for_status(status), taxable, price_index))
        .unwrap_or(0.0);

    // Gains stack on top of ordinary income.
    let gains = year.capital_gains.max(0.0);
    let cg_brackets = tables.capital_gains.for_status(status);
    let capital_gains = (progressive_tax(cg_brackets, taxable + gains, price_index)
        - progressive_tax(cg_brackets, taxable, price_index))
    .max(0.0);

    let early_withdrawal_penalty =
        year.early_withdrawals.max(0.0) * tables.early_withdrawal_penalty.clamp(0.0, 1.0);

    TaxBill {
        federal,
        state,
        capital_gains,
        early_withdrawal_penalty,
    }
}
