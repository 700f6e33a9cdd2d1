use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::ConfigurationError;

#[derive(Copy, Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Distribution {
    Fixed { value: f64 },
    Normal { mean: f64, stdev: f64 },
    Uniform { lower: f64, upper: f64 },
}

impl Distribution {
    pub fn fixed(value: f64) -> Self {
        Distribution::Fixed { value }
    }

    pub fn validate(&self, context: &str) -> Result<(), ConfigurationError> {
        let reason = match *self {
            Distribution::Fixed { value } if !value.is_finite() => Some("value must be finite"),
            Distribution::Normal { mean, stdev } if !mean.is_finite() || !stdev.is_finite() => {
                Some("mean and stdev must be finite")
            }
            Distribution::Normal { stdev, .. } if stdev < 0.0 => Some("stdev must be >= 0"),
            Distribution::Uniform { lower, upper } if !lower.is_finite() || !upper.is_finite() => {
                Some("bounds must be finite")
            }
            Distribution::Uniform { lower, upper } if lower > upper => {
                Some("lower bound must be <= upper bound")
            }
            _ => None,
        };

        match reason {
            Some(reason) => Err(ConfigurationError::InvalidDistribution {
                context: context.to_string(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeMode {
    Amount,
    Percent,
}

#[derive(Copy, Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSpec {
    pub mode: ChangeMode,
    pub distribution: Distribution,
}

impl ChangeSpec {
    pub fn none() -> Self {
        Self {
            mode: ChangeMode::Amount,
            distribution: Distribution::fixed(0.0),
        }
    }

    pub fn percent(distribution: Distribution) -> Self {
        Self {
            mode: ChangeMode::Percent,
            distribution,
        }
    }

    pub fn amount(distribution: Distribution) -> Self {
        Self {
            mode: ChangeMode::Amount,
            distribution,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaxStatus {
    #[serde(alias = "preTax", alias = "pre_tax")]
    PreTax,
    #[serde(alias = "afterTax", alias = "after_tax")]
    AfterTax,
    #[serde(alias = "nonRetirement", alias = "non_retirement")]
    NonRetirement,
}

impl TaxStatus {
    pub fn is_retirement(self) -> bool {
        !matches!(self, TaxStatus::NonRetirement)
    }

    pub fn label(self) -> &'static str {
        match self {
            TaxStatus::PreTax => "pre-tax",
            TaxStatus::AfterTax => "after-tax",
            TaxStatus::NonRetirement => "non-retirement",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FilingStatus {
    Single,
    MarriedJoint,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentType {
    pub name: String,
    pub return_spec: ChangeSpec,
    pub income_spec: ChangeSpec,
    #[serde(default)]
    pub expense_ratio: f64,
    #[serde(default = "default_true")]
    pub taxable: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Investment {
    pub id: String,
    pub investment_type: String,
    pub value: f64,
    pub tax_status: TaxStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_basis: Option<f64>,
}

impl Investment {
    pub fn new(id: &str, investment_type: &str, value: f64, tax_status: TaxStatus) -> Self {
        Self {
            id: id.to_string(),
            investment_type: investment_type.to_string(),
            value,
            tax_status,
            cost_basis: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StartSpec {
    Fixed { value: f64 },
    Normal { mean: f64, stdev: f64 },
    Uniform { lower: f64, upper: f64 },
    SameAs { event: String },
    After { event: String },
}

impl StartSpec {
    pub fn year(year: i32) -> Self {
        StartSpec::Fixed {
            value: f64::from(year),
        }
    }

    pub fn sampled(&self) -> Option<Distribution> {
        match *self {
            StartSpec::Fixed { value } => Some(Distribution::Fixed { value }),
            StartSpec::Normal { mean, stdev } => Some(Distribution::Normal { mean, stdev }),
            StartSpec::Uniform { lower, upper } => Some(Distribution::Uniform { lower, upper }),
            StartSpec::SameAs { .. } | StartSpec::After { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AllocationSpec {
    Fixed {
        weights: BTreeMap<String, f64>,
    },
    GlidePath {
        start: BTreeMap<String, f64>,
        end: BTreeMap<String, f64>,
    },
}

impl AllocationSpec {
    pub fn members(&self) -> Vec<&str> {
        match self {
            AllocationSpec::Fixed { weights } => weights.keys().map(String::as_str).collect(),
            AllocationSpec::GlidePath { start, end } => {
                let mut ids: Vec<&str> = start.keys().map(String::as_str).collect();
                for id in end.keys() {
                    if !start.contains_key(id) {
                        ids.push(id);
                    }
                }
                ids
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeEvent {
    pub initial_amount: f64,
    #[serde(default = "ChangeSpec::none")]
    pub change: ChangeSpec,
    #[serde(default)]
    pub inflation_adjusted: bool,
    #[serde(default = "default_user_fraction")]
    pub user_fraction: f64,
    #[serde(default)]
    pub social_security: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseEvent {
    pub initial_amount: f64,
    #[serde(default = "ChangeSpec::none")]
    pub change: ChangeSpec,
    #[serde(default)]
    pub inflation_adjusted: bool,
    #[serde(default = "default_user_fraction")]
    pub user_fraction: f64,
    #[serde(default)]
    pub discretionary: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestEvent {
    pub allocation: AllocationSpec,
    #[serde(default)]
    pub max_cash: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalanceEvent {
    pub allocation: AllocationSpec,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventKind {
    Income(IncomeEvent),
    Expense(ExpenseEvent),
    Invest(InvestEvent),
    Rebalance(RebalanceEvent),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSeries {
    pub name: String,
    pub start: StartSpec,
    pub duration: Distribution,
    pub kind: EventKind,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    Roth,
    Rmd,
    #[serde(alias = "expenseWithdrawal")]
    ExpenseWithdrawal,
    Spending,
}

impl StrategyKind {
    pub fn label(self) -> &'static str {
        match self {
            StrategyKind::Roth => "roth",
            StrategyKind::Rmd => "rmd",
            StrategyKind::ExpenseWithdrawal => "expense-withdrawal",
            StrategyKind::Spending => "spending",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearWindow {
    pub start_year: i32,
    pub end_year: i32,
}

impl YearWindow {
    pub fn contains(self, year: i32) -> bool {
        (self.start_year..=self.end_year).contains(&year)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyOrdering {
    pub kind: StrategyKind,
    #[serde(default)]
    pub order: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<YearWindow>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxBracket {
    pub lower: f64,
    #[serde(default)]
    pub upper: Option<f64>,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketSet {
    pub single: Vec<TaxBracket>,
    pub married_joint: Vec<TaxBracket>,
}

impl BracketSet {
    pub fn for_status(&self, status: FilingStatus) -> &[TaxBracket] {
        match status {
            FilingStatus::Single => &self.single,
            FilingStatus::MarriedJoint => &self.married_joint,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxTables {
    pub federal: BracketSet,
    pub capital_gains: BracketSet,
    #[serde(default)]
    pub state: Option<BracketSet>,
    pub standard_deduction_single: f64,
    pub standard_deduction_joint: f64,
    #[serde(default = "default_early_withdrawal_penalty")]
    pub early_withdrawal_penalty: f64,
    #[serde(default = "default_social_security_taxable_share")]
    pub social_security_taxable_share: f64,
    #[serde(default)]
    pub rmd_distribution_periods: Option<BTreeMap<u32, f64>>,
}

impl TaxTables {
    pub fn standard_deduction(&self, status: FilingStatus) -> f64 {
        match status {
            FilingStatus::Single => self.standard_deduction_single,
            FilingStatus::MarriedJoint => self.standard_deduction_joint,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub name: String,
    pub financial_goal: f64,
    #[serde(default)]
    pub married: bool,
    pub user_birth_year: i32,
    #[serde(default)]
    pub spouse_birth_year: Option<i32>,
    pub user_life_expectancy: Distribution,
    #[serde(default)]
    pub spouse_life_expectancy: Option<Distribution>,
    #[serde(default)]
    pub residence_state: String,
    pub inflation: Distribution,
    pub after_tax_contribution_limit: f64,
    #[serde(default)]
    pub start_year: Option<i32>,
    #[serde(default)]
    pub initial_cash: f64,
    pub investment_types: Vec<InvestmentType>,
    pub investments: Vec<Investment>,
    #[serde(default)]
    pub event_series: Vec<EventSeries>,
    #[serde(default)]
    pub strategies: Vec<StrategyOrdering>,
    pub tax_tables: TaxTables,
}

impl Scenario {
    pub fn strategy(&self, kind: StrategyKind) -> Option<&StrategyOrdering> {
        self.strategies.iter().find(|s| s.kind == kind)
    }

    pub fn investment_type(&self, name: &str) -> Option<&InvestmentType> {
        self.investment_types.iter().find(|t| t.name == name)
    }

    pub fn event(&self, name: &str) -> Option<&EventSeries> {
        self.event_series.iter().find(|e| e.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingSnapshot {
    pub id: String,
    pub investment_type: String,
    pub tax_status: TaxStatus,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlyResult {
    pub year: i32,
    pub inflation_rate: f64,
    pub cash: f64,
    pub holdings: Vec<HoldingSnapshot>,
    pub total_investments: f64,
    pub total_assets: f64,
    pub ordinary_income: f64,
    pub social_security: f64,
    pub capital_gains: f64,
    pub early_withdrawals: f64,
    pub rmd_amount: f64,
    pub roth_converted: f64,
    pub invested: f64,
    pub tax_paid: f64,
    pub tax_owed_next_year: f64,
    pub non_discretionary_due: f64,
    pub non_discretionary_shortfall: f64,
    pub discretionary_due: f64,
    pub discretionary_paid: f64,
    pub meets_goal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialResult {
    pub trial_index: u32,
    pub seed: u64,
    pub years: Vec<YearlyResult>,
}

fn default_true() -> bool {
    true
}

fn default_user_fraction() -> f64 {
    1.0
}

fn default_early_withdrawal_penalty() -> f64 {
    0.10
}

fn default_social_security_taxable_share() -> f64 {
    0.85
}
