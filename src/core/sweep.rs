use serde::{Deserialize, Serialize};

use super::error::ConfigurationError;
use super::types::{Distribution, EventKind, Scenario, StartSpec, StrategyKind};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ParameterOverride {
    StartYear { event: String, year: i32 },
    Duration { event: String, years: f64 },
    InitialAmount { event: String, amount: f64 },
    RothOptimizer { enabled: bool },
}

impl ParameterOverride {
    pub fn describe(&self) -> String {
        match self {
            ParameterOverride::StartYear { event, year } => format!("{event}.start={year}"),
            ParameterOverride::Duration { event, years } => format!("{event}.duration={years}"),
            ParameterOverride::InitialAmount { event, amount } => {
                format!("{event}.initialAmount={amount}")
            }
            ParameterOverride::RothOptimizer { enabled } => format!("rothOptimizer={enabled}"),
        }
    }
}

/// One point of a parameter sweep. The empty combination is the base scenario.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct SweepCombination {
    pub overrides: Vec<ParameterOverride>,
}

impl SweepCombination {
    pub fn label(&self) -> String {
        if self.overrides.is_empty() {
            return "base".to_string();
        }
        self.overrides
            .iter()
            .map(ParameterOverride::describe)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Sweep file contents: explicit combinations, plus the cartesian product of
/// any listed dimensions.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepPlan {
    #[serde(default)]
    pub combinations: Vec<SweepCombination>,
    #[serde(default)]
    pub dimensions: Vec<Vec<ParameterOverride>>,
}

impl SweepPlan {
    pub fn expand(&self) -> Vec<SweepCombination> {
        let mut combinations = self.combinations.clone();
        if !self.dimensions.is_empty() {
            combinations.extend(cartesian(&self.dimensions));
        }
        combinations
    }
}

pub fn cartesian(dimensions: &[Vec<ParameterOverride>]) -> Vec<SweepCombination> {
    let mut combinations = vec![SweepCombination::default()];
    for dimension in dimensions {
        if dimension.is_empty() {
            continue;
        }
        let mut next = Vec::with_capacity(combinations.len() * dimension.len());
        for combination in &combinations {
            for value in dimension {
                let mut overrides = combination.overrides.clone();
                overrides.push(value.clone());
                next.push(SweepCombination { overrides });
            }
        }
        combinations = next;
    }
    combinations
}

fn invalid(event: &str, reason: impl Into<String>) -> ConfigurationError {
    ConfigurationError::InvalidSweepTarget {
        event: event.to_string(),
        reason: reason.into(),
    }
}

/// Returns a copy of `scenario` with every override applied in order.
pub fn apply_overrides(
    scenario: &Scenario,
    overrides: &[ParameterOverride],
) -> Result<Scenario, ConfigurationError> {
    let mut scenario = scenario.clone();

    for parameter in overrides {
        match parameter {
            ParameterOverride::StartYear { event, year } => {
                let series = scenario
                    .event_series
                    .iter_mut()
                    .find(|e| &e.name == event)
                    .ok_or_else(|| invalid(event, "no such event series"))?;
                series.start = StartSpec::year(*year);
            }
            ParameterOverride::Duration { event, years } => {
                if !years.is_finite() || *years < 0.0 {
                    return Err(invalid(event, format!("duration {years} must be >= 0")));
                }
                let series = scenario
                    .event_series
                    .iter_mut()
                    .find(|e| &e.name == event)
                    .ok_or_else(|| invalid(event, "no such event series"))?;
                series.duration = Distribution::fixed(*years);
            }
            ParameterOverride::InitialAmount { event, amount } => {
                if !amount.is_finite() || *amount < 0.0 {
                    return Err(invalid(event, format!("initial amount {amount} must be >= 0")));
                }
                let series = scenario
                    .event_series
                    .iter_mut()
                    .find(|e| &e.name == event)
                    .ok_or_else(|| invalid(event, "no such event series"))?;
                match &mut series.kind {
                    EventKind::Income(income) => income.initial_amount = *amount,
                    EventKind::Expense(expense) => expense.initial_amount = *amount,
                    EventKind::Invest(_) | EventKind::Rebalance(_) => {
                        return Err(invalid(event, "only income and expense series have an initial amount"));
                    }
                }
            }
            ParameterOverride::RothOptimizer { enabled } => {
                let strategy = scenario
                    .strategies
                    .iter_mut()
                    .find(|s| s.kind == StrategyKind::Roth)
                    .ok_or_else(|| invalid("roth", "scenario has no roth conversion strategy"))?;
                strategy.enabled = *enabled;
            }
        }
    }

    Ok(scenario)
}
