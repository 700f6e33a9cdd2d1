use std::collections::BTreeMap;

use super::error::ConfigurationError;
use super::rng::Rng;
use super::state::RunningTotals;
use super::types::{ChangeSpec, EventKind, Scenario, StartSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventWindow {
    pub start: i32,
    pub duration: i32,
}

impl EventWindow {
    pub fn end(self) -> i32 {
        self.start + self.duration
    }

    pub fn contains(self, year: i32) -> bool {
        year >= self.start && year < self.end()
    }

    /// Elapsed share of the window, 0 in the first active year and 1 in the last.
    pub fn elapsed_fraction(self, year: i32) -> f64 {
        if self.duration <= 1 {
            return 0.0;
        }
        (f64::from(year - self.start) / f64::from(self.duration - 1)).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventTimeline {
    windows: BTreeMap<String, EventWindow>,
}

impl EventTimeline {
    /// Samples every series' duration and start year for one trial, resolving
    /// "same as" / "after" references transitively, then shifts invest series
    /// forward so no two of them overlap.
    pub fn resolve(scenario: &Scenario, rng: &mut Rng) -> Result<Self, ConfigurationError> {
        let mut durations = BTreeMap::new();
        for event in &scenario.event_series {
            event.duration.validate(&format!("duration of '{}'", event.name))?;
            let years = rng.sample(&event.duration).round().max(0.0) as i32;
            durations.insert(event.name.as_str(), years);
        }

        let mut sampled_starts = BTreeMap::new();
        for event in &scenario.event_series {
            if let Some(dist) = event.start.sampled() {
                dist.validate(&format!("start of '{}'", event.name))?;
                sampled_starts.insert(event.name.as_str(), rng.sample(&dist).round() as i32);
            }
        }

        let mut starts: BTreeMap<&str, i32> = BTreeMap::new();
        for event in &scenario.event_series {
            let mut visiting = Vec::new();
            resolve_start(
                scenario,
                &event.name,
                &durations,
                &sampled_starts,
                &mut starts,
                &mut visiting,
            )?;
        }

        let mut windows: BTreeMap<String, EventWindow> = scenario
            .event_series
            .iter()
            .map(|e| {
                (
                    e.name.clone(),
                    EventWindow {
                        start: starts[e.name.as_str()],
                        duration: durations[e.name.as_str()],
                    },
                )
            })
            .collect();

        let mut invest_names: Vec<(usize, &str)> = scenario
            .event_series
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e.kind, EventKind::Invest(_)))
            .map(|(idx, e)| (idx, e.name.as_str()))
            .collect();
        invest_names.sort_by_key(|(idx, name)| (windows[*name].start, *idx));

        let mut occupied_until = i32::MIN;
        for (_, name) in invest_names {
            if let Some(window) = windows.get_mut(name) {
                if window.start < occupied_until {
                    window.start = occupied_until;
                }
                if window.duration > 0 {
                    occupied_until = window.end();
                }
            }
        }

        Ok(Self { windows })
    }

    pub fn window(&self, name: &str) -> Option<EventWindow> {
        self.windows.get(name).copied()
    }

    pub fn is_active(&self, name: &str, year: i32) -> bool {
        self.window(name).is_some_and(|w| w.contains(year))
    }
}

fn resolve_start<'a>(
    scenario: &'a Scenario,
    name: &'a str,
    durations: &BTreeMap<&'a str, i32>,
    sampled_starts: &BTreeMap<&'a str, i32>,
    starts: &mut BTreeMap<&'a str, i32>,
    visiting: &mut Vec<&'a str>,
) -> Result<i32, ConfigurationError> {
    if let Some(start) = starts.get(name) {
        return Ok(*start);
    }
    if visiting.contains(&name) {
        return Err(ConfigurationError::CyclicEventReference {
            event: name.to_string(),
        });
    }

    let event = scenario
        .event(name)
        .ok_or_else(|| ConfigurationError::DanglingEventReference {
            event: visiting.last().copied().unwrap_or(name).to_string(),
            reference: name.to_string(),
        })?;

    visiting.push(name);
    let start = match &event.start {
        StartSpec::SameAs { event: other } => {
            resolve_start(scenario, other, durations, sampled_starts, starts, visiting)?
        }
        StartSpec::After { event: other } => {
            let other_start =
                resolve_start(scenario, other, durations, sampled_starts, starts, visiting)?;
            other_start + durations.get(other.as_str()).copied().unwrap_or(0)
        }
        _ => sampled_starts.get(name).copied().unwrap_or_default(),
    };
    visiting.pop();

    starts.insert(name, start);
    Ok(start)
}

/// Which partners are alive this year. A single household is always treated
/// as the user alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Household {
    pub married: bool,
    pub user_alive: bool,
    pub spouse_alive: bool,
}

impl Household {
    pub fn survivor_share(self, user_fraction: f64) -> f64 {
        if !self.married {
            return if self.user_alive { 1.0 } else { 0.0 };
        }
        let user_fraction = user_fraction.clamp(0.0, 1.0);
        match (self.user_alive, self.spouse_alive) {
            (true, true) => 1.0,
            (true, false) => user_fraction,
            (false, true) => 1.0 - user_fraction,
            (false, false) => 0.0,
        }
    }
}

pub fn next_series_amount(
    previous: Option<f64>,
    initial_amount: f64,
    change: &ChangeSpec,
    inflation_adjusted: bool,
    inflation: f64,
    rng: &mut Rng,
) -> f64 {
    match previous {
        None => initial_amount.max(0.0),
        Some(previous) => {
            let mut current = previous + rng.sample_change(change, previous);
            if inflation_adjusted {
                current *= 1.0 + inflation;
            }
            current.max(0.0)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncomeOutcome {
    pub total: f64,
    pub social_security: f64,
    pub items: Vec<(String, f64)>,
}

pub fn process_income(
    scenario: &Scenario,
    timeline: &EventTimeline,
    year: i32,
    inflation: f64,
    household: Household,
    totals: &mut RunningTotals,
    rng: &mut Rng,
) -> IncomeOutcome {
    let mut outcome = IncomeOutcome::default();

    for event in &scenario.event_series {
        let EventKind::Income(income) = &event.kind else {
            continue;
        };
        if !timeline.is_active(&event.name, year) {
            continue;
        }

        let previous = totals.previous_amounts.get(&event.name).copied();
        let current = next_series_amount(
            previous,
            income.initial_amount,
            &income.change,
            income.inflation_adjusted,
            inflation,
            rng,
        );
        totals.previous_amounts.insert(event.name.clone(), current);

        let received = current * household.survivor_share(income.user_fraction);
        totals.cash += received;
        if income.social_security {
            totals.social_security += received;
            outcome.social_security += received;
        } else {
            totals.ordinary_income += received;
        }
        outcome.total += received;
        outcome.items.push((event.name.clone(), received));
    }

    outcome
}

#[derive(Debug, Clone, PartialEq)]
pub struct DueExpense {
    pub name: String,
    pub amount: f64,
    pub discretionary: bool,
}

/// This year's amount for every active expense series, in series order.
pub fn expenses_due(
    scenario: &Scenario,
    timeline: &EventTimeline,
    year: i32,
    inflation: f64,
    household: Household,
    totals: &mut RunningTotals,
    rng: &mut Rng,
) -> Vec<DueExpense> {
    let mut due = Vec::new();

    for event in &scenario.event_series {
        let EventKind::Expense(expense) = &event.kind else {
            continue;
        };
        if !timeline.is_active(&event.name, year) {
            continue;
        }

        let previous = totals.previous_amounts.get(&event.name).copied();
        let current = next_series_amount(
            previous,
            expense.initial_amount,
            &expense.change,
            expense.inflation_adjusted,
            inflation,
            rng,
        );
        totals.previous_amounts.insert(event.name.clone(), current);

        due.push(DueExpense {
            name: event.name.clone(),
            amount: current * household.survivor_share(expense.user_fraction),
            discretionary: expense.discretionary,
        });
    }

    due
}
