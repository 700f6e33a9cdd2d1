use std::collections::BTreeMap;

use serde::Serialize;

use super::sweep::SweepCombination;
use super::types::TrialResult;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Complete,
    Partial,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearPercentiles {
    pub year: i32,
    pub trials: usize,
    pub p10: f64,
    pub p25: f64,
    pub median: f64,
    pub p75: f64,
    pub p90: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearProbability {
    pub year: i32,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialFailure {
    pub trial_index: u32,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStatistics {
    pub combination: String,
    pub overrides: SweepCombination,
    pub status: RunStatus,
    pub total_simulations: usize,
    pub completed_simulations: usize,
    pub failed_simulations: usize,
    pub median: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub success_probability: f64,
    pub success_curve: Vec<YearProbability>,
    pub percentiles: Vec<YearPercentiles>,
    pub failures: Vec<TrialFailure>,
    pub all_trial_results: Vec<TrialResult>,
}

pub fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}

fn final_assets(trial: &TrialResult) -> f64 {
    trial.years.last().map(|y| y.total_assets).unwrap_or(0.0)
}

fn trial_succeeded(trial: &TrialResult) -> bool {
    trial.years.iter().all(|y| y.meets_goal)
}

/// Summarises the surviving trials of one combination. `results` must already
/// be ordered by trial index.
pub fn aggregate(
    overrides: SweepCombination,
    total_simulations: usize,
    results: Vec<TrialResult>,
    failures: Vec<TrialFailure>,
) -> AggregateStatistics {
    let completed = results.len();
    let status = if completed == 0 {
        RunStatus::Failed
    } else if failures.is_empty() {
        RunStatus::Complete
    } else {
        RunStatus::Partial
    };

    let mut finals: Vec<f64> = results.iter().map(final_assets).collect();
    let (median, mean, min, max) = if finals.is_empty() {
        (0.0, 0.0, 0.0, 0.0)
    } else {
        let mean = finals.iter().sum::<f64>() / finals.len() as f64;
        let min = finals.iter().copied().fold(f64::INFINITY, f64::min);
        let max = finals.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (percentile(&mut finals, 50.0), mean, min, max)
    };

    let success_probability = if completed == 0 {
        0.0
    } else {
        results.iter().filter(|t| trial_succeeded(t)).count() as f64 / completed as f64
    };

    let mut by_year: BTreeMap<i32, (Vec<f64>, usize)> = BTreeMap::new();
    for trial in &results {
        for year in &trial.years {
            let entry = by_year.entry(year.year).or_default();
            entry.0.push(year.total_assets);
            if year.meets_goal {
                entry.1 += 1;
            }
        }
    }

    let mut percentiles = Vec::with_capacity(by_year.len());
    let mut success_curve = Vec::with_capacity(by_year.len());
    for (year, (mut assets, successes)) in by_year {
        let trials = assets.len();
        success_curve.push(YearProbability {
            year,
            probability: successes as f64 / trials as f64,
        });
        percentiles.push(YearPercentiles {
            year,
            trials,
            p10: percentile(&mut assets, 10.0),
            p25: percentile(&mut assets, 25.0),
            median: percentile(&mut assets, 50.0),
            p75: percentile(&mut assets, 75.0),
            p90: percentile(&mut assets, 90.0),
        });
    }

    AggregateStatistics {
        combination: overrides.label(),
        overrides,
        status,
        total_simulations,
        completed_simulations: completed,
        failed_simulations: failures.len(),
        median,
        mean,
        min,
        max,
        success_probability,
        success_curve,
        percentiles,
        failures,
        all_trial_results: results,
    }
}
