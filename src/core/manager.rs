use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::audit::{AuditSink, LogAudit, NullAudit};
use super::engine::{SimulationContext, run_trial};
use super::error::{SimResult, SimulationError};
use super::rng::derive_seed;
use super::stats::{AggregateStatistics, RunStatus, TrialFailure, aggregate};
use super::sweep::{SweepCombination, apply_overrides};
use super::types::{Scenario, TrialResult};

pub trait ScenarioSource: Send + Sync {
    fn resolve(&self, scenario_id: &str) -> SimResult<Scenario>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryScenarios {
    scenarios: BTreeMap<String, Scenario>,
}

impl InMemoryScenarios {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, scenario: Scenario) {
        self.scenarios.insert(id.into(), scenario);
    }
}

impl ScenarioSource for InMemoryScenarios {
    fn resolve(&self, scenario_id: &str) -> SimResult<Scenario> {
        self.scenarios
            .get(scenario_id)
            .cloned()
            .ok_or_else(|| SimulationError::DataUnavailable(format!("unknown scenario '{scenario_id}'")))
    }
}

/// One unit of pool work: a single trial of a single sweep combination.
#[derive(Debug, Clone)]
pub struct TrialTask {
    pub id: usize,
    pub combination: usize,
    pub trial: u32,
    pub seed: u64,
    pub base: Arc<SimulationContext>,
    pub overrides: Arc<SweepCombination>,
    pub audit: bool,
}

#[derive(Debug)]
pub struct TaskOutcome {
    pub id: usize,
    pub combination: usize,
    pub trial: u32,
    pub result: SimResult<TrialResult>,
}

/// Applies the task's overrides to a copy of the base scenario and runs it.
pub fn execute_task(task: &TrialTask) -> SimResult<TrialResult> {
    let mut audit: Box<dyn AuditSink> = if task.audit {
        Box::new(LogAudit::new(task.combination, task.trial))
    } else {
        Box::new(NullAudit)
    };

    if task.overrides.overrides.is_empty() {
        return run_trial(&task.base, task.trial, task.seed, audit.as_mut());
    }
    let scenario = apply_overrides(&task.base.scenario, &task.overrides.overrides)?;
    let ctx = SimulationContext::new(scenario, task.base.start_year);
    run_trial(&ctx, task.trial, task.seed, audit.as_mut())
}

/// Fixed number of worker slots in front of a FIFO queue. Each dispatched task
/// runs on tokio's blocking pool and reports back on an mpsc channel; the pool
/// hands the freed slot to the next queued task as soon as a report arrives.
pub struct TrialPool<F>
where
    F: Fn(&TrialTask) -> SimResult<TrialResult> + Send + Sync + 'static,
{
    runner: Arc<F>,
    idle: usize,
    in_flight: usize,
    queue: VecDeque<TrialTask>,
    done_tx: mpsc::UnboundedSender<TaskOutcome>,
    done_rx: mpsc::UnboundedReceiver<TaskOutcome>,
}

impl<F> TrialPool<F>
where
    F: Fn(&TrialTask) -> SimResult<TrialResult> + Send + Sync + 'static,
{
    pub fn new(workers: usize, runner: F) -> Self {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Self {
            runner: Arc::new(runner),
            idle: workers.max(1),
            in_flight: 0,
            queue: VecDeque::new(),
            done_tx,
            done_rx,
        }
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn enqueue(&mut self, task: TrialTask) {
        if self.idle > 0 {
            self.dispatch(task);
        } else {
            self.queue.push_back(task);
        }
    }

    fn dispatch(&mut self, task: TrialTask) {
        self.idle -= 1;
        self.in_flight += 1;

        let runner = Arc::clone(&self.runner);
        let done_tx = self.done_tx.clone();
        let (id, combination, trial) = (task.id, task.combination, task.trial);

        tokio::spawn(async move {
            let result = match tokio::task::spawn_blocking(move || runner(&task)).await {
                Ok(result) => result,
                Err(err) if err.is_panic() => Err(SimulationError::WorkerFailed(format!(
                    "trial {trial} of combination {combination} panicked"
                ))),
                Err(err) => Err(SimulationError::WorkerFailed(err.to_string())),
            };
            // The receiver lives as long as the pool; a closed channel means nobody is waiting.
            let _ = done_tx.send(TaskOutcome {
                id,
                combination,
                trial,
                result,
            });
        });
    }

    /// Waits until every enqueued task has settled. Outcomes are returned in
    /// task-id order regardless of completion order.
    pub async fn settle(mut self) -> Vec<TaskOutcome> {
        let mut outcomes = Vec::new();
        while self.in_flight > 0 {
            let Some(outcome) = self.done_rx.recv().await else {
                break;
            };
            self.in_flight -= 1;
            self.idle += 1;
            outcomes.push(outcome);
            if let Some(next) = self.queue.pop_front() {
                self.dispatch(next);
            }
        }
        outcomes.sort_by_key(|o| o.id);
        outcomes
    }
}

fn default_trials() -> u32 {
    1000
}

fn default_seed() -> u64 {
    42
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationRequest {
    pub scenario_id: String,
    #[serde(default)]
    pub start_year: Option<i32>,
    #[serde(default = "default_trials")]
    pub trials: u32,
    #[serde(default)]
    pub sweep: Vec<SweepCombination>,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub audit: bool,
}

impl SimulationRequest {
    pub fn new(scenario_id: impl Into<String>, trials: u32) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            start_year: None,
            trials,
            sweep: Vec::new(),
            seed: default_seed(),
            workers: default_workers(),
            audit: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResponse {
    pub scenario: String,
    pub start_year: i32,
    pub seed: u64,
    pub status: RunStatus,
    pub results: Vec<AggregateStatistics>,
}

fn overall_status(results: &[AggregateStatistics]) -> RunStatus {
    if results.iter().all(|r| r.status == RunStatus::Complete) {
        RunStatus::Complete
    } else if results.iter().all(|r| r.status == RunStatus::Failed) {
        RunStatus::Failed
    } else {
        RunStatus::Partial
    }
}

/// Runs every requested trial of every sweep combination on a worker pool and
/// aggregates the survivors per combination.
pub async fn simulate(
    request: &SimulationRequest,
    source: &dyn ScenarioSource,
) -> SimResult<SimulationResponse> {
    let scenario = source.resolve(&request.scenario_id)?;
    let start_year = request
        .start_year
        .or(scenario.start_year)
        .ok_or_else(|| {
            SimulationError::DataUnavailable(format!(
                "no start year given for scenario '{}'",
                request.scenario_id
            ))
        })?;

    let combinations: Vec<Arc<SweepCombination>> = if request.sweep.is_empty() {
        vec![Arc::new(SweepCombination::default())]
    } else {
        request.sweep.iter().cloned().map(Arc::new).collect()
    };

    let workers = request.workers.max(1);
    log::info!(
        "simulating '{}' from {}: {} trials x {} combinations on {} workers",
        scenario.name,
        start_year,
        request.trials,
        combinations.len(),
        workers
    );

    let base = Arc::new(SimulationContext::new(scenario, start_year));
    let mut pool = TrialPool::new(workers, execute_task);
    let mut next_id = 0;
    for (combination, overrides) in combinations.iter().enumerate() {
        for trial in 0..request.trials {
            pool.enqueue(TrialTask {
                id: next_id,
                combination,
                trial,
                seed: derive_seed(request.seed, combination as u32, trial),
                base: Arc::clone(&base),
                overrides: Arc::clone(overrides),
                audit: request.audit && trial == 0,
            });
            next_id += 1;
        }
    }
    log::debug!("{} tasks queued behind {} workers", pool.queued(), workers);

    let outcomes = pool.settle().await;

    let mut per_combination: Vec<(Vec<TrialResult>, Vec<TrialFailure>)> =
        (0..combinations.len()).map(|_| (Vec::new(), Vec::new())).collect();
    for outcome in outcomes {
        let (results, failures) = &mut per_combination[outcome.combination];
        match outcome.result {
            Ok(result) => results.push(result),
            Err(err) => {
                log::warn!(
                    "combination {} trial {} failed: {err}",
                    outcome.combination,
                    outcome.trial
                );
                failures.push(TrialFailure {
                    trial_index: outcome.trial,
                    error: err.to_string(),
                });
            }
        }
    }

    let results: Vec<AggregateStatistics> = combinations
        .iter()
        .zip(per_combination)
        .map(|(overrides, (results, failures))| {
            let stats = aggregate(
                overrides.as_ref().clone(),
                request.trials as usize,
                results,
                failures,
            );
            log::info!(
                "[{}] {:?}: {}/{} trials, success {:.1}%, median final assets {:.0}",
                stats.combination,
                stats.status,
                stats.completed_simulations,
                stats.total_simulations,
                stats.success_probability * 100.0,
                stats.median
            );
            stats
        })
        .collect();

    Ok(SimulationResponse {
        scenario: request.scenario_id.clone(),
        start_year,
        seed: request.seed,
        status: overall_status(&results),
        results,
    })
}
