mod allocation;
mod audit;
mod engine;
mod error;
mod events;
mod expenses;
mod manager;
mod rng;
mod state;
mod stats;
mod strategy;
mod sweep;
mod tax;
mod types;

pub use audit::{AuditCategory, AuditEntry, AuditSink, LogAudit, MemoryAudit, NullAudit};
pub use engine::{SimulationContext, run_trial, validate_scenario};
pub use error::{ConfigurationError, SimResult, SimulationError};
pub use manager::{
    InMemoryScenarios, ScenarioSource, SimulationRequest, SimulationResponse, TaskOutcome,
    TrialPool, TrialTask, execute_task, simulate,
};
pub use rng::derive_seed;
pub use stats::{AggregateStatistics, RunStatus, TrialFailure, YearPercentiles, YearProbability};
pub use sweep::{ParameterOverride, SweepCombination, SweepPlan, apply_overrides};
pub use types::{
    AllocationSpec, BracketSet, ChangeMode, ChangeSpec, Distribution, EventKind, EventSeries,
    ExpenseEvent, FilingStatus, HoldingSnapshot, IncomeEvent, InvestEvent, Investment,
    InvestmentType, RebalanceEvent, Scenario, StartSpec, StrategyKind, StrategyOrdering,
    TaxBracket, TaxStatus, TaxTables, TrialResult, YearWindow, YearlyResult,
};
