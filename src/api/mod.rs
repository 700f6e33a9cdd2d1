use clap::Parser;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::{
    Scenario, ScenarioSource, SimResult, SimulationError, SimulationRequest, SimulationResponse,
    SweepCombination, SweepPlan, simulate,
};

#[derive(Parser, Debug)]
#[command(
    name = "fireplan",
    about = "Monte Carlo retirement plan simulator (income, RMDs, Roth conversions, investing, expenses)"
)]
pub struct Cli {
    #[arg(long, help = "Scenario JSON file")]
    scenario: PathBuf,
    #[arg(long, default_value_t = 1000)]
    trials: u32,
    #[arg(long, help = "Worker count; defaults to available parallelism")]
    workers: Option<usize>,
    #[arg(long, help = "First simulated year; defaults to the scenario's startYear")]
    start_year: Option<i32>,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(
        long,
        help = "Sweep JSON file with \"combinations\" and/or \"dimensions\" of overrides"
    )]
    sweep: Option<PathBuf>,
    #[arg(long, help = "Write the response JSON here instead of stdout")]
    output: Option<PathBuf>,
    #[arg(
        long,
        default_value_t = false,
        help = "Trace the first trial of every combination (shown with RUST_LOG=trace)"
    )]
    audit: bool,
}

/// Resolves scenario ids as paths to JSON files.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFileScenarios;

impl ScenarioSource for JsonFileScenarios {
    fn resolve(&self, scenario_id: &str) -> SimResult<Scenario> {
        let raw = fs::read_to_string(scenario_id).map_err(|e| {
            SimulationError::DataUnavailable(format!("cannot read scenario '{scenario_id}': {e}"))
        })?;
        parse_scenario(&raw)
            .map_err(|e| SimulationError::DataUnavailable(format!("scenario '{scenario_id}': {e}")))
    }
}

pub fn parse_scenario(raw: &str) -> Result<Scenario, String> {
    serde_json::from_str(raw).map_err(|e| format!("invalid scenario JSON: {e}"))
}

pub fn parse_sweep(raw: &str) -> Result<Vec<SweepCombination>, String> {
    let plan: SweepPlan =
        serde_json::from_str(raw).map_err(|e| format!("invalid sweep JSON: {e}"))?;
    let combinations = plan.expand();
    if combinations.is_empty() {
        return Err("--sweep file must list at least one combination or dimension".to_string());
    }
    Ok(combinations)
}

fn load_sweep(path: &Path) -> Result<Vec<SweepCombination>, String> {
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("cannot read --sweep file {}: {e}", path.display()))?;
    parse_sweep(&raw)
}

fn build_request(cli: &Cli, sweep: Vec<SweepCombination>) -> Result<SimulationRequest, String> {
    if cli.trials == 0 {
        return Err("--trials must be > 0".to_string());
    }

    if cli.workers == Some(0) {
        return Err("--workers must be > 0".to_string());
    }

    if let Some(year) = cli.start_year {
        if !(1900..=2200).contains(&year) {
            return Err("--start-year must be between 1900 and 2200".to_string());
        }
    }

    let mut request = SimulationRequest::new(cli.scenario.to_string_lossy(), cli.trials);
    request.start_year = cli.start_year;
    request.seed = cli.seed;
    request.sweep = sweep;
    request.audit = cli.audit;
    if let Some(workers) = cli.workers {
        request.workers = workers;
    }
    Ok(request)
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn render_response(response: &SimulationResponse) -> Result<String, String> {
    serde_json::to_string_pretty(response).map_err(|e| format!("cannot encode response: {e}"))
}

pub async fn run(cli: Cli) -> Result<(), String> {
    let sweep = match &cli.sweep {
        Some(path) => load_sweep(path)?,
        None => Vec::new(),
    };
    let request = build_request(&cli, sweep)?;

    let body = match simulate(&request, &JsonFileScenarios).await {
        Ok(response) => render_response(&response)?,
        Err(err) => {
            let body = serde_json::to_string_pretty(&ErrorResponse {
                error: err.to_string(),
            })
            .map_err(|e| format!("cannot encode error: {e}"))?;
            write_output(cli.output.as_deref(), &body)?;
            return Err(err.to_string());
        }
    };
    write_output(cli.output.as_deref(), &body)
}

fn write_output(path: Option<&Path>, body: &str) -> Result<(), String> {
    match path {
        Some(path) => fs::write(path, body)
            .map_err(|e| format!("cannot write --output file {}: {e}", path.display())),
        None => {
            println!("{body}");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        EventKind, InMemoryScenarios, ParameterOverride, RunStatus, StartSpec, StrategyKind,
        TaxStatus,
    };

    const DEMO_SCENARIO: &str = include_str!("../../demos/retirement.json");

    fn sample_cli() -> Cli {
        Cli::parse_from(["fireplan", "--scenario", "demos/retirement.json"])
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("fireplan-{}-{name}", std::process::id()))
    }

    #[test]
    fn cli_defaults_match_documented_values() {
        let cli = sample_cli();
        assert_eq!(cli.trials, 1000);
        assert_eq!(cli.seed, 42);
        assert!(cli.workers.is_none());
        assert!(!cli.audit);

        let request = build_request(&cli, Vec::new()).expect("valid request");
        assert_eq!(request.scenario_id, "demos/retirement.json");
        assert!(request.workers >= 1);
        assert!(request.start_year.is_none());
    }

    #[test]
    fn build_request_rejects_zero_trials() {
        let mut cli = sample_cli();
        cli.trials = 0;
        let err = build_request(&cli, Vec::new()).expect_err("must reject zero trials");
        assert!(err.contains("--trials"));
    }

    #[test]
    fn build_request_rejects_zero_workers() {
        let mut cli = sample_cli();
        cli.workers = Some(0);
        let err = build_request(&cli, Vec::new()).expect_err("must reject zero workers");
        assert!(err.contains("--workers"));
    }

    #[test]
    fn build_request_rejects_implausible_start_year() {
        let mut cli = sample_cli();
        cli.start_year = Some(1066);
        let err = build_request(&cli, Vec::new()).expect_err("must reject start year");
        assert!(err.contains("--start-year"));
    }

    #[test]
    fn demo_scenario_parses_with_camel_case_keys() {
        let scenario = parse_scenario(DEMO_SCENARIO).expect("demo scenario");
        assert!(scenario.married);
        assert_eq!(scenario.start_year, Some(2025));
        assert_eq!(scenario.investments.len(), 5);
        assert_eq!(scenario.investments[1].tax_status, TaxStatus::PreTax);
        assert_eq!(scenario.investments[0].cost_basis, Some(150_000.0));
        assert!(scenario.strategy(StrategyKind::ExpenseWithdrawal).is_some());
        assert!(matches!(
            scenario.event("travel").map(|e| &e.start),
            Some(StartSpec::SameAs { event }) if event == "social security"
        ));
        let Some(EventKind::Income(ss)) = scenario.event("social security").map(|e| &e.kind) else {
            panic!("expected income series");
        };
        assert!(ss.social_security);
        assert_eq!(scenario.tax_tables.early_withdrawal_penalty, 0.10);
    }

    #[test]
    fn unknown_distribution_kind_is_rejected_at_parse_time() {
        let raw = DEMO_SCENARIO.replacen("\"type\": \"normal\"", "\"type\": \"lognormal\"", 1);
        let err = parse_scenario(&raw).expect_err("must reject unknown kind");
        assert!(err.contains("invalid scenario JSON"));
    }

    #[test]
    fn parse_sweep_expands_dimensions() {
        let combos = parse_sweep(
            r#"{"dimensions": [
                [{"type": "rothOptimizer", "enabled": true}, {"type": "rothOptimizer", "enabled": false}],
                [{"type": "duration", "event": "salary", "years": 2}, {"type": "duration", "event": "salary", "years": 5}]
            ]}"#,
        )
        .expect("sweep");
        assert_eq!(combos.len(), 4);
        assert_eq!(
            combos[3].overrides,
            vec![
                ParameterOverride::RothOptimizer { enabled: false },
                ParameterOverride::Duration {
                    event: "salary".to_string(),
                    years: 5.0
                },
            ]
        );

        let err = parse_sweep("{}").expect_err("empty sweep");
        assert!(err.contains("--sweep"));
    }

    #[test]
    fn json_file_source_reports_missing_file_as_data_unavailable() {
        let path = temp_path("missing.json");
        let err = JsonFileScenarios
            .resolve(&path.to_string_lossy())
            .expect_err("missing file");
        assert!(matches!(err, SimulationError::DataUnavailable(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn demo_scenario_simulates_end_to_end() {
        let mut source = InMemoryScenarios::new();
        source.insert("demo", parse_scenario(DEMO_SCENARIO).expect("demo scenario"));
        let mut request = SimulationRequest::new("demo", 12);
        request.workers = 3;

        let response = simulate(&request, &source).await.expect("simulate");
        assert_eq!(response.status, RunStatus::Complete);
        let stats = &response.results[0];
        assert_eq!(stats.completed_simulations, 12);
        assert!(!stats.percentiles.is_empty());
        assert_eq!(stats.percentiles[0].year, 2025);
        assert!((0.0..=1.0).contains(&stats.success_probability));
        for trial in &stats.all_trial_results {
            assert!(trial.years.iter().all(|y| y.holdings.iter().all(|h| h.value >= 0.0)));
        }

        let body = render_response(&response).expect("json");
        assert!(body.contains("\"successCurve\""));
        assert!(body.contains("\"allTrialResults\""));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_writes_response_file() {
        let scenario_path = temp_path("scenario.json");
        let output_path = temp_path("out.json");
        fs::write(&scenario_path, DEMO_SCENARIO).expect("write scenario");

        let scenario_arg = scenario_path.to_string_lossy().into_owned();
        let output_arg = output_path.to_string_lossy().into_owned();
        let cli = Cli::parse_from([
            "fireplan",
            "--scenario",
            scenario_arg.as_str(),
            "--trials",
            "4",
            "--workers",
            "2",
            "--output",
            output_arg.as_str(),
        ]);
        run(cli).await.expect("run");

        let written = fs::read_to_string(&output_path).expect("output");
        let value: serde_json::Value = serde_json::from_str(&written).expect("json");
        assert_eq!(value["status"], "complete");
        assert_eq!(value["results"][0]["totalSimulations"], 4);

        let _ = fs::remove_file(scenario_path);
        let _ = fs::remove_file(output_path);
    }
}
