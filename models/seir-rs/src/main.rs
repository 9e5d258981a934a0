use std::path::PathBuf;

use anyhow::Context;
use log::info;
use serde::{Deserialize, Serialize};

use seir::{
    PeakSummary, RawParameters, SampleGrid, SimulationParameters, SimulationResult,
    SolverConfig, SolverStats, integrate_with,
};

/// The `input` table of a run request. Unknown keys are rejected so a
/// misspelled parameter cannot fall back to its default.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SeirInput {
    population: i64,
    beta: f64,
    sigma: f64,
    gamma: f64,
    initial_infected: i64,
    initial_recovered: i64,
    initial_exposed: i64,
    horizon_days: i64,
    solver: SolverConfig,
    grid: SampleGrid,
}

impl Default for SeirInput {
    fn default() -> Self {
        let defaults = RawParameters::default();
        Self {
            population: defaults.population,
            beta: defaults.beta,
            sigma: defaults.sigma,
            gamma: defaults.gamma,
            initial_infected: defaults.initial_infected,
            initial_recovered: defaults.initial_recovered,
            initial_exposed: defaults.initial_exposed,
            horizon_days: defaults.horizon_days,
            solver: SolverConfig::default(),
            grid: SampleGrid::default(),
        }
    }
}

impl SeirInput {
    fn parameters(&self) -> RawParameters {
        RawParameters {
            population: self.population,
            beta: self.beta,
            sigma: self.sigma,
            gamma: self.gamma,
            initial_infected: self.initial_infected,
            initial_recovered: self.initial_recovered,
            initial_exposed: self.initial_exposed,
            horizon_days: self.horizon_days,
        }
    }
}

#[derive(Debug, Serialize)]
struct RunSummary {
    parameters: SimulationParameters,
    basic_reproduction_number: f64,
    grid: SampleGrid,
    solver: SolverConfig,
    solver_stats: SolverStats,
    summary: PeakSummary,
    timeline_sha256: String,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let request = std::env::args_os().nth(1).map(PathBuf::from);
    let env = mrp::Environment::<SeirInput>::load(request.as_deref())
        .context("failed to load run request")?;
    let input = &env.input;

    let parameters = input
        .parameters()
        .validate()
        .context("invalid model parameters")?;
    info!(
        "running SEIR model: N={} beta={} sigma={} gamma={} (R0={:.2}) over {} days",
        parameters.population,
        parameters.beta,
        parameters.sigma,
        parameters.gamma,
        parameters.basic_reproduction_number(),
        parameters.horizon_days
    );

    let result = integrate_with(&parameters, &input.solver, input.grid)
        .context("SEIR integration failed")?;
    for line in result.summary.to_string().lines() {
        info!("{line}");
    }

    let timeline_sha256 = env
        .write_csv(
            "seir_output.csv",
            &SimulationResult::CSV_HEADERS,
            &result.csv_rows(),
        )
        .context("failed to write timeline")?;
    info!("wrote seir_output.csv (sha256 {timeline_sha256})");

    // Without an output directory the timeline alone goes to stdout
    if env.output_dir().is_some() {
        let summary = RunSummary {
            parameters,
            basic_reproduction_number: parameters.basic_reproduction_number(),
            grid: input.grid,
            solver: input.solver,
            solver_stats: result.solver_stats,
            summary: result.summary,
            timeline_sha256,
        };
        let digest = env
            .write_json("seir_summary.json", &summary)
            .context("failed to write summary")?;
        info!("wrote seir_summary.json (sha256 {digest})");
    }

    Ok(())
}
