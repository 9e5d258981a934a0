use log::debug;
use nalgebra::Vector4;
use serde::{Deserialize, Serialize};

use crate::{
    error::{SeirError, SeirResult},
    output::{CompartmentState, PeakSummary, SimulationResult},
    parameters::{MAX_HORIZON_DAYS, SimulationParameters},
    solver::{self, SolverConfig},
};

/// Right-hand side of the SEIR system with its coefficients fixed.
#[derive(Debug, Clone, Copy)]
pub struct SeirModel {
    population: f64,
    beta: f64,
    sigma: f64,
    gamma: f64,
}

impl SeirModel {
    pub fn new(parameters: &SimulationParameters) -> SeirResult<Self> {
        if parameters.population == 0 {
            return Err(SeirError::Numerical(
                "population is zero, force of infection is undefined".into(),
            ));
        }
        Ok(Self {
            population: parameters.population as f64,
            beta: parameters.beta,
            sigma: parameters.sigma,
            gamma: parameters.gamma,
        })
    }

    /// `d(S, E, I, R)/dt`
    pub fn derivatives(&self, y: &Vector4<f64>) -> Vector4<f64> {
        let (s, e, i) = (y[0], y[1], y[2]);
        let infection = self.beta * s * i / self.population;
        let onset = self.sigma * e;
        let recovery = self.gamma * i;
        Vector4::new(
            -infection,
            infection - onset,
            onset - recovery,
            recovery,
        )
    }
}

/// Which days the trajectory is sampled on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleGrid {
    /// Days `0..horizon_days`, so the last sample is one day before the horizon.
    #[default]
    Daily,
    /// `horizon_days` evenly spaced points over `[0, horizon_days]`, truncated
    /// to whole days. One day in the interior is skipped and the horizon
    /// itself is sampled.
    Linspace,
}

impl SampleGrid {
    pub fn days(self, horizon_days: u64) -> Vec<u64> {
        match self {
            SampleGrid::Daily => (0..horizon_days).collect(),
            SampleGrid::Linspace => {
                if horizon_days <= 1 {
                    return vec![0; horizon_days as usize];
                }
                let step = horizon_days as f64 / (horizon_days - 1) as f64;
                (0..horizon_days)
                    .map(|k| {
                        if k == horizon_days - 1 {
                            horizon_days
                        } else {
                            (k as f64 * step) as u64
                        }
                    })
                    .collect()
            }
        }
    }
}

/// Integrates with the default tolerances on the daily grid.
pub fn integrate(parameters: &SimulationParameters) -> SeirResult<SimulationResult> {
    integrate_with(parameters, &SolverConfig::default(), SampleGrid::Daily)
}

pub fn integrate_with(
    parameters: &SimulationParameters,
    config: &SolverConfig,
    grid: SampleGrid,
) -> SeirResult<SimulationResult> {
    if parameters.horizon_days > MAX_HORIZON_DAYS as u64 {
        return Err(SeirError::Range {
            field: "horizon_days",
            value: parameters.horizon_days.to_string(),
            expected: "1..=3650",
        });
    }
    let model = SeirModel::new(parameters)?;
    let days = grid.days(parameters.horizon_days);
    let t_eval: Vec<f64> = days.iter().map(|&day| day as f64).collect();

    let solution = solver::solve(
        |_, y| model.derivatives(y),
        (0.0, parameters.horizon_days as f64),
        parameters.initial_state(),
        &t_eval,
        config,
    )?;
    debug!(
        "solver finished: {} accepted, {} rejected steps, {} rhs evaluations",
        solution.stats.accepted_steps,
        solution.stats.rejected_steps,
        solution.stats.rhs_evaluations
    );

    if solution.y.len() != days.len() {
        return Err(SeirError::Numerical(format!(
            "solver returned {} samples for {} days",
            solution.y.len(),
            days.len()
        )));
    }

    let timeline: Vec<CompartmentState> = days
        .iter()
        .zip(&solution.y)
        .map(|(&day, y)| CompartmentState::rounded(day, y))
        .collect();
    let summary = PeakSummary::from_timeline(&timeline, parameters.population)?;

    Ok(SimulationResult {
        timeline,
        summary,
        solver_stats: solution.stats,
    })
}

#[cfg(test)]
mod test {
    use crate::{
        error::SeirError,
        model::{SampleGrid, SeirModel, integrate, integrate_with},
        output::Compartment,
        parameters::{RawParameters, SimulationParameters},
        solver::SolverConfig,
    };
    use nalgebra::Vector4;

    fn scenario_a() -> SimulationParameters {
        RawParameters {
            population: 100_000,
            beta: 0.3,
            sigma: 1.0 / 5.2,
            gamma: 1.0 / 10.0,
            initial_infected: 1,
            initial_exposed: 0,
            initial_recovered: 0,
            horizon_days: 365,
        }
        .validate()
        .unwrap()
    }

    #[test]
    fn test_derivatives_conserve_population() {
        let model = SeirModel::new(&scenario_a()).unwrap();
        let dy = model.derivatives(&Vector4::new(60_000.0, 5_000.0, 15_000.0, 20_000.0));
        assert!(dy.sum().abs() < 1e-9);
        assert!(dy[0] < 0.0);
        assert!(dy[3] > 0.0);
        // -beta * S * I / N = -0.3 * 60000 * 15000 / 100000
        assert!((dy[0] + 2700.0).abs() < 1e-9);
    }

    #[test]
    fn test_classic_epidemic_curve() {
        let params = scenario_a();
        let result = integrate(&params).unwrap();
        let infected = result.series(Compartment::Infected);
        let summary = result.summary;

        assert_eq!(summary.peak_infected, 19_384);
        assert_eq!(summary.peak_day, 122);
        assert_eq!(format!("{:.2}", summary.percent_infected_peak), "19.38");
        assert_eq!(format!("{:.2}", summary.percent_susceptible_peak), "5.95");
        assert_eq!(format!("{:.2}", summary.percent_recovered_peak), "94.05");
        assert_eq!(format!("{:.2}", summary.percent_exposed_peak), "11.56");

        assert_eq!(result.timeline.len(), 365);
        assert_eq!(infected[0], 1);
        assert!(summary.peak_day > 0 && summary.peak_day < 364);
        assert!(summary.peak_infected > 1_000);
        assert!(infected[summary.peak_day / 2] < summary.peak_infected);
        assert!(*infected.last().unwrap() < summary.peak_infected / 100);

        let final_recovered = result.timeline.last().unwrap().recovered;
        assert!(final_recovered > 50_000);
        assert!((summary.percent_recovered_peak - final_recovered as f64 / 1_000.0).abs() < 1e-9);
        assert!(summary.percent_susceptible_peak < 50.0);
    }

    #[test]
    fn test_population_is_conserved() {
        let cases = [
            scenario_a(),
            RawParameters {
                population: 1_000,
                beta: 1.0,
                sigma: 1.0,
                gamma: 0.1,
                initial_infected: 5,
                initial_exposed: 10,
                initial_recovered: 100,
                horizon_days: 200,
            }
            .validate()
            .unwrap(),
            RawParameters {
                population: 5_000_000,
                beta: 0.5,
                sigma: 0.2,
                gamma: 0.25,
                initial_infected: 1000,
                initial_exposed: 500,
                initial_recovered: 0,
                horizon_days: 730,
            }
            .validate()
            .unwrap(),
        ];
        for params in cases {
            let result = integrate(&params).unwrap();
            for state in &result.timeline {
                let drift = (state.total() - params.population as i64).abs();
                assert!(drift <= 4, "day {}: total {}", state.day, state.total());
            }
        }
    }

    #[test]
    fn test_recovered_never_decreases() {
        let result = integrate(&scenario_a()).unwrap();
        let recovered = result.series(Compartment::Recovered);
        assert!(recovered.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn test_no_infection_means_no_spread() {
        let params = RawParameters {
            population: 10_000,
            initial_infected: 0,
            initial_exposed: 0,
            initial_recovered: 250,
            horizon_days: 100,
            ..Default::default()
        }
        .validate()
        .unwrap();
        let result = integrate(&params).unwrap();
        for state in &result.timeline {
            assert_eq!(state.infected, 0);
            assert_eq!(state.exposed, 0);
            assert_eq!(state.susceptible, 9_750);
            assert_eq!(state.recovered, 250);
        }
        assert_eq!(result.summary.peak_infected, 0);
        assert_eq!(result.summary.peak_day, 0);
    }

    #[test]
    fn test_peak_is_bounded_by_population() {
        let params = RawParameters {
            population: 500,
            beta: 1.0,
            sigma: 1.0,
            gamma: 0.1,
            initial_infected: 400,
            horizon_days: 60,
            ..Default::default()
        }
        .validate()
        .unwrap();
        let summary = integrate(&params).unwrap().summary;
        assert!(summary.peak_infected <= 500);
        assert!(summary.percent_infected_peak <= 100.0);
    }

    #[test]
    fn test_deterministic() {
        let params = scenario_a();
        let first = integrate(&params).unwrap();
        let second = integrate(&params).unwrap();
        assert_eq!(first.timeline, second.timeline);
        assert_eq!(first.summary, second.summary);
        assert_eq!(first.solver_stats, second.solver_stats);
    }

    #[test]
    fn test_single_day_horizon_returns_initial_state() {
        let params = RawParameters {
            initial_infected: 7,
            initial_exposed: 3,
            initial_recovered: 2,
            horizon_days: 1,
            ..Default::default()
        }
        .validate()
        .unwrap();
        for grid in [SampleGrid::Daily, SampleGrid::Linspace] {
            let result = integrate_with(&params, &SolverConfig::default(), grid).unwrap();
            assert_eq!(result.timeline.len(), 1);
            let state = result.timeline[0];
            assert_eq!(state.day, 0);
            assert_eq!(
                (state.susceptible, state.exposed, state.infected, state.recovered),
                (99_988, 3, 7, 2)
            );
        }
    }

    #[test]
    fn test_zero_population_is_numerical_error() {
        let params = SimulationParameters {
            population: 0,
            beta: 0.3,
            sigma: 0.2,
            gamma: 0.1,
            initial_infected: 0,
            initial_recovered: 0,
            initial_exposed: 0,
            horizon_days: 10,
        };
        assert!(matches!(integrate(&params), Err(SeirError::Numerical(_))));
    }

    #[test]
    fn test_oversized_horizon_refused_before_allocation() {
        let params = SimulationParameters {
            horizon_days: u64::MAX,
            ..scenario_a()
        };
        assert!(matches!(
            integrate(&params),
            Err(SeirError::Range {
                field: "horizon_days",
                ..
            })
        ));
    }

    #[test]
    fn test_zero_population_never_reaches_solver() {
        let raw = RawParameters {
            population: 0,
            ..Default::default()
        };
        assert!(matches!(raw.validate(), Err(SeirError::Range { field: "population", .. })));
    }

    #[test]
    fn test_daily_grid() {
        assert_eq!(SampleGrid::Daily.days(4), vec![0, 1, 2, 3]);
        assert_eq!(SampleGrid::Daily.days(1), vec![0]);
    }

    #[test]
    fn test_linspace_grid_skips_one_day() {
        let days = SampleGrid::Linspace.days(365);
        assert_eq!(days.len(), 365);
        assert_eq!(&days[..3], &[0, 1, 2]);
        assert_eq!(&days[362..], &[362, 363, 365]);
        assert_eq!(SampleGrid::Linspace.days(4), vec![0, 1, 2, 4]);
        assert_eq!(SampleGrid::Linspace.days(2), vec![0, 2]);
    }

    #[test]
    fn test_linspace_run_samples_the_horizon() {
        let params = scenario_a();
        let result =
            integrate_with(&params, &SolverConfig::default(), SampleGrid::Linspace).unwrap();
        assert_eq!(result.timeline.len(), 365);
        assert_eq!(result.timeline.last().unwrap().day, 365);
    }

    #[test]
    fn test_grid_deserializes_lowercase() {
        let grid: SampleGrid = serde_json::from_str("\"linspace\"").unwrap();
        assert_eq!(grid, SampleGrid::Linspace);
    }
}
