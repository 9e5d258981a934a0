use std::fmt;

use nalgebra::Vector4;
use serde::Serialize;

use crate::error::{SeirError, SeirResult};
use crate::solver::SolverStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compartment {
    Susceptible,
    Exposed,
    Infected,
    Recovered,
}

/// Whole-individual compartment counts on one simulated day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompartmentState {
    pub day: u64,
    pub susceptible: i64,
    pub exposed: i64,
    pub infected: i64,
    pub recovered: i64,
}

impl CompartmentState {
    /// Rounds an `(S, E, I, R)` state half-to-even.
    pub fn rounded(day: u64, y: &Vector4<f64>) -> Self {
        let round = |v: f64| v.round_ties_even() as i64;
        Self {
            day,
            susceptible: round(y[0]),
            exposed: round(y[1]),
            infected: round(y[2]),
            recovered: round(y[3]),
        }
    }

    pub fn get(&self, compartment: Compartment) -> i64 {
        match compartment {
            Compartment::Susceptible => self.susceptible,
            Compartment::Exposed => self.exposed,
            Compartment::Infected => self.infected,
            Compartment::Recovered => self.recovered,
        }
    }

    pub fn total(&self) -> i64 {
        self.susceptible + self.exposed + self.infected + self.recovered
    }
}

/// Peak statistics of a run.
///
/// Only `peak_infected` and `peak_day` describe the infection peak itself.
/// The susceptible, recovered and exposed percentages each come from that
/// compartment's own extremum over the whole timeline (minimum for
/// susceptible, maximum otherwise), not from the state on `peak_day`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PeakSummary {
    pub peak_infected: i64,
    /// Index of the first sample attaining `peak_infected`.
    pub peak_day: usize,
    pub percent_infected_peak: f64,
    pub percent_susceptible_peak: f64,
    pub percent_recovered_peak: f64,
    pub percent_exposed_peak: f64,
}

impl PeakSummary {
    pub fn from_timeline(timeline: &[CompartmentState], population: u64) -> SeirResult<Self> {
        if population == 0 {
            return Err(SeirError::Numerical(
                "population is zero, percentages are undefined".into(),
            ));
        }
        let Some(first) = timeline.first() else {
            return Err(SeirError::Numerical("empty timeline".into()));
        };

        let mut peak_infected = first.infected;
        let mut peak_day = 0;
        let mut min_susceptible = first.susceptible;
        let mut max_recovered = first.recovered;
        let mut max_exposed = first.exposed;
        for (index, state) in timeline.iter().enumerate().skip(1) {
            if state.infected > peak_infected {
                peak_infected = state.infected;
                peak_day = index;
            }
            min_susceptible = min_susceptible.min(state.susceptible);
            max_recovered = max_recovered.max(state.recovered);
            max_exposed = max_exposed.max(state.exposed);
        }

        let percent = |count: i64| count as f64 / population as f64 * 100.0;
        Ok(Self {
            peak_infected,
            peak_day,
            percent_infected_peak: percent(peak_infected),
            percent_susceptible_peak: percent(min_susceptible),
            percent_recovered_peak: percent(max_recovered),
            percent_exposed_peak: percent(max_exposed),
        })
    }
}

impl fmt::Display for PeakSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "peak infected: {}", self.peak_infected)?;
        writeln!(f, "peak day: {}", self.peak_day)?;
        writeln!(f, "infected at peak: {:.2}%", self.percent_infected_peak)?;
        writeln!(f, "susceptible at peak: {:.2}%", self.percent_susceptible_peak)?;
        writeln!(f, "recovered at peak: {:.2}%", self.percent_recovered_peak)?;
        write!(f, "exposed at peak: {:.2}%", self.percent_exposed_peak)
    }
}

#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub timeline: Vec<CompartmentState>,
    pub summary: PeakSummary,
    pub solver_stats: SolverStats,
}

impl SimulationResult {
    pub const CSV_HEADERS: [&'static str; 5] = [
        "Time (days)",
        "Susceptible",
        "Exposed",
        "Infected",
        "Recovered",
    ];

    pub fn series(&self, compartment: Compartment) -> Vec<i64> {
        self.timeline.iter().map(|s| s.get(compartment)).collect()
    }

    pub fn csv_rows(&self) -> Vec<Vec<String>> {
        self.timeline
            .iter()
            .map(|s| {
                vec![
                    s.day.to_string(),
                    s.susceptible.to_string(),
                    s.exposed.to_string(),
                    s.infected.to_string(),
                    s.recovered.to_string(),
                ]
            })
            .collect()
    }
}
