use nalgebra::Vector4;
use serde::{Deserialize, Serialize};

use crate::error::{SeirError, SeirResult};

/// Longest simulated horizon, ten years.
pub const MAX_HORIZON_DAYS: i64 = 3650;

/// Unvalidated model input as it arrives from a run request.
///
/// Counts are signed so that a negative value is reported as a range
/// error on its field rather than as a parse failure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawParameters {
    pub population: i64,
    pub beta: f64,
    pub sigma: f64,
    pub gamma: f64,
    pub initial_infected: i64,
    pub initial_recovered: i64,
    pub initial_exposed: i64,
    pub horizon_days: i64,
}

impl Default for RawParameters {
    fn default() -> Self {
        Self {
            population: 100_000,
            beta: 0.3,
            sigma: 1.0 / 5.2,
            gamma: 1.0 / 10.0,
            initial_infected: 1,
            initial_recovered: 0,
            initial_exposed: 0,
            horizon_days: 365,
        }
    }
}

impl RawParameters {
    pub fn validate(&self) -> SeirResult<SimulationParameters> {
        let population = count_at_least("population", self.population, 1)?;
        let beta = rate("beta", self.beta)?;
        let sigma = rate("sigma", self.sigma)?;
        let gamma = rate("gamma", self.gamma)?;
        let initial_infected = count_at_least("initial_infected", self.initial_infected, 0)?;
        let initial_recovered = count_at_least("initial_recovered", self.initial_recovered, 0)?;
        let initial_exposed = count_at_least("initial_exposed", self.initial_exposed, 0)?;
        let horizon_days = horizon(self.horizon_days)?;

        let non_susceptible = initial_infected
            .saturating_add(initial_recovered)
            .saturating_add(initial_exposed);
        if non_susceptible > population {
            return Err(SeirError::InconsistentInitialConditions {
                population,
                non_susceptible,
            });
        }

        Ok(SimulationParameters {
            population,
            beta,
            sigma,
            gamma,
            initial_infected,
            initial_recovered,
            initial_exposed,
            horizon_days,
        })
    }
}

fn count_at_least(field: &'static str, value: i64, min: i64) -> SeirResult<u64> {
    if value < min {
        return Err(SeirError::Range {
            field,
            value: value.to_string(),
            expected: if min == 0 { ">= 0" } else { ">= 1" },
        });
    }
    Ok(value as u64)
}

fn horizon(value: i64) -> SeirResult<u64> {
    if !(1..=MAX_HORIZON_DAYS).contains(&value) {
        return Err(SeirError::Range {
            field: "horizon_days",
            value: value.to_string(),
            expected: "1..=3650",
        });
    }
    Ok(value as u64)
}

fn rate(field: &'static str, value: f64) -> SeirResult<f64> {
    // NaN fails both comparisons
    if !(value > 0.0 && value <= 1.0) {
        return Err(SeirError::Range {
            field,
            value: value.to_string(),
            expected: "a rate in (0, 1]",
        });
    }
    Ok(value)
}

/// Validated, immutable input to [`crate::model::integrate`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimulationParameters {
    pub population: u64,
    /// Contact rate.
    pub beta: f64,
    /// Incubation rate.
    pub sigma: f64,
    /// Recovery rate.
    pub gamma: f64,
    pub initial_infected: u64,
    pub initial_recovered: u64,
    pub initial_exposed: u64,
    pub horizon_days: u64,
}

impl SimulationParameters {
    /// `S0 = N - I0 - E0 - R0`, negative only if the struct was built without validation.
    pub fn initial_susceptible(&self) -> f64 {
        self.population as f64
            - self.initial_infected as f64
            - self.initial_exposed as f64
            - self.initial_recovered as f64
    }

    /// State vector ordered `(S, E, I, R)`.
    pub fn initial_state(&self) -> Vector4<f64> {
        Vector4::new(
            self.initial_susceptible(),
            self.initial_exposed as f64,
            self.initial_infected as f64,
            self.initial_recovered as f64,
        )
    }

    pub fn basic_reproduction_number(&self) -> f64 {
        self.beta / self.gamma
    }
}
