use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SeirError {
    /// An input field lies outside its documented domain.
    #[error("{field} = {value} is out of range (expected {expected})")]
    Range {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    /// Initial exposed, infected and recovered counts exceed the population.
    #[error(
        "initial non-susceptible individuals ({non_susceptible}) exceed the population ({population})"
    )]
    InconsistentInitialConditions {
        population: u64,
        non_susceptible: u64,
    },

    /// Solver failure or a non-finite value in the trajectory.
    #[error("numerical error: {0}")]
    Numerical(String),
}

pub type SeirResult<T> = Result<T, SeirError>;
