//! Deterministic SEIR epidemic model: parameter validation, adaptive
//! integration of the compartment equations and peak statistics.

pub mod error;
pub mod model;
pub mod output;
pub mod parameters;
pub mod solver;

pub use error::{SeirError, SeirResult};
pub use model::{SampleGrid, SeirModel, integrate, integrate_with};
pub use output::{Compartment, CompartmentState, PeakSummary, SimulationResult};
pub use parameters::{RawParameters, SimulationParameters};
pub use solver::{SolverConfig, SolverStats};
