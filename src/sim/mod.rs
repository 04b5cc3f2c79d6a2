//! Biomass simulation: the yearly recurrence, Monte Carlo perturbation and
//! forecasting on top of both.

pub mod forecast;
pub mod integrator;
pub mod monte_carlo;

pub use forecast::*;
pub use integrator::*;
pub use monte_carlo::*;
