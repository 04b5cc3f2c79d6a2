//! Monte Carlo biomass forecasts.
//!
//! A forecast starts from the last estimated year and projects forward under a
//! forecast harvest series. One deterministic projection uses the unperturbed
//! parameters; each Monte Carlo draw perturbs parameters and harvest on its own
//! RNG stream and runs independently (in parallel).

use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{BiomassTrajectory, ParameterSet, SeedMode};
use crate::error::AppError;
use crate::math::{ArithmeticMean, combine_matrices};
use crate::sim::integrator::Integrator;
use crate::sim::monte_carlo::{MonteCarloRng, Uncertainty, perturb_harvest, perturb_parameters};

/// Output of a forecast run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastResult {
    pub deterministic: BiomassTrajectory,
    pub draws: Vec<BiomassTrajectory>,
    /// Per-year, per-entity bands across draws (empty when `draws` is empty).
    pub mean: DMatrix<f64>,
    pub min: DMatrix<f64>,
    pub max: DMatrix<f64>,
}

/// Copy of `params` whose initial biomass is the terminal row of `trajectory`.
pub fn forecast_start(params: &ParameterSet, trajectory: &BiomassTrajectory) -> ParameterSet {
    let mut out = params.clone();
    let last = trajectory.terminal();
    for (i, b) in out.init_biomass.iter_mut().enumerate() {
        *b = trajectory.value(last, i);
    }
    out
}

/// Run the deterministic projection plus `draws` perturbed projections.
///
/// `integrator` carries the forecast configuration (start year, horizon) and
/// the unperturbed forecast harvest.
pub fn forecast(
    integrator: &Integrator<'_>,
    base: &ParameterSet,
    uncertainty: &Uncertainty,
    draws: usize,
    seed: SeedMode,
) -> Result<ForecastResult, AppError> {
    let deterministic = integrator.run(base)?;

    let trajectories: Vec<BiomassTrajectory> = (0..draws)
        .into_par_iter()
        .map(|d| {
            let mut rng = MonteCarloRng::stream(seed, d as u64);
            let params = perturb_parameters(base, uncertainty, &mut rng);
            let harvest = perturb_harvest(integrator.harvest(), &uncertainty.harvest, &mut rng);
            let draw = Integrator::new(integrator.config(), integrator.entities(), &harvest)?;
            draw.run(&params)
        })
        .collect::<Result<_, AppError>>()?;

    info!(draws, years = integrator.config().run_length, "forecast complete");

    let (mean, min, max) = bands(&trajectories, &deterministic)?;
    Ok(ForecastResult {
        deterministic,
        draws: trajectories,
        mean,
        min,
        max,
    })
}

fn bands(
    draws: &[BiomassTrajectory],
    deterministic: &BiomassTrajectory,
) -> Result<(DMatrix<f64>, DMatrix<f64>, DMatrix<f64>), AppError> {
    if draws.is_empty() {
        let empty = DMatrix::zeros(0, 0);
        return Ok((empty.clone(), empty.clone(), empty));
    }
    let matrices: Vec<&DMatrix<f64>> = draws.iter().map(|d| &d.biomass).collect();
    let mean = combine_matrices(&matrices, &ArithmeticMean)?;
    let (rows, cols) = deterministic.biomass.shape();
    let min = DMatrix::from_fn(rows, cols, |r, c| {
        matrices.iter().map(|m| m[(r, c)]).fold(f64::INFINITY, f64::min)
    });
    let max = DMatrix::from_fn(rows, cols, |r, c| {
        matrices.iter().map(|m| m[(r, c)]).fold(f64::NEG_INFINITY, f64::max)
    });
    Ok((mean, min, max))
}
