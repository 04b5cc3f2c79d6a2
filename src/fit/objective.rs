//! Objective function.
//!
//! An `Objective` bundles everything needed to score a candidate vector:
//! - the integrator (configuration, entities, harvest)
//! - the estimation bounds (which values are free)
//! - the observed biomass
//! - the fitness criterion and scaling
//!
//! Optimizer backends only ever see `evaluate(vector) -> f64`; lower is better.
//! A candidate that fails to integrate scores `+∞`.

use nalgebra::DMatrix;

use crate::domain::{
    BiomassTrajectory, EstimationBounds, ObjectiveCriterion, ObservedKind, ParameterSet, RunResult,
    Scaling,
};
use crate::error::AppError;
use crate::math::{SummaryStats, summarize};
use crate::sim::Integrator;

/// Floor applied to `SSR/n` before taking the log.
const LIKELIHOOD_FLOOR: f64 = 1e-12;

pub struct Objective<'a> {
    integrator: Integrator<'a>,
    bounds: &'a EstimationBounds,
    observed: &'a DMatrix<f64>,
    criterion: ObjectiveCriterion,
    scaling: Scaling,
    names: Vec<String>,
}

impl<'a> Objective<'a> {
    /// `observed` must cover every integrated year for every entity.
    pub fn new(
        integrator: Integrator<'a>,
        bounds: &'a EstimationBounds,
        observed: &'a DMatrix<f64>,
        criterion: ObjectiveCriterion,
        scaling: Scaling,
    ) -> Result<Self, AppError> {
        let entities = integrator.entities();
        let n = entities.entity_count();
        let rows = integrator.config().run_length + 1;
        if observed.ncols() != n || observed.nrows() < rows {
            return Err(AppError::shortfall("observed_biomass", observed.len(), rows * n));
        }
        bounds.validate()?;
        bounds.initial.check_shape(n, entities.guild_count())?;
        let names = entities.entity_names();
        Ok(Self {
            integrator,
            bounds,
            observed,
            criterion,
            scaling,
            names,
        })
    }

    pub fn integrator(&self) -> &Integrator<'a> {
        &self.integrator
    }

    pub fn bounds(&self) -> &EstimationBounds {
        self.bounds
    }

    pub fn criterion(&self) -> ObjectiveCriterion {
        self.criterion
    }

    pub fn entity_names(&self) -> &[String] {
        &self.names
    }

    /// Length of the candidate vector.
    pub fn dimension(&self) -> usize {
        self.bounds.free_count()
    }

    pub fn ranges(&self) -> Vec<(f64, f64)> {
        self.bounds.free_ranges()
    }

    /// Candidate vector of the initial parameter values.
    pub fn initial_vector(&self) -> Vec<f64> {
        self.bounds.encode(&self.bounds.initial)
    }

    /// Fitness of a candidate vector.
    pub fn evaluate(&self, vector: &[f64]) -> f64 {
        let Ok(params) = self.bounds.decode(vector) else {
            return f64::INFINITY;
        };
        match self.integrator.run(&params) {
            Ok(trajectory) => self.fitness(&params, &trajectory),
            Err(_) => f64::INFINITY,
        }
    }

    /// Integrate and score a full parameter set.
    pub fn score(&self, run: usize, params: ParameterSet, iterations: usize) -> Result<RunResult, AppError> {
        let trajectory = self.integrator.run(&params)?;
        let fitness = self.fitness(&params, &trajectory);
        let stats = self.stats_for(&params, &trajectory)?;
        Ok(RunResult {
            run,
            params,
            trajectory,
            fitness,
            stats,
            iterations,
        })
    }

    /// Summary statistics of `trajectory` against the observed series.
    pub fn stats_for(
        &self,
        params: &ParameterSet,
        trajectory: &BiomassTrajectory,
    ) -> Result<SummaryStats, AppError> {
        let observed = self.observed_for(params);
        summarize(&self.names, &observed, &trajectory.biomass, self.bounds.free_count())
    }

    /// Observed biomass over the run in absolute units.
    ///
    /// Relative indices are divided by the entity's survey catchability; a
    /// non-positive catchability makes the whole column missing.
    pub fn observed_for(&self, params: &ParameterSet) -> DMatrix<f64> {
        let rows = self.integrator.config().run_length + 1;
        let mut out = self.observed.rows(0, rows).into_owned();
        if self.integrator.config().observed == ObservedKind::Relative {
            for c in 0..out.ncols() {
                let q = params.survey_q[c];
                for r in 0..rows {
                    out[(r, c)] = if q > 0.0 { out[(r, c)] / q } else { f64::NAN };
                }
            }
        }
        out
    }

    /// Fitness of an already integrated trajectory.
    pub fn fitness(&self, params: &ParameterSet, trajectory: &BiomassTrajectory) -> f64 {
        let observed = self.observed_for(params);
        let rows = observed.nrows().min(trajectory.rows());

        let mut total = 0.0;
        let mut mef_sum = 0.0;
        let mut mef_count = 0usize;
        for c in 0..observed.ncols() {
            let pairs: Vec<(f64, f64)> = (0..rows)
                .map(|r| (observed[(r, c)], trajectory.value(r, c)))
                .filter(|(o, e)| o.is_finite() && e.is_finite())
                .collect();
            if pairs.is_empty() {
                continue;
            }
            let (shift, scale) = scaling_for(self.scaling, &pairs);
            let scaled: Vec<(f64, f64)> = pairs
                .iter()
                .map(|(o, e)| ((o - shift) / scale, (e - shift) / scale))
                .collect();
            let ssr: f64 = scaled.iter().map(|(o, e)| (e - o) * (e - o)).sum();
            let n = scaled.len() as f64;

            match self.criterion {
                ObjectiveCriterion::LeastSquares => total += ssr,
                ObjectiveCriterion::MaximumLikelihood => {
                    total += n / 2.0 * (ssr / n).max(LIKELIHOOD_FLOOR).ln();
                }
                ObjectiveCriterion::ModelEfficiency => {
                    let mean = scaled.iter().map(|p| p.0).sum::<f64>() / n;
                    let ss_obs: f64 = scaled.iter().map(|(o, _)| (o - mean) * (o - mean)).sum();
                    if ss_obs > 0.0 {
                        mef_sum += 1.0 - ssr / ss_obs;
                        mef_count += 1;
                    }
                }
            }
        }

        let value = match self.criterion {
            ObjectiveCriterion::ModelEfficiency if mef_count == 0 => f64::INFINITY,
            ObjectiveCriterion::ModelEfficiency => 1.0 - mef_sum / mef_count as f64,
            _ => total,
        };
        if value.is_finite() { value } else { f64::INFINITY }
    }
}

/// `(shift, scale)` so that a scaled value is `(x − shift) / scale`, taken
/// from the observed half of `pairs`. Degenerate spreads leave values unscaled.
fn scaling_for(scaling: Scaling, pairs: &[(f64, f64)]) -> (f64, f64) {
    let n = pairs.len() as f64;
    let mean = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let usable = |s: f64| s.is_finite() && s > 0.0;
    match scaling {
        Scaling::None => (0.0, 1.0),
        Scaling::Mean if usable(mean.abs()) => (0.0, mean),
        Scaling::MinMax => {
            let lo = pairs.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
            let hi = pairs.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
            if usable(hi - lo) { (lo, hi - lo) } else { (0.0, 1.0) }
        }
        Scaling::ZScore => {
            let var = pairs.iter().map(|p| (p.0 - mean) * (p.0 - mean)).sum::<f64>() / n;
            let sd = var.sqrt();
            if usable(sd) { (mean, sd) } else { (0.0, 1.0) }
        }
        Scaling::Mean => (0.0, 1.0),
    }
}
