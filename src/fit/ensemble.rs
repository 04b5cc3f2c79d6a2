//! Ensemble averaging of completed runs.
//!
//! Runs are ranked by fitness (ascending) and the best `K` (or best `K%`,
//! rounded up) are combined:
//! - `ByParameter`: parameters are averaged, then re-integrated
//! - `ByBiomass`: trajectories are averaged year by year
//!
//! Parameters are averaged in both modes so the consensus always carries a
//! parameter set; statistics are recomputed against the observed series.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{AveragingAlgorithm, AveragingMode, BiomassTrajectory, EnsembleResult, RunResult};
use crate::error::AppError;
use crate::fit::objective::Objective;
use crate::math::{combine_matrices, combine_parameters};

/// Which runs to combine and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleSettings {
    pub top_k: usize,
    /// Interpret `top_k` as a percentage of the completed runs.
    pub is_percent: bool,
    pub mode: AveragingMode,
    pub algorithm: AveragingAlgorithm,
}

impl Default for EnsembleSettings {
    fn default() -> Self {
        Self {
            top_k: 10,
            is_percent: false,
            mode: AveragingMode::ByParameter,
            algorithm: AveragingAlgorithm::Mean,
        }
    }
}

impl EnsembleSettings {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.top_k == 0 {
            return Err(AppError::config("Ensemble top_k must be at least 1."));
        }
        if self.is_percent && self.top_k > 100 {
            return Err(AppError::config("Ensemble top_k percentage must not exceed 100."));
        }
        Ok(())
    }

    /// Number of runs selected out of `available` (at least 1, at most `available`).
    pub fn select_count(&self, available: usize) -> usize {
        let k = if self.is_percent {
            (available * self.top_k).div_ceil(100)
        } else {
            self.top_k
        };
        k.clamp(1, available.max(1))
    }
}

/// Runs ordered best first; non-finite fitness sorts last, ties by run id.
pub fn rank_runs(runs: &[RunResult]) -> Vec<&RunResult> {
    let mut ranked: Vec<&RunResult> = runs.iter().collect();
    ranked.sort_by(|a, b| {
        let key = |r: &RunResult| if r.fitness.is_finite() { r.fitness } else { f64::INFINITY };
        key(a)
            .partial_cmp(&key(b))
            .unwrap_or(Ordering::Equal)
            .then(a.run.cmp(&b.run))
    });
    ranked
}

/// Consensus of the best runs.
pub fn calculate_average(
    runs: &[RunResult],
    settings: &EnsembleSettings,
    objective: &Objective<'_>,
) -> Result<EnsembleResult, AppError> {
    settings.validate()?;
    if runs.is_empty() {
        return Err(AppError::EmptyEnsemble);
    }
    let ranked = rank_runs(runs);
    let selected: Vec<&RunResult> = ranked.into_iter().take(settings.select_count(runs.len())).collect();
    let averager = settings.algorithm.averager();

    let param_sets: Vec<_> = selected.iter().map(|r| &r.params).collect();
    let params = combine_parameters(&param_sets, averager.as_ref())?;

    let trajectory = match settings.mode {
        AveragingMode::ByParameter => objective.integrator().run(&params)?,
        AveragingMode::ByBiomass => {
            let matrices: Vec<_> = selected.iter().map(|r| &r.trajectory.biomass).collect();
            BiomassTrajectory {
                start_year: selected[0].trajectory.start_year,
                biomass: combine_matrices(&matrices, averager.as_ref())?,
            }
        }
    };
    let stats = objective.stats_for(&params, &trajectory)?;

    info!(
        selected = selected.len(),
        available = runs.len(),
        mode = ?settings.mode,
        averager = averager.name(),
        "ensemble averaged"
    );
    Ok(EnsembleResult {
        mode: settings.mode,
        selected: selected.iter().map(|r| r.run).collect(),
        params,
        trajectory,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ObjectiveCriterion, Scaling};
    use crate::fit::fixtures::Fixture;

    fn runs_from(fx: &Fixture, rates: &[(f64, f64)]) -> Vec<RunResult> {
        let obj = fx.objective(ObjectiveCriterion::LeastSquares, Scaling::None);
        rates
            .iter()
            .enumerate()
            .map(|(i, &(a, b))| {
                let mut p = fx.truth.clone();
                p.growth_rate = vec![a, b];
                obj.score(i, p, 1).unwrap()
            })
            .collect()
    }

    #[test]
    fn percent_selection_rounds_up() {
        let s = EnsembleSettings {
            top_k: 10,
            is_percent: true,
            ..EnsembleSettings::default()
        };
        assert_eq!(s.select_count(25), 3);
        assert_eq!(s.select_count(1), 1);
        let s = EnsembleSettings {
            top_k: 10,
            ..EnsembleSettings::default()
        };
        assert_eq!(s.select_count(4), 4);
    }

    #[test]
    fn identical_runs_average_to_themselves() {
        let fx = Fixture::logistic();
        let obj = fx.objective(ObjectiveCriterion::LeastSquares, Scaling::None);
        let runs = runs_from(&fx, &[(0.45, 0.55); 3]);
        for mode in [AveragingMode::ByParameter, AveragingMode::ByBiomass] {
            let settings = EnsembleSettings {
                top_k: 3,
                mode,
                ..EnsembleSettings::default()
            };
            let out = calculate_average(&runs, &settings, &obj).unwrap();
            assert_eq!(out.selected.len(), 3);
            for (a, b) in out.trajectory.biomass.iter().zip(runs[0].trajectory.biomass.iter()) {
                assert!((a - b).abs() < 1e-9);
            }
            assert!((out.params.growth_rate[0] - 0.45).abs() < 1e-12);
        }
    }

    #[test]
    fn selects_the_best_runs_first() {
        let fx = Fixture::logistic();
        let obj = fx.objective(ObjectiveCriterion::LeastSquares, Scaling::None);
        let runs = runs_from(&fx, &[(0.9, 0.9), (0.4, 0.6), (0.42, 0.6), (0.1, 0.1)]);
        let settings = EnsembleSettings {
            top_k: 2,
            ..EnsembleSettings::default()
        };
        let out = calculate_average(&runs, &settings, &obj).unwrap();
        assert_eq!(out.selected, vec![1, 2]);
        assert!((out.params.growth_rate[0] - 0.41).abs() < 1e-12);
        assert_eq!(out.stats.entities.len(), 2);
    }

    #[test]
    fn non_finite_fitness_ranks_last() {
        let fx = Fixture::logistic();
        let mut runs = runs_from(&fx, &[(0.9, 0.9), (0.4, 0.6)]);
        runs[1].fitness = f64::NAN;
        let ranked = rank_runs(&runs);
        assert_eq!(ranked[0].run, 0);
    }

    #[test]
    fn no_runs_is_an_error() {
        let fx = Fixture::logistic();
        let obj = fx.objective(ObjectiveCriterion::LeastSquares, Scaling::None);
        let err = calculate_average(&[], &EnsembleSettings::default(), &obj).unwrap_err();
        assert!(matches!(err, AppError::EmptyEnsemble));
    }
}
