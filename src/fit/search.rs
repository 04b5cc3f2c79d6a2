//! Optimizer seam and the built-in random-search backend.
//!
//! `RandomSearch` works in rounds:
//! - round 0 draws `population` candidates uniformly within the bounds
//! - later rounds draw Normal candidates around the incumbent, with a step
//!   (fraction of each range) that shrinks after every round without progress
//!
//! Candidates of a round are generated sequentially from the run's RNG stream
//! and scored in parallel, so a fixed seed gives identical results regardless
//! of thread count.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::SeedMode;
use crate::error::AppError;
use crate::fit::objective::Objective;
use crate::fit::runner::CancelToken;
use crate::sim::stream_rng;

/// Result of one minimization.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerOutcome {
    pub vector: Vec<f64>,
    pub fitness: f64,
    pub iterations: usize,
    /// Stopped early because the cancel token was raised.
    pub cancelled: bool,
}

/// A minimization backend. Implementations must check `cancel` between
/// iterations and return the best vector found so far.
pub trait Optimizer: Send + Sync {
    fn name(&self) -> &'static str;

    fn minimize(
        &self,
        objective: &Objective<'_>,
        seed: SeedMode,
        cancel: &CancelToken,
    ) -> Result<OptimizerOutcome, AppError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomSearch {
    /// Candidates per round.
    pub population: usize,
    /// Maximum number of rounds.
    pub iterations: usize,
    /// Initial refinement step as a fraction of each range.
    pub step: f64,
    /// Step multiplier after a round without improvement.
    pub shrink: f64,
    /// Stop after this many consecutive rounds without improvement.
    pub patience: usize,
}

impl Default for RandomSearch {
    fn default() -> Self {
        Self {
            population: 64,
            iterations: 200,
            step: 0.25,
            shrink: 0.8,
            patience: 30,
        }
    }
}

impl RandomSearch {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.population == 0 || self.iterations == 0 {
            return Err(AppError::config("Search population and iterations must be at least 1."));
        }
        if !(self.step > 0.0 && self.step.is_finite()) {
            return Err(AppError::config("Search step must be positive."));
        }
        if !(self.shrink > 0.0 && self.shrink < 1.0) {
            return Err(AppError::config("Search shrink factor must lie in (0, 1)."));
        }
        Ok(())
    }
}

impl Optimizer for RandomSearch {
    fn name(&self) -> &'static str {
        "random-search"
    }

    fn minimize(
        &self,
        objective: &Objective<'_>,
        seed: SeedMode,
        cancel: &CancelToken,
    ) -> Result<OptimizerOutcome, AppError> {
        self.validate()?;

        let ranges = objective.ranges();
        let mut incumbent = objective.initial_vector();
        let mut best = objective.evaluate(&incumbent);
        if ranges.is_empty() {
            return Ok(OptimizerOutcome {
                vector: incumbent,
                fitness: best,
                iterations: 0,
                cancelled: cancel.is_cancelled(),
            });
        }

        let mut rng = stream_rng(seed, 0);
        let normal = Normal::new(0.0, 1.0).map_err(|e| AppError::NumericDegenerate(e.to_string()))?;
        let mut step = self.step;
        let mut stall = 0usize;
        let mut iterations = 0usize;
        let mut cancelled = false;

        for round in 0..self.iterations {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let candidates: Vec<Vec<f64>> = (0..self.population)
                .map(|_| {
                    ranges
                        .iter()
                        .enumerate()
                        .map(|(d, &(lo, hi))| {
                            if round == 0 {
                                rng.gen_range(lo..=hi)
                            } else {
                                let z: f64 = normal.sample(&mut rng);
                                (incumbent[d] + z * step * (hi - lo)).clamp(lo, hi)
                            }
                        })
                        .collect()
                })
                .collect();

            let scored: Vec<(usize, f64)> = candidates
                .par_iter()
                .enumerate()
                .map(|(idx, c)| (idx, objective.evaluate(c)))
                .filter(|(_, f)| f.is_finite())
                .collect();
            iterations += 1;

            // Lowest fitness wins; ties go to the lowest candidate index.
            let mut winner: Option<(usize, f64)> = None;
            for &(idx, f) in &scored {
                match winner {
                    Some((w_idx, w_f)) if f > w_f || (f == w_f && idx > w_idx) => {}
                    _ => winner = Some((idx, f)),
                }
            }

            match winner {
                Some((idx, f)) if f < best => {
                    incumbent = candidates[idx].clone();
                    best = f;
                    stall = 0;
                }
                _ => {
                    stall += 1;
                    step *= self.shrink;
                }
            }
            if stall >= self.patience {
                break;
            }
        }

        debug!(iterations, fitness = best, cancelled, "random search finished");
        Ok(OptimizerOutcome {
            vector: incumbent,
            fitness: best,
            iterations,
            cancelled,
        })
    }
}
