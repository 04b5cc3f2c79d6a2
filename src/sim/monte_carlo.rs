//! Monte Carlo perturbation of parameters and harvest.
//!
//! A value `v` with uncertainty fraction `u` becomes `(1 + x)·v` with `x`
//! drawn uniformly from `[−u, u]`. An uncertainty of 0 returns `v` unchanged
//! and consumes no draw.
//!
//! Randomness is held in an explicit `MonteCarloRng` owned by the caller, so
//! concurrent draws each run on their own stream.

use nalgebra::DMatrix;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::domain::{MatrixParam, ParameterSet, ScalarParam, SeedMode};

/// Seeded uniform source for perturbations.
#[derive(Debug, Clone)]
pub struct MonteCarloRng {
    rng: ChaCha8Rng,
}

/// Stream `index` of `mode`: fixed seeds are offset by the index, entropy
/// mode draws a fresh seed from the OS.
pub fn stream_rng(mode: SeedMode, index: u64) -> ChaCha8Rng {
    match mode.stream_seed(index) {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    }
}

impl MonteCarloRng {
    pub fn stream(mode: SeedMode, index: u64) -> Self {
        Self {
            rng: stream_rng(mode, index),
        }
    }

    /// Perturb `value` by a uniform fraction in `[−uncertainty, uncertainty]`.
    ///
    /// Returns `(perturbed, random_value)`.
    pub fn calculate_monte_carlo_value(&mut self, uncertainty: f64, value: f64) -> (f64, f64) {
        let u = uncertainty.abs();
        if u == 0.0 || !u.is_finite() {
            return (value, 0.0);
        }
        let random_value = self.rng.gen_range(-u..=u);
        ((1.0 + random_value) * value, random_value)
    }

    fn perturb_slice(&mut self, values: &mut [f64], uncertainty: &[f64]) {
        for (v, &u) in values.iter_mut().zip(uncertainty.iter()) {
            *v = self.calculate_monte_carlo_value(u, *v).0;
        }
    }

    /// Perturb every element; column `j` uses `uncertainty[j]`.
    fn perturb_matrix(&mut self, m: &mut DMatrix<f64>, uncertainty: &[f64]) {
        for c in 0..m.ncols() {
            let u = uncertainty.get(c).copied().unwrap_or(0.0);
            for r in 0..m.nrows() {
                m[(r, c)] = self.calculate_monte_carlo_value(u, m[(r, c)]).0;
            }
        }
    }
}

/// Uncertainty fractions as configured (one fraction per parameter kind).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UncertaintyConfig {
    pub init_biomass: f64,
    pub growth_rate: f64,
    pub carrying_capacity: f64,
    pub catchability: f64,
    pub survey_q: f64,
    pub predation_exponent: f64,
    pub alpha: f64,
    pub beta_species: f64,
    pub beta_guilds: f64,
    pub beta_guild_guild: f64,
    pub rho: f64,
    pub handling: f64,
    pub harvest: f64,
}

/// Uncertainty fractions per entity (scalars, harvest) and per column (matrices).
#[derive(Debug, Clone, PartialEq)]
pub struct Uncertainty {
    scalars: Vec<(ScalarParam, Vec<f64>)>,
    matrices: Vec<(MatrixParam, Vec<f64>)>,
    pub harvest: Vec<f64>,
}

impl Uncertainty {
    /// Broadcast configured fractions to every entity/column.
    pub fn from_config(cfg: &UncertaintyConfig, entities: usize, guilds: usize) -> Self {
        let scalar = |p: ScalarParam| {
            let u = match p {
                ScalarParam::InitBiomass => cfg.init_biomass,
                ScalarParam::GrowthRate => cfg.growth_rate,
                ScalarParam::CarryingCapacity => cfg.carrying_capacity,
                ScalarParam::Catchability => cfg.catchability,
                ScalarParam::SurveyQ => cfg.survey_q,
                ScalarParam::PredationExponent => cfg.predation_exponent,
            };
            (p, vec![u; entities])
        };
        let matrix = |p: MatrixParam| {
            let u = match p {
                MatrixParam::Alpha => cfg.alpha,
                MatrixParam::BetaSpecies => cfg.beta_species,
                MatrixParam::BetaGuilds => cfg.beta_guilds,
                MatrixParam::BetaGuildGuild => cfg.beta_guild_guild,
                MatrixParam::Rho => cfg.rho,
                MatrixParam::Handling => cfg.handling,
            };
            let (_, cols) = p.dims(entities, guilds);
            (p, vec![u; cols])
        };
        Self {
            scalars: ScalarParam::ALL.into_iter().map(scalar).collect(),
            matrices: MatrixParam::ALL.into_iter().map(matrix).collect(),
            harvest: vec![cfg.harvest; entities],
        }
    }

    /// Override the fraction of one scalar parameter for one entity.
    pub fn set_scalar(&mut self, param: ScalarParam, entity: usize, fraction: f64) {
        if let Some((_, v)) = self.scalars.iter_mut().find(|(p, _)| *p == param) {
            if let Some(slot) = v.get_mut(entity) {
                *slot = fraction;
            }
        }
    }
}

/// Independently perturbed copy of `params`.
pub fn perturb_parameters(
    params: &ParameterSet,
    uncertainty: &Uncertainty,
    rng: &mut MonteCarloRng,
) -> ParameterSet {
    let mut out = params.clone();
    for (p, u) in &uncertainty.scalars {
        rng.perturb_slice(out.scalar_mut(*p), u);
    }
    for (p, u) in &uncertainty.matrices {
        rng.perturb_matrix(out.matrix_mut(*p), u);
    }
    out
}

/// Perturbed copy of a harvest series: one draw per entity, applied to all years.
pub fn perturb_harvest(
    harvest: &DMatrix<f64>,
    uncertainty: &[f64],
    rng: &mut MonteCarloRng,
) -> DMatrix<f64> {
    let mut out = harvest.clone();
    for c in 0..out.ncols() {
        let u = uncertainty.get(c).copied().unwrap_or(0.0);
        let (_, x) = rng.calculate_monte_carlo_value(u, 1.0);
        for r in 0..out.nrows() {
            out[(r, c)] *= 1.0 + x;
        }
    }
    out
}
