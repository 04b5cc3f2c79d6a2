//! Parameter sets and estimation bounds.
//!
//! A `ParameterSet` holds per-entity scalars and per-entity-pair matrices. Every
//! matrix is always present and sized to the active entity/guild counts; terms
//! that are not configured are simply zero-filled.
//!
//! For estimation each value carries a `(value, min, max)` triple. Values with
//! `min < max` are free and are laid out, in a stable order, in the flat vector
//! exchanged with optimizer backends.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Per-entity scalar parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarParam {
    InitBiomass,
    GrowthRate,
    CarryingCapacity,
    Catchability,
    SurveyQ,
    PredationExponent,
}

impl ScalarParam {
    pub const ALL: [ScalarParam; 6] = [
        ScalarParam::InitBiomass,
        ScalarParam::GrowthRate,
        ScalarParam::CarryingCapacity,
        ScalarParam::Catchability,
        ScalarParam::SurveyQ,
        ScalarParam::PredationExponent,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ScalarParam::InitBiomass => "init_biomass",
            ScalarParam::GrowthRate => "growth_rate",
            ScalarParam::CarryingCapacity => "carrying_capacity",
            ScalarParam::Catchability => "catchability",
            ScalarParam::SurveyQ => "survey_q",
            ScalarParam::PredationExponent => "predation_exponent",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == name)
    }
}

/// Which axes a matrix parameter is indexed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixShape {
    EntityEntity,
    EntityGuild,
    GuildGuild,
}

/// Per-entity-pair matrix parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatrixParam {
    /// Competition alpha (entity × entity).
    Alpha,
    /// MS-PROD within-guild beta (entity × entity).
    BetaSpecies,
    /// MS-PROD between-guild beta (entity × guild).
    BetaGuilds,
    /// AGG-PROD beta (guild × guild).
    BetaGuildGuild,
    /// Predation rate, indexed (prey, predator).
    Rho,
    /// Handling time, indexed (prey, predator).
    Handling,
}

impl MatrixParam {
    pub const ALL: [MatrixParam; 6] = [
        MatrixParam::Alpha,
        MatrixParam::BetaSpecies,
        MatrixParam::BetaGuilds,
        MatrixParam::BetaGuildGuild,
        MatrixParam::Rho,
        MatrixParam::Handling,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MatrixParam::Alpha => "alpha",
            MatrixParam::BetaSpecies => "beta_species",
            MatrixParam::BetaGuilds => "beta_guilds",
            MatrixParam::BetaGuildGuild => "beta_guild_guild",
            MatrixParam::Rho => "rho",
            MatrixParam::Handling => "handling",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == name)
    }

    pub fn shape(self) -> MatrixShape {
        match self {
            MatrixParam::Alpha | MatrixParam::BetaSpecies | MatrixParam::Rho | MatrixParam::Handling => {
                MatrixShape::EntityEntity
            }
            MatrixParam::BetaGuilds => MatrixShape::EntityGuild,
            MatrixParam::BetaGuildGuild => MatrixShape::GuildGuild,
        }
    }

    pub fn dims(self, entities: usize, guilds: usize) -> (usize, usize) {
        match self.shape() {
            MatrixShape::EntityEntity => (entities, entities),
            MatrixShape::EntityGuild => (entities, guilds),
            MatrixShape::GuildGuild => (guilds, guilds),
        }
    }
}

/// A complete set of model parameters for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub init_biomass: Vec<f64>,
    pub growth_rate: Vec<f64>,
    pub carrying_capacity: Vec<f64>,
    pub catchability: Vec<f64>,
    pub survey_q: Vec<f64>,
    pub predation_exponent: Vec<f64>,

    pub alpha: DMatrix<f64>,
    pub beta_species: DMatrix<f64>,
    pub beta_guilds: DMatrix<f64>,
    pub beta_guild_guild: DMatrix<f64>,
    pub rho: DMatrix<f64>,
    pub handling: DMatrix<f64>,
}

impl ParameterSet {
    /// All-zero parameters sized for `entities` and `guilds`.
    pub fn zeros(entities: usize, guilds: usize) -> Self {
        let m = |p: MatrixParam| {
            let (r, c) = p.dims(entities, guilds);
            DMatrix::zeros(r, c)
        };
        Self {
            init_biomass: vec![0.0; entities],
            growth_rate: vec![0.0; entities],
            carrying_capacity: vec![0.0; entities],
            catchability: vec![0.0; entities],
            survey_q: vec![0.0; entities],
            predation_exponent: vec![0.0; entities],
            alpha: m(MatrixParam::Alpha),
            beta_species: m(MatrixParam::BetaSpecies),
            beta_guilds: m(MatrixParam::BetaGuilds),
            beta_guild_guild: m(MatrixParam::BetaGuildGuild),
            rho: m(MatrixParam::Rho),
            handling: m(MatrixParam::Handling),
        }
    }

    pub fn entity_count(&self) -> usize {
        self.init_biomass.len()
    }

    pub fn guild_count(&self) -> usize {
        self.beta_guild_guild.nrows()
    }

    pub fn scalar(&self, p: ScalarParam) -> &[f64] {
        match p {
            ScalarParam::InitBiomass => &self.init_biomass,
            ScalarParam::GrowthRate => &self.growth_rate,
            ScalarParam::CarryingCapacity => &self.carrying_capacity,
            ScalarParam::Catchability => &self.catchability,
            ScalarParam::SurveyQ => &self.survey_q,
            ScalarParam::PredationExponent => &self.predation_exponent,
        }
    }

    pub fn scalar_mut(&mut self, p: ScalarParam) -> &mut Vec<f64> {
        match p {
            ScalarParam::InitBiomass => &mut self.init_biomass,
            ScalarParam::GrowthRate => &mut self.growth_rate,
            ScalarParam::CarryingCapacity => &mut self.carrying_capacity,
            ScalarParam::Catchability => &mut self.catchability,
            ScalarParam::SurveyQ => &mut self.survey_q,
            ScalarParam::PredationExponent => &mut self.predation_exponent,
        }
    }

    pub fn matrix(&self, p: MatrixParam) -> &DMatrix<f64> {
        match p {
            MatrixParam::Alpha => &self.alpha,
            MatrixParam::BetaSpecies => &self.beta_species,
            MatrixParam::BetaGuilds => &self.beta_guilds,
            MatrixParam::BetaGuildGuild => &self.beta_guild_guild,
            MatrixParam::Rho => &self.rho,
            MatrixParam::Handling => &self.handling,
        }
    }

    pub fn matrix_mut(&mut self, p: MatrixParam) -> &mut DMatrix<f64> {
        match p {
            MatrixParam::Alpha => &mut self.alpha,
            MatrixParam::BetaSpecies => &mut self.beta_species,
            MatrixParam::BetaGuilds => &mut self.beta_guilds,
            MatrixParam::BetaGuildGuild => &mut self.beta_guild_guild,
            MatrixParam::Rho => &mut self.rho,
            MatrixParam::Handling => &mut self.handling,
        }
    }

    /// Verify every vector and matrix matches the active entity/guild counts.
    pub fn check_shape(&self, entities: usize, guilds: usize) -> Result<(), AppError> {
        for p in ScalarParam::ALL {
            let len = self.scalar(p).len();
            if len != entities {
                return Err(AppError::shortfall(p.as_str(), len, entities));
            }
        }
        for p in MatrixParam::ALL {
            let m = self.matrix(p);
            let (r, c) = p.dims(entities, guilds);
            if m.nrows() != r || m.ncols() != c {
                return Err(AppError::shortfall(p.as_str(), m.len(), r * c));
            }
        }
        Ok(())
    }

    /// Flatten every value in a fixed order (scalars, then matrices column-major).
    pub fn to_flat(&self) -> Vec<f64> {
        let mut out = Vec::new();
        for p in ScalarParam::ALL {
            out.extend_from_slice(self.scalar(p));
        }
        for p in MatrixParam::ALL {
            out.extend_from_slice(self.matrix(p).as_slice());
        }
        out
    }

    /// Overwrite all values from a flat vector produced by `to_flat` on a same-shaped set.
    pub fn fill_from_flat(&mut self, flat: &[f64]) -> Result<(), AppError> {
        let expected = self.to_flat().len();
        if flat.len() != expected {
            return Err(AppError::shortfall("parameter vector", flat.len(), expected));
        }
        let mut offset = 0;
        for p in ScalarParam::ALL {
            let dst = self.scalar_mut(p);
            let n = dst.len();
            dst.copy_from_slice(&flat[offset..offset + n]);
            offset += n;
        }
        for p in MatrixParam::ALL {
            let dst = self.matrix_mut(p);
            let n = dst.len();
            dst.as_mut_slice().copy_from_slice(&flat[offset..offset + n]);
            offset += n;
        }
        Ok(())
    }
}

/// Value plus estimation range for every parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationBounds {
    pub initial: ParameterSet,
    pub min: ParameterSet,
    pub max: ParameterSet,
}

impl EstimationBounds {
    /// Bounds where every value is fixed at `params`.
    pub fn fixed(params: ParameterSet) -> Self {
        Self {
            min: params.clone(),
            max: params.clone(),
            initial: params,
        }
    }

    /// Check the three sets agree in shape and `min <= initial <= max`.
    pub fn validate(&self) -> Result<(), AppError> {
        let entities = self.initial.entity_count();
        let guilds = self.initial.guild_count();
        self.min.check_shape(entities, guilds)?;
        self.max.check_shape(entities, guilds)?;

        let v = self.initial.to_flat();
        let lo = self.min.to_flat();
        let hi = self.max.to_flat();
        for i in 0..v.len() {
            if !(v[i].is_finite() && lo[i].is_finite() && hi[i].is_finite()) {
                return Err(AppError::config(format!(
                    "Non-finite parameter value or bound at position {i}."
                )));
            }
            if lo[i] > hi[i] {
                return Err(AppError::config(format!(
                    "Parameter bound min {} > max {} at position {i}.",
                    lo[i], hi[i]
                )));
            }
            if v[i] < lo[i] || v[i] > hi[i] {
                return Err(AppError::config(format!(
                    "Parameter value {} outside [{}, {}] at position {i}.",
                    v[i], lo[i], hi[i]
                )));
            }
        }
        Ok(())
    }

    /// Flat positions of the free (estimated) values.
    pub fn free_indices(&self) -> Vec<usize> {
        let lo = self.min.to_flat();
        let hi = self.max.to_flat();
        lo.iter()
            .zip(hi.iter())
            .enumerate()
            .filter_map(|(i, (a, b))| if a < b { Some(i) } else { None })
            .collect()
    }

    /// Number of free values (the `K` used by AIC).
    pub fn free_count(&self) -> usize {
        self.free_indices().len()
    }

    /// `(min, max)` for each free value, in vector order.
    pub fn free_ranges(&self) -> Vec<(f64, f64)> {
        let lo = self.min.to_flat();
        let hi = self.max.to_flat();
        self.free_indices().into_iter().map(|i| (lo[i], hi[i])).collect()
    }

    /// Free values of `params` as a candidate vector.
    pub fn encode(&self, params: &ParameterSet) -> Vec<f64> {
        let flat = params.to_flat();
        self.free_indices().into_iter().map(|i| flat[i]).collect()
    }

    /// Build a parameter set from a candidate vector; fixed values come from `initial`.
    ///
    /// Candidate values are clamped into their bounds.
    pub fn decode(&self, vector: &[f64]) -> Result<ParameterSet, AppError> {
        let free = self.free_indices();
        if vector.len() != free.len() {
            return Err(AppError::shortfall("candidate vector", vector.len(), free.len()));
        }
        let lo = self.min.to_flat();
        let hi = self.max.to_flat();
        let mut flat = self.initial.to_flat();
        for (&pos, &v) in free.iter().zip(vector.iter()) {
            flat[pos] = v.clamp(lo[pos], hi[pos]);
        }
        let mut out = self.initial.clone();
        out.fill_from_flat(&flat)?;
        Ok(out)
    }
}
