//! Biomass integration.
//!
//! For each year `t = 1..=run_length` and each entity `i` (in entity order):
//!
//! ```text
//! B(t, i) = B(t−1, i) + growth − harvest − competition − predation
//! ```
//!
//! with every term evaluated from row `t−1`. A NaN, infinite or negative result
//! is clamped to 0 as soon as it is produced. The guild row for year `t`
//! accumulates as entities are set; lookups always read the completed `t−1`
//! row.

use nalgebra::DMatrix;
use tracing::debug;

use crate::domain::{BiomassTrajectory, EntityMap, ModelConfiguration, ParameterSet, PredationForm};
use crate::domain::{CompetitionForm, HarvestForm};
use crate::error::AppError;
use crate::models::{TermContext, competition, effective_carrying_capacity, growth, harvest, predation};

/// Lifecycle of a single integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegratorState {
    /// Year-0 row seeded, no step taken yet.
    Initialized,
    /// At least one year computed, more remain.
    Stepping,
    Complete,
}

/// Configuration-level inputs reused across many parameter sets.
#[derive(Debug, Clone)]
pub struct Integrator<'a> {
    config: &'a ModelConfiguration,
    entities: &'a EntityMap,
    harvest: &'a DMatrix<f64>,
    guild_of: Vec<usize>,
}

impl<'a> Integrator<'a> {
    /// `harvest` must hold at least `run_length` rows for the active entities
    /// unless the harvest form is `None`.
    pub fn new(
        config: &'a ModelConfiguration,
        entities: &'a EntityMap,
        harvest: &'a DMatrix<f64>,
    ) -> Result<Self, AppError> {
        let n = entities.entity_count();
        if config.harvest != HarvestForm::None
            && (harvest.ncols() != n || harvest.nrows() < config.run_length)
        {
            return Err(AppError::shortfall(
                "harvest",
                harvest.len(),
                (config.run_length + 1) * n,
            ));
        }
        Ok(Self {
            config,
            entities,
            harvest,
            guild_of: entities.guild_of(),
        })
    }

    pub fn config(&self) -> &ModelConfiguration {
        self.config
    }

    pub fn entities(&self) -> &EntityMap {
        self.entities
    }

    pub fn harvest(&self) -> &DMatrix<f64> {
        self.harvest
    }

    /// Integrate `params` for the configured run length.
    pub fn run(&self, params: &ParameterSet) -> Result<BiomassTrajectory, AppError> {
        self.run_for(params, self.config.run_length)
    }

    /// Integrate `params` for `run_length` years.
    pub fn run_for(&self, params: &ParameterSet, run_length: usize) -> Result<BiomassTrajectory, AppError> {
        let mut sim = self.start(params, run_length)?;
        while sim.step() {}
        Ok(sim.finish())
    }

    /// Seed a stepwise integration.
    pub fn start<'p>(&'p self, params: &'p ParameterSet, run_length: usize) -> Result<Simulation<'p>, AppError> {
        let n = self.entities.entity_count();
        let guilds = self.entities.guild_count();
        params.check_shape(n, guilds)?;
        if self.config.harvest != HarvestForm::None && self.harvest.nrows() < run_length {
            return Err(AppError::shortfall("harvest", self.harvest.len(), (run_length + 1) * n));
        }

        let carrying = effective_carrying_capacity(
            params,
            self.config.competition == CompetitionForm::Alpha,
            self.config.predation != PredationForm::None,
        );
        let mut guild_carrying = vec![0.0; guilds];
        for (i, &g) in self.guild_of.iter().enumerate() {
            guild_carrying[g] += carrying[i];
        }
        let system_carrying = carrying.iter().sum();

        let mut biomass = DMatrix::zeros(run_length + 1, n);
        for i in 0..n {
            biomass[(0, i)] = clamp_biomass(params.init_biomass[i], 0, i);
        }
        let mut guild_biomass = DMatrix::zeros(run_length + 1, guilds);
        for (i, &g) in self.guild_of.iter().enumerate() {
            guild_biomass[(0, g)] += biomass[(0, i)];
        }

        Ok(Simulation {
            integrator: self,
            params,
            carrying,
            guild_carrying,
            system_carrying,
            biomass,
            guild_biomass,
            time: 0,
            run_length,
            state: IntegratorState::Initialized,
        })
    }
}

/// One integration in progress.
#[derive(Debug)]
pub struct Simulation<'p> {
    integrator: &'p Integrator<'p>,
    params: &'p ParameterSet,
    carrying: Vec<f64>,
    guild_carrying: Vec<f64>,
    system_carrying: f64,
    biomass: DMatrix<f64>,
    guild_biomass: DMatrix<f64>,
    time: usize,
    run_length: usize,
    state: IntegratorState,
}

impl Simulation<'_> {
    pub fn state(&self) -> IntegratorState {
        if self.time >= self.run_length {
            IntegratorState::Complete
        } else {
            self.state
        }
    }

    /// Effective carrying capacity per entity, fixed for the whole run.
    pub fn carrying(&self) -> &[f64] {
        &self.carrying
    }

    pub fn system_carrying(&self) -> f64 {
        self.system_carrying
    }

    /// Advance one year. Returns `false` once the run is complete.
    pub fn step(&mut self) -> bool {
        if self.state() == IntegratorState::Complete {
            self.state = IntegratorState::Complete;
            return false;
        }
        let t = self.time + 1;
        let prev = t - 1;
        let config = self.integrator.config;
        let guild_of = &self.integrator.guild_of;

        for i in 0..self.biomass.ncols() {
            let delta = {
                let ctx = TermContext {
                    params: self.params,
                    carrying: &self.carrying,
                    guild_carrying: &self.guild_carrying,
                    system_carrying: self.system_carrying,
                    guild_of,
                    harvest: self.integrator.harvest,
                    biomass: &self.biomass,
                    guild_biomass: &self.guild_biomass,
                };
                growth::evaluate(config.growth, prev, i, &ctx)
                    - harvest::evaluate(config.harvest, prev, i, &ctx)
                    - competition::evaluate(config.competition, prev, i, &ctx)
                    - predation::evaluate(config.predation, prev, i, &ctx)
            };
            let value = clamp_biomass(self.biomass[(prev, i)] + delta, t, i);
            self.biomass[(t, i)] = value;
            self.guild_biomass[(t, guild_of[i])] += value;
        }

        self.time = t;
        self.state = if t >= self.run_length {
            IntegratorState::Complete
        } else {
            IntegratorState::Stepping
        };
        self.state != IntegratorState::Complete
    }

    pub fn finish(self) -> BiomassTrajectory {
        BiomassTrajectory {
            start_year: self.integrator.config.start_year,
            biomass: self.biomass,
        }
    }
}

fn clamp_biomass(value: f64, t: usize, i: usize) -> f64 {
    if value.is_finite() && value >= 0.0 {
        value
    } else {
        debug!(year_index = t, entity = i, value, "biomass clamped to 0");
        0.0
    }
}
