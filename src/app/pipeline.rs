//! Shared pipeline logic behind every command.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! project -> store -> model data -> objective -> runs -> ensemble
//!
//! `app` then only prints and exports what these functions return.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::info;

use crate::domain::{
    BiomassTrajectory, EnsembleResult, ModelConfiguration, MohnsRhoSet, ParameterSet, RunResult, SeedMode,
};
use crate::error::AppError;
use crate::fit::{
    CancelToken, NoopObserver, Objective, calculate_average, rank_runs, run_batch, run_retrospective,
};
use crate::io::{
    CsvStore, ModelData, ProgressChannel, ProjectConfig, WriteGate, load_forecast_harvest, load_model_data, persist_runs,
};
use crate::math::SummaryStats;
use crate::sim::{ForecastResult, Integrator, Uncertainty, forecast, forecast_start};

const PROGRESS_POLL: Duration = Duration::from_millis(200);

/// A loaded project: configuration, backing store and model inputs.
///
/// Every estimated-biomass write into `store` goes through `gate`.
#[derive(Debug)]
pub struct Workspace {
    pub project: ProjectConfig,
    pub config: ModelConfiguration,
    pub store: CsvStore,
    pub gate: WriteGate,
    pub data: ModelData,
}

impl Workspace {
    pub fn open(project: ProjectConfig) -> Result<Self, AppError> {
        let store = CsvStore::new(project.data_dir.clone());
        let config = project.model_configuration();
        let data = load_model_data(&store, &config)?;
        Ok(Self {
            project,
            config,
            store,
            gate: WriteGate::new(),
            data,
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.data.entities.entity_names()
    }

    /// Objective over the first `config.run_length + 1` years.
    pub fn objective<'a>(&'a self, config: &'a ModelConfiguration) -> Result<Objective<'a>, AppError> {
        let integrator = Integrator::new(config, &self.data.entities, &self.data.harvest.values)?;
        Objective::new(
            integrator,
            &self.data.bounds,
            &self.data.observed.values,
            self.project.estimation.criterion,
            self.project.estimation.scaling,
        )
    }
}

/// Completed runs plus the optional ensemble consensus.
#[derive(Debug, Clone)]
pub struct EstimateOutput {
    pub runs: Vec<RunResult>,
    pub ensemble: Option<EnsembleResult>,
}

impl EstimateOutput {
    /// Ensemble parameters and trajectory when averaged, else the best run's.
    pub fn consensus(&self) -> Result<(&ParameterSet, &BiomassTrajectory), AppError> {
        if let Some(e) = &self.ensemble {
            return Ok((&e.params, &e.trajectory));
        }
        rank_runs(&self.runs)
            .into_iter()
            .next()
            .map(|r| (&r.params, &r.trajectory))
            .ok_or(AppError::EmptyEnsemble)
    }

    /// Statistics of the consensus trajectory.
    pub fn consensus_stats(&self) -> Option<&SummaryStats> {
        match &self.ensemble {
            Some(e) => Some(&e.stats),
            None => rank_runs(&self.runs).into_iter().next().map(|r| &r.stats),
        }
    }

    pub fn best_fitness(&self) -> Option<f64> {
        rank_runs(&self.runs).into_iter().next().map(|r| r.fitness)
    }
}

#[derive(Debug, Clone)]
pub struct ForecastOutput {
    pub estimate: EstimateOutput,
    pub forecast: ForecastResult,
}

/// Integrate once with the initial parameter values.
pub fn simulate(ws: &Workspace) -> Result<RunResult, AppError> {
    let objective = ws.objective(&ws.config)?;
    let run = objective.score(0, ws.data.bounds.initial.clone(), 0)?;
    run.stats.log_undefined();
    info!(fitness = run.fitness, "simulation complete");
    Ok(run)
}

/// Run the configured optimizer batch over `config`'s years.
///
/// With a progress file, a watcher thread polls it for stop requests while
/// the batch runs.
pub fn estimate(ws: &Workspace, config: &ModelConfiguration, progress: Option<&Path>) -> Result<EstimateOutput, AppError> {
    let objective = ws.objective(config)?;
    let est = &ws.project.estimation;
    let cancel = CancelToken::new();

    let outcome = match progress {
        Some(path) => {
            let channel = ProgressChannel::create(path, cancel.clone())?;
            let done = AtomicBool::new(false);
            thread::scope(|s| {
                s.spawn(|| channel.watch(&done, PROGRESS_POLL));
                let outcome = run_batch(&objective, &est.search, est.runs, est.seed_mode(), &channel, &cancel);
                done.store(true, Ordering::SeqCst);
                outcome
            })?
        }
        None => run_batch(&objective, &est.search, est.runs, est.seed_mode(), &NoopObserver, &cancel)?,
    };
    let runs = outcome.into_complete()?;

    let ensemble = match &ws.project.ensemble {
        Some(settings) => Some(calculate_average(&runs, settings, &objective)?),
        None => None,
    };
    if let Some(e) = &ensemble {
        e.stats.log_undefined();
    }

    if ws.project.persist {
        persist_runs(&ws.store, &ws.gate, &config.tag(), &ws.names(), &runs)?;
    }
    Ok(EstimateOutput { runs, ensemble })
}

/// Estimate, then project from the consensus' last year.
pub fn run_forecast(ws: &Workspace, progress: Option<&Path>) -> Result<ForecastOutput, AppError> {
    let estimate = estimate(ws, &ws.config, progress)?;
    let (params, trajectory) = estimate.consensus()?;
    let start = forecast_start(params, trajectory);

    let fconfig = ws.project.forecast_configuration();
    let harvest = load_forecast_harvest(&ws.store, &fconfig, &ws.data.entities)?;
    let integrator = Integrator::new(&fconfig, &ws.data.entities, &harvest.values)?;
    let uncertainty = Uncertainty::from_config(
        &ws.project.forecast.uncertainty,
        ws.data.entities.entity_count(),
        ws.data.entities.guild_count(),
    );
    let seed = forecast_seed(ws.project.estimation.seed_mode());
    let forecast = forecast(&integrator, &start, &uncertainty, ws.project.forecast.draws, seed)?;
    Ok(ForecastOutput { estimate, forecast })
}

/// Re-estimate with 0..=peels trailing years removed.
pub fn run_retro(ws: &Workspace, progress: Option<&Path>) -> Result<MohnsRhoSet, AppError> {
    run_retrospective(ws.config.run_length, ws.project.retrospective.peels, |_peel, run_length| {
        let config = ws.config.with_run_length(run_length);
        let out = estimate(ws, &config, progress)?;
        let (params, trajectory) = out.consensus()?;
        Ok((params.clone(), trajectory.clone()))
    })
}

/// Forecast draws use their own streams so they never repeat the estimation's.
fn forecast_seed(seed: SeedMode) -> SeedMode {
    match seed {
        SeedMode::Fixed(s) => SeedMode::Fixed(s ^ 0x9e37_79b9_7f4a_7c15),
        SeedMode::Entropy => SeedMode::Entropy,
    }
}
