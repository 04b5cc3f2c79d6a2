//! Result exports (CSV tables, JSON manifest) and write-back to the store.
//!
//! Every command writes into its own timestamped directory under the
//! project's output root, so repeated runs never overwrite each other.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use csv::Writer;
use nalgebra::DMatrix;
use serde::Serialize;
use tracing::info;

use crate::domain::{
    BiomassTrajectory, EnsembleResult, ModelConfiguration, MohnsRhoSet, ParameterSet, RhoValues, RunResult,
};
use crate::error::AppError;
use crate::io::store::{Columns, Store, WriteGate, WriteKey};
use crate::math::{Stat, SummaryStats};
use crate::sim::ForecastResult;

/// Table that estimated trajectories are appended to when persisting.
pub const ESTIMATED_TABLE: &str = "estimated_biomass";

fn fmt_f64(value: f64) -> String {
    format!("{value:.10}")
}

fn fmt_option_f64(value: Option<f64>) -> String {
    value.map(fmt_f64).unwrap_or_default()
}

fn writer(path: &Path) -> Result<Writer<File>, AppError> {
    Writer::from_path(path).map_err(|e| AppError::io(format!("Failed to create '{}': {e}", path.display())))
}

fn write_row<I, T>(w: &mut Writer<File>, path: &Path, record: I) -> Result<(), AppError>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    w.write_record(record)
        .map_err(|e| AppError::io(format!("Failed to write '{}': {e}", path.display())))
}

fn finish(mut w: Writer<File>, path: &Path) -> Result<(), AppError> {
    w.flush()
        .map_err(|e| AppError::io(format!("Failed to flush '{}': {e}", path.display())))
}

/// Create `<root>/<command>-<timestamp>`, adding a counter if it already exists.
pub fn create_run_dir(root: &Path, command: &str) -> Result<PathBuf, AppError> {
    fs::create_dir_all(root)
        .map_err(|e| AppError::io(format!("Failed to create output root '{}': {e}", root.display())))?;
    let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%SZ").to_string();
    let mut dir = root.join(format!("{command}-{timestamp}"));
    let mut counter = 1_u32;
    while dir.exists() {
        dir = root.join(format!("{command}-{timestamp}-{counter:02}"));
        counter += 1;
    }
    fs::create_dir_all(&dir)
        .map_err(|e| AppError::io(format!("Failed to create output dir '{}': {e}", dir.display())))?;
    Ok(dir)
}

/// Long format: `year, entity, biomass`.
pub fn write_trajectory_csv(path: &Path, names: &[String], trajectory: &BiomassTrajectory) -> Result<(), AppError> {
    let mut w = writer(path)?;
    write_row(&mut w, path, ["year", "entity", "biomass"])?;
    for row in 0..trajectory.rows() {
        let year = trajectory.year(row).to_string();
        for (c, name) in names.iter().enumerate() {
            write_row(&mut w, path, [year.as_str(), name.as_str(), fmt_f64(trajectory.value(row, c)).as_str()])?;
        }
    }
    finish(w, path)
}

/// One row per statistic, one column per entity plus `model`. Undefined cells are blank.
pub fn write_stats_csv(path: &Path, stats: &SummaryStats) -> Result<(), AppError> {
    let mut w = writer(path)?;
    let mut header = vec!["statistic".to_string()];
    header.extend(stats.entities.iter().cloned());
    header.push("model".to_string());
    write_row(&mut w, path, &header)?;

    let mut n_row = vec!["n".to_string()];
    n_row.extend(stats.per_entity.iter().map(|s| s.n.to_string()));
    n_row.push(stats.model.n.to_string());
    write_row(&mut w, path, &n_row)?;

    for stat in Stat::ALL {
        let mut row = vec![stat.label().to_string()];
        row.extend(stats.per_entity.iter().map(|s| fmt_option_f64(s.get(stat))));
        row.push(fmt_option_f64(stats.model.get(stat)));
        write_row(&mut w, path, &row)?;
    }
    finish(w, path)
}

/// One row per completed run, marking ensemble members.
pub fn write_runs_csv(path: &Path, runs: &[RunResult], ensemble: Option<&EnsembleResult>) -> Result<(), AppError> {
    let mut w = writer(path)?;
    write_row(&mut w, path, ["run", "fitness", "iterations", "selected"])?;
    for r in runs {
        let selected = ensemble.is_some_and(|e| e.selected.contains(&r.run));
        write_row(
            &mut w,
            path,
            [
                r.run.to_string(),
                fmt_f64(r.fitness),
                r.iterations.to_string(),
                selected.to_string(),
            ],
        )?;
    }
    finish(w, path)
}

/// Long format: `year, entity, deterministic, mean, min, max`.
pub fn write_forecast_csv(path: &Path, names: &[String], forecast: &ForecastResult) -> Result<(), AppError> {
    let mut w = writer(path)?;
    write_row(&mut w, path, ["year", "entity", "deterministic", "mean", "min", "max"])?;
    let det = &forecast.deterministic;
    let has_bands = forecast.mean.nrows() == det.rows();
    for row in 0..det.rows() {
        let year = det.year(row).to_string();
        for (c, name) in names.iter().enumerate() {
            let band = |m: &DMatrix<f64>| {
                if has_bands { fmt_f64(m[(row, c)]) } else { String::new() }
            };
            write_row(
                &mut w,
                path,
                [
                    year.clone(),
                    name.clone(),
                    fmt_f64(det.value(row, c)),
                    band(&forecast.mean),
                    band(&forecast.min),
                    band(&forecast.max),
                ],
            )?;
        }
    }
    finish(w, path)
}

/// `quantity, entity, rho` with a `model` row per quantity; undefined values are blank.
pub fn write_rho_csv(path: &Path, names: &[String], set: &MohnsRhoSet) -> Result<(), AppError> {
    let mut w = writer(path)?;
    write_row(&mut w, path, ["quantity", "entity", "rho"])?;
    let quantities: [(&str, &RhoValues); 3] = [
        ("biomass", &set.biomass),
        ("growth_rate", &set.growth_rate),
        ("carrying_capacity", &set.carrying_capacity),
    ];
    for (quantity, values) in quantities {
        for (name, v) in names.iter().zip(values.per_entity.iter()) {
            write_row(&mut w, path, [quantity, name.as_str(), fmt_option_f64(*v).as_str()])?;
        }
        write_row(&mut w, path, [quantity, "model", fmt_option_f64(values.model).as_str()])?;
    }
    finish(w, path)
}

/// Mean relative difference per comparable year: `year, entity, rho`.
pub fn write_rho_by_year_csv(
    path: &Path,
    names: &[String],
    start_year: i32,
    set: &MohnsRhoSet,
) -> Result<(), AppError> {
    let mut w = writer(path)?;
    write_row(&mut w, path, ["year", "entity", "rho"])?;
    for (row, values) in set.biomass_by_year.iter().enumerate() {
        let year = (start_year + row as i32).to_string();
        for (name, v) in names.iter().zip(values.iter()) {
            write_row(&mut w, path, [year.as_str(), name.as_str(), fmt_option_f64(*v).as_str()])?;
        }
    }
    finish(w, path)
}

/// Run metadata written next to the exported tables.
#[derive(Debug, Clone, Serialize)]
pub struct RunManifest {
    pub tool: String,
    pub version: String,
    pub command: String,
    pub project: String,
    pub created_at: DateTime<Utc>,
    pub configuration: ModelConfiguration,
    pub seed: Option<u64>,
    pub runs_completed: usize,
    pub best_fitness: Option<f64>,
    pub consensus: Option<ParameterSet>,
    pub outputs: Vec<String>,
}

impl RunManifest {
    pub fn new(command: &str, project: &str, configuration: &ModelConfiguration, seed: Option<u64>) -> Self {
        Self {
            tool: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            command: command.to_string(),
            project: project.to_string(),
            created_at: Utc::now(),
            configuration: configuration.clone(),
            seed,
            runs_completed: 0,
            best_fitness: None,
            consensus: None,
            outputs: Vec::new(),
        }
    }
}

pub fn write_manifest_json(path: &Path, manifest: &RunManifest) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::io(format!("Failed to create manifest '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, manifest)
        .map_err(|e| AppError::io(format!("Failed to write manifest '{}': {e}", path.display())))?;
    info!(path = %path.display(), "manifest written");
    Ok(())
}

/// Append each run's trajectory to the store, one writer per (configuration, run).
pub fn persist_runs(
    store: &dyn Store,
    gate: &WriteGate,
    config_tag: &str,
    names: &[String],
    runs: &[RunResult],
) -> Result<(), AppError> {
    for r in runs {
        let mut columns = Columns::new();
        let mut push = |col: &str, v: String| columns.entry(col.to_string()).or_default().push(v);
        for row in 0..r.trajectory.rows() {
            for (c, name) in names.iter().enumerate() {
                push("config", config_tag.to_string());
                push("run", r.run.to_string());
                push("entity", name.clone());
                push("year", r.trajectory.year(row).to_string());
                push("biomass", fmt_f64(r.trajectory.value(row, c)));
            }
        }
        let key = WriteKey::new(config_tag, r.run.to_string());
        gate.with_lock(&key, || store.update(ESTIMATED_TABLE, &columns))?;
    }
    info!(runs = runs.len(), table = ESTIMATED_TABLE, "runs persisted");
    Ok(())
}
