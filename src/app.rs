//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and loads the project
//! - runs the requested pipeline
//! - prints reports
//! - writes exports into a fresh output directory

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use crate::cli::{Cli, Command, ProjectArgs};
use crate::error::AppError;
use crate::io::{
    RunManifest, create_run_dir, required_scalars, write_forecast_csv, write_manifest_json, write_rho_by_year_csv,
    write_rho_csv, write_runs_csv, write_stats_csv, write_trajectory_csv,
};
use crate::report::{format_forecast, format_header, format_parameters, format_rho, format_runs, format_stats};

pub mod pipeline;

use pipeline::{EstimateOutput, Workspace};

/// Entry point for the `msspm` binary.
pub fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    dispatch(&cli.command)
}

/// Run one command end to end.
pub fn dispatch(command: &Command) -> Result<(), AppError> {
    let args = command.args();
    let project = args.load_project()?;
    let ws = Workspace::open(project)?;
    println!("{}", format_header(command.name(), &ws.project.name, &ws.config));

    let mut export = Export::begin(&ws, command.name(), args)?;
    match command {
        Command::Simulate(_) => handle_simulate(&ws, export.as_mut())?,
        Command::Estimate(_) => {
            let out = pipeline::estimate(&ws, &ws.config, args.progress.as_deref())?;
            report_estimate(&ws, &out, args.top, export.as_mut())?;
        }
        Command::Forecast(_) => handle_forecast(&ws, args, export.as_mut())?,
        Command::Retro(_) => handle_retro(&ws, args, export.as_mut())?,
    }
    if let Some(export) = export {
        export.finish()?;
    }
    Ok(())
}

fn handle_simulate(ws: &Workspace, export: Option<&mut Export>) -> Result<(), AppError> {
    let run = pipeline::simulate(ws)?;
    let names = ws.names();
    println!("Fitness: {:.6}\n", run.fitness);
    println!("{}", format_parameters(&names, &run.params, &required_scalars(&ws.config)));
    println!("{}", format_stats(&run.stats));

    if let Some(export) = export {
        write_trajectory_csv(&export.file("trajectory.csv"), &names, &run.trajectory)?;
        write_stats_csv(&export.file("stats.csv"), &run.stats)?;
        export.manifest.runs_completed = 1;
        export.manifest.best_fitness = Some(run.fitness);
        export.manifest.consensus = Some(run.params);
    }
    Ok(())
}

fn report_estimate(
    ws: &Workspace,
    out: &EstimateOutput,
    top: usize,
    export: Option<&mut Export>,
) -> Result<(), AppError> {
    let names = ws.names();
    let (params, trajectory) = out.consensus()?;
    println!("{}", format_runs(&out.runs, out.ensemble.as_ref(), top));
    println!("{}", format_parameters(&names, params, &required_scalars(&ws.config)));
    if let Some(stats) = out.consensus_stats() {
        println!("{}", format_stats(stats));
    }

    if let Some(export) = export {
        write_runs_csv(&export.file("runs.csv"), &out.runs, out.ensemble.as_ref())?;
        write_trajectory_csv(&export.file("trajectory.csv"), &names, trajectory)?;
        if let Some(stats) = out.consensus_stats() {
            write_stats_csv(&export.file("stats.csv"), stats)?;
        }
        export.manifest.runs_completed = out.runs.len();
        export.manifest.best_fitness = out.best_fitness();
        export.manifest.consensus = Some(params.clone());
    }
    Ok(())
}

fn handle_forecast(ws: &Workspace, args: &ProjectArgs, mut export: Option<&mut Export>) -> Result<(), AppError> {
    let out = pipeline::run_forecast(ws, args.progress.as_deref())?;
    report_estimate(ws, &out.estimate, args.top, export.as_deref_mut())?;
    let names = ws.names();
    println!("{}", format_forecast(&names, &out.forecast));

    if let Some(export) = export {
        write_forecast_csv(&export.file("forecast.csv"), &names, &out.forecast)?;
    }
    Ok(())
}

fn handle_retro(ws: &Workspace, args: &ProjectArgs, export: Option<&mut Export>) -> Result<(), AppError> {
    let set = pipeline::run_retro(ws, args.progress.as_deref())?;
    let names = ws.names();
    println!("{}", format_rho(&names, &set));

    if let Some(export) = export {
        write_rho_csv(&export.file("rho.csv"), &names, &set)?;
        write_rho_by_year_csv(&export.file("rho_by_year.csv"), &names, ws.config.start_year, &set)?;
        for peel in &set.peels {
            write_trajectory_csv(&export.file(&format!("peel_{}.csv", peel.peel)), &names, &peel.trajectory)?;
        }
        export.manifest.runs_completed = set.peels.len();
    }
    Ok(())
}

/// Output directory of one command plus its manifest.
struct Export {
    dir: PathBuf,
    manifest: RunManifest,
}

impl Export {
    fn begin(ws: &Workspace, command: &str, args: &ProjectArgs) -> Result<Option<Self>, AppError> {
        if args.no_export {
            return Ok(None);
        }
        let dir = create_run_dir(&ws.project.output_dir, command)?;
        let manifest = RunManifest::new(command, &ws.project.name, &ws.config, ws.project.estimation.seed);
        Ok(Some(Self { dir, manifest }))
    }

    /// Path of an output file, recorded in the manifest.
    fn file(&mut self, name: &str) -> PathBuf {
        self.manifest.outputs.push(name.to_string());
        self.dir.join(name)
    }

    fn finish(self) -> Result<(), AppError> {
        write_manifest_json(&self.dir.join("manifest.json"), &self.manifest)?;
        info!(dir = %self.dir.display(), files = self.manifest.outputs.len(), "exports written");
        println!("Outputs: {}", self.dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;

    fn demo_command(sub: &str, out: &Path, extra: &[&str]) -> Command {
        let project = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos/georges_bank/project.toml");
        let mut argv = vec![
            "msspm".to_string(),
            sub.to_string(),
            "--project".to_string(),
            project.display().to_string(),
            "--outdir".to_string(),
            out.display().to_string(),
            "--runs".to_string(),
            "2".to_string(),
        ];
        argv.extend(extra.iter().map(|s| s.to_string()));
        Cli::parse_from(argv).command
    }

    fn single_output_dir(root: &Path) -> PathBuf {
        let dirs: Vec<PathBuf> = fs::read_dir(root).unwrap().map(|e| e.unwrap().path()).collect();
        assert_eq!(dirs.len(), 1);
        dirs[0].clone()
    }

    #[test]
    fn simulate_writes_tables_and_manifest() {
        let out = tempfile::tempdir().unwrap();
        dispatch(&demo_command("simulate", out.path(), &[])).unwrap();
        let dir = single_output_dir(out.path());
        assert!(dir.file_name().unwrap().to_string_lossy().starts_with("simulate-"));
        for f in ["trajectory.csv", "stats.csv", "manifest.json"] {
            assert!(dir.join(f).is_file(), "{f} missing");
        }
        let manifest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.join("manifest.json")).unwrap()).unwrap();
        assert_eq!(manifest["command"], "simulate");
        assert_eq!(manifest["runs_completed"], 1);
        assert_eq!(manifest["outputs"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn forecast_exports_estimate_and_projection() {
        let out = tempfile::tempdir().unwrap();
        dispatch(&demo_command("forecast", out.path(), &["--draws", "10"])).unwrap();
        let dir = single_output_dir(out.path());
        for f in ["runs.csv", "trajectory.csv", "forecast.csv", "manifest.json"] {
            assert!(dir.join(f).is_file(), "{f} missing");
        }
    }

    #[test]
    fn no_export_leaves_output_root_empty() {
        let out = tempfile::tempdir().unwrap();
        dispatch(&demo_command("retro", out.path(), &["--no-export", "--peels", "1"])).unwrap();
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }
}
