//! Command-line parsing for the multi-species production model.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the modeling/math code. Every command reads a project file;
//! flags only override a few of its settings.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::error::AppError;
use crate::io::ProjectConfig;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "msspm", version, about = "Multi-species surplus production model")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Integrate the model once with the initial parameter values and report fit statistics.
    Simulate(ProjectArgs),
    /// Estimate parameters over independent optimizer runs, optionally averaging the best.
    Estimate(ProjectArgs),
    /// Estimate, then project biomass forward with Monte Carlo uncertainty bands.
    Forecast(ProjectArgs),
    /// Re-estimate with trailing years removed and report Mohn's rho.
    Retro(ProjectArgs),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Simulate(_) => "simulate",
            Command::Estimate(_) => "estimate",
            Command::Forecast(_) => "forecast",
            Command::Retro(_) => "retro",
        }
    }

    pub fn args(&self) -> &ProjectArgs {
        match self {
            Command::Simulate(a) | Command::Estimate(a) | Command::Forecast(a) | Command::Retro(a) => a,
        }
    }
}

/// Options shared by every command.
#[derive(Debug, Args, Clone)]
pub struct ProjectArgs {
    /// Project file (TOML).
    #[arg(short = 'p', long, value_name = "TOML", default_value = "project.toml")]
    pub project: PathBuf,

    /// Fixed random seed (overrides the project).
    #[arg(long)]
    pub seed: Option<u64>,

    /// Number of optimizer runs (overrides the project).
    #[arg(short = 'n', long)]
    pub runs: Option<usize>,

    /// Number of Monte Carlo forecast draws (overrides the project).
    #[arg(long)]
    pub draws: Option<usize>,

    /// Number of retrospective peels (overrides the project).
    #[arg(long)]
    pub peels: Option<usize>,

    /// Output root (overrides the project).
    #[arg(long, value_name = "DIR")]
    pub outdir: Option<PathBuf>,

    /// Progress side file; write `Stop` to its first line to cancel.
    #[arg(long, value_name = "FILE")]
    pub progress: Option<PathBuf>,

    /// Show the best N runs.
    #[arg(long, default_value_t = 10)]
    pub top: usize,

    /// Print the report only; write no files.
    #[arg(long)]
    pub no_export: bool,
}

impl ProjectArgs {
    /// Load the project and apply flag overrides.
    pub fn load_project(&self) -> Result<ProjectConfig, AppError> {
        let mut project = ProjectConfig::load(&self.project)?;
        if let Some(seed) = self.seed {
            project.estimation.seed = Some(seed);
        }
        if let Some(runs) = self.runs {
            project.estimation.runs = runs;
        }
        if let Some(draws) = self.draws {
            project.forecast.draws = draws;
        }
        if let Some(peels) = self.peels {
            project.retrospective.peels = peels;
        }
        if let Some(dir) = &self.outdir {
            project.output_dir = dir.clone();
        }
        project.validate()?;
        Ok(project)
    }
}
