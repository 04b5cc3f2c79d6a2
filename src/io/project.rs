//! Project file (TOML).
//!
//! A project names the data directory, the model configuration and the
//! settings of every pipeline. All sections are optional; missing keys take
//! their defaults. Relative paths are resolved against the project file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{
    CompetitionForm, GrowthForm, HarvestForm, ModelConfiguration, ObjectiveCriterion, ObservedKind,
    PredationForm, Scaling, SeedMode,
};
use crate::error::AppError;
use crate::fit::{EnsembleSettings, RandomSearch};
use crate::sim::UncertaintyConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormsConfig {
    pub growth: GrowthForm,
    pub harvest: HarvestForm,
    pub competition: CompetitionForm,
    pub predation: PredationForm,
    pub observed: ObservedKind,
}

impl Default for FormsConfig {
    fn default() -> Self {
        Self {
            growth: GrowthForm::Logistic,
            harvest: HarvestForm::Catch,
            competition: CompetitionForm::None,
            predation: PredationForm::None,
            observed: ObservedKind::Absolute,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationConfig {
    pub criterion: ObjectiveCriterion,
    pub scaling: Scaling,
    /// Independent optimizer runs.
    pub runs: usize,
    /// Fixed seed; omit for fresh entropy on every run.
    pub seed: Option<u64>,
    pub search: RandomSearch,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            criterion: ObjectiveCriterion::LeastSquares,
            scaling: Scaling::None,
            runs: 1,
            seed: None,
            search: RandomSearch::default(),
        }
    }
}

impl EstimationConfig {
    pub fn seed_mode(&self) -> SeedMode {
        self.seed.into()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Years projected past the last estimated year.
    pub horizon: usize,
    pub draws: usize,
    pub uncertainty: UncertaintyConfig,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            horizon: 10,
            draws: 100,
            uncertainty: UncertaintyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrospectiveConfig {
    /// Number of years peeled (the base run is not counted).
    pub peels: usize,
}

impl Default for RetrospectiveConfig {
    fn default() -> Self {
        Self { peels: 5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: String,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub start_year: i32,
    /// Integration steps; series cover `run_length + 1` years.
    pub run_length: usize,
    /// Run at guild granularity.
    pub aggregate: bool,
    /// Write run results back to the data store as well as to `output_dir`.
    pub persist: bool,
    pub forms: FormsConfig,
    pub estimation: EstimationConfig,
    /// Average the best runs when present.
    pub ensemble: Option<EnsembleSettings>,
    pub forecast: ForecastConfig,
    pub retrospective: RetrospectiveConfig,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "msspm".to_string(),
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("output"),
            start_year: 0,
            run_length: 0,
            aggregate: false,
            persist: false,
            forms: FormsConfig::default(),
            estimation: EstimationConfig::default(),
            ensemble: None,
            forecast: ForecastConfig::default(),
            retrospective: RetrospectiveConfig::default(),
        }
    }
}

impl ProjectConfig {
    /// Read, resolve and validate a project file.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let text = fs::read_to_string(path)
            .map_err(|e| AppError::io(format!("Failed to read project '{}': {e}", path.display())))?;
        let mut config: Self = toml::from_str(&text)
            .map_err(|e| AppError::parse(format!("Invalid project '{}': {e}", path.display())))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.data_dir = base.join(&config.data_dir);
        config.output_dir = base.join(&config.output_dir);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.run_length == 0 {
            return Err(AppError::config("run_length must be greater than zero."));
        }
        if self.estimation.runs == 0 {
            return Err(AppError::config("estimation.runs must be greater than zero."));
        }
        self.estimation.search.validate()?;
        if let Some(ensemble) = &self.ensemble {
            ensemble.validate()?;
        }
        if self.forecast.horizon == 0 {
            return Err(AppError::config("forecast.horizon must be greater than zero."));
        }
        let u = &self.forecast.uncertainty;
        let fractions = [
            u.init_biomass,
            u.growth_rate,
            u.carrying_capacity,
            u.catchability,
            u.survey_q,
            u.predation_exponent,
            u.alpha,
            u.beta_species,
            u.beta_guilds,
            u.beta_guild_guild,
            u.rho,
            u.handling,
            u.harvest,
        ];
        if fractions.iter().any(|f| !f.is_finite() || *f < 0.0) {
            return Err(AppError::config("Uncertainty fractions must be finite and non-negative."));
        }
        if self.retrospective.peels >= self.run_length {
            return Err(AppError::config(format!(
                "retrospective.peels ({}) must be smaller than run_length ({}).",
                self.retrospective.peels, self.run_length
            )));
        }
        Ok(())
    }

    /// Configuration of the estimation period.
    pub fn model_configuration(&self) -> ModelConfiguration {
        ModelConfiguration {
            growth: self.forms.growth,
            harvest: self.forms.harvest,
            competition: self.forms.competition,
            predation: self.forms.predation,
            aggregate: self.aggregate,
            start_year: self.start_year,
            run_length: self.run_length,
            observed: self.forms.observed,
        }
    }

    /// Configuration of the forecast period, starting at the last estimated year.
    pub fn forecast_configuration(&self) -> ModelConfiguration {
        ModelConfiguration {
            start_year: self.start_year + self.run_length as i32,
            run_length: self.forecast.horizon,
            ..self.model_configuration()
        }
    }
}
