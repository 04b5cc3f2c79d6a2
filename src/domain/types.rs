//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - selected from the project file or CLI flags
//! - used in-memory during integration and estimation
//! - exported to JSON/CSV alongside results

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Growth term variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum GrowthForm {
    None,
    /// `r·B`
    Linear,
    /// `r·B·(1 − B/K)`
    Logistic,
}

/// Harvest term variant. Also decides which harvest series is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum HarvestForm {
    None,
    /// Catch series value taken directly.
    Catch,
    /// `q·E·B`
    Effort,
    /// `F·B`
    Exploitation,
}

/// Competition term variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CompetitionForm {
    None,
    /// Pairwise alpha coefficients between entities.
    Alpha,
    /// Species and guild beta coefficients (within-guild and between-guild).
    MsProd,
    /// Guild×guild beta coefficients against per-guild carrying capacity.
    AggProd,
}

/// Predation term variant (Holling functional responses).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PredationForm {
    None,
    #[serde(rename = "type-i")]
    TypeI,
    #[serde(rename = "type-ii")]
    TypeII,
    #[serde(rename = "type-iii")]
    TypeIII,
}

/// How the observed biomass series relates to absolute biomass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ObservedKind {
    /// Observed series is absolute biomass.
    Absolute,
    /// Observed series is a survey index; divide by survey catchability.
    Relative,
}

/// Fitness criterion reported back to the optimizer (lower is better).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectiveCriterion {
    LeastSquares,
    MaximumLikelihood,
    ModelEfficiency,
}

/// Per-entity scaling applied to observed/estimated values before comparison.
///
/// Without scaling, species with large biomass dominate a least-squares fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Scaling {
    None,
    Mean,
    MinMax,
    ZScore,
}

/// How an ensemble is combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AveragingMode {
    /// Average the parameter sets, then integrate once.
    ByParameter,
    /// Average the trajectories directly.
    ByBiomass,
}

/// Averaging formula applied across selected runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AveragingAlgorithm {
    Mean,
}

/// Source of randomness for Monte Carlo draws and search backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeedMode {
    /// Reproducible streams derived from this seed.
    Fixed(u64),
    /// Fresh system entropy for every stream.
    Entropy,
}

impl SeedMode {
    /// Seed for stream `index`, or `None` for entropy mode.
    ///
    /// Fixed seeds increase monotonically with the stream index so each run or
    /// draw gets its own reproducible sequence.
    pub fn stream_seed(self, index: u64) -> Option<u64> {
        match self {
            SeedMode::Fixed(seed) => Some(seed.wrapping_add(index)),
            SeedMode::Entropy => None,
        }
    }
}

impl From<Option<u64>> for SeedMode {
    fn from(value: Option<u64>) -> Self {
        match value {
            Some(seed) => SeedMode::Fixed(seed),
            None => SeedMode::Entropy,
        }
    }
}

/// One species and the guild it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Species {
    pub name: String,
    pub guild: usize,
}

/// A guild and its member species (indices into the species list).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guild {
    pub name: String,
    pub members: Vec<usize>,
}

/// Species/guild membership plus the granularity the model runs at.
///
/// When `aggregate` is set, the active entities are the guilds themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMap {
    pub species: Vec<Species>,
    pub guilds: Vec<Guild>,
    pub aggregate: bool,
}

impl EntityMap {
    /// Build a map from `(species, guild)` name pairs, preserving first-seen guild order.
    pub fn from_pairs(pairs: &[(String, String)], aggregate: bool) -> Result<Self, AppError> {
        if pairs.is_empty() {
            return Err(AppError::shortfall("species", 0, 1));
        }

        let mut species = Vec::with_capacity(pairs.len());
        let mut guilds: Vec<Guild> = Vec::new();
        for (idx, (name, guild_name)) in pairs.iter().enumerate() {
            if species.iter().any(|s: &Species| &s.name == name) {
                return Err(AppError::config(format!("Duplicate species name `{name}`.")));
            }
            let guild = match guilds.iter().position(|g| &g.name == guild_name) {
                Some(g) => g,
                None => {
                    guilds.push(Guild {
                        name: guild_name.clone(),
                        members: Vec::new(),
                    });
                    guilds.len() - 1
                }
            };
            guilds[guild].members.push(idx);
            species.push(Species {
                name: name.clone(),
                guild,
            });
        }

        Ok(Self {
            species,
            guilds,
            aggregate,
        })
    }

    /// Number of active entities (species, or guilds when aggregated).
    pub fn entity_count(&self) -> usize {
        if self.aggregate {
            self.guilds.len()
        } else {
            self.species.len()
        }
    }

    pub fn guild_count(&self) -> usize {
        self.guilds.len()
    }

    pub fn entity_names(&self) -> Vec<String> {
        if self.aggregate {
            self.guilds.iter().map(|g| g.name.clone()).collect()
        } else {
            self.species.iter().map(|s| s.name.clone()).collect()
        }
    }

    /// Guild index of each active entity.
    pub fn guild_of(&self) -> Vec<usize> {
        if self.aggregate {
            (0..self.guilds.len()).collect()
        } else {
            self.species.iter().map(|s| s.guild).collect()
        }
    }

    pub fn entity_index(&self, name: &str) -> Option<usize> {
        if self.aggregate {
            self.guilds.iter().position(|g| g.name == name)
        } else {
            self.species.iter().position(|s| s.name == name)
        }
    }

    pub fn guild_index(&self, name: &str) -> Option<usize> {
        self.guilds.iter().position(|g| g.name == name)
    }

    pub fn species_index(&self, name: &str) -> Option<usize> {
        self.species.iter().position(|s| s.name == name)
    }

    /// The same membership at species granularity.
    pub fn species_view(&self) -> EntityMap {
        EntityMap {
            aggregate: false,
            ..self.clone()
        }
    }

    /// Species indices covered by each active entity.
    pub fn members(&self) -> Vec<Vec<usize>> {
        if self.aggregate {
            self.guilds.iter().map(|g| g.members.clone()).collect()
        } else {
            (0..self.species.len()).map(|i| vec![i]).collect()
        }
    }
}

/// The selected functional forms plus run granularity and length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfiguration {
    pub growth: GrowthForm,
    pub harvest: HarvestForm,
    pub competition: CompetitionForm,
    pub predation: PredationForm,
    /// Run at guild granularity instead of species.
    pub aggregate: bool,
    pub start_year: i32,
    /// Number of integration steps; trajectories hold `run_length + 1` rows.
    pub run_length: usize,
    pub observed: ObservedKind,
}

impl ModelConfiguration {
    /// Short tag used to key persisted results.
    pub fn tag(&self) -> String {
        format!(
            "{:?}-{:?}-{:?}-{:?}{}",
            self.growth,
            self.harvest,
            self.competition,
            self.predation,
            if self.aggregate { "-agg" } else { "" }
        )
        .to_lowercase()
    }

    /// Copy with a shorter run length (used when peeling years).
    pub fn with_run_length(&self, run_length: usize) -> Self {
        Self {
            run_length,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs() -> Vec<(String, String)> {
        vec![
            ("cod".to_string(), "groundfish".to_string()),
            ("herring".to_string(), "pelagic".to_string()),
            ("haddock".to_string(), "groundfish".to_string()),
        ]
    }

    #[test]
    fn guilds_follow_first_seen_order() {
        let map = EntityMap::from_pairs(&pairs(), false).unwrap();
        assert_eq!(map.guild_count(), 2);
        assert_eq!(map.guilds[0].members, vec![0, 2]);
        assert_eq!(map.guild_of(), vec![0, 1, 0]);
        assert_eq!(map.entity_count(), 3);
    }

    #[test]
    fn aggregate_view_uses_guilds_as_entities() {
        let map = EntityMap::from_pairs(&pairs(), true).unwrap();
        assert_eq!(map.entity_count(), 2);
        assert_eq!(map.entity_names(), vec!["groundfish", "pelagic"]);
        assert_eq!(map.guild_of(), vec![0, 1]);
        assert_eq!(map.members(), vec![vec![0, 2], vec![1]]);

        let species = map.species_view();
        assert_eq!(species.entity_count(), 3);
        assert_eq!(species.members(), vec![vec![0], vec![1], vec![2]]);
        assert_eq!(species.species_index("haddock"), Some(2));
    }

    #[test]
    fn duplicate_species_is_rejected() {
        let mut p = pairs();
        p.push(("cod".to_string(), "pelagic".to_string()));
        assert!(EntityMap::from_pairs(&p, false).is_err());
    }

    #[test]
    fn fixed_seed_streams_increment() {
        assert_eq!(SeedMode::Fixed(10).stream_seed(3), Some(13));
        assert_eq!(SeedMode::Entropy.stream_seed(3), None);
    }
}
