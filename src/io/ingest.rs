//! Typed loading of model inputs from a `Store`.
//!
//! Every table is checked in two passes:
//! - **shape first**: row counts are compared with what the entity/guild
//!   counts and run length require, before any number is parsed
//!   (`DataShortfall` with found vs expected)
//! - **cells second**: names must resolve, values must be numeric
//!   (`ConfigurationIncomplete` otherwise)
//!
//! Parameters a configuration does not need may be omitted and are
//! zero-filled. Blank observed biomass cells become NaN.
//!
//! Parameters and series are always keyed by species. An aggregated run folds
//! member species into their guild after parsing: biomass, carrying capacity,
//! catch and effort are summed; exploitation rates are averaged; other scalar
//! parameters are averaged with initial biomass as the weight. Interaction
//! matrices are keyed by the active entities, so guild names when aggregated.

use std::collections::HashSet;

use nalgebra::DMatrix;
use tracing::{debug, info};

use crate::domain::{
    CompetitionForm, EntityMap, EstimationBounds, GrowthForm, HarvestForm, MatrixParam, MatrixShape,
    ModelConfiguration, ObservedKind, ParameterSet, PredationForm, ScalarParam, TimeSeries,
};
use crate::error::AppError;
use crate::io::store::{Columns, Store, row_count};

pub const SPECIES_TABLE: &str = "species";
pub const PARAMETERS_TABLE: &str = "parameters";
pub const INTERACTIONS_TABLE: &str = "interactions";
pub const OBSERVED_TABLE: &str = "observed_biomass";

const SERIES_COLUMNS: [&str; 3] = ["entity", "year", "value"];

/// Everything an estimation or simulation needs besides the configuration.
#[derive(Debug, Clone)]
pub struct ModelData {
    pub entities: EntityMap,
    pub bounds: EstimationBounds,
    /// Zero-filled when the harvest form is `None`.
    pub harvest: TimeSeries,
    pub observed: TimeSeries,
}

/// Harvest series table for a form (`None` has no table).
pub fn harvest_table(form: HarvestForm) -> Option<&'static str> {
    match form {
        HarvestForm::None => None,
        HarvestForm::Catch => Some("catch"),
        HarvestForm::Effort => Some("effort"),
        HarvestForm::Exploitation => Some("exploitation"),
    }
}

/// Forecast harvest table for a form.
pub fn forecast_harvest_table(form: HarvestForm) -> Option<String> {
    harvest_table(form).map(|t| format!("forecast_{t}"))
}

/// Load entities, bounds, harvest and observed biomass for `config`.
pub fn load_model_data(store: &dyn Store, config: &ModelConfiguration) -> Result<ModelData, AppError> {
    let entities = load_entities(store, config.aggregate)?;
    let bounds = load_bounds(store, config, &entities)?;
    let rows = config.run_length + 1;
    let harvest = load_harvest(store, config.harvest, harvest_table(config.harvest), &entities, config.start_year, rows)?;
    let observed = load_folded(store, OBSERVED_TABLE, &entities, config.start_year, rows, true, Fold::Sum)?;
    info!(
        entities = entities.entity_count(),
        guilds = entities.guild_count(),
        free = bounds.free_count(),
        years = rows,
        "model data loaded"
    );
    Ok(ModelData {
        entities,
        bounds,
        harvest,
        observed,
    })
}

/// Load the forecast harvest for `config` (the forecast-period configuration).
pub fn load_forecast_harvest(
    store: &dyn Store,
    config: &ModelConfiguration,
    entities: &EntityMap,
) -> Result<TimeSeries, AppError> {
    let table = forecast_harvest_table(config.harvest);
    load_harvest(store, config.harvest, table.as_deref(), entities, config.start_year, config.run_length + 1)
}

fn load_harvest(
    store: &dyn Store,
    form: HarvestForm,
    table: Option<&str>,
    entities: &EntityMap,
    start_year: i32,
    rows: usize,
) -> Result<TimeSeries, AppError> {
    let fold = match form {
        HarvestForm::Exploitation => Fold::Mean,
        _ => Fold::Sum,
    };
    match table {
        Some(table) if form != HarvestForm::None => load_folded(store, table, entities, start_year, rows, false, fold),
        _ => Ok(TimeSeries::zeros("harvest", start_year, rows, entities.entity_count())),
    }
}

/// How member-species values combine into one guild value.
#[derive(Debug, Clone, Copy)]
enum Fold<'w> {
    Sum,
    Mean,
    /// Weighted mean; falls back to `Mean` when the weights sum to zero.
    Weighted(&'w [f64]),
}

impl Fold<'_> {
    fn combine(self, values: &[f64], members: &[usize]) -> f64 {
        if let [only] = members {
            return values[*only];
        }
        match self {
            Fold::Sum => members.iter().map(|&m| values[m]).sum(),
            Fold::Mean => members.iter().map(|&m| values[m]).sum::<f64>() / members.len() as f64,
            Fold::Weighted(w) => {
                let total: f64 = members.iter().map(|&m| w[m]).sum();
                if total > 0.0 && total.is_finite() {
                    members.iter().map(|&m| w[m] * values[m]).sum::<f64>() / total
                } else {
                    Fold::Mean.combine(values, members)
                }
            }
        }
    }

    fn apply(self, values: &[f64], members: &[Vec<usize>]) -> Vec<f64> {
        members.iter().map(|m| self.combine(values, m)).collect()
    }
}

/// Load a species-keyed series and fold it into the active entities.
///
/// A missing member observation leaves the guild value missing for that year.
fn load_folded(
    store: &dyn Store,
    table: &str,
    entities: &EntityMap,
    start_year: i32,
    rows: usize,
    allow_blank: bool,
    fold: Fold<'_>,
) -> Result<TimeSeries, AppError> {
    let series = load_series(store, table, &entities.species_view(), start_year, rows, allow_blank)?;
    if !entities.aggregate {
        return Ok(series);
    }
    let members = entities.members();
    let mut values = DMatrix::zeros(series.rows(), members.len());
    for r in 0..series.rows() {
        let row: Vec<f64> = series.values.row(r).iter().copied().collect();
        for (c, m) in members.iter().enumerate() {
            values[(r, c)] = fold.combine(&row, m);
        }
    }
    debug!(table, guilds = members.len(), "series folded into guilds");
    Ok(TimeSeries { values, ..series })
}

/// Species and their guilds.
pub fn load_entities(store: &dyn Store, aggregate: bool) -> Result<EntityMap, AppError> {
    let t = store.query(SPECIES_TABLE, &["name", "guild"])?;
    let pairs: Vec<(String, String)> = t["name"]
        .iter()
        .zip(t["guild"].iter())
        .map(|(n, g)| (n.clone(), g.clone()))
        .collect();
    if let Some((name, _)) = pairs.iter().find(|(n, g)| n.is_empty() || g.is_empty()) {
        return Err(AppError::config(format!("Species `{name}` has a blank name or guild.")));
    }
    EntityMap::from_pairs(&pairs, aggregate)
}

/// Scalar parameters a configuration cannot run without.
pub fn required_scalars(config: &ModelConfiguration) -> Vec<ScalarParam> {
    let mut out = vec![ScalarParam::InitBiomass];
    if config.growth != GrowthForm::None {
        out.push(ScalarParam::GrowthRate);
    }
    // Carrying capacity can be derived from alpha/rho diagonals when those are active.
    if config.growth == GrowthForm::Logistic
        && config.competition != CompetitionForm::Alpha
        && config.predation == PredationForm::None
    {
        out.push(ScalarParam::CarryingCapacity);
    }
    if config.harvest == HarvestForm::Effort {
        out.push(ScalarParam::Catchability);
    }
    if config.observed == ObservedKind::Relative {
        out.push(ScalarParam::SurveyQ);
    }
    if config.predation == PredationForm::TypeIII {
        out.push(ScalarParam::PredationExponent);
    }
    out
}

/// Matrix parameters a configuration cannot run without.
pub fn required_matrices(config: &ModelConfiguration) -> Vec<MatrixParam> {
    let mut out = Vec::new();
    match config.competition {
        CompetitionForm::None => {}
        CompetitionForm::Alpha => out.push(MatrixParam::Alpha),
        CompetitionForm::MsProd => out.extend([MatrixParam::BetaSpecies, MatrixParam::BetaGuilds]),
        CompetitionForm::AggProd => out.push(MatrixParam::BetaGuildGuild),
    }
    match config.predation {
        PredationForm::None => {}
        PredationForm::TypeI => out.push(MatrixParam::Rho),
        PredationForm::TypeII | PredationForm::TypeIII => out.extend([MatrixParam::Rho, MatrixParam::Handling]),
    }
    out
}

/// Parameter values and bounds from the `parameters` and `interactions` tables.
pub fn load_bounds(
    store: &dyn Store,
    config: &ModelConfiguration,
    entities: &EntityMap,
) -> Result<EstimationBounds, AppError> {
    let per_species = load_scalar_bounds(store, config, &entities.species_view())?;
    let mut bounds = fold_scalar_bounds(per_species, entities);

    let needed = required_matrices(config);
    if store.has_table(INTERACTIONS_TABLE) {
        let t = store.query(INTERACTIONS_TABLE, &["matrix", "row", "col", "value", "min", "max"])?;
        load_matrices(&t, &needed, entities, &mut bounds)?;
    } else if let Some(missing) = needed.first() {
        return Err(AppError::config(format!(
            "Table `{INTERACTIONS_TABLE}` is required for `{}`.",
            missing.as_str()
        )));
    }

    bounds.validate()?;
    debug!(free = bounds.free_count(), "estimation bounds loaded");
    Ok(bounds)
}

/// Scalar parameters at species granularity; matrices are left zero.
fn load_scalar_bounds(
    store: &dyn Store,
    config: &ModelConfiguration,
    species: &EntityMap,
) -> Result<EstimationBounds, AppError> {
    let n = species.entity_count();
    let mut bounds = EstimationBounds::fixed(ParameterSet::zeros(n, species.guild_count()));

    let t = store.query(PARAMETERS_TABLE, &["entity", "parameter", "value", "min", "max"])?;
    let required = required_scalars(config);
    for p in ScalarParam::ALL {
        let rows: Vec<usize> = (0..row_count(&t)).filter(|&r| t["parameter"][r] == p.as_str()).collect();
        if rows.is_empty() && !required.contains(&p) {
            continue;
        }
        if rows.len() != n {
            return Err(AppError::shortfall(format!("{PARAMETERS_TABLE}.{}", p.as_str()), rows.len(), n));
        }
    }
    if let Some(unknown) = t["parameter"].iter().find(|name| ScalarParam::parse(name).is_none()) {
        return Err(AppError::config(format!("Unknown parameter `{unknown}`.")));
    }
    let mut seen = HashSet::new();
    for r in 0..row_count(&t) {
        let p = ScalarParam::parse(&t["parameter"][r])
            .ok_or_else(|| AppError::config(format!("Unknown parameter `{}`.", t["parameter"][r])))?;
        let entity = &t["entity"][r];
        let Some(i) = species.species_index(entity) else {
            if species.guild_index(entity).is_some() {
                return Err(AppError::config(format!(
                    "Parameter `{}` names guild `{entity}`; parameters are given per species.",
                    p.as_str()
                )));
            }
            return Err(AppError::config(format!(
                "Parameter `{}` names unknown species `{entity}`.",
                p.as_str()
            )));
        };
        if !seen.insert((p, i)) {
            return Err(AppError::config(format!("Parameter `{}` repeats entity `{entity}`.", p.as_str())));
        }
        let label = format!("{} of `{entity}`", p.as_str());
        let (value, min, max) = triple(&t, r, &label)?;
        bounds.initial.scalar_mut(p)[i] = value;
        bounds.min.scalar_mut(p)[i] = min;
        bounds.max.scalar_mut(p)[i] = max;
    }
    Ok(bounds)
}

/// Fold species scalar bounds into the active entities.
///
/// Value, min and max fold alike, so a guild value is free when any member's is.
fn fold_scalar_bounds(species: EstimationBounds, entities: &EntityMap) -> EstimationBounds {
    if !entities.aggregate {
        return species;
    }
    let members = entities.members();
    let weights = species.initial.init_biomass.clone();
    let mut out = EstimationBounds::fixed(ParameterSet::zeros(entities.entity_count(), entities.guild_count()));
    for p in ScalarParam::ALL {
        let fold = match p {
            ScalarParam::InitBiomass | ScalarParam::CarryingCapacity => Fold::Sum,
            _ => Fold::Weighted(&weights),
        };
        *out.initial.scalar_mut(p) = fold.apply(species.initial.scalar(p), &members);
        *out.min.scalar_mut(p) = fold.apply(species.min.scalar(p), &members);
        *out.max.scalar_mut(p) = fold.apply(species.max.scalar(p), &members);
    }
    out
}

fn load_matrices(
    t: &Columns,
    needed: &[MatrixParam],
    entities: &EntityMap,
    bounds: &mut EstimationBounds,
) -> Result<(), AppError> {
    let n = entities.entity_count();
    let guilds = entities.guild_count();
    for p in MatrixParam::ALL {
        let count = t["matrix"].iter().filter(|m| *m == p.as_str()).count();
        if count == 0 && !needed.contains(&p) {
            continue;
        }
        let (rows, cols) = p.dims(n, guilds);
        if count != rows * cols {
            return Err(AppError::shortfall(format!("{INTERACTIONS_TABLE}.{}", p.as_str()), count, rows * cols));
        }
    }

    let entity = |name: &str| entities.entity_index(name);
    let guild = |name: &str| entities.guild_index(name);
    for r in 0..row_count(t) {
        let name = &t["matrix"][r];
        let p = MatrixParam::parse(name).ok_or_else(|| AppError::config(format!("Unknown matrix `{name}`.")))?;
        let (row_name, col_name) = (&t["row"][r], &t["col"][r]);
        let (ri, ci) = match p.shape() {
            MatrixShape::EntityEntity => (entity(row_name), entity(col_name)),
            MatrixShape::EntityGuild => (entity(row_name), guild(col_name)),
            MatrixShape::GuildGuild => (guild(row_name), guild(col_name)),
        };
        let (Some(ri), Some(ci)) = (ri, ci) else {
            let species_keyed = entities.aggregate
                && [row_name, col_name].iter().any(|n| entities.species_index(n).is_some());
            if species_keyed {
                return Err(AppError::config(format!(
                    "Matrix `{name}` cell ({row_name}, {col_name}) is keyed by species; aggregated runs key interactions by guild."
                )));
            }
            return Err(AppError::config(format!(
                "Matrix `{name}` cell ({row_name}, {col_name}) names an unknown entity or guild."
            )));
        };
        let label = format!("{name}[{row_name}, {col_name}]");
        let (value, min, max) = triple(t, r, &label)?;
        bounds.initial.matrix_mut(p)[(ri, ci)] = value;
        bounds.min.matrix_mut(p)[(ri, ci)] = min;
        bounds.max.matrix_mut(p)[(ri, ci)] = max;
    }
    Ok(())
}

fn triple(t: &Columns, r: usize, label: &str) -> Result<(f64, f64, f64), AppError> {
    let cell = |col: &str| -> Result<f64, AppError> {
        let raw = t[col][r].as_str();
        if raw.is_empty() {
            return Err(AppError::config(format!("Missing {col} for {label}.")));
        }
        parse_number(raw).ok_or_else(|| AppError::config(format!("Non-numeric {col} `{raw}` for {label}.")))
    };
    Ok((cell("value")?, cell("min")?, cell("max")?))
}

fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Load a long-format `(entity, year, value)` series.
///
/// The table must hold a whole number of years for every entity and at
/// least `rows` years. With `allow_blank`, empty cells become NaN.
pub fn load_series(
    store: &dyn Store,
    table: &str,
    entities: &EntityMap,
    start_year: i32,
    rows: usize,
    allow_blank: bool,
) -> Result<TimeSeries, AppError> {
    let n = entities.entity_count();
    let t = store.query(table, &SERIES_COLUMNS)?;
    let found = row_count(&t);
    if found == 0 || found % n != 0 || found / n < rows {
        return Err(AppError::shortfall(table, found, rows * n));
    }
    let years = found / n;

    let mut values = DMatrix::from_element(years, n, f64::NAN);
    let mut seen = DMatrix::from_element(years, n, false);
    for r in 0..found {
        let name = &t["entity"][r];
        let c = entities
            .entity_index(name)
            .ok_or_else(|| AppError::config(format!("Table `{table}` names unknown entity `{name}`.")))?;
        let year_raw = &t["year"][r];
        let year: i32 = year_raw
            .trim()
            .parse()
            .map_err(|_| AppError::config(format!("Table `{table}` has non-integer year `{year_raw}`.")))?;
        let offset = i64::from(year) - i64::from(start_year);
        if offset < 0 || offset >= years as i64 {
            return Err(AppError::config(format!(
                "Table `{table}` year {year} is outside {start_year}..{}.",
                i64::from(start_year) + years as i64 - 1
            )));
        }
        let row = offset as usize;
        if seen[(row, c)] {
            return Err(AppError::config(format!("Table `{table}` repeats `{name}` in {year}.")));
        }
        seen[(row, c)] = true;

        let raw = t["value"][r].as_str();
        values[(row, c)] = if raw.is_empty() && allow_blank {
            f64::NAN
        } else {
            parse_number(raw)
                .ok_or_else(|| AppError::config(format!("Table `{table}` has non-numeric value `{raw}` for `{name}` in {year}.")))?
        };
    }
    debug!(table, years, entities = n, "series loaded");
    Ok(TimeSeries {
        name: table.to_string(),
        start_year,
        values,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::io::store::MemoryStore;

    pub(crate) fn config() -> ModelConfiguration {
        ModelConfiguration {
            growth: GrowthForm::Logistic,
            harvest: HarvestForm::Catch,
            competition: CompetitionForm::None,
            predation: PredationForm::None,
            aggregate: false,
            start_year: 2000,
            run_length: 3,
            observed: ObservedKind::Absolute,
        }
    }

    fn series(store: &MemoryStore, table: &str, cod: &[&str], herring: &[&str]) {
        let years: Vec<String> = (0..cod.len()).map(|y| (2000 + y).to_string()).collect();
        let mut rows = Vec::new();
        for (y, &v) in cod.iter().enumerate() {
            rows.push(vec!["cod", years[y].as_str(), v]);
        }
        for (y, &v) in herring.iter().enumerate() {
            rows.push(vec!["herring", years[y].as_str(), v]);
        }
        store.insert_rows(table, &SERIES_COLUMNS, &rows);
    }

    /// Two species, logistic growth under catch, four years of data.
    pub(crate) fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_rows(
            SPECIES_TABLE,
            &["name", "guild"],
            &[vec!["cod", "groundfish"], vec!["herring", "pelagic"]],
        );
        store.insert_rows(
            PARAMETERS_TABLE,
            &["entity", "parameter", "value", "min", "max"],
            &[
                vec!["cod", "init_biomass", "500", "500", "500"],
                vec!["herring", "init_biomass", "300", "300", "300"],
                vec!["cod", "growth_rate", "0.3", "0.1", "0.9"],
                vec!["herring", "growth_rate", "0.5", "0.1", "0.9"],
                vec!["cod", "carrying_capacity", "1000", "1000", "1000"],
                vec!["herring", "carrying_capacity", "600", "600", "600"],
            ],
        );
        series(&store, "catch", &["30", "30", "30", "30"], &["20", "20", "20", "20"]);
        series(
            &store,
            OBSERVED_TABLE,
            &["500", "560", "", "650"],
            &["300", "350", "390", "420"],
        );
        store
    }

    #[test]
    fn loads_a_complete_project() {
        let data = load_model_data(&store(), &config()).unwrap();
        assert_eq!(data.entities.entity_names(), vec!["cod", "herring"]);
        assert_eq!(data.bounds.initial.growth_rate, vec![0.3, 0.5]);
        assert_eq!(data.bounds.free_count(), 2);
        assert_eq!(data.harvest.values[(3, 1)], 20.0);
        assert!(data.observed.values[(2, 0)].is_nan());
        assert_eq!(data.observed.values[(3, 0)], 650.0);
        // Unused matrices are zero-filled.
        assert_eq!(data.bounds.initial.alpha, DMatrix::zeros(2, 2));
    }

    #[test]
    fn wrong_row_count_is_a_shortfall_before_parsing() {
        let s = store();
        series(&s, "catch", &["30", "x", "30"], &["20", "20", "20"]);
        let err = load_model_data(&s, &config()).unwrap_err();
        assert!(matches!(err, AppError::DataShortfall { found: 6, expected: 8, .. }));
    }

    #[test]
    fn missing_bound_is_incomplete_configuration() {
        let s = store();
        s.insert_rows(
            PARAMETERS_TABLE,
            &["entity", "parameter", "value", "min", "max"],
            &[
                vec!["cod", "init_biomass", "500", "500", "500"],
                vec!["herring", "init_biomass", "300", "", "300"],
                vec!["cod", "growth_rate", "0.3", "0.1", "0.9"],
                vec!["herring", "growth_rate", "0.5", "0.1", "0.9"],
                vec!["cod", "carrying_capacity", "1000", "1000", "1000"],
                vec!["herring", "carrying_capacity", "600", "600", "600"],
            ],
        );
        let err = load_model_data(&s, &config()).unwrap_err();
        assert!(matches!(err, AppError::ConfigurationIncomplete(_)));
    }

    #[test]
    fn required_parameter_must_cover_every_entity() {
        let s = store();
        s.insert_rows(
            PARAMETERS_TABLE,
            &["entity", "parameter", "value", "min", "max"],
            &[
                vec!["cod", "init_biomass", "500", "500", "500"],
                vec!["herring", "init_biomass", "300", "300", "300"],
                vec!["cod", "growth_rate", "0.3", "0.1", "0.9"],
            ],
        );
        let err = load_model_data(&s, &config()).unwrap_err();
        assert!(matches!(err, AppError::DataShortfall { found: 1, expected: 2, .. }));
    }

    #[test]
    fn required_matrix_needs_interactions_table() {
        let mut cfg = config();
        cfg.competition = CompetitionForm::Alpha;
        let s = store();
        assert!(matches!(load_model_data(&s, &cfg), Err(AppError::ConfigurationIncomplete(_))));

        s.insert_rows(
            INTERACTIONS_TABLE,
            &["matrix", "row", "col", "value", "min", "max"],
            &[
                vec!["alpha", "cod", "cod", "0.0001", "0", "0.001"],
                vec!["alpha", "cod", "herring", "0.0002", "0.0002", "0.0002"],
                vec!["alpha", "herring", "cod", "0", "0", "0"],
            ],
        );
        let err = load_model_data(&s, &cfg).unwrap_err();
        assert!(matches!(err, AppError::DataShortfall { found: 3, expected: 4, .. }));

        s.insert_rows(
            INTERACTIONS_TABLE,
            &["matrix", "row", "col", "value", "min", "max"],
            &[
                vec!["alpha", "cod", "cod", "0.0001", "0", "0.001"],
                vec!["alpha", "cod", "herring", "0.0002", "0.0002", "0.0002"],
                vec!["alpha", "herring", "cod", "0", "0", "0"],
                vec!["alpha", "herring", "herring", "0.0003", "0.0003", "0.0003"],
            ],
        );
        let data = load_model_data(&s, &cfg).unwrap();
        assert_eq!(data.bounds.initial.alpha[(0, 1)], 0.0002);
        assert_eq!(data.bounds.free_count(), 3);
    }

    #[test]
    fn guild_matrices_are_keyed_by_guild_name() {
        let mut cfg = config();
        cfg.competition = CompetitionForm::MsProd;
        let s = store();
        let mut rows = Vec::new();
        for a in ["cod", "herring"] {
            for b in ["cod", "herring"] {
                rows.push(vec!["beta_species", a, b, "0", "0", "0"]);
            }
            for g in ["groundfish", "pelagic"] {
                rows.push(vec!["beta_guilds", a, g, "0.001", "0.001", "0.001"]);
            }
        }
        s.insert_rows(INTERACTIONS_TABLE, &["matrix", "row", "col", "value", "min", "max"], &rows);
        let data = load_model_data(&s, &cfg).unwrap();
        assert_eq!(data.bounds.initial.beta_guilds[(1, 0)], 0.001);
    }

    #[test]
    fn harvest_blank_is_rejected_but_observed_blank_is_missing() {
        let s = store();
        series(&s, "catch", &["30", "", "30", "30"], &["20", "20", "20", "20"]);
        let err = load_model_data(&s, &config()).unwrap_err();
        assert!(matches!(err, AppError::ConfigurationIncomplete(_)));
    }

    #[test]
    fn no_harvest_form_needs_no_table() {
        let mut cfg = config();
        cfg.harvest = HarvestForm::None;
        let s = store();
        let data = load_model_data(&s, &cfg).unwrap();
        assert_eq!(data.harvest.values, DMatrix::zeros(4, 2));
    }

    /// Cod and haddock share a guild; herring is alone in its own.
    fn three_species_store() -> MemoryStore {
        let s = MemoryStore::new();
        s.insert_rows(
            SPECIES_TABLE,
            &["name", "guild"],
            &[vec!["cod", "groundfish"], vec!["herring", "pelagic"], vec!["haddock", "groundfish"]],
        );
        s.insert_rows(
            PARAMETERS_TABLE,
            &["entity", "parameter", "value", "min", "max"],
            &[
                vec!["cod", "init_biomass", "300", "300", "300"],
                vec!["herring", "init_biomass", "400", "400", "400"],
                vec!["haddock", "init_biomass", "100", "100", "100"],
                vec!["cod", "growth_rate", "0.2", "0.1", "0.9"],
                vec!["herring", "growth_rate", "0.5", "0.1", "0.9"],
                vec!["haddock", "growth_rate", "0.6", "0.6", "0.6"],
                vec!["cod", "carrying_capacity", "1000", "1000", "1000"],
                vec!["herring", "carrying_capacity", "800", "800", "800"],
                vec!["haddock", "carrying_capacity", "500", "500", "500"],
            ],
        );
        let mut rows = Vec::new();
        for (name, catch, observed) in [
            ("cod", "30", ["300", "310", "320", "330"]),
            ("herring", "20", ["400", "410", "420", "430"]),
            ("haddock", "10", ["100", "", "120", "130"]),
        ] {
            for (y, obs) in observed.iter().enumerate() {
                let year = (2000 + y).to_string();
                rows.push((name, year, catch, *obs));
            }
        }
        let catch: Vec<Vec<&str>> = rows.iter().map(|(n, y, c, _)| vec![*n, y.as_str(), *c]).collect();
        let observed: Vec<Vec<&str>> = rows.iter().map(|(n, y, _, o)| vec![*n, y.as_str(), *o]).collect();
        s.insert_rows("catch", &SERIES_COLUMNS, &catch);
        s.insert_rows(OBSERVED_TABLE, &SERIES_COLUMNS, &observed);
        s
    }

    #[test]
    fn aggregate_folds_species_tables_into_guilds() {
        let mut cfg = config();
        cfg.aggregate = true;
        let data = load_model_data(&three_species_store(), &cfg).unwrap();
        assert_eq!(data.entities.entity_names(), vec!["groundfish", "pelagic"]);

        let initial = &data.bounds.initial;
        assert_eq!(initial.init_biomass, vec![400.0, 400.0]);
        assert_eq!(initial.carrying_capacity, vec![1500.0, 800.0]);
        // Biomass-weighted: (300·0.2 + 100·0.6) / 400.
        assert!((initial.growth_rate[0] - 0.3).abs() < 1e-12);
        assert_eq!(initial.growth_rate[1], 0.5);
        assert!((data.bounds.min.growth_rate[0] - 0.225).abs() < 1e-12);
        assert!((data.bounds.max.growth_rate[0] - 0.825).abs() < 1e-12);
        assert_eq!(data.bounds.free_count(), 2);

        assert_eq!(data.harvest.values[(0, 0)], 40.0);
        assert_eq!(data.harvest.values[(3, 1)], 20.0);
        assert_eq!(data.observed.values[(0, 0)], 400.0);
        // A missing member observation leaves the guild year missing.
        assert!(data.observed.values[(1, 0)].is_nan());
        assert_eq!(data.observed.values[(3, 0)], 460.0);
    }

    #[test]
    fn species_view_is_unchanged_by_folding() {
        let data = load_model_data(&three_species_store(), &config()).unwrap();
        assert_eq!(data.entities.entity_count(), 3);
        assert_eq!(data.bounds.initial.growth_rate, vec![0.2, 0.5, 0.6]);
        assert_eq!(data.harvest.values[(0, 2)], 10.0);
    }

    #[test]
    fn aggregate_interactions_are_keyed_by_guild() {
        let mut cfg = config();
        cfg.aggregate = true;
        cfg.competition = CompetitionForm::AggProd;
        let s = three_species_store();
        let mut rows = Vec::new();
        for a in ["cod", "herring"] {
            for b in ["cod", "herring"] {
                rows.push(vec!["beta_guild_guild", a, b, "0", "0", "0"]);
            }
        }
        s.insert_rows(INTERACTIONS_TABLE, &["matrix", "row", "col", "value", "min", "max"], &rows);
        let err = load_model_data(&s, &cfg).unwrap_err();
        assert!(err.to_string().contains("keyed by species"), "{err}");

        let mut rows = Vec::new();
        for a in ["groundfish", "pelagic"] {
            for b in ["groundfish", "pelagic"] {
                rows.push(vec!["beta_guild_guild", a, b, "0.0001", "0.0001", "0.0001"]);
            }
        }
        s.insert_rows(INTERACTIONS_TABLE, &["matrix", "row", "col", "value", "min", "max"], &rows);
        let data = load_model_data(&s, &cfg).unwrap();
        assert_eq!(data.bounds.initial.beta_guild_guild[(0, 1)], 0.0001);
    }

    #[test]
    fn guild_keyed_parameters_are_rejected() {
        let s = store();
        s.insert_rows(
            PARAMETERS_TABLE,
            &["entity", "parameter", "value", "min", "max"],
            &[
                vec!["groundfish", "init_biomass", "500", "500", "500"],
                vec!["herring", "init_biomass", "300", "300", "300"],
            ],
        );
        let mut cfg = config();
        cfg.aggregate = true;
        cfg.growth = GrowthForm::None;
        let err = load_model_data(&s, &cfg).unwrap_err();
        assert!(err.to_string().contains("per species"), "{err}");
    }

    #[test]
    fn forecast_harvest_uses_its_own_table() {
        let s = store();
        let mut cfg = config();
        cfg.start_year = 2003;
        cfg.run_length = 1;
        let map = load_entities(&s, false).unwrap();
        assert!(load_forecast_harvest(&s, &cfg, &map).is_err());

        let rows = vec![
            vec!["cod", "2003", "25"],
            vec!["cod", "2004", "25"],
            vec!["herring", "2003", "15"],
            vec!["herring", "2004", "15"],
        ];
        s.insert_rows("forecast_catch", &SERIES_COLUMNS, &rows);
        let h = load_forecast_harvest(&s, &cfg, &map).unwrap();
        assert_eq!(h.values[(1, 1)], 15.0);
        assert_eq!(h.start_year, 2003);
    }
}
