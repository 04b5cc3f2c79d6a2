//! Time series, trajectories and run outputs.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::domain::{AveragingMode, ParameterSet};
use crate::error::AppError;
use crate::math::SummaryStats;

/// A `(years + 1) × entities` matrix of yearly values.
///
/// Used for harvest (catch, effort or exploitation) and observed biomass.
/// Missing observations are stored as NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub name: String,
    pub start_year: i32,
    pub values: DMatrix<f64>,
}

impl TimeSeries {
    pub fn zeros(name: impl Into<String>, start_year: i32, rows: usize, entities: usize) -> Self {
        Self {
            name: name.into(),
            start_year,
            values: DMatrix::zeros(rows, entities),
        }
    }

    pub fn rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn entities(&self) -> usize {
        self.values.ncols()
    }

    /// Require at least `rows` rows and exactly `entities` columns.
    pub fn require(&self, rows: usize, entities: usize) -> Result<(), AppError> {
        if self.entities() != entities || self.rows() < rows {
            return Err(AppError::shortfall(
                self.name.clone(),
                self.values.len(),
                rows * entities,
            ));
        }
        Ok(())
    }

    /// First `rows` rows only.
    pub fn truncated(&self, rows: usize) -> Self {
        let rows = rows.min(self.rows());
        Self {
            name: self.name.clone(),
            start_year: self.start_year,
            values: self.values.rows(0, rows).into_owned(),
        }
    }
}

/// Estimated biomass, `(run_length + 1) × entities`. Row 0 is the initial biomass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiomassTrajectory {
    pub start_year: i32,
    pub biomass: DMatrix<f64>,
}

impl BiomassTrajectory {
    pub fn rows(&self) -> usize {
        self.biomass.nrows()
    }

    pub fn entities(&self) -> usize {
        self.biomass.ncols()
    }

    /// Index of the last row.
    pub fn terminal(&self) -> usize {
        self.rows().saturating_sub(1)
    }

    pub fn value(&self, row: usize, entity: usize) -> f64 {
        self.biomass[(row, entity)]
    }

    pub fn year(&self, row: usize) -> i32 {
        self.start_year + row as i32
    }

    /// Column for one entity.
    pub fn series(&self, entity: usize) -> Vec<f64> {
        self.biomass.column(entity).iter().copied().collect()
    }

    /// Sum across entities per row.
    pub fn totals(&self) -> Vec<f64> {
        (0..self.rows()).map(|r| self.biomass.row(r).sum()).collect()
    }

    pub fn is_valid(&self) -> bool {
        self.biomass.iter().all(|v| v.is_finite() && *v >= 0.0)
    }
}

/// One completed optimizer run or Monte Carlo draw.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run: usize,
    pub params: ParameterSet,
    pub trajectory: BiomassTrajectory,
    pub fitness: f64,
    pub stats: SummaryStats,
    pub iterations: usize,
}

/// Consensus of a ranked subset of runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleResult {
    pub mode: AveragingMode,
    /// Run ids that were averaged, best first.
    pub selected: Vec<usize>,
    /// Averaged parameters. Under `ByBiomass` these only describe the
    /// selection; the trajectory is averaged directly.
    pub params: ParameterSet,
    pub trajectory: BiomassTrajectory,
    pub stats: SummaryStats,
}

/// One truncated re-estimation in a retrospective analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeelResult {
    pub peel: usize,
    pub run_length: usize,
    pub trajectory: BiomassTrajectory,
    pub growth_rate: Vec<f64>,
    pub carrying_capacity: Vec<f64>,
}

/// Mohn's rho per entity, plus an aggregate-model value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RhoValues {
    pub per_entity: Vec<Option<f64>>,
    pub model: Option<f64>,
}

/// All peels of a retrospective analysis and the derived bias statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MohnsRhoSet {
    pub peels: Vec<PeelResult>,
    pub growth_rate: RhoValues,
    pub carrying_capacity: RhoValues,
    /// Terminal-year biomass rho (the classical diagnostic).
    pub biomass: RhoValues,
    /// Mean relative difference at every comparable year, `rows × entities`.
    /// Rows with no comparable peel hold `None`.
    pub biomass_by_year: Vec<Vec<Option<f64>>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_reports_shortfall() {
        let s = TimeSeries::zeros("catch", 2000, 5, 2);
        s.require(5, 2).unwrap();
        let err = s.require(6, 2).unwrap_err();
        assert!(matches!(err, AppError::DataShortfall { found: 10, expected: 12, .. }));
    }

    #[test]
    fn truncated_keeps_leading_rows() {
        let mut s = TimeSeries::zeros("effort", 2000, 4, 1);
        for r in 0..4 {
            s.values[(r, 0)] = r as f64;
        }
        let t = s.truncated(2);
        assert_eq!(t.rows(), 2);
        assert_eq!(t.values[(1, 0)], 1.0);
    }

    #[test]
    fn trajectory_totals_sum_entities() {
        let t = BiomassTrajectory {
            start_year: 1990,
            biomass: DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]),
        };
        assert_eq!(t.totals(), vec![3.0, 7.0]);
        assert_eq!(t.year(1), 1991);
        assert!(t.is_valid());
    }
}
