//! Fit-quality statistics for observed vs estimated biomass.
//!
//! For each entity (over the years where the observation is present):
//!
//! ```text
//! SSresiduals  = Σ(O − E)²
//! SSdeviations = Σ(E − mean(O))²
//! SStotals     = SSresiduals + SSdeviations
//! r²           = SSdeviations / SStotals
//! r            = Σ(O − Ō)(E − Ē) / sqrt(Σ(O − Ō)² · Σ(E − Ē)²)
//! AIC          = n·ln(SSresiduals/n) + 2K
//! RMSE         = sqrt(Σ(E − O)²/n)
//! RI           = exp(sqrt(Σ ln(O/E)² / n))
//! AE           = Σ(E − O)/n
//! AAE          = Σ|E − O|/n
//! MEF          = (Σ(O − Ō)² − Σ(E − O)²) / Σ(O − Ō)²
//! ```
//!
//! A statistic whose formula degenerates (zero denominator, log of a
//! non-positive value) is `None`, never zero. The model-level column sums the
//! residual-family statistics and averages the rest.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::AppError;

/// Statistic identifiers, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stat {
    SsResiduals,
    SsDeviations,
    SsTotals,
    RSquared,
    R,
    Aic,
    Rmse,
    Ri,
    Ae,
    Aae,
    Mef,
}

impl Stat {
    pub const ALL: [Stat; 11] = [
        Stat::SsResiduals,
        Stat::SsDeviations,
        Stat::SsTotals,
        Stat::RSquared,
        Stat::R,
        Stat::Aic,
        Stat::Rmse,
        Stat::Ri,
        Stat::Ae,
        Stat::Aae,
        Stat::Mef,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Stat::SsResiduals => "SSresiduals",
            Stat::SsDeviations => "SSdeviations",
            Stat::SsTotals => "SStotals",
            Stat::RSquared => "r2",
            Stat::R => "r",
            Stat::Aic => "AIC",
            Stat::Rmse => "RMSE",
            Stat::Ri => "RI",
            Stat::Ae => "AE",
            Stat::Aae => "AAE",
            Stat::Mef => "MEF",
        }
    }

    /// Residual-family statistics are summed across entities; the rest are averaged.
    pub fn is_summed(self) -> bool {
        matches!(self, Stat::SsResiduals | Stat::SsDeviations | Stat::SsTotals)
    }
}

/// Statistics for one entity (or the whole model).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityStats {
    /// Number of year pairs compared.
    pub n: usize,
    pub ss_residuals: Option<f64>,
    pub ss_deviations: Option<f64>,
    pub ss_totals: Option<f64>,
    pub r_squared: Option<f64>,
    pub r: Option<f64>,
    pub aic: Option<f64>,
    pub rmse: Option<f64>,
    pub ri: Option<f64>,
    pub ae: Option<f64>,
    pub aae: Option<f64>,
    pub mef: Option<f64>,
}

impl EntityStats {
    pub fn get(&self, stat: Stat) -> Option<f64> {
        match stat {
            Stat::SsResiduals => self.ss_residuals,
            Stat::SsDeviations => self.ss_deviations,
            Stat::SsTotals => self.ss_totals,
            Stat::RSquared => self.r_squared,
            Stat::R => self.r,
            Stat::Aic => self.aic,
            Stat::Rmse => self.rmse,
            Stat::Ri => self.ri,
            Stat::Ae => self.ae,
            Stat::Aae => self.aae,
            Stat::Mef => self.mef,
        }
    }

    fn set(&mut self, stat: Stat, value: Option<f64>) {
        let slot = match stat {
            Stat::SsResiduals => &mut self.ss_residuals,
            Stat::SsDeviations => &mut self.ss_deviations,
            Stat::SsTotals => &mut self.ss_totals,
            Stat::RSquared => &mut self.r_squared,
            Stat::R => &mut self.r,
            Stat::Aic => &mut self.aic,
            Stat::Rmse => &mut self.rmse,
            Stat::Ri => &mut self.ri,
            Stat::Ae => &mut self.ae,
            Stat::Aae => &mut self.aae,
            Stat::Mef => &mut self.mef,
        };
        *slot = value;
    }

    /// Statistics that could not be computed.
    pub fn undefined(&self) -> Vec<Stat> {
        Stat::ALL.into_iter().filter(|s| self.get(*s).is_none()).collect()
    }
}

/// Per-entity statistics plus the appended model-level column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub entities: Vec<String>,
    pub per_entity: Vec<EntityStats>,
    pub model: EntityStats,
}

impl SummaryStats {
    /// Emit one warning per undefined statistic.
    pub fn log_undefined(&self) {
        for (name, s) in self.entities.iter().zip(self.per_entity.iter()) {
            for stat in s.undefined() {
                warn!(entity = %name, stat = stat.label(), n = s.n, "statistic undefined");
            }
        }
    }
}

/// Compute statistics for one entity.
///
/// Pairs where either value is non-finite (missing observation) are skipped.
/// `k` is the number of estimated parameters used by AIC.
pub fn entity_stats(observed: &[f64], estimated: &[f64], k: usize) -> EntityStats {
    let pairs: Vec<(f64, f64)> = observed
        .iter()
        .zip(estimated.iter())
        .filter(|(o, e)| o.is_finite() && e.is_finite())
        .map(|(&o, &e)| (o, e))
        .collect();

    let n = pairs.len();
    let mut out = EntityStats {
        n,
        ..EntityStats::default()
    };
    if n == 0 {
        return out;
    }
    let nf = n as f64;

    let mean_o = pairs.iter().map(|p| p.0).sum::<f64>() / nf;
    let mean_e = pairs.iter().map(|p| p.1).sum::<f64>() / nf;

    let mut ss_res = 0.0;
    let mut ss_dev = 0.0;
    let mut ss_obs = 0.0;
    let mut ss_est = 0.0;
    let mut cross = 0.0;
    let mut sum_err = 0.0;
    let mut sum_abs = 0.0;
    let mut sum_log_sq = 0.0;
    let mut log_ok = true;

    for &(o, e) in &pairs {
        let err = e - o;
        ss_res += err * err;
        ss_dev += (e - mean_o) * (e - mean_o);
        ss_obs += (o - mean_o) * (o - mean_o);
        ss_est += (e - mean_e) * (e - mean_e);
        cross += (o - mean_o) * (e - mean_e);
        sum_err += err;
        sum_abs += err.abs();
        if o > 0.0 && e > 0.0 {
            let l = (o / e).ln();
            sum_log_sq += l * l;
        } else {
            log_ok = false;
        }
    }

    out.ss_residuals = Some(ss_res);
    out.ss_deviations = nonzero(ss_dev);
    out.ss_totals = out.ss_deviations.map(|d| ss_res + d);
    out.r_squared = match (out.ss_deviations, out.ss_totals) {
        (Some(d), Some(t)) => Some(d / t),
        _ => None,
    };
    let denom = (ss_obs * ss_est).sqrt();
    out.r = nonzero(denom).map(|d| cross / d);
    out.aic = if ss_res > 0.0 {
        Some(nf * (ss_res / nf).ln() + 2.0 * k as f64)
    } else {
        None
    };
    out.rmse = Some((ss_res / nf).sqrt());
    out.ri = if log_ok {
        Some((sum_log_sq / nf).sqrt().exp())
    } else {
        None
    };
    out.ae = Some(sum_err / nf);
    out.aae = Some(sum_abs / nf);
    out.mef = nonzero(ss_obs).map(|d| (ss_obs - ss_res) / d);

    for stat in out.undefined() {
        debug!(stat = stat.label(), n, "statistic degenerate");
    }
    out
}

/// Statistics for every entity column, plus the model-level aggregate.
pub fn summarize(
    names: &[String],
    observed: &DMatrix<f64>,
    estimated: &DMatrix<f64>,
    k: usize,
) -> Result<SummaryStats, AppError> {
    if observed.ncols() != estimated.ncols() || names.len() != estimated.ncols() {
        return Err(AppError::shortfall(
            "observed biomass",
            observed.ncols(),
            estimated.ncols(),
        ));
    }
    // Compare over the common leading years.
    let rows = observed.nrows().min(estimated.nrows());

    let per_entity: Vec<EntityStats> = (0..estimated.ncols())
        .map(|c| {
            let o: Vec<f64> = (0..rows).map(|r| observed[(r, c)]).collect();
            let e: Vec<f64> = (0..rows).map(|r| estimated[(r, c)]).collect();
            entity_stats(&o, &e, k)
        })
        .collect();

    let model = aggregate(&per_entity);
    Ok(SummaryStats {
        entities: names.to_vec(),
        per_entity,
        model,
    })
}

fn aggregate(per_entity: &[EntityStats]) -> EntityStats {
    let mut model = EntityStats {
        n: per_entity.iter().map(|s| s.n).sum(),
        ..EntityStats::default()
    };
    if per_entity.is_empty() {
        return model;
    }
    for stat in Stat::ALL {
        let values: Option<Vec<f64>> = per_entity.iter().map(|s| s.get(stat)).collect();
        let value = values.map(|v| {
            let total: f64 = v.iter().sum();
            if stat.is_summed() {
                total
            } else {
                total / v.len() as f64
            }
        });
        model.set(stat, value);
    }
    model
}

fn nonzero(v: f64) -> Option<f64> {
    if v == 0.0 || !v.is_finite() { None } else { Some(v) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_fit_has_zero_residuals_and_unit_scores() {
        let o = [10.0, 12.0, 15.0, 11.0];
        let s = entity_stats(&o, &o, 3);
        assert_eq!(s.n, 4);
        assert_eq!(s.ss_residuals, Some(0.0));
        assert!((s.r.unwrap() - 1.0).abs() < 1e-12);
        assert!((s.mef.unwrap() - 1.0).abs() < 1e-12);
        assert!((s.r_squared.unwrap() - 1.0).abs() < 1e-12);
        assert!((s.ri.unwrap() - 1.0).abs() < 1e-12);
        // ln(0) is undefined.
        assert_eq!(s.aic, None);
    }

    #[test]
    fn constant_series_flags_correlation_as_undefined() {
        let o = [5.0, 5.0, 5.0];
        let s = entity_stats(&o, &o, 1);
        assert_eq!(s.ss_residuals, Some(0.0));
        assert_eq!(s.r, None);
        assert_eq!(s.mef, None);
        assert_eq!(s.ss_deviations, None);
        assert!(s.undefined().contains(&Stat::R));
    }

    #[test]
    fn hand_computed_values() {
        let o = [1.0, 2.0, 3.0];
        let e = [2.0, 2.0, 2.0];
        let s = entity_stats(&o, &e, 1);
        // residuals: 1, 0, -1
        assert!((s.ss_residuals.unwrap() - 2.0).abs() < 1e-12);
        assert!((s.rmse.unwrap() - (2.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert!((s.ae.unwrap() - 0.0).abs() < 1e-12);
        assert!((s.aae.unwrap() - 2.0 / 3.0).abs() < 1e-12);
        // Σ(O-Ō)² = 2, so MEF = (2 - 2)/2 = 0.
        assert!(s.mef.unwrap().abs() < 1e-12);
        let aic = 3.0 * (2.0f64 / 3.0).ln() + 2.0;
        assert!((s.aic.unwrap() - aic).abs() < 1e-12);
        // Estimated is constant, so r is undefined.
        assert_eq!(s.r, None);
    }

    #[test]
    fn missing_observations_are_skipped() {
        let o = [1.0, f64::NAN, 3.0];
        let e = [1.0, 100.0, 3.0];
        let s = entity_stats(&o, &e, 0);
        assert_eq!(s.n, 2);
        assert_eq!(s.ss_residuals, Some(0.0));
    }

    #[test]
    fn model_column_sums_residuals_and_averages_rest() {
        let names = vec!["a".to_string(), "b".to_string()];
        let observed = DMatrix::from_row_slice(3, 2, &[1.0, 10.0, 2.0, 20.0, 3.0, 30.0]);
        let estimated = DMatrix::from_row_slice(3, 2, &[1.0, 11.0, 2.5, 20.0, 3.0, 29.0]);
        let stats = summarize(&names, &observed, &estimated, 2).unwrap();

        let a = &stats.per_entity[0];
        let b = &stats.per_entity[1];
        let sum = a.ss_residuals.unwrap() + b.ss_residuals.unwrap();
        assert!((stats.model.ss_residuals.unwrap() - sum).abs() < 1e-12);
        let mean_rmse = (a.rmse.unwrap() + b.rmse.unwrap()) / 2.0;
        assert!((stats.model.rmse.unwrap() - mean_rmse).abs() < 1e-12);
        assert_eq!(stats.model.n, 6);
    }

    #[test]
    fn column_mismatch_is_rejected() {
        let names = vec!["a".to_string()];
        let observed = DMatrix::zeros(3, 2);
        let estimated = DMatrix::zeros(3, 1);
        assert!(summarize(&names, &observed, &estimated, 0).is_err());
    }
}
