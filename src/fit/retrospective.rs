//! Retrospective analysis (Mohn's rho).
//!
//! The model is re-estimated with the last `n` years removed for
//! `n = 0..=P`. Peel 0 is the full-length base run. For a quantity `X`:
//!
//! ```text
//! rho = (1/P) · Σ_{n=1..P} (X_n − X_0) / X_0
//! ```
//!
//! Biomass is compared at each peel's own terminal year `T − n`, against the
//! base run's value in that same year. Records with a zero (or non-finite)
//! base value are skipped with a warning and the mean is taken over the
//! remaining records; a quantity with no usable record is undefined.

use tracing::{debug, info, warn};

use crate::domain::{BiomassTrajectory, MohnsRhoSet, ParameterSet, PeelResult, RhoValues};
use crate::error::AppError;

/// Run the base estimation plus `peels` truncated re-estimations.
///
/// `estimate(peel, run_length)` must fit the model over the first
/// `run_length + 1` years.
pub fn run_retrospective<F>(run_length: usize, peels: usize, mut estimate: F) -> Result<MohnsRhoSet, AppError>
where
    F: FnMut(usize, usize) -> Result<(ParameterSet, BiomassTrajectory), AppError>,
{
    if peels >= run_length {
        return Err(AppError::config(format!(
            "Cannot peel {peels} years from a run of {run_length} years."
        )));
    }

    let mut results = Vec::with_capacity(peels + 1);
    for peel in 0..=peels {
        let length = run_length - peel;
        let (params, trajectory) = estimate(peel, length)?;
        info!(peel, run_length = length, "retrospective peel estimated");
        results.push(PeelResult {
            peel,
            run_length: length,
            trajectory,
            growth_rate: params.growth_rate,
            carrying_capacity: params.carrying_capacity,
        });
    }
    Ok(mohns_rho(results))
}

/// Derive Mohn's rho from completed peels; `peels[0]` is the base run.
pub fn mohns_rho(peels: Vec<PeelResult>) -> MohnsRhoSet {
    if peels.is_empty() {
        return MohnsRhoSet {
            peels,
            growth_rate: RhoValues::default(),
            carrying_capacity: RhoValues::default(),
            biomass: RhoValues::default(),
            biomass_by_year: Vec::new(),
        };
    }
    let base = &peels[0];
    let retro = &peels[1..];

    let growth_rate = scalar_rho("growth_rate", &base.growth_rate, retro, |p| &p.growth_rate);
    let carrying_capacity =
        scalar_rho("carrying_capacity", &base.carrying_capacity, retro, |p| &p.carrying_capacity);
    let biomass = terminal_biomass_rho(&base.trajectory, retro);
    let biomass_by_year = if retro.is_empty() {
        Vec::new()
    } else {
        biomass_by_year(&base.trajectory, retro)
    };

    MohnsRhoSet {
        growth_rate,
        carrying_capacity,
        biomass,
        biomass_by_year,
        peels,
    }
}

fn relative(value: f64, base: f64) -> Option<f64> {
    if base == 0.0 || !base.is_finite() || !value.is_finite() {
        None
    } else {
        Some((value - base) / base)
    }
}

fn mean_defined(values: impl IntoIterator<Item = Option<f64>>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .flatten()
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 { None } else { Some(sum / count as f64) }
}

fn scalar_rho<'a>(
    quantity: &str,
    base: &[f64],
    retro: &'a [PeelResult],
    pick: impl Fn(&'a PeelResult) -> &'a Vec<f64>,
) -> RhoValues {
    if retro.is_empty() {
        return RhoValues {
            per_entity: vec![None; base.len()],
            model: None,
        };
    }
    let per_entity: Vec<Option<f64>> = (0..base.len())
        .map(|i| {
            mean_defined(retro.iter().map(|p| {
                let rel = pick(p).get(i).and_then(|&v| relative(v, base[i]));
                if rel.is_none() {
                    warn!(quantity, entity = i, peel = p.peel, "Mohn's rho record skipped");
                }
                rel
            }))
        })
        .collect();
    let model = mean_defined(per_entity.iter().copied());
    RhoValues { per_entity, model }
}

fn terminal_biomass_rho(base: &BiomassTrajectory, retro: &[PeelResult]) -> RhoValues {
    let n = base.entities();
    if retro.is_empty() {
        return RhoValues {
            per_entity: vec![None; n],
            model: None,
        };
    }
    let per_entity: Vec<Option<f64>> = (0..n)
        .map(|i| {
            mean_defined(retro.iter().map(|p| {
                let t = p.trajectory.terminal();
                let rel = relative(p.trajectory.value(t, i), base.value(t, i));
                if rel.is_none() {
                    warn!(quantity = "biomass", entity = i, peel = p.peel, "Mohn's rho record skipped");
                }
                rel
            }))
        })
        .collect();

    let base_totals = base.totals();
    let model = mean_defined(retro.iter().map(|p| {
        let t = p.trajectory.terminal();
        let totals = p.trajectory.totals();
        relative(totals[t], base_totals[t])
    }));
    RhoValues { per_entity, model }
}

fn biomass_by_year(base: &BiomassTrajectory, retro: &[PeelResult]) -> Vec<Vec<Option<f64>>> {
    (0..base.rows())
        .map(|row| {
            (0..base.entities())
                .map(|i| {
                    let value = mean_defined(
                        retro
                            .iter()
                            .filter(|p| p.trajectory.terminal() >= row)
                            .map(|p| relative(p.trajectory.value(row, i), base.value(row, i))),
                    );
                    if value.is_none() {
                        debug!(row, entity = i, "no comparable peel");
                    }
                    value
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use nalgebra::DMatrix;

    use super::*;

    fn peel(peel: usize, rows: usize, biomass: f64, r: f64, k: f64) -> PeelResult {
        PeelResult {
            peel,
            run_length: rows - 1,
            trajectory: BiomassTrajectory {
                start_year: 2000,
                biomass: DMatrix::from_element(rows, 2, biomass),
            },
            growth_rate: vec![r, r],
            carrying_capacity: vec![k, k],
        }
    }

    #[test]
    fn no_peels_leaves_rho_undefined() {
        let set = mohns_rho(vec![peel(0, 11, 100.0, 0.5, 1000.0)]);
        assert_eq!(set.biomass.per_entity, vec![None, None]);
        assert_eq!(set.biomass.model, None);
        assert_eq!(set.growth_rate.model, None);
        assert!(set.biomass_by_year.is_empty());
    }

    #[test]
    fn single_peel_gives_relative_difference() {
        let mut p1 = peel(1, 10, 100.0, 0.55, 900.0);
        for i in 0..2 {
            p1.trajectory.biomass[(9, i)] = 110.0;
        }
        let set = mohns_rho(vec![peel(0, 11, 100.0, 0.5, 1000.0), p1]);
        assert!((set.biomass.per_entity[0].unwrap() - 0.10).abs() < 1e-12);
        assert!((set.biomass.model.unwrap() - 0.10).abs() < 1e-12);
        assert!((set.growth_rate.per_entity[1].unwrap() - 0.10).abs() < 1e-12);
        assert!((set.carrying_capacity.model.unwrap() + 0.10).abs() < 1e-12);

        assert_eq!(set.biomass_by_year.len(), 11);
        assert_eq!(set.biomass_by_year[0][0], Some(0.0));
        assert!((set.biomass_by_year[9][0].unwrap() - 0.10).abs() < 1e-12);
        // The base run's terminal year has no comparable peel.
        assert_eq!(set.biomass_by_year[10][0], None);
    }

    #[test]
    fn opposite_biases_cancel() {
        let set = mohns_rho(vec![
            peel(0, 11, 100.0, 0.5, 1000.0),
            peel(1, 10, 110.0, 0.55, 1000.0),
            peel(2, 9, 90.0, 0.45, 1000.0),
        ]);
        assert!(set.biomass.per_entity[0].unwrap().abs() < 1e-12);
        assert!(set.growth_rate.model.unwrap().abs() < 1e-12);
        assert_eq!(set.carrying_capacity.per_entity[0], Some(0.0));
    }

    #[test]
    fn zero_base_values_are_skipped() {
        let set = mohns_rho(vec![peel(0, 11, 0.0, 0.0, 1000.0), peel(1, 10, 50.0, 0.3, 1000.0)]);
        assert_eq!(set.biomass.per_entity, vec![None, None]);
        assert_eq!(set.biomass.model, None);
        assert_eq!(set.growth_rate.per_entity[0], None);
        assert_eq!(set.carrying_capacity.model, Some(0.0));
    }

    #[test]
    fn driver_requests_shorter_runs() {
        let mut lengths = Vec::new();
        let set = run_retrospective(10, 3, |peel, run_length| {
            lengths.push((peel, run_length));
            let mut params = ParameterSet::zeros(2, 1);
            params.growth_rate = vec![0.5, 0.5];
            params.carrying_capacity = vec![1000.0, 1000.0];
            let trajectory = BiomassTrajectory {
                start_year: 2000,
                biomass: DMatrix::from_element(run_length + 1, 2, 100.0),
            };
            Ok((params, trajectory))
        })
        .unwrap();
        assert_eq!(lengths, vec![(0, 10), (1, 9), (2, 8), (3, 7)]);
        assert_eq!(set.peels.len(), 4);
        assert_eq!(set.biomass.model, Some(0.0));
    }

    #[test]
    fn cannot_peel_the_whole_run() {
        let err = run_retrospective(3, 3, |_, _| unreachable!()).unwrap_err();
        assert!(matches!(err, AppError::ConfigurationIncomplete(_)));
    }
}
