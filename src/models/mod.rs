//! Functional forms of the surplus-production recurrence.
//!
//! Each term family (growth, harvest, competition, predation) is a closed enum
//! in `domain`; this module evaluates a variant for one entity at one time step.
//! The arithmetic lives in small pure functions so it can be tested without a
//! trajectory, and the `evaluate` functions only gather inputs from a
//! `TermContext`. `None` variants always contribute 0, so the integrator can sum
//! all four terms unconditionally.

use nalgebra::DMatrix;

use crate::domain::ParameterSet;

pub mod competition;
pub mod growth;
pub mod harvest;
pub mod predation;

/// Read-only inputs shared by all term evaluators during one integration step.
#[derive(Debug, Clone, Copy)]
pub struct TermContext<'a> {
    pub params: &'a ParameterSet,
    /// Effective carrying capacity per entity (see `effective_carrying_capacity`).
    pub carrying: &'a [f64],
    /// Carrying capacity per guild (sum over members).
    pub guild_carrying: &'a [f64],
    /// Sum of all entity carrying capacities.
    pub system_carrying: f64,
    pub guild_of: &'a [usize],
    /// Harvest series for the configured harvest form, `rows × entities`.
    pub harvest: &'a DMatrix<f64>,
    pub biomass: &'a DMatrix<f64>,
    pub guild_biomass: &'a DMatrix<f64>,
}

impl TermContext<'_> {
    pub fn entity_count(&self) -> usize {
        self.biomass.ncols()
    }

    pub fn guild_count(&self) -> usize {
        self.guild_biomass.ncols()
    }
}

/// Carrying capacity used wherever `K` appears.
///
/// A configured `K` of 0 is replaced by `r / (alpha_self + rho_self)` when that
/// denominator is nonzero; otherwise it stays 0 and density dependence through
/// `K` is dropped for that entity. `alpha_self`/`rho_self` are only taken from
/// terms that are active in the run.
pub fn effective_carrying_capacity(
    params: &ParameterSet,
    use_alpha: bool,
    use_rho: bool,
) -> Vec<f64> {
    (0..params.entity_count())
        .map(|i| {
            let k = params.carrying_capacity[i];
            if k != 0.0 {
                return k;
            }
            let alpha_self = if use_alpha { params.alpha[(i, i)] } else { 0.0 };
            let rho_self = if use_rho { params.rho[(i, i)] } else { 0.0 };
            let denom = alpha_self + rho_self;
            if denom != 0.0 {
                let k = params.growth_rate[i] / denom;
                if k.is_finite() { k } else { 0.0 }
            } else {
                0.0
            }
        })
        .collect()
}

/// `numer / denom`, or `None` when the denominator is zero or the result is not finite.
pub(crate) fn safe_div(numer: f64, denom: f64) -> Option<f64> {
    if denom == 0.0 {
        return None;
    }
    let v = numer / denom;
    if v.is_finite() { Some(v) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_carrying_capacity_is_kept() {
        let mut p = ParameterSet::zeros(1, 1);
        p.carrying_capacity[0] = 500.0;
        assert_eq!(effective_carrying_capacity(&p, true, true), vec![500.0]);
    }

    #[test]
    fn zero_k_is_derived_from_self_interaction() {
        let mut p = ParameterSet::zeros(2, 1);
        p.growth_rate = vec![0.4, 0.4];
        p.alpha[(0, 0)] = 0.0003;
        p.rho[(0, 0)] = 0.0001;
        let k = effective_carrying_capacity(&p, true, true);
        assert!((k[0] - 1000.0).abs() < 1e-9);
        // No self-interaction: stays zero.
        assert_eq!(k[1], 0.0);
    }

    #[test]
    fn inactive_terms_do_not_feed_k() {
        let mut p = ParameterSet::zeros(1, 1);
        p.growth_rate[0] = 0.4;
        p.alpha[(0, 0)] = 0.0004;
        assert_eq!(effective_carrying_capacity(&p, false, false), vec![0.0]);
        assert!((effective_carrying_capacity(&p, true, false)[0] - 1000.0).abs() < 1e-9);
    }
}
