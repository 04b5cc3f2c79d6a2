//! Competition term.
//!
//! - `Alpha`: `B_i · Σ_j α_ij·B_j`, with no carrying capacity of any kind;
//!   `K_sys` never feeds it
//! - `MsProd`: `r_i·B_i/K_G · Σ_{j∈G} β_ij·B_j + r_i·B_i/(K_sys − K_G) · Σ_{g≠G} β_ig·B_g`
//! - `AggProd`: `r_i·B_i/K_G · Σ_g β_Gg·B_g`
//!
//! where `G` is the guild of entity `i`, `K_G` the guild carrying capacity and
//! `K_sys` the system carrying capacity. A pathway whose denominator is zero
//! contributes nothing.

use crate::domain::CompetitionForm;
use crate::models::{TermContext, safe_div};

/// `B_i · Σ_j α_ij·B_j`. Independent of carrying capacity.
pub fn alpha(b_i: f64, alpha_row: &[f64], b: &[f64]) -> f64 {
    b_i * dot(alpha_row, b)
}

/// `r·B/K · Σ β·B`, or 0 when `K` is zero.
pub fn scaled_pressure(r: f64, b_i: f64, k: f64, weighted_sum: f64) -> f64 {
    safe_div(r * b_i, k).map_or(0.0, |s| s * weighted_sum)
}

/// Competition loss of entity `i` from the state at row `t_prev`.
pub fn evaluate(form: CompetitionForm, t_prev: usize, i: usize, ctx: &TermContext<'_>) -> f64 {
    let p = ctx.params;
    let b_i = ctx.biomass[(t_prev, i)];
    let r = p.growth_rate[i];
    match form {
        CompetitionForm::None => 0.0,
        CompetitionForm::Alpha => {
            let row: Vec<f64> = p.alpha.row(i).iter().copied().collect();
            let b: Vec<f64> = ctx.biomass.row(t_prev).iter().copied().collect();
            alpha(b_i, &row, &b)
        }
        CompetitionForm::MsProd => {
            let g = ctx.guild_of[i];
            let within: f64 = (0..ctx.entity_count())
                .filter(|&j| ctx.guild_of[j] == g)
                .map(|j| p.beta_species[(i, j)] * ctx.biomass[(t_prev, j)])
                .sum();
            let between: f64 = (0..ctx.guild_count())
                .filter(|&h| h != g)
                .map(|h| p.beta_guilds[(i, h)] * ctx.guild_biomass[(t_prev, h)])
                .sum();
            let k_g = ctx.guild_carrying[g];
            scaled_pressure(r, b_i, k_g, within)
                + scaled_pressure(r, b_i, ctx.system_carrying - k_g, between)
        }
        CompetitionForm::AggProd => {
            let g = ctx.guild_of[i];
            let sum: f64 = (0..ctx.guild_count())
                .map(|h| p.beta_guild_guild[(g, h)] * ctx.guild_biomass[(t_prev, h)])
                .sum();
            scaled_pressure(r, b_i, ctx.guild_carrying[g], sum)
        }
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ParameterSet;
    use nalgebra::DMatrix;

    #[test]
    fn alpha_form_sums_pairwise_pressure() {
        let v = alpha(100.0, &[0.001, 0.002], &[100.0, 50.0]);
        assert!((v - 100.0 * (0.1 + 0.1)).abs() < 1e-12);
    }

    #[test]
    fn zero_k_disables_pathway() {
        assert_eq!(scaled_pressure(0.5, 100.0, 0.0, 42.0), 0.0);
    }

    #[test]
    fn ms_prod_splits_within_and_between_guilds() {
        // Two species in guild 0, one in guild 1.
        let mut p = ParameterSet::zeros(3, 2);
        p.growth_rate = vec![0.5, 0.5, 0.5];
        p.beta_species[(0, 1)] = 0.1;
        p.beta_guilds[(0, 1)] = 0.2;
        let carrying = vec![100.0, 100.0, 200.0];
        let guild_carrying = vec![200.0, 200.0];
        let guild_of = vec![0, 0, 1];
        let harvest = DMatrix::zeros(2, 3);
        let biomass = DMatrix::from_row_slice(2, 3, &[50.0, 40.0, 80.0, 0.0, 0.0, 0.0]);
        let guild_biomass = DMatrix::from_row_slice(2, 2, &[90.0, 80.0, 0.0, 0.0]);
        let ctx = TermContext {
            params: &p,
            carrying: &carrying,
            guild_carrying: &guild_carrying,
            system_carrying: 400.0,
            guild_of: &guild_of,
            harvest: &harvest,
            biomass: &biomass,
            guild_biomass: &guild_biomass,
        };

        let v = evaluate(CompetitionForm::MsProd, 0, 0, &ctx);
        let within = 0.5 * 50.0 / 200.0 * (0.1 * 40.0);
        let between = 0.5 * 50.0 / (400.0 - 200.0) * (0.2 * 80.0);
        assert!((v - (within + between)).abs() < 1e-12);
        assert_eq!(evaluate(CompetitionForm::None, 0, 0, &ctx), 0.0);
    }

    #[test]
    fn alpha_ignores_carrying_capacity() {
        let mut p = ParameterSet::zeros(2, 1);
        p.growth_rate = vec![0.5, 0.5];
        p.alpha = DMatrix::from_row_slice(2, 2, &[0.001, 0.002, 0.0, 0.0]);
        let guild_of = vec![0, 0];
        let harvest = DMatrix::zeros(2, 2);
        let biomass = DMatrix::from_row_slice(2, 2, &[100.0, 50.0, 0.0, 0.0]);
        let guild_biomass = DMatrix::from_row_slice(2, 1, &[150.0, 0.0]);
        let at = |carrying: &[f64], system_carrying: f64| {
            let guild_carrying: Vec<f64> = vec![carrying.iter().sum()];
            let ctx = TermContext {
                params: &p,
                carrying,
                guild_carrying: &guild_carrying,
                system_carrying,
                guild_of: &guild_of,
                harvest: &harvest,
                biomass: &biomass,
                guild_biomass: &guild_biomass,
            };
            evaluate(CompetitionForm::Alpha, 0, 0, &ctx)
        };

        let expected = 100.0 * (0.001 * 100.0 + 0.002 * 50.0);
        assert!((at(&[1000.0, 500.0], 1500.0) - expected).abs() < 1e-12);
        assert_eq!(at(&[1000.0, 500.0], 1500.0), at(&[0.0, 0.0], 0.0));
    }
}
