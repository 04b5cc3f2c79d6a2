//! Predation term (Holling functional responses).
//!
//! Matrices are indexed `(prey, predator)`. For prey `i` and predator `j`:
//!
//! - Type I: `ρ_ij·B_i·B_j`
//! - Type II: `ρ_ij·B_i·B_j / (1 + h_ij·ρ_ij·B_i)`
//! - Type III: as Type II with `B_i` raised to the prey's predation exponent
//!
//! The loss of prey `i` is the sum over predators. A pair whose saturating
//! denominator is not positive contributes nothing.

use crate::domain::PredationForm;
use crate::models::{TermContext, safe_div};

/// Linear (mass-action) loss to one predator.
pub fn type_i(rho: f64, b_prey: f64, b_pred: f64) -> f64 {
    rho * b_prey * b_pred
}

/// Saturating loss to one predator. `exponent = 1` gives Type II.
pub fn saturating(rho: f64, handling: f64, b_prey: f64, b_pred: f64, exponent: f64) -> f64 {
    let prey = b_prey.powf(exponent);
    let denom = 1.0 + handling * rho * prey;
    if denom <= 0.0 {
        return 0.0;
    }
    safe_div(rho * prey * b_pred, denom).unwrap_or(0.0)
}

/// Predation loss of prey `i` from the state at row `t_prev`.
pub fn evaluate(form: PredationForm, t_prev: usize, i: usize, ctx: &TermContext<'_>) -> f64 {
    let p = ctx.params;
    let b_i = ctx.biomass[(t_prev, i)];
    let predators = 0..ctx.entity_count();
    match form {
        PredationForm::None => 0.0,
        PredationForm::TypeI => predators
            .map(|j| type_i(p.rho[(i, j)], b_i, ctx.biomass[(t_prev, j)]))
            .sum(),
        PredationForm::TypeII => predators
            .map(|j| saturating(p.rho[(i, j)], p.handling[(i, j)], b_i, ctx.biomass[(t_prev, j)], 1.0))
            .sum(),
        PredationForm::TypeIII => {
            let exponent = p.predation_exponent[i];
            predators
                .map(|j| {
                    saturating(p.rho[(i, j)], p.handling[(i, j)], b_i, ctx.biomass[(t_prev, j)], exponent)
                })
                .sum()
        }
    }
}
