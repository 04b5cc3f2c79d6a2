//! Harvest term.

use crate::domain::HarvestForm;
use crate::models::TermContext;

/// `q·E·B`
pub fn effort(q: f64, e: f64, b: f64) -> f64 {
    q * e * b
}

/// `F·B`
pub fn exploitation(f: f64, b: f64) -> f64 {
    f * b
}

/// Harvest removed from entity `i`, using the series value at row `t_prev`.
pub fn evaluate(form: HarvestForm, t_prev: usize, i: usize, ctx: &TermContext<'_>) -> f64 {
    match form {
        HarvestForm::None => 0.0,
        HarvestForm::Catch => ctx.harvest[(t_prev, i)],
        HarvestForm::Effort => effort(
            ctx.params.catchability[i],
            ctx.harvest[(t_prev, i)],
            ctx.biomass[(t_prev, i)],
        ),
        HarvestForm::Exploitation => exploitation(ctx.harvest[(t_prev, i)], ctx.biomass[(t_prev, i)]),
    }
}
