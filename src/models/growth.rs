//! Growth term.

use crate::domain::GrowthForm;
use crate::models::TermContext;

/// `r·B`
pub fn linear(r: f64, b: f64) -> f64 {
    r * b
}

/// `r·B·(1 − B/K)`; with `K = 0` density dependence is dropped.
pub fn logistic(r: f64, b: f64, k: f64) -> f64 {
    if k == 0.0 {
        return r * b;
    }
    r * b * (1.0 - b / k)
}

/// Growth contribution of entity `i` from the state at row `t_prev`.
pub fn evaluate(form: GrowthForm, t_prev: usize, i: usize, ctx: &TermContext<'_>) -> f64 {
    let b = ctx.biomass[(t_prev, i)];
    let r = ctx.params.growth_rate[i];
    match form {
        GrowthForm::None => 0.0,
        GrowthForm::Linear => linear(r, b),
        GrowthForm::Logistic => logistic(r, b, ctx.carrying[i]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logistic_vanishes_at_carrying_capacity() {
        assert_eq!(logistic(0.5, 1000.0, 1000.0), 0.0);
        assert!((logistic(0.3, 100.0, 1000.0) - 27.0).abs() < 1e-12);
    }

    #[test]
    fn zero_k_falls_back_to_linear() {
        assert_eq!(logistic(0.3, 100.0, 0.0), linear(0.3, 100.0));
    }
}
