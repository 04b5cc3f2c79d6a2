//! Cross-run averaging.
//!
//! The ensemble code only depends on the `Averager` trait, so alternative
//! combination formulas can be added without touching it.

use nalgebra::DMatrix;

use crate::domain::{AveragingAlgorithm, ParameterSet};
use crate::error::AppError;

/// Combines one value per run into a consensus value.
pub trait Averager: Send + Sync {
    fn name(&self) -> &'static str;

    /// `values` is never empty.
    fn combine(&self, values: &[f64]) -> f64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ArithmeticMean;

impl Averager for ArithmeticMean {
    fn name(&self) -> &'static str {
        "mean"
    }

    fn combine(&self, values: &[f64]) -> f64 {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

impl AveragingAlgorithm {
    pub fn averager(self) -> Box<dyn Averager> {
        match self {
            AveragingAlgorithm::Mean => Box::new(ArithmeticMean),
        }
    }
}

/// Element-wise combination of equally shaped matrices.
pub fn combine_matrices(
    matrices: &[&DMatrix<f64>],
    averager: &dyn Averager,
) -> Result<DMatrix<f64>, AppError> {
    let Some(first) = matrices.first() else {
        return Err(AppError::EmptyEnsemble);
    };
    let (rows, cols) = first.shape();
    if let Some(bad) = matrices.iter().find(|m| m.shape() != (rows, cols)) {
        return Err(AppError::shortfall("ensemble trajectory", bad.len(), rows * cols));
    }

    let mut column = Vec::with_capacity(matrices.len());
    let out = DMatrix::from_fn(rows, cols, |r, c| {
        column.clear();
        column.extend(matrices.iter().map(|m| m[(r, c)]));
        averager.combine(&column)
    });
    Ok(out)
}

/// Element-wise combination of equally shaped parameter sets.
pub fn combine_parameters(
    sets: &[&ParameterSet],
    averager: &dyn Averager,
) -> Result<ParameterSet, AppError> {
    let Some(first) = sets.first() else {
        return Err(AppError::EmptyEnsemble);
    };
    let flats: Vec<Vec<f64>> = sets.iter().map(|p| p.to_flat()).collect();
    let len = flats[0].len();
    if let Some(bad) = flats.iter().find(|f| f.len() != len) {
        return Err(AppError::shortfall("ensemble parameters", bad.len(), len));
    }

    let mut column = Vec::with_capacity(flats.len());
    let combined: Vec<f64> = (0..len)
        .map(|i| {
            column.clear();
            column.extend(flats.iter().map(|f| f[i]));
            averager.combine(&column)
        })
        .collect();

    let mut out = (*first).clone();
    out.fill_from_flat(&combined)?;
    Ok(out)
}
