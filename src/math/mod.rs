//! Mathematical utilities: fit statistics and cross-run averaging.

pub mod average;
pub mod stats;

pub use average::*;
pub use stats::*;
