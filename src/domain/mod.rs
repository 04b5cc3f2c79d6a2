//! Domain types used throughout the engine.
//!
//! This module defines:
//!
//! - functional-form and run-option enums plus entity membership (`types`)
//! - parameter sets and estimation bounds (`params`)
//! - time series, trajectories and run outputs (`series`)

pub mod params;
pub mod series;
pub mod types;

pub use params::*;
pub use series::*;
pub use types::*;
