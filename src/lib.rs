//! `msspm` library crate: a multi-species surplus production model.
//!
//! The binary (`msspm`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the simulation and estimation layers can be driven from other front-ends
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
pub mod sim;
