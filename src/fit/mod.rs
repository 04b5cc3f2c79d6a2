//! Estimation: objective, optimizer backends, batch runs, ensembles and
//! retrospective analysis.

pub mod ensemble;
pub mod objective;
pub mod retrospective;
pub mod runner;
pub mod search;

pub use ensemble::*;
pub use objective::*;
pub use retrospective::*;
pub use runner::*;
pub use search::*;
