//! Input/output helpers.
//!
//! - table storage behind the `Store` trait (`store`)
//! - typed, shape-checked model inputs (`ingest`)
//! - the TOML project file (`project`)
//! - result exports (CSV/JSON) and store write-back (`export`)
//! - the file-based progress/cancel channel (`progress`)

pub mod export;
pub mod ingest;
pub mod progress;
pub mod project;
pub mod store;

pub use export::*;
pub use ingest::*;
pub use progress::*;
pub use project::*;
pub use store::*;
