//! Reporting utilities: terminal summaries for every command.

pub mod format;

pub use format::*;
