use thiserror::Error;

/// Crate-wide error.
///
/// Each variant maps to a process exit code so `main` can stay a thin wrapper.
#[derive(Debug, Clone, Error)]
pub enum AppError {
    /// A table or series does not have the row count its shape requires.
    #[error("Data shortfall in `{table}`: found {found} rows, expected {expected}.")]
    DataShortfall {
        table: String,
        found: usize,
        expected: usize,
    },

    #[error("Numeric degenerate: {0}")]
    NumericDegenerate(String),

    /// A required parameter, bound or setting is missing or not numeric.
    #[error("Configuration incomplete: {0}")]
    ConfigurationIncomplete(String),

    #[error("Cancelled after {completed} of {requested} runs.")]
    CancellationRequested { completed: usize, requested: usize },

    #[error("Ensemble averaging needs at least one completed run.")]
    EmptyEnsemble,

    #[error("{0}")]
    Io(String),

    #[error("{0}")]
    Parse(String),
}

impl AppError {
    pub fn shortfall(table: impl Into<String>, found: usize, expected: usize) -> Self {
        Self::DataShortfall {
            table: table.into(),
            found,
            expected,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigurationIncomplete(message.into())
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::ConfigurationIncomplete(_) | AppError::Parse(_) => 2,
            AppError::DataShortfall { .. } | AppError::EmptyEnsemble => 3,
            AppError::NumericDegenerate(_) => 4,
            AppError::Io(_) => 5,
            AppError::CancellationRequested { .. } => 130,
        }
    }
}
