use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An expected column is absent. Carries the frame shape so the caller can
    /// tell an empty upload apart from a renamed header.
    #[error("column '{column}' missing from {stage} frame ({rows} rows x {cols} columns)")]
    SchemaMismatch {
        column: String,
        stage: String,
        rows: usize,
        cols: usize,
    },

    #[error("column '{column}' holds {actual} values, frame has {expected} rows")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("column '{column}' is {actual}, expected {expected}")]
    ColumnType {
        column: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
