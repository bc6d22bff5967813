use thiserror::Error;

#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("entity '{entity}' has {rows} training rows, need at least {minimum}")]
    InsufficientData {
        entity: String,
        rows: usize,
        minimum: usize,
    },

    #[error(transparent)]
    Schema(#[from] voltwatch_core::CoreError),

    #[error("ingest error: {0}")]
    Ingest(#[from] voltwatch_ingest::IngestError),

    #[error("polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    #[error("model error: {0}")]
    Model(String),

    #[error("empty input: {0}")]
    EmptyInput(String),

    #[error("model store error: {0}")]
    Store(String),

    #[error("unknown entity '{entity}' (similar: {})", .suggestions.join(", "))]
    UnknownEntity {
        entity: String,
        suggestions: Vec<String>,
    },
}

pub type ComputeResult<T> = Result<T, ComputeError>;
