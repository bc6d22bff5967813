use thiserror::Error;
use voltwatch_compute::ComputeError;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("unsupported model format version {0}")]
    Version(u32),

    #[error("{0}")]
    Other(String),
}

impl From<StorageError> for ComputeError {
    fn from(e: StorageError) -> Self {
        ComputeError::Store(e.to_string())
    }
}
