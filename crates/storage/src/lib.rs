pub mod error;
pub mod local;

pub use error::StorageError;
pub use local::{sanitize_component, LocalModelStore};
