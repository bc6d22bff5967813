pub mod config;
pub mod error;
pub mod frame;

pub use config::{
    load_dotenv, Config, ModelConfig, ModelKind, PipelineConfig, RollingPolicy, StorageConfig,
    TargetPolicy, DEFAULT_CATEGORY,
};
pub use error::*;
pub use frame::{
    date_column, date_from_days, days_since_epoch, float_column, month_of, parse_number, parse_period,
    quarter_of, text_column, Frame,
};
