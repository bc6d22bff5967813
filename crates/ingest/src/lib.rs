pub mod clean;
pub mod csv_import;
pub mod error;
pub mod merge;
pub mod parquet_import;

use std::path::Path;

use polars::prelude::Column;
use voltwatch_core::{date_column, float_column, parse_number, parse_period, text_column, Frame, PipelineConfig};

pub use clean::{filter_clean, is_truthy};
pub use csv_import::CsvImporter;
pub use error::{IngestError, IngestResult};
pub use merge::merge_covariates;
pub use parquet_import::ParquetImporter;

/// Which columns get special typing on import.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub entity_column: String,
    pub timestamp_column: String,
}

impl ImportOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            entity_column: config.entity_column.clone(),
            timestamp_column: config.timestamp_column.clone(),
        }
    }
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// Load a table by file extension (`.csv` or `.parquet`).
pub fn load_frame(path: &Path, opts: &ImportOptions) -> IngestResult<Frame> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "csv" | "txt" => CsvImporter::import(path, opts),
        "parquet" | "pq" => ParquetImporter::import(path, opts),
        _ => Err(IngestError::UnsupportedFormat(path.display().to_string())),
    }
}

/// Type a column of raw cells. The timestamp column becomes dates, the
/// entity column stays text, and any other column becomes numeric when every
/// present cell parses as a number.
pub(crate) fn typed_column(name: &str, cells: Vec<Option<String>>, opts: &ImportOptions) -> IngestResult<Column> {
    let cells: Vec<Option<String>> = cells
        .into_iter()
        .map(|c| c.map(|s| s.trim().to_string()).filter(|s| !is_null_token(s)))
        .collect();

    if name == opts.timestamp_column {
        let dates: Vec<_> = cells.iter().map(|c| c.as_deref().and_then(parse_period)).collect();
        return Ok(date_column(name, &dates)?);
    }
    if name != opts.entity_column {
        let present = cells.iter().flatten().count();
        let numeric = cells.iter().flatten().filter(|s| parse_number(s).is_some()).count();
        if present > 0 && numeric == present {
            return Ok(float_column(name, cells.iter().map(|c| c.as_deref().and_then(parse_number)).collect()));
        }
    }
    Ok(text_column(name, cells))
}

fn is_null_token(s: &str) -> bool {
    s.is_empty() || matches!(s, "None" | "null" | "NULL" | "NaN" | "nan" | "undefined")
}
