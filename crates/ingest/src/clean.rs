use polars::prelude::DataType;
use tracing::debug;
use voltwatch_core::Frame;

use crate::error::IngestResult;

const TRUTHY: &[&str] = &["1", "true", "t", "yes", "y", "evet"];

pub fn is_truthy(raw: &str) -> bool {
    let lowered = raw.trim().to_lowercase();
    TRUTHY.contains(&lowered.as_str())
}

/// Keep rows whose clean-flag column is truthy. A frame without the column
/// passes through unchanged; missing cells count as not clean.
pub fn filter_clean(frame: &Frame, flag_column: &str) -> IngestResult<Frame> {
    let mask: Vec<bool> = match frame.dtype(flag_column) {
        None => return Ok(frame.clone()),
        Some(DataType::Float64) => frame
            .floats(flag_column, "clean")?
            .iter()
            .map(|x| x.is_some_and(|x| x == 1.0))
            .collect(),
        Some(DataType::String) => frame
            .texts(flag_column, "clean")?
            .iter()
            .map(|x| x.as_deref().is_some_and(is_truthy))
            .collect(),
        Some(_) => vec![false; frame.rows()],
    };
    let out = frame.filter(&mask)?;
    debug!(
        column = flag_column,
        kept = out.rows(),
        dropped = frame.rows() - out.rows(),
        "clean filter applied"
    );
    Ok(out)
}
