//! Left-join of covariate tables (weather, population, services) onto the
//! consumption frame.

use polars::prelude::*;
use tracing::debug;
use voltwatch_core::Frame;

use crate::error::IngestResult;

const ROW_INDEX: &str = "__row";

/// Join `right` onto `left` by timestamp, and by entity when both frames
/// carry the entity column.
///
/// Right-side columns that already exist on the left are dropped before the
/// join, so the left value always wins. Several right rows sharing a key are
/// collapsed into one: numeric columns are averaged, other columns keep their
/// first present value. Left rows without a match get missing covariates and
/// the left row order is kept.
pub fn merge_covariates(
    left: &Frame,
    right: &Frame,
    timestamp_column: &str,
    entity_column: &str,
) -> IngestResult<Frame> {
    if right.is_empty() || right.width() == 0 {
        return Ok(left.clone());
    }
    if left.width() == 0 {
        return Ok(right.clone());
    }

    let by_entity = left.has_column(entity_column) && right.has_column(entity_column);
    let mut keys = vec![timestamp_column];
    if by_entity {
        keys.push(entity_column);
    }
    for frame in [left, right] {
        frame.require_dtype(timestamp_column, "merge", &DataType::Date)?;
        if by_entity {
            frame.require_dtype(entity_column, "merge", &DataType::String)?;
        }
    }

    let mut dropped = Vec::new();
    let mut aggs = Vec::new();
    for name in right.column_names() {
        if keys.contains(&name.as_str()) {
            continue;
        }
        if left.has_column(&name) {
            dropped.push(name);
            continue;
        }
        let agg = if right.dtype(&name) == Some(&DataType::Float64) {
            col(&name).mean()
        } else {
            col(&name).drop_nulls().first()
        };
        aggs.push(agg);
    }
    if aggs.is_empty() {
        debug!(dropped = ?dropped, "no covariate columns to merge");
        return Ok(left.clone());
    }

    let key_exprs: Vec<Expr> = keys.iter().map(|k| col(*k)).collect();
    let present = keys
        .iter()
        .map(|k| col(*k).is_not_null())
        .reduce(|a, b| a.and(b))
        .unwrap_or_else(|| lit(true));
    let collapsed = right
        .lazy()
        .filter(present)
        .group_by_stable(key_exprs.clone())
        .agg(aggs)
        .collect()?;

    let keyed = right.rows() - null_keys(right, &keys)?;
    let duplicates = keyed.saturating_sub(collapsed.height());
    if duplicates > 0 {
        debug!(duplicates, "collapsing right rows that share a join key");
    }

    let joined = left
        .lazy()
        .with_row_index(ROW_INDEX, None)
        .join(
            collapsed.lazy(),
            key_exprs.clone(),
            key_exprs,
            JoinArgs::new(JoinType::Left),
        )
        .sort([ROW_INDEX], SortMultipleOptions::default())
        .collect()?
        .drop(ROW_INDEX)?;
    let out = Frame::from(joined);

    debug!(
        left_rows = left.rows(),
        added = out.width() - left.width(),
        dropped = ?dropped,
        by_entity,
        "covariates merged"
    );
    Ok(out)
}

/// Rows where any join key is null.
fn null_keys(frame: &Frame, keys: &[&str]) -> IngestResult<usize> {
    let mut mask = BooleanChunked::full("mask".into(), false, frame.rows());
    for key in keys {
        mask = &mask | &frame.require(key, "merge")?.is_null();
    }
    Ok(mask.into_iter().filter(|v| *v == Some(true)).count())
}
