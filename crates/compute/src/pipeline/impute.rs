//! Missing-value imputation cascade.
//!
//! Every numeric column is filled in three tiers: the mean of the same
//! (entity, calendar month) group, then the entity mean, then the column mean
//! over the whole frame. A column with no values at all stays missing and is
//! reported in [`ImputationSummary::fully_missing`].

use polars::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};
use voltwatch_core::{Frame, PipelineConfig};

use crate::error::ComputeResult;

const MONTH: &str = "__month";

/// Cells filled by each tier, per column.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ColumnImputation {
    pub column: String,
    pub entity_month: usize,
    pub entity: usize,
    pub global: usize,
    pub still_missing: usize,
}

impl ColumnImputation {
    pub fn filled(&self) -> usize {
        self.entity_month + self.entity + self.global
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImputationSummary {
    pub columns: Vec<ColumnImputation>,
}

impl ImputationSummary {
    pub fn total_filled(&self) -> usize {
        self.columns.iter().map(ColumnImputation::filled).sum()
    }

    /// Columns that had no value anywhere in the frame.
    pub fn fully_missing(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.still_missing > 0)
            .map(|c| c.column.as_str())
            .collect()
    }
}

/// Fill missing numeric cells. Without an entity column only the global
/// tier runs, and without a timestamp column the (entity, month) tier is
/// skipped. Every tier averages the observed values only.
pub fn impute(frame: &Frame, config: &PipelineConfig) -> ComputeResult<(Frame, ImputationSummary)> {
    let mut targets = Vec::new();
    for name in frame.numeric_columns() {
        let missing = frame.require(&name, "impute")?.null_count();
        if missing > 0 {
            targets.push((name, missing));
        }
    }
    if targets.is_empty() {
        return Ok((frame.clone(), ImputationSummary::default()));
    }

    let entity = (frame.dtype(&config.entity_column) == Some(&DataType::String)).then(|| col(&config.entity_column));
    let has_month = entity.is_some() && frame.dtype(&config.timestamp_column) == Some(&DataType::Date);

    let mut exprs = Vec::new();
    for (name, _) in &targets {
        let observed = col(name);
        let mut filled = observed.clone();
        if let (Some(entity), true) = (&entity, has_month) {
            let keyed = entity.clone().is_not_null().and(col(MONTH).is_not_null());
            let group_mean = observed.clone().mean().over([entity.clone(), col(MONTH)]);
            filled = filled.fill_null(when(keyed).then(group_mean).otherwise(lit(NULL)));
        }
        exprs.push(filled.clone().alias(tier_column(name, 1)));
        if let Some(entity) = &entity {
            let entity_mean = observed.clone().mean().over([entity.clone()]);
            filled = filled.fill_null(when(entity.clone().is_not_null()).then(entity_mean).otherwise(lit(NULL)));
        }
        exprs.push(filled.clone().alias(tier_column(name, 2)));
        exprs.push(filled.fill_null(observed.mean()).alias(name));
    }

    let mut lf = frame.lazy();
    if has_month {
        lf = lf.with_column(col(&config.timestamp_column).dt().month().alias(MONTH));
    }
    let wide = lf.with_columns(exprs).collect()?;

    let mut summary = ImputationSummary::default();
    for (name, missing) in targets {
        let after_month = wide.column(&tier_column(&name, 1))?.null_count();
        let after_entity = wide.column(&tier_column(&name, 2))?.null_count();
        let still_missing = wide.column(&name)?.null_count();
        if still_missing > 0 {
            warn!(column = %name, rows = still_missing, "column has no values to impute from");
        }
        summary.columns.push(ColumnImputation {
            column: name,
            entity_month: missing - after_month,
            entity: after_month - after_entity,
            global: after_entity - still_missing,
            still_missing,
        });
    }
    let out = Frame::from(wide.select(frame.column_names())?);

    debug!(
        columns = summary.columns.len(),
        filled = summary.total_filled(),
        "imputation complete"
    );
    Ok((out, summary))
}

fn tier_column(name: &str, tier: u8) -> String {
    format!("__tier{tier}_{name}")
}
