//! Table type shared by every pipeline stage.
//!
//! A [`Frame`] wraps a polars `DataFrame` restricted to three column kinds:
//! `Float64` values, `String` labels and `Date` periods. Missing cells are
//! nulls. Lookups take a stage label so a missing column surfaces as a
//! [`CoreError::SchemaMismatch`] that names the stage and the frame shape.

use chrono::{Datelike, NaiveDate};
use polars::prelude::*;

use crate::error::{CoreError, CoreResult};

/// `NaiveDate::num_days_from_ce` of 1970-01-01.
const UNIX_EPOCH_DAYS: i32 = 719_163;

pub fn days_since_epoch(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS
}

pub fn date_from_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(UNIX_EPOCH_DAYS)?)
}

pub fn float_column(name: &str, values: Vec<Option<f64>>) -> Column {
    Column::new(name.into(), values)
}

pub fn text_column(name: &str, values: Vec<Option<String>>) -> Column {
    Column::new(name.into(), values)
}

pub fn date_column(name: &str, values: &[Option<NaiveDate>]) -> CoreResult<Column> {
    let days: Vec<Option<i32>> = values.iter().map(|d| d.map(days_since_epoch)).collect();
    Ok(Column::new(name.into(), days).cast(&DataType::Date)?)
}

/// Short name of a column kind, as used in type errors.
pub fn kind_name(dtype: &DataType) -> &'static str {
    match dtype {
        DataType::Float64 => "float",
        DataType::String => "text",
        DataType::Date => "date",
        DataType::Null => "null",
        DataType::Boolean => "bool",
        _ => "other",
    }
}

/// Parse a numeric cell, treating the usual null spellings as missing.
pub fn parse_number(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() || matches!(s, "None" | "null" | "NaN" | "nan" | "undefined") {
        return None;
    }
    s.parse::<f64>()
        .ok()
        .or_else(|| s.replace(',', ".").parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Parse a period cell: `YYYY-MM` (first of month), `YYYY-MM-DD`, or a
/// datetime whose date part is kept.
pub fn parse_period(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d") {
        return Some(d);
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    chrono::DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive())
}

/// Calendar month (1-12).
pub fn month_of(date: NaiveDate) -> u32 {
    date.month()
}

/// Calendar quarter (1-4).
pub fn quarter_of(date: NaiveDate) -> u32 {
    (date.month() - 1) / 3 + 1
}

#[derive(Debug, Clone, Default)]
pub struct Frame {
    df: DataFrame,
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.df.equals_missing(&other.df)
    }
}

impl From<DataFrame> for Frame {
    fn from(df: DataFrame) -> Self {
        Self { df }
    }
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a frame column by column, checking lengths.
    pub fn from_columns(columns: Vec<Column>) -> CoreResult<Self> {
        let mut frame = Frame::new();
        for column in columns {
            frame.insert(column)?;
        }
        Ok(frame)
    }

    pub fn df(&self) -> &DataFrame {
        &self.df
    }

    pub fn into_df(self) -> DataFrame {
        self.df
    }

    pub fn lazy(&self) -> LazyFrame {
        self.df.clone().lazy()
    }

    pub fn rows(&self) -> usize {
        self.df.height()
    }

    pub fn width(&self) -> usize {
        self.df.width()
    }

    /// `(rows, columns)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows(), self.width())
    }

    pub fn is_empty(&self) -> bool {
        self.rows() == 0
    }

    pub fn column_names(&self) -> Vec<String> {
        self.df.get_columns().iter().map(|c| c.name().to_string()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.df.column(name).is_ok()
    }

    pub fn dtype(&self, name: &str) -> Option<&DataType> {
        self.df.column(name).ok().map(Column::dtype)
    }

    /// Look up a column that the `stage` cannot proceed without.
    pub fn require(&self, name: &str, stage: &str) -> CoreResult<&Column> {
        self.df.column(name).map_err(|_| self.schema_error(name, stage))
    }

    /// Like [`Frame::require`], also checking the column kind.
    pub fn require_dtype(&self, name: &str, stage: &str, dtype: &DataType) -> CoreResult<&Series> {
        let column = self.require(name, stage)?;
        if column.dtype() != dtype {
            return Err(CoreError::ColumnType {
                column: name.to_string(),
                expected: kind_name(dtype),
                actual: kind_name(column.dtype()),
            });
        }
        Ok(column.as_materialized_series())
    }

    pub fn floats(&self, name: &str, stage: &str) -> CoreResult<Vec<Option<f64>>> {
        let series = self.require_dtype(name, stage, &DataType::Float64)?;
        Ok(series.f64()?.into_iter().collect())
    }

    pub fn texts(&self, name: &str, stage: &str) -> CoreResult<Vec<Option<String>>> {
        let series = self.require_dtype(name, stage, &DataType::String)?;
        Ok(series.str()?.into_iter().map(|v| v.map(str::to_string)).collect())
    }

    pub fn dates(&self, name: &str, stage: &str) -> CoreResult<Vec<Option<NaiveDate>>> {
        let series = self.require_dtype(name, stage, &DataType::Date)?;
        let days = series.cast(&DataType::Int32)?;
        Ok(days.i32()?.into_iter().map(|d| d.and_then(date_from_days)).collect())
    }

    /// Build the schema error for a missing column with this frame's shape.
    pub fn schema_error(&self, column: &str, stage: &str) -> CoreError {
        CoreError::SchemaMismatch {
            column: column.to_string(),
            stage: stage.to_string(),
            rows: self.rows(),
            cols: self.width(),
        }
    }

    /// Insert or replace a column. Replacing keeps the column's position.
    pub fn insert(&mut self, column: Column) -> CoreResult<()> {
        let replacing_only = self.width() == 1 && self.has_column(column.name().as_str());
        if replacing_only {
            self.df = DataFrame::new(vec![column])?;
            return Ok(());
        }
        if self.width() > 0 && column.len() != self.rows() {
            return Err(CoreError::LengthMismatch {
                column: column.name().to_string(),
                expected: self.rows(),
                actual: column.len(),
            });
        }
        self.df.with_column(column)?;
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<Column> {
        self.df.drop_in_place(name).ok()
    }

    /// Names of float columns, in frame order.
    pub fn numeric_columns(&self) -> Vec<String> {
        self.df
            .get_columns()
            .iter()
            .filter(|c| c.dtype() == &DataType::Float64)
            .map(|c| c.name().to_string())
            .collect()
    }

    /// Replace `name` with its `Float64` coercion. Text cells that do not
    /// parse become null, and so do dates. Accepts a decimal comma (`"12,5"`)
    /// since the source exports mix both conventions. Returns how many
    /// present cells were lost.
    pub fn coerce_numeric(&mut self, name: &str) -> CoreResult<usize> {
        let Ok(column) = self.df.column(name) else {
            return Ok(0);
        };
        let before = column.len() - column.null_count();
        let coerced = match column.dtype() {
            DataType::Float64 => return Ok(0),
            DataType::String => {
                let values: Vec<Option<f64>> = column
                    .as_materialized_series()
                    .str()?
                    .into_iter()
                    .map(|v| v.and_then(parse_number))
                    .collect();
                float_column(name, values)
            }
            DataType::Float32
            | DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64 => column.cast(&DataType::Float64)?,
            _ => float_column(name, vec![None; column.len()]),
        };
        let lost = before - (coerced.len() - coerced.null_count());
        self.df.with_column(coerced)?;
        Ok(lost)
    }

    /// Select rows by index, in the given order.
    pub fn take(&self, indices: &[usize]) -> CoreResult<Frame> {
        let idx = IdxCa::from_vec("idx".into(), indices.iter().map(|&i| i as IdxSize).collect());
        Ok(Frame::from(self.df.take(&idx)?))
    }

    /// Keep rows where `mask` is true.
    pub fn filter(&self, mask: &[bool]) -> CoreResult<Frame> {
        let mask = BooleanChunked::from_slice("mask".into(), mask);
        Ok(Frame::from(self.df.filter(&mask)?))
    }
}
