use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use voltwatch_compute::{AnomalyRecord, BatchReport, ScoreDetail};

use crate::cli::ReportFormat;

/// One flattened output row for CSV reports.
#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    method: &'static str,
    category: Option<&'a str>,
    entity: &'a str,
    timestamp: Option<NaiveDate>,
    actual: f64,
    expected: Option<f64>,
    deviation: Option<f64>,
    is_anomaly: bool,
    robust_z: Option<f64>,
    lower: Option<f64>,
    upper: Option<f64>,
}

impl<'a> From<&'a AnomalyRecord> for ReportRow<'a> {
    fn from(r: &'a AnomalyRecord) -> Self {
        let (robust_z, lower, upper) = match &r.detail {
            ScoreDetail::Residual { robust_z, .. } => (*robust_z, None, None),
            ScoreDetail::Baseline { lower, upper, .. } => (None, *lower, *upper),
        };
        ReportRow {
            method: r.detail.method(),
            category: r.category.as_deref(),
            entity: &r.entity,
            timestamp: r.timestamp,
            actual: r.actual,
            expected: r.expected,
            deviation: r.deviation,
            is_anomaly: r.is_anomaly,
            robust_z,
            lower,
            upper,
        }
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    config: serde_json::Value,
    #[serde(flatten)]
    report: &'a BatchReport,
}

/// Write the report to `out`, or stdout when `None`.
pub fn write_report(
    report: &BatchReport,
    config: serde_json::Value,
    format: ReportFormat,
    out: Option<&Path>,
) -> Result<()> {
    match out {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
            let mut w = BufWriter::new(file);
            render(report, config, format, &mut w)?;
            w.flush()?;
        }
        None => {
            let stdout = io::stdout();
            let mut w = stdout.lock();
            render(report, config, format, &mut w)?;
            w.flush()?;
        }
    }
    Ok(())
}

fn render<W: Write>(report: &BatchReport, config: serde_json::Value, format: ReportFormat, w: &mut W) -> Result<()> {
    match format {
        ReportFormat::Json => {
            serde_json::to_writer_pretty(&mut *w, &JsonReport { config, report })
                .context("failed to write JSON report")?;
            writeln!(w)?;
        }
        ReportFormat::Csv => {
            let mut writer = csv::Writer::from_writer(w);
            for record in report.residual.iter().chain(&report.baseline) {
                writer
                    .serialize(ReportRow::from(record))
                    .context("failed to write CSV row")?;
            }
            writer.flush()?;
        }
    }
    Ok(())
}
