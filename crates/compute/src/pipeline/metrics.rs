use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

/// Timing and row counts of one pipeline stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageMetrics {
    /// Number of times the stage ran (once per frame and category).
    pub runs: u32,
    /// Accumulated wall time in milliseconds.
    pub duration_ms: u64,
    pub rows_in: u64,
    pub rows_out: u64,
}

/// Pipeline run metrics, updated incrementally by each stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineMetrics {
    /// When the run started.
    pub started_at: Option<DateTime<Utc>>,
    /// Per-stage timings keyed by stage name, in first-seen order.
    pub stages: IndexMap<String, StageMetrics>,
    /// Cells filled by the imputer across all frames.
    pub cells_imputed: u64,
    /// Entities with a freshly trained model.
    pub entities_trained: u64,
    /// Entities skipped during training or scoring.
    pub entities_skipped: u64,
    /// Rows scored by the residual scorer.
    pub residual_rows: u64,
    /// Rows flagged by the residual scorer.
    pub residual_anomalies: u64,
    /// Rows scored by the baseline scorer.
    pub baseline_rows: u64,
    /// Rows flagged by the baseline scorer.
    pub baseline_anomalies: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// Record one run of a stage.
    pub fn record_stage(&mut self, stage: &str, elapsed: Duration, rows_in: usize, rows_out: usize) {
        let entry = self.stages.entry(stage.to_owned()).or_default();
        entry.runs += 1;
        entry.duration_ms += elapsed.as_millis() as u64;
        entry.rows_in += rows_in as u64;
        entry.rows_out += rows_out as u64;
    }

    pub fn record_training(&mut self, trained: usize, skipped: usize) {
        self.entities_trained += trained as u64;
        self.entities_skipped += skipped as u64;
    }

    pub fn record_residuals(&mut self, rows: usize, anomalies: usize) {
        self.residual_rows += rows as u64;
        self.residual_anomalies += anomalies as u64;
    }

    pub fn record_baseline(&mut self, rows: usize, anomalies: usize) {
        self.baseline_rows += rows as u64;
        self.baseline_anomalies += anomalies as u64;
    }

    /// Fold another run's metrics into this one.
    pub fn merge(&mut self, other: &PipelineMetrics) {
        for (name, stage) in &other.stages {
            let entry = self.stages.entry(name.clone()).or_default();
            entry.runs += stage.runs;
            entry.duration_ms += stage.duration_ms;
            entry.rows_in += stage.rows_in;
            entry.rows_out += stage.rows_out;
        }
        self.cells_imputed += other.cells_imputed;
        self.entities_trained += other.entities_trained;
        self.entities_skipped += other.entities_skipped;
        self.residual_rows += other.residual_rows;
        self.residual_anomalies += other.residual_anomalies;
        self.baseline_rows += other.baseline_rows;
        self.baseline_anomalies += other.baseline_anomalies;
    }

    /// Start timing a stage.
    pub fn timer(&self, stage: &'static str) -> StageTimer {
        StageTimer {
            stage,
            start: Instant::now(),
        }
    }
}

/// A scoped timer for one stage run.
pub struct StageTimer {
    stage: &'static str,
    start: Instant,
}

impl StageTimer {
    /// Finalize the timer and record metrics.
    pub fn finish(self, metrics: &mut PipelineMetrics, rows_in: usize, rows_out: usize) {
        metrics.record_stage(self.stage, self.start.elapsed(), rows_in, rows_out);
    }
}
