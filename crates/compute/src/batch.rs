//! Batch orchestration: prepare every configured target, train per entity,
//! score with both scorers and assemble a report.
//!
//! One entity failing never aborts the batch; it lands in the skipped
//! manifest with its reason.

use chrono::{DateTime, NaiveDate, Utc};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;
use voltwatch_core::{CoreError, PipelineConfig};

use crate::error::{ComputeError, ComputeResult};
use crate::model::{FitMetrics, ModelKey, ModelRegistry, SkippedEntity, TrainedModel, Trainer, ALL_ENTITIES};
use crate::pipeline::anomaly::{score_baseline, score_residuals, AnomalyRecord, Observation, ScorerSummary};
use crate::pipeline::metrics::PipelineMetrics;
use crate::pipeline::{run_pipeline_with_metrics, FeatureSet, RawFrames};

/// Aligned feature sets for one (category, target column).
#[derive(Debug, Clone)]
pub struct PreparedTarget {
    pub category: String,
    pub config: PipelineConfig,
    pub train: FeatureSet,
    pub test: FeatureSet,
}

/// Every target that could be prepared, plus the categories that could not.
#[derive(Debug, Clone, Default)]
pub struct PreparedBatch {
    pub targets: Vec<PreparedTarget>,
    /// One entry per category, with [`ALL_ENTITIES`] as the entity.
    pub skipped: Vec<SkippedEntity>,
}

/// Fit quality of one model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelDiagnostics {
    pub key: ModelKey,
    pub train_rows: usize,
    pub train: Option<FitMetrics>,
    pub test: Option<FitMetrics>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportSummary {
    pub residual: ScorerSummary,
    pub baseline: ScorerSummary,
}

/// Output of a training run.
#[derive(Debug, Clone)]
pub struct TrainOutput {
    pub models: Vec<TrainedModel>,
    pub skipped: Vec<SkippedEntity>,
    pub metrics: PipelineMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub residual: Vec<AnomalyRecord>,
    pub baseline: Vec<AnomalyRecord>,
    pub skipped: Vec<SkippedEntity>,
    pub diagnostics: Vec<ModelDiagnostics>,
    pub metrics: PipelineMetrics,
    pub summary: ReportSummary,
}

/// Output narrowing applied after scoring.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportFilter {
    /// Exact entity match.
    pub entity: Option<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub anomalies_only: bool,
}

impl ReportFilter {
    fn keeps(&self, record: &AnomalyRecord) -> bool {
        if self.entity.as_deref().is_some_and(|e| e != record.entity) {
            return false;
        }
        if self.start.is_some() || self.end.is_some() {
            let Some(ts) = record.timestamp else {
                return false;
            };
            if self.start.is_some_and(|s| ts < s) || self.end.is_some_and(|e| ts > e) {
                return false;
            }
        }
        !self.anomalies_only || record.is_anomaly
    }
}

impl BatchReport {
    fn summarize(&mut self) {
        self.summary = ReportSummary {
            residual: ScorerSummary::of(&self.residual),
            baseline: ScorerSummary::of(&self.baseline),
        };
    }

    /// Distinct entities across both scorers, sorted.
    pub fn entities(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .residual
            .iter()
            .chain(&self.baseline)
            .map(|r| r.entity.clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Narrow the report. An entity filter naming no scored entity is an
    /// error carrying near matches.
    pub fn filtered(mut self, filter: &ReportFilter) -> ComputeResult<Self> {
        if let Some(entity) = &filter.entity {
            let known = self.entities();
            if !known.iter().any(|e| e == entity) {
                return Err(ComputeError::UnknownEntity {
                    entity: entity.clone(),
                    suggestions: similar_names(entity, &known),
                });
            }
        }
        self.residual.retain(|r| filter.keeps(r));
        self.baseline.retain(|r| filter.keeps(r));
        self.summarize();
        Ok(self)
    }

    pub fn anomaly_count(&self) -> usize {
        self.summary.residual.anomalies + self.summary.baseline.anomalies
    }
}

/// Up to five known names sharing a case-insensitive prefix or substring.
fn similar_names(name: &str, known: &[String]) -> Vec<String> {
    let needle = name.to_lowercase();
    let prefix: String = needle.chars().take(3).collect();
    known
        .iter()
        .filter(|k| {
            let k = k.to_lowercase();
            k.contains(&needle) || needle.contains(&k) || (!prefix.is_empty() && k.starts_with(&prefix))
        })
        .take(5)
        .cloned()
        .collect()
}

#[derive(Debug, Clone)]
pub struct BatchRunner {
    config: PipelineConfig,
}

impl BatchRunner {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the feature pipeline once per configured target.
    ///
    /// With several categories configured, a category whose target column is
    /// absent from the input is recorded as skipped and the others carry on.
    /// A single-target run treats the missing column as fatal.
    pub fn prepare(&self, raw: &RawFrames, metrics: &mut PipelineMetrics) -> ComputeResult<PreparedBatch> {
        let targets = self.config.targets();
        let multi = targets.len() > 1;
        let mut batch = PreparedBatch::default();
        for (category, column) in targets {
            let config = self.config.for_target(&column);
            match run_pipeline_with_metrics(raw, &config, metrics) {
                Ok((train, test)) => batch.targets.push(PreparedTarget {
                    category,
                    config,
                    train,
                    test,
                }),
                Err(ComputeError::Schema(err @ CoreError::SchemaMismatch { .. }))
                    if multi && missing_column(&err) == Some(column.as_str()) =>
                {
                    warn!(category = %category, column = %column, error = %err, "category skipped");
                    metrics.entities_skipped += 1;
                    batch.skipped.push(SkippedEntity {
                        category,
                        entity: ALL_ENTITIES.to_string(),
                        reason: err.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(batch)
    }

    pub fn train_prepared(
        &self,
        prepared: &[PreparedTarget],
        metrics: &mut PipelineMetrics,
    ) -> (Vec<TrainedModel>, Vec<SkippedEntity>) {
        let timer = metrics.timer("train");
        let mut models = Vec::new();
        let mut skipped = Vec::new();
        for target in prepared {
            let trainer = Trainer::new(target.config.clone(), target.category.clone());
            let (m, s) = trainer.train_all(&target.train);
            models.extend(m);
            skipped.extend(s);
        }
        let rows: usize = prepared.iter().map(|p| p.train.rows()).sum();
        timer.finish(metrics, rows, models.len());
        metrics.record_training(models.len(), skipped.len());
        (models, skipped)
    }

    /// Score every prepared target against `registry`.
    pub fn score_prepared(
        &self,
        prepared: &[PreparedTarget],
        registry: &ModelRegistry,
        metrics: &mut PipelineMetrics,
    ) -> ComputeResult<BatchReport> {
        let timer = metrics.timer("score");
        let mut residual = Vec::new();
        let mut baseline = Vec::new();
        let mut skipped = Vec::new();
        let mut diagnostics = Vec::new();

        for target in prepared {
            let outcomes: Vec<EntityOutcome> = target
                .test
                .entities()
                .into_par_iter()
                .map(|entity| score_entity(target, registry, &entity))
                .collect();
            for outcome in outcomes {
                match outcome {
                    EntityOutcome::Scored { records, diagnostics: d } => {
                        residual.extend(records);
                        diagnostics.push(d);
                    }
                    EntityOutcome::Skipped(s) => {
                        warn!(category = %s.category, entity = %s.entity, reason = %s.reason, "entity not scored");
                        skipped.push(s);
                    }
                    EntityOutcome::Empty => {}
                }
            }

            let mut records = score_baseline(&target.train, &target.test, target.config.baseline_tolerance)?;
            for r in &mut records {
                r.category = Some(target.category.clone());
            }
            baseline.extend(records);
        }

        residual.retain(|r| self.config.in_range(r.timestamp));
        baseline.retain(|r| self.config.in_range(r.timestamp));
        residual.sort_by(|a, b| cmp_timestamp(a.timestamp, b.timestamp));
        baseline.sort_by(|a, b| cmp_timestamp(a.timestamp, b.timestamp));

        let mut report = BatchReport {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            residual,
            baseline,
            skipped,
            diagnostics,
            metrics: PipelineMetrics::default(),
            summary: ReportSummary::default(),
        };
        report.summarize();

        let rows: usize = prepared.iter().map(|p| p.test.rows()).sum();
        timer.finish(metrics, rows, report.residual.len() + report.baseline.len());
        metrics.record_residuals(report.summary.residual.rows, report.summary.residual.anomalies);
        metrics.record_baseline(report.summary.baseline.rows, report.summary.baseline.anomalies);
        metrics.entities_skipped += report.skipped.len() as u64;
        Ok(report)
    }

    /// Build features and train; nothing is scored.
    pub fn train(&self, raw: &RawFrames) -> ComputeResult<TrainOutput> {
        let mut metrics = PipelineMetrics::new();
        let batch = self.prepare(raw, &mut metrics)?;
        let (models, trained_skips) = self.train_prepared(&batch.targets, &mut metrics);
        let mut skipped = batch.skipped;
        skipped.extend(trained_skips);
        Ok(TrainOutput {
            models,
            skipped,
            metrics,
        })
    }

    /// Score with previously trained models.
    pub fn score(&self, raw: &RawFrames, registry: &ModelRegistry) -> ComputeResult<BatchReport> {
        let mut metrics = PipelineMetrics::new();
        let batch = self.prepare(raw, &mut metrics)?;
        let mut report = self.score_prepared(&batch.targets, registry, &mut metrics)?;
        report.skipped.splice(0..0, batch.skipped);
        report.metrics = metrics;
        self.log_report(&report);
        Ok(report)
    }

    /// Train then score in one pass.
    pub fn detect(&self, raw: &RawFrames) -> ComputeResult<(BatchReport, ModelRegistry)> {
        let mut metrics = PipelineMetrics::new();
        let batch = self.prepare(raw, &mut metrics)?;
        let (models, trained_skips) = self.train_prepared(&batch.targets, &mut metrics);
        let registry = ModelRegistry::from_models(models);
        let mut report = self.score_prepared(&batch.targets, &registry, &mut metrics)?;

        let mut skipped = batch.skipped;
        skipped.extend(trained_skips);
        // entities already reported by the trainer are not repeated
        report
            .skipped
            .retain(|s| !skipped.iter().any(|t| t.category == s.category && t.entity == s.entity));
        metrics.entities_skipped = (skipped.len() + report.skipped.len()) as u64;
        skipped.append(&mut report.skipped);
        report.skipped = skipped;
        report.metrics = metrics;
        self.log_report(&report);
        Ok((report, registry))
    }

    /// Seasonal baseline scoring only; no models are fitted.
    pub fn baseline(&self, raw: &RawFrames) -> ComputeResult<BatchReport> {
        let mut metrics = PipelineMetrics::new();
        let batch = self.prepare(raw, &mut metrics)?;
        let timer = metrics.timer("baseline");
        let mut baseline = Vec::new();
        for target in &batch.targets {
            let mut records = score_baseline(&target.train, &target.test, target.config.baseline_tolerance)?;
            for r in &mut records {
                r.category = Some(target.category.clone());
            }
            baseline.extend(records);
        }
        baseline.retain(|r| self.config.in_range(r.timestamp));
        baseline.sort_by(|a, b| cmp_timestamp(a.timestamp, b.timestamp));

        let rows: usize = batch.targets.iter().map(|p| p.test.rows()).sum();
        timer.finish(&mut metrics, rows, baseline.len());
        let mut report = BatchReport {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            residual: Vec::new(),
            baseline,
            skipped: batch.skipped,
            diagnostics: Vec::new(),
            metrics: PipelineMetrics::default(),
            summary: ReportSummary::default(),
        };
        report.summarize();
        metrics.record_baseline(report.summary.baseline.rows, report.summary.baseline.anomalies);
        report.metrics = metrics;
        self.log_report(&report);
        Ok(report)
    }

    fn log_report(&self, report: &BatchReport) {
        info!(
            run_id = %report.run_id,
            residual_rows = report.summary.residual.rows,
            residual_anomalies = report.summary.residual.anomalies,
            baseline_rows = report.summary.baseline.rows,
            baseline_anomalies = report.summary.baseline.anomalies,
            skipped = report.skipped.len(),
            "batch complete"
        );
    }
}

fn missing_column(err: &CoreError) -> Option<&str> {
    match err {
        CoreError::SchemaMismatch { column, .. } => Some(column.as_str()),
        _ => None,
    }
}

fn cmp_timestamp(a: Option<NaiveDate>, b: Option<NaiveDate>) -> std::cmp::Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    }
}

enum EntityOutcome {
    Scored {
        records: Vec<AnomalyRecord>,
        diagnostics: ModelDiagnostics,
    },
    Skipped(SkippedEntity),
    Empty,
}

fn score_entity(target: &PreparedTarget, registry: &ModelRegistry, entity: &str) -> EntityOutcome {
    let skip = |reason: String| {
        EntityOutcome::Skipped(SkippedEntity {
            category: target.category.clone(),
            entity: entity.to_string(),
            reason,
        })
    };

    let test = &target.test;
    let rows: Vec<usize> = test
        .rows_for(entity)
        .into_iter()
        .filter(|&i| test.target_observed[i])
        .collect();
    if rows.is_empty() {
        return EntityOutcome::Empty;
    }

    let key = ModelKey::new(target.category.clone(), entity);
    let Some(model) = registry.get(&key) else {
        return skip("no trained model".into());
    };
    let predictions = match model.predict(test, &rows) {
        Ok(p) => p,
        Err(e) => return skip(e.to_string()),
    };

    let observations: Vec<Observation> = rows
        .iter()
        .map(|&i| Observation {
            entity: entity.to_string(),
            timestamp: test.timestamps[i],
            actual: test.target[i],
        })
        .collect();
    let mut records = match score_residuals(&observations, &predictions, target.config.mad_threshold) {
        Ok(r) => r,
        Err(e) => return skip(e.to_string()),
    };
    for r in &mut records {
        r.category = Some(target.category.clone());
    }

    let actual: Vec<f64> = observations.iter().map(|o| o.actual).collect();
    EntityOutcome::Scored {
        records,
        diagnostics: ModelDiagnostics {
            key,
            train_rows: model.train_rows,
            train: model.train_metrics.clone(),
            test: FitMetrics::compute(&actual, &predictions),
        },
    }
}
