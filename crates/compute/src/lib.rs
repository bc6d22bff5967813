pub mod batch;
pub mod error;
pub mod model;
pub mod pipeline;

pub use batch::{
    BatchReport, BatchRunner, ModelDiagnostics, PreparedBatch, PreparedTarget, ReportFilter, ReportSummary, TrainOutput,
};
pub use error::{ComputeError, ComputeResult};
pub use model::{
    regressor_for, train_entity, FitMetrics, FittedModel, MemoryModelStore, ModelHandle, ModelKey, ModelRegistry,
    ModelStore, Regressor, SharedRegistry, SkippedEntity, TrainedModel, Trainer, ALL_ENTITIES,
};
pub use pipeline::anomaly::{
    mad_flags, score_baseline, score_residuals, AnomalyRecord, Observation, ScoreDetail, ScorerSummary,
    SeasonalBaseline,
};
pub use pipeline::impute::{impute, ImputationSummary};
pub use pipeline::metrics::PipelineMetrics;
pub use pipeline::{prepare_frame, run_pipeline, run_pipeline_with_metrics, FeatureSet, RawFrames};
