mod cli;
mod config;
mod report;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use voltwatch_compute::{BatchReport, BatchRunner, ModelStore, RawFrames, ReportFilter};
use voltwatch_core::{load_dotenv, Config};
use voltwatch_ingest::{load_frame, ImportOptions};
use voltwatch_storage::LocalModelStore;

use crate::cli::{CliArgs, Command, InputArgs, OutputArgs, TargetArgs};
use crate::config::{apply_targets, load_config};
use crate::report::write_report;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    load_dotenv();
    let args = CliArgs::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(dir) = &args.model_dir {
        config.storage.model_dir = dir.clone();
    }

    match args.command {
        Command::Train { input, targets } => {
            prepare_config(&mut config, &targets)?;
            train(&config, &input)
        }
        Command::Detect { input, targets, output } => {
            prepare_config(&mut config, &targets)?;
            let raw = load_inputs(&config, &input)?;
            let (report, _) = BatchRunner::new(config.pipeline.clone())
                .detect(&raw)
                .context("detection failed")?;
            emit(&config, report, &output)
        }
        Command::Score { input, targets, output } => {
            prepare_config(&mut config, &targets)?;
            let store = LocalModelStore::from_config(&config.storage)
                .with_context(|| format!("failed to open model store {}", config.storage.model_dir.display()))?;
            let registry = store.load_registry().context("failed to load models")?;
            if registry.is_empty() {
                bail!(
                    "no trained models in {}; run `voltwatch train` first",
                    config.storage.model_dir.display()
                );
            }
            info!(models = registry.len(), "models loaded");
            let raw = load_inputs(&config, &input)?;
            let report = BatchRunner::new(config.pipeline.clone())
                .score(&raw, &registry)
                .context("scoring failed")?;
            emit(&config, report, &output)
        }
        Command::Baseline { input, targets, output } => {
            prepare_config(&mut config, &targets)?;
            let raw = load_inputs(&config, &input)?;
            let report = BatchRunner::new(config.pipeline.clone())
                .baseline(&raw)
                .context("baseline scoring failed")?;
            emit(&config, report, &output)
        }
    }
}

fn prepare_config(config: &mut Config, targets: &TargetArgs) -> Result<()> {
    apply_targets(&mut config.pipeline, targets)?;
    config.pipeline.validate().context("invalid pipeline config")?;
    config.log_summary();
    Ok(())
}

fn load_inputs(config: &Config, input: &InputArgs) -> Result<RawFrames> {
    let opts = ImportOptions::from_config(&config.pipeline);
    let train = load_frame(&input.train, &opts)
        .with_context(|| format!("failed to read training table {}", input.train.display()))?;
    let test = match &input.test {
        Some(path) => load_frame(path, &opts).with_context(|| format!("failed to read serving table {}", path.display()))?,
        None => train.clone(),
    };
    info!(train_rows = train.rows(), test_rows = test.rows(), "tables loaded");

    let mut raw = RawFrames::new(train, test);
    for (name, path) in &input.covariates {
        let frame = load_frame(path, &opts)
            .with_context(|| format!("failed to read covariate '{name}' from {}", path.display()))?;
        info!(covariate = %name, rows = frame.rows(), "covariate loaded");
        raw = raw.with_covariate(name.clone(), frame);
    }
    Ok(raw)
}

fn train(config: &Config, input: &InputArgs) -> Result<()> {
    let raw = load_inputs(config, input)?;
    let output = BatchRunner::new(config.pipeline.clone())
        .train(&raw)
        .context("training failed")?;
    for skipped in &output.skipped {
        warn!(category = %skipped.category, entity = %skipped.entity, reason = %skipped.reason, "not trained");
    }

    let store = LocalModelStore::from_config(&config.storage)
        .with_context(|| format!("failed to open model store {}", config.storage.model_dir.display()))?;
    let handles = store.save_all(&output.models).context("failed to save models")?;
    info!(
        saved = handles.len(),
        skipped = output.skipped.len(),
        dir = %store.root().display(),
        "training run complete"
    );
    Ok(())
}

fn emit(config: &Config, report: BatchReport, output: &OutputArgs) -> Result<()> {
    let filter = ReportFilter {
        entity: output.entity.clone(),
        start: output.start,
        end: output.end,
        anomalies_only: output.anomalies_only,
    };
    let report = report.filtered(&filter)?;
    let out = if output.save {
        Some(
            config
                .storage
                .report_dir
                .join(format!("{}.{}", report.run_id, output.format.extension())),
        )
    } else {
        output.out.clone()
    };
    info!(anomalies = report.anomaly_count(), out = ?out, "writing report");
    write_report(&report, config.redacted_summary(), output.format, out.as_deref())
}
