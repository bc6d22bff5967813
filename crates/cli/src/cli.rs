use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use voltwatch_core::parse_period;

/// Energy-consumption anomaly detection.
///
/// Builds per-entity features from monthly consumption tables, trains one
/// model per (category, entity) and flags anomalies with a robust residual
/// scorer and a seasonal baseline scorer.
#[derive(Parser, Debug)]
#[command(name = "voltwatch", version, about)]
pub struct CliArgs {
    /// TOML config file (environment overrides still apply).
    #[arg(long, global = true, env = "VOLTWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding trained models (overrides config).
    #[arg(long, global = true)]
    pub model_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Train per-entity models and save them to the model store.
    Train {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        targets: TargetArgs,
    },
    /// Train and score in one run; models are not persisted.
    Detect {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        targets: TargetArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Score with models from the model store.
    Score {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        targets: TargetArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Seasonal baseline scoring only; no models involved.
    Baseline {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        targets: TargetArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// Training table (.csv or .parquet).
    #[arg(long)]
    pub train: PathBuf,

    /// Serving table; defaults to the training table.
    #[arg(long)]
    pub test: Option<PathBuf>,

    /// Covariate table as NAME=PATH, merged on (timestamp[, entity]). Repeatable.
    #[arg(long = "covariate", value_parser = parse_covariate)]
    pub covariates: Vec<(String, PathBuf)>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Model only these categories. Repeatable.
    #[arg(long = "category")]
    pub categories: Vec<String>,

    /// Model every consumption category.
    #[arg(long, conflicts_with = "categories")]
    pub all_categories: bool,
}

#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    /// Only report this entity (exact match).
    #[arg(long)]
    pub entity: Option<String>,

    /// Inclusive lower bound (YYYY-MM or YYYY-MM-DD).
    #[arg(long, value_parser = parse_date)]
    pub start: Option<NaiveDate>,

    /// Inclusive upper bound (YYYY-MM or YYYY-MM-DD).
    #[arg(long, value_parser = parse_date)]
    pub end: Option<NaiveDate>,

    /// Drop rows that are not flagged.
    #[arg(long)]
    pub anomalies_only: bool,

    #[arg(long, value_enum, default_value_t = ReportFormat::Json)]
    pub format: ReportFormat,

    /// Output file; stdout when omitted.
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Write `<run_id>.<format>` into the configured report directory.
    #[arg(long, conflicts_with = "out")]
    pub save: bool,
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Csv => "csv",
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Csv,
}

fn parse_covariate(raw: &str) -> Result<(String, PathBuf), String> {
    let (name, path) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PATH, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() || path.trim().is_empty() {
        return Err(format!("expected NAME=PATH, got '{raw}'"));
    }
    Ok((name.to_string(), PathBuf::from(path.trim())))
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    parse_period(raw).ok_or_else(|| format!("'{raw}' is not a date (YYYY-MM or YYYY-MM-DD)"))
}
