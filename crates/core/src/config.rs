use std::env;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::frame::parse_period;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str) -> CoreResult<Option<T>> {
    match profiled_env_opt(profile, key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| CoreError::Config(format!("{key}: cannot parse '{raw}'"))),
    }
}

fn profiled_env_list(profile: &str, key: &str) -> CoreResult<Option<Vec<usize>>> {
    let Some(raw) = profiled_env_opt(profile, key) else {
        return Ok(None);
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .map_err(|_| CoreError::Config(format!("{key}: '{s}' is not a positive integer")))
        })
        .collect::<CoreResult<Vec<_>>>()
        .map(Some)
}

fn profiled_env_date(profile: &str, key: &str) -> CoreResult<Option<NaiveDate>> {
    match profiled_env_opt(profile, key) {
        None => Ok(None),
        Some(raw) => parse_period(&raw)
            .map(Some)
            .ok_or_else(|| CoreError::Config(format!("{key}: '{raw}' is not a date (YYYY-MM or YYYY-MM-DD)"))),
    }
}

// ── Pipeline ──────────────────────────────────────────────────

/// Minimum-period policy for rolling means, shared by training and serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RollingPolicy {
    /// Full window required; the first `w - 1` rows of each entity stay missing.
    Strict,
    /// Mean over whatever history exists (minimum one row).
    #[default]
    Relaxed,
}

impl RollingPolicy {
    pub fn min_periods(self, window: usize) -> usize {
        match self {
            RollingPolicy::Strict => window,
            RollingPolicy::Relaxed => 1,
        }
    }
}

/// What to do with rows whose target is missing or unparseable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TargetPolicy {
    #[default]
    MeanFill,
    DropRows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    #[default]
    RandomForest,
    Linear,
}

impl std::str::FromStr for ModelKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "random_forest" | "forest" | "rf" => Ok(ModelKind::RandomForest),
            "linear" | "huber" => Ok(ModelKind::Linear),
            other => Err(CoreError::Config(format!("unknown model kind '{other}'"))),
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelKind::RandomForest => write!(f, "random_forest"),
            ModelKind::Linear => write!(f, "linear"),
        }
    }
}

/// Regressor hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub kind: ModelKind,
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: Option<usize>,
    #[serde(default = "default_min_samples_split")]
    pub min_samples_split: usize,
    #[serde(default = "default_min_samples_leaf")]
    pub min_samples_leaf: usize,
    /// Fraction of features tried per split; `None` tries all of them.
    #[serde(default = "default_max_features")]
    pub max_features: Option<f64>,
    #[serde(default = "default_true")]
    pub bootstrap: bool,
    /// Refit once without the rows whose held-out residual is itself
    /// anomalous under the MAD threshold.
    #[serde(default = "default_true")]
    pub robust_refit: bool,
    /// Huber threshold for the linear model; `None` fits ordinary least squares.
    #[serde(default)]
    pub huber_k: Option<f64>,
}

fn default_n_estimators() -> usize {
    100
}

fn default_max_depth() -> Option<usize> {
    Some(10)
}

fn default_min_samples_split() -> usize {
    2
}

fn default_min_samples_leaf() -> usize {
    5
}

fn default_max_features() -> Option<f64> {
    Some(1.0 / 3.0)
}

fn default_true() -> bool {
    true
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            kind: ModelKind::default(),
            n_estimators: default_n_estimators(),
            max_depth: default_max_depth(),
            min_samples_split: default_min_samples_split(),
            min_samples_leaf: default_min_samples_leaf(),
            max_features: default_max_features(),
            bootstrap: true,
            robust_refit: true,
            huber_k: None,
        }
    }
}

/// Everything the feature pipeline, trainer and scorers read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_entity_column")]
    pub entity_column: String,
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,
    #[serde(default = "default_target_column")]
    pub target_column: String,
    #[serde(default = "default_lags")]
    pub lags: Vec<usize>,
    #[serde(default = "default_rolling_windows")]
    pub rolling_windows: Vec<usize>,
    #[serde(default)]
    pub rolling_policy: RollingPolicy,
    #[serde(default = "default_min_train_rows")]
    pub min_train_rows: usize,
    #[serde(default = "default_mad_threshold")]
    pub mad_threshold: f64,
    #[serde(default = "default_baseline_tolerance")]
    pub baseline_tolerance: f64,
    /// Inclusive lower bound on the timestamp.
    #[serde(default)]
    pub start: Option<NaiveDate>,
    /// Inclusive upper bound on the timestamp.
    #[serde(default)]
    pub end: Option<NaiveDate>,
    #[serde(default = "default_clean_flag_column")]
    pub clean_flag_column: Option<String>,
    /// Extra numeric columns kept out of model input.
    #[serde(default)]
    pub extra_exclusions: Vec<String>,
    #[serde(default)]
    pub target_policy: TargetPolicy,
    /// Category name -> target column. Empty means a single model per entity
    /// on `target_column`.
    #[serde(default)]
    pub categories: IndexMap<String, String>,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub model: ModelConfig,
}

/// Category name used when no categories are configured.
pub const DEFAULT_CATEGORY: &str = "total";

fn default_entity_column() -> String {
    "Sehir".to_string()
}

fn default_timestamp_column() -> String {
    "Donem".to_string()
}

fn default_target_column() -> String {
    "Genel_Toplam_MWh".to_string()
}

fn default_lags() -> Vec<usize> {
    vec![1, 2, 3, 12]
}

fn default_rolling_windows() -> Vec<usize> {
    vec![3, 12]
}

fn default_min_train_rows() -> usize {
    24
}

fn default_mad_threshold() -> f64 {
    3.5
}

fn default_baseline_tolerance() -> f64 {
    0.10
}

fn default_clean_flag_column() -> Option<String> {
    Some("Temiz".to_string())
}

fn default_seed() -> u64 {
    42
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            entity_column: default_entity_column(),
            timestamp_column: default_timestamp_column(),
            target_column: default_target_column(),
            lags: default_lags(),
            rolling_windows: default_rolling_windows(),
            rolling_policy: RollingPolicy::default(),
            min_train_rows: default_min_train_rows(),
            mad_threshold: default_mad_threshold(),
            baseline_tolerance: default_baseline_tolerance(),
            start: None,
            end: None,
            clean_flag_column: default_clean_flag_column(),
            extra_exclusions: Vec::new(),
            target_policy: TargetPolicy::default(),
            categories: IndexMap::new(),
            seed: default_seed(),
            model: ModelConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// The energy categories of the consumption export, keyed by short name.
    pub fn reference_categories() -> IndexMap<String, String> {
        [
            ("genel", "Genel_Toplam_MWh"),
            ("aydinlatma", "Aydinlatma_MWh"),
            ("mesken", "Mesken_MWh"),
            ("sanayi", "Sanayi_MWh"),
            ("tarimsal", "Tarımsal_Sulama_MWh"),
            ("ticarethane", "Ticarethane_MWh"),
            ("diger", "Diger_MWh"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    /// `(category, target column)` pairs to model.
    pub fn targets(&self) -> Vec<(String, String)> {
        if self.categories.is_empty() {
            vec![(DEFAULT_CATEGORY.to_string(), self.target_column.clone())]
        } else {
            self.categories
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        }
    }

    /// Copy of this config retargeted at another column.
    pub fn for_target(&self, target_column: &str) -> PipelineConfig {
        PipelineConfig {
            target_column: target_column.to_string(),
            ..self.clone()
        }
    }

    /// Inclusive date-range check. Missing dates fall outside any bounded range.
    pub fn in_range(&self, date: Option<NaiveDate>) -> bool {
        match date {
            Some(d) => self.start.map_or(true, |s| d >= s) && self.end.map_or(true, |e| d <= e),
            None => self.start.is_none() && self.end.is_none(),
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.lags.iter().any(|&k| k == 0) {
            return Err(CoreError::Config("lags must be >= 1".into()));
        }
        if self.rolling_windows.iter().any(|&w| w == 0) {
            return Err(CoreError::Config("rolling windows must be >= 1".into()));
        }
        if self.min_train_rows < 2 {
            return Err(CoreError::Config("min_train_rows must be >= 2".into()));
        }
        if !(self.mad_threshold.is_finite() && self.mad_threshold > 0.0) {
            return Err(CoreError::Config(format!(
                "mad_threshold must be positive, got {}",
                self.mad_threshold
            )));
        }
        if !(0.0..1.0).contains(&self.baseline_tolerance) {
            return Err(CoreError::Config(format!(
                "baseline_tolerance must be in [0, 1), got {}",
                self.baseline_tolerance
            )));
        }
        if let (Some(s), Some(e)) = (self.start, self.end) {
            if s > e {
                return Err(CoreError::Config(format!("start {s} is after end {e}")));
            }
        }
        if self.model.n_estimators == 0 {
            return Err(CoreError::Config("model.n_estimators must be >= 1".into()));
        }
        if let Some(f) = self.model.max_features {
            if !(f > 0.0 && f <= 1.0) {
                return Err(CoreError::Config(format!("model.max_features must be in (0, 1], got {f}")));
            }
        }
        Ok(())
    }

    fn apply_env(&mut self, p: &str) -> CoreResult<()> {
        if let Some(v) = profiled_env_opt(p, "ENTITY_COLUMN") {
            self.entity_column = v;
        }
        if let Some(v) = profiled_env_opt(p, "TIMESTAMP_COLUMN") {
            self.timestamp_column = v;
        }
        if let Some(v) = profiled_env_opt(p, "TARGET_COLUMN") {
            self.target_column = v;
        }
        if let Some(v) = profiled_env_list(p, "LAGS")? {
            self.lags = v;
        }
        if let Some(v) = profiled_env_list(p, "ROLLING_WINDOWS")? {
            self.rolling_windows = v;
        }
        if let Some(v) = profiled_env_opt(p, "ROLLING_POLICY") {
            self.rolling_policy = match v.to_ascii_lowercase().as_str() {
                "strict" => RollingPolicy::Strict,
                "relaxed" => RollingPolicy::Relaxed,
                other => return Err(CoreError::Config(format!("unknown rolling policy '{other}'"))),
            };
        }
        if let Some(v) = profiled_env_parse(p, "MIN_TRAIN_ROWS")? {
            self.min_train_rows = v;
        }
        if let Some(v) = profiled_env_parse(p, "MAD_THRESHOLD")? {
            self.mad_threshold = v;
        }
        if let Some(v) = profiled_env_parse(p, "BASELINE_TOLERANCE")? {
            self.baseline_tolerance = v;
        }
        if let Some(v) = profiled_env_date(p, "START_DATE")? {
            self.start = Some(v);
        }
        if let Some(v) = profiled_env_date(p, "END_DATE")? {
            self.end = Some(v);
        }
        if let Some(v) = profiled_env_opt(p, "CLEAN_FLAG_COLUMN") {
            self.clean_flag_column = if v == "-" { None } else { Some(v) };
        }
        if let Some(v) = profiled_env_parse(p, "SEED")? {
            self.seed = v;
        }
        if let Some(v) = profiled_env_opt(p, "MODEL_KIND") {
            self.model.kind = v.parse()?;
        }
        if let Some(v) = profiled_env_parse(p, "N_ESTIMATORS")? {
            self.model.n_estimators = v;
        }
        if let Some(v) = profiled_env_parse(p, "ROBUST_REFIT")? {
            self.model.robust_refit = v;
        }
        Ok(())
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("data/models")
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("reports")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            report_dir: default_report_dir(),
        }
    }
}

impl StorageConfig {
    fn apply_env(&mut self, p: &str) {
        if let Some(v) = profiled_env_opt(p, "MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = profiled_env_opt(p, "REPORT_DIR") {
            self.report_dir = PathBuf::from(v);
        }
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Active profile name (empty = default).
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Build config from defaults plus environment (call `load_dotenv()` first).
    /// Profile is read from `VOLTWATCH_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> CoreResult<Self> {
        let profile = env_or("VOLTWATCH_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> CoreResult<Self> {
        let mut config = Config {
            profile: profile.to_uppercase(),
            ..Config::default()
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Read a TOML file, then apply environment overrides on top.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&text)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?;
        if config.profile.is_empty() {
            config.profile = env_or("VOLTWATCH_PROFILE", "").to_uppercase();
        }
        config.apply_env()?;
        tracing::debug!(path = %path.display(), "config file loaded");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> CoreResult<Self> {
        let config: Config = toml::from_str(text).map_err(|e| CoreError::Parse(e.to_string()))?;
        Ok(config)
    }

    fn apply_env(&mut self) -> CoreResult<()> {
        let p = self.profile.clone();
        self.pipeline.apply_env(&p)?;
        self.storage.apply_env(&p);
        self.pipeline.validate()
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        let p = &self.pipeline;
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  columns:   entity={}, timestamp={}, target={}", p.entity_column, p.timestamp_column, p.target_column);
        tracing::info!("  features:  lags={:?}, windows={:?}, rolling={:?}", p.lags, p.rolling_windows, p.rolling_policy);
        tracing::info!("  model:     kind={}, trees={}, min_train_rows={}, seed={}", p.model.kind, p.model.n_estimators, p.min_train_rows, p.seed);
        tracing::info!("  scoring:   mad_threshold={}, baseline_tolerance={}", p.mad_threshold, p.baseline_tolerance);
        tracing::info!("  storage:   models={}, reports={}", self.storage.model_dir.display(), self.storage.report_dir.display());
    }

    /// Compact JSON view embedded in reports.
    pub fn redacted_summary(&self) -> serde_json::Value {
        let p = &self.pipeline;
        serde_json::json!({
            "profile": self.profile_label(),
            "columns": {
                "entity": p.entity_column,
                "timestamp": p.timestamp_column,
                "target": p.target_column,
            },
            "features": {
                "lags": p.lags,
                "rolling_windows": p.rolling_windows,
                "rolling_policy": p.rolling_policy,
            },
            "model": {
                "kind": p.model.kind,
                "n_estimators": p.model.n_estimators,
                "robust_refit": p.model.robust_refit,
                "seed": p.seed,
            },
            "scoring": { "mad_threshold": p.mad_threshold, "baseline_tolerance": p.baseline_tolerance },
            "range": { "start": p.start, "end": p.end },
            "categories": p.categories,
        })
    }
}
