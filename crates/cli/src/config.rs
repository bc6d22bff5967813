use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::debug;
use voltwatch_core::{Config, PipelineConfig};

use crate::cli::TargetArgs;

/// Load the TOML file when given, otherwise defaults plus environment.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => Config::load(p).with_context(|| format!("failed to load config from {}", p.display())),
        None => Config::from_env().context("failed to build config from environment"),
    }
}

/// Narrow the pipeline to the categories named on the command line.
///
/// Names resolve against the configured categories first, then the
/// reference set of the consumption export.
pub fn apply_targets(pipeline: &mut PipelineConfig, targets: &TargetArgs) -> Result<()> {
    if targets.all_categories {
        if pipeline.categories.is_empty() {
            pipeline.categories = PipelineConfig::reference_categories();
        }
        debug!(categories = pipeline.categories.len(), "modelling all categories");
        return Ok(());
    }
    if targets.categories.is_empty() {
        return Ok(());
    }

    let reference = PipelineConfig::reference_categories();
    let mut selected = reference.clone();
    selected.clear();
    for name in &targets.categories {
        let key = name.to_lowercase();
        let column = pipeline
            .categories
            .get(&key)
            .or_else(|| reference.get(&key))
            .cloned();
        match column {
            Some(column) => {
                selected.insert(key, column);
            }
            None => {
                let mut known: Vec<&String> = pipeline.categories.keys().chain(reference.keys()).collect();
                known.sort();
                known.dedup();
                let known: Vec<&str> = known.into_iter().map(String::as_str).collect();
                bail!("unknown category '{name}' (known: {})", known.join(", "));
            }
        }
    }
    pipeline.categories = selected;
    Ok(())
}
