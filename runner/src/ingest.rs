pub mod metrics;
#[cfg(test)]
mod metrics_test;

pub use metrics::{extract_create_db_results, extract_run_results, extract_stages, RunResults};

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestorError {
    #[error("No value parsed for '{label}'")]
    MissingMetric { label: String },
    #[error("Multiple values parsed for '{label}': {matches:?}")]
    AmbiguousMetric { label: String, matches: Vec<String> },
    #[error("Failed to parse '{value}' as a number for '{label}'")]
    InvalidNumber { label: String, value: String },
    #[error("Failed to build metric pattern")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Clone, Default)]
/// container for everything captured from one engine invocation
/// supposed to be interpreted by the metric extractor
pub struct RunOutput {
    pub runtime: Duration,
    pub stdout: String,
}
