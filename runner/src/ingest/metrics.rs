//! Extraction of engine metrics from free form text output.
//!
//! Every metric is printed by the engine as `<prefix> <label>: <number> <unit>`. Plain metrics
//! must be printed exactly once, anything else means the output format changed and the run is
//! aborted. Time fractions may be printed repeatedly (intermediate and final values), the last
//! one is authoritative.

use super::IngestorError;
use regex::Regex;
use serde::Serialize;
use tracing::trace;

const NUMBER: &str = r"(\d+\.?\d*)";
const SIGNED_NUMBER: &str = r"(-?\d+\.?\d*)";

/// fractions below are clamped to this when deriving per phase throughput
const MIN_FRACTION: f64 = 0.001;

/// Marker of the account creation throughput printed by `create-db`
pub const CREATE_DB_TPS_LABEL: &str = "Overall TPS: create_db: account creation:";

/// Metrics of a single engine run
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunResults {
    pub tps: f64,
    pub gps: f64,
    pub effective_gps: f64,
    pub io_gps: f64,
    pub execution_gps: f64,
    pub gpt: f64,
    pub storage_fee_pt: f64,
    pub output_bps: f64,
    pub fraction_in_sig_verify: f64,
    pub fraction_in_execution: f64,
    pub fraction_of_execution_in_block_executor: f64,
    pub fraction_of_execution_in_inner_block_executor: f64,
    pub fraction_in_ledger_update: f64,
    pub fraction_in_commit: f64,
}

impl RunResults {
    fn per_phase(&self, fraction: f64) -> f64 {
        self.tps / fraction.max(MIN_FRACTION)
    }

    pub fn sig_verify_tps(&self) -> f64 {
        self.per_phase(self.fraction_in_sig_verify)
    }

    pub fn execution_tps(&self) -> f64 {
        self.per_phase(self.fraction_in_execution)
    }

    pub fn block_executor_tps(&self) -> f64 {
        self.execution_tps() / self.fraction_of_execution_in_block_executor.max(MIN_FRACTION)
    }

    pub fn inner_block_executor_tps(&self) -> f64 {
        self.execution_tps()
            / self
                .fraction_of_execution_in_inner_block_executor
                .max(MIN_FRACTION)
    }

    pub fn ledger_update_tps(&self) -> f64 {
        self.per_phase(self.fraction_in_ledger_update)
    }

    pub fn commit_tps(&self) -> f64 {
        self.per_phase(self.fraction_in_commit)
    }
}

/// all captured values of the first group of `pattern`, in order of appearance
fn captures<'a>(output: &'a str, pattern: &str) -> Result<Vec<&'a str>, IngestorError> {
    let regex = Regex::new(pattern)?;

    Ok(regex
        .captures_iter(output)
        .filter_map(|captures| captures.get(1))
        .map(|found| found.as_str())
        .collect())
}

fn parse_number(label: &str, value: &str) -> Result<f64, IngestorError> {
    value
        .parse::<f64>()
        .map_err(|_| IngestorError::InvalidNumber {
            label: label.to_string(),
            value: value.to_string(),
        })
}

fn exactly_one(label: String, values: &[&str]) -> Result<f64, IngestorError> {
    match values {
        [single] => parse_number(&label, single),
        [] => Err(IngestorError::MissingMetric { label }),
        _ => Err(IngestorError::AmbiguousMetric {
            label,
            matches: values.iter().map(|value| value.to_string()).collect(),
        }),
    }
}

/// value of a metric that has to be printed exactly once
fn only(
    output: &str,
    prefix: &str,
    label: &str,
    value: &str,
    unit: &str,
) -> Result<f64, IngestorError> {
    let label = format!("{prefix} {label}");
    let pattern = format!("{} {value} {}", regex::escape(&label), regex::escape(unit));

    exactly_one(label, &captures(output, &pattern)?)
}

/// last printed value of a fraction, `head` and `tail` surround the number
fn last(output: &str, prefix: &str, head: &str, tail: &str) -> Result<f64, IngestorError> {
    let label = format!("{prefix} {} {tail}", head.trim_end_matches('?'));
    let pattern = format!(
        "{} {head} {NUMBER} {}",
        regex::escape(prefix),
        regex::escape(tail)
    );

    match captures(output, &pattern)?.last() {
        Some(value) => parse_number(&label, value),
        None => Err(IngestorError::MissingMetric { label }),
    }
}

/// Parse a full set of metrics printed with `prefix`, e.g. `Overall` or
/// `Staged execution: stage 0:`.
pub fn extract_run_results(output: &str, prefix: &str) -> Result<RunResults, IngestorError> {
    let results = RunResults {
        tps: only(output, prefix, "TPS:", NUMBER, "txn/s")?,
        gps: only(output, prefix, "GPS:", NUMBER, "gas/s")?,
        effective_gps: only(output, prefix, "effectiveGPS:", NUMBER, "gas/s")?,
        io_gps: only(output, prefix, "ioGPS:", NUMBER, "gas/s")?,
        execution_gps: only(output, prefix, "executionGPS:", NUMBER, "gas/s")?,
        gpt: only(output, prefix, "GPT:", NUMBER, "gas/txn")?,
        storage_fee_pt: only(output, prefix, "Storage fee:", SIGNED_NUMBER, "octas/txn")?,
        output_bps: only(output, prefix, "output:", NUMBER, "bytes/s")?,
        fraction_in_sig_verify: last(
            output,
            prefix,
            "fraction of total:",
            "in signature verification",
        )?,
        fraction_in_execution: last(output, prefix, "fraction of total:", "in execution")?,
        // the engine prints these without a colon, both spellings are accepted
        fraction_of_execution_in_block_executor: last(
            output,
            prefix,
            "fraction of execution:?",
            "in block executor",
        )?,
        fraction_of_execution_in_inner_block_executor: last(
            output,
            prefix,
            "fraction of execution:?",
            "in inner block executor",
        )?,
        fraction_in_ledger_update: last(output, prefix, "fraction of total:", "in ledger update")?,
        fraction_in_commit: last(output, prefix, "fraction of total:", "in commit")?,
    };

    trace!(prefix = prefix, results = ?results, "Extracted run results");

    Ok(results)
}

/// Parse the `create-db` output, only the account creation throughput is reported
pub fn extract_create_db_results(output: &str) -> Result<RunResults, IngestorError> {
    let pattern = format!("{} {NUMBER} txn/s", regex::escape(CREATE_DB_TPS_LABEL));
    let tps = exactly_one(CREATE_DB_TPS_LABEL.to_string(), &captures(output, &pattern)?)?;

    Ok(RunResults {
        tps,
        ..RunResults::default()
    })
}

/// prefix used by the engine for the metrics of stage `stage` of a split pipeline
pub fn stage_prefix(stage: usize) -> String {
    format!("Staged execution: stage {stage}:")
}

/// Parse the metrics of every stage, stages are numbered from 0 and scanning stops at the
/// first index that is missing
pub fn extract_stages(output: &str) -> Result<Vec<(usize, RunResults)>, IngestorError> {
    let mut stages = Vec::new();

    for stage in 0.. {
        let prefix = stage_prefix(stage);

        if !output.contains(&prefix) {
            break;
        }

        stages.push((stage, extract_run_results(output, &prefix)?));
    }

    Ok(stages)
}
