use crate::{catalog::RunGroupKey, criteria::Criteria};
use tracing::{info, warn};

const RERUN_HINT: &str = "You can run again to see if it is noise, or consistent.";

const RECALIBRATION_INSTRUCTIONS: &str = "If you expect your change to affect the performance, you need to recalibrate the values.
To do so, run the benchmark on your branch 6 times, export the median, min_ratio, max_ratio and
sample count of every run group from the structured records (grep_json_single_node_perf),
and replace the matching lines of the calibration table in runner/src/calibration.rs.";

const E2E_FAILURE: &str =
    "Move e2e benchmark failed, failing the job. See logs at the beginning for more details.";

/// Outcome of grading one authoritative run against its criteria
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Regression,
    /// below the warn bound but within normal noise
    PotentialRegression,
    /// faster than the calibration allows, the thresholds have to be raised
    Improvement,
    PotentialImprovement,
}

impl Verdict {
    /// hard verdicts fail the invocation unless the run group is waived
    pub fn is_hard(&self) -> bool {
        matches!(self, Self::Regression | Self::Improvement)
    }
}

/// Exactly one verdict per run, low bounds take precedence over high bounds. High bounds are not
/// checked at all when improvement notices are suppressed.
pub fn classify(tps: f64, criteria: &Criteria, skip_improvement_notice: bool) -> Verdict {
    if tps < criteria.min_tps {
        Verdict::Regression
    } else if tps < criteria.min_warn_tps {
        Verdict::PotentialRegression
    } else if !skip_improvement_notice && tps > criteria.max_tps {
        Verdict::Improvement
    } else if !skip_improvement_notice && tps > criteria.max_warn_tps {
        Verdict::PotentialImprovement
    } else {
        Verdict::Pass
    }
}

fn message(verdict: Verdict, key: &RunGroupKey, tps: f64, criteria: &Criteria) -> Option<String> {
    let expected = criteria.expected_tps;

    match verdict {
        Verdict::Pass => None,
        Verdict::Regression => Some(format!(
            "regression detected {tps}, expected median {expected}, threshold: {}), {key} didn't meet TPS requirements",
            criteria.min_tps
        )),
        Verdict::PotentialRegression => Some(format!(
            "potential (but within normal noise) regression detected {tps}, expected median {expected}, threshold: {}), {key} didn't meet TPS requirements",
            criteria.min_warn_tps
        )),
        Verdict::Improvement => Some(format!(
            "perf improvement detected {tps}, expected median {expected}, threshold: {}), {key} exceeded TPS requirements, increase TPS requirements to match new baseline",
            criteria.max_tps
        )),
        Verdict::PotentialImprovement => Some(format!(
            "potential (but within normal noise) perf improvement detected {tps}, expected median {expected}, threshold: {}), {key} exceeded TPS requirements, increase TPS requirements to match new baseline",
            criteria.max_warn_tps
        )),
    }
}

/// Warnings and errors accumulated over the whole invocation
#[derive(Debug, Clone, Default)]
pub struct Verdicts {
    warnings: Vec<String>,
    errors: Vec<String>,
}

impl Verdicts {
    pub fn new() -> Self {
        Self::default()
    }

    /// grade one run and keep its message, waived run groups only ever warn
    pub fn record(
        &mut self,
        key: &RunGroupKey,
        waived: bool,
        tps: f64,
        criteria: &Criteria,
        skip_improvement_notice: bool,
    ) -> Verdict {
        let verdict = classify(tps, criteria, skip_improvement_notice);

        if let Some(text) = message(verdict, key, tps, criteria) {
            if verdict.is_hard() && !waived {
                self.errors.push(text);
            } else {
                warn!("{text}");
                self.warnings.push(text);
            }
        }

        verdict
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// final report, warnings first, then errors followed by the recalibration instructions
    pub fn summary(&self, e2e_failed: bool) -> String {
        let mut lines = Vec::new();

        if !self.warnings.is_empty() {
            lines.push("Warnings: ".to_string());
            lines.extend(self.warnings.iter().cloned());
            lines.push(RERUN_HINT.to_string());
        }

        if !self.errors.is_empty() {
            lines.push("Errors: ".to_string());
            lines.extend(self.errors.iter().cloned());
            lines.push(RECALIBRATION_INSTRUCTIONS.to_string());
        }

        if e2e_failed {
            lines.push(E2E_FAILURE.to_string());
        }

        lines.join("\n")
    }

    pub fn print_summary(&self, e2e_failed: bool) {
        info!(
            warnings = self.warnings.len(),
            errors = self.errors.len(),
            "All run groups finished"
        );

        let summary = self.summary(e2e_failed);
        if !summary.is_empty() {
            println!("{summary}");
        }
    }

    /// process exit status, 1 on any error or a deferred e2e failure
    pub fn exit_status(&self, e2e_failed: bool) -> u8 {
        if self.errors.is_empty() && !e2e_failed {
            0
        } else {
            1
        }
    }
}
