use crate::{
    calibration::{CalibrationData, CalibrationStore},
    catalog::RunGroupConfig,
    config::ConfigErrors,
};
use tracing::warn;

/// Fixed multipliers applied to uncalibrated expectations
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseLimits {
    pub lower: f64,
    pub lower_warn: f64,
    pub upper: f64,
    pub upper_warn: f64,
}

impl NoiseLimits {
    pub fn new(is_mainnet: bool) -> Self {
        Self {
            lower: if is_mainnet { 0.98 } else { 0.8 },
            lower_warn: 0.9,
            // to calibrate the upper limit after a perf improvement, raise this temporarily
            // (i.e. to 1.3) and bring it back after a day or two of runs
            upper: 1.15,
            upper_warn: 1.05,
        }
    }
}

/// Decision boundaries for one run group
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Criteria {
    pub expected_tps: f64,
    /// below is a hard failure
    pub min_tps: f64,
    pub min_warn_tps: f64,
    /// above is a hard failure, the baseline needs a recalibration
    pub max_tps: f64,
    pub max_warn_tps: f64,
}

impl Criteria {
    pub fn from_expected(expected_tps: f64, noise: &NoiseLimits) -> Self {
        Self {
            expected_tps,
            min_tps: expected_tps * noise.lower,
            min_warn_tps: expected_tps * noise.lower_warn,
            max_tps: expected_tps * noise.upper,
            max_warn_tps: expected_tps * noise.upper_warn,
        }
    }

    /// Hard bounds widen the observed extremes by `10 / count` relative and `1 / count`
    /// absolute, warn bounds contract the extremes toward the median with a 0.8 power.
    ///
    /// Any change to these formulas shifts every threshold and requires a recalibration.
    pub fn from_calibration(calibration: &CalibrationData) -> Self {
        let expected = calibration.expected_tps;
        let count = f64::from(calibration.count);

        Self {
            expected_tps: expected,
            min_tps: expected
                * (1.0 - (1.0 - calibration.min_ratio) * (1.0 + 10.0 / count) - 1.0 / count),
            min_warn_tps: expected * calibration.min_ratio.powf(0.8),
            max_tps: expected
                * (1.0 + (calibration.max_ratio - 1.0) * (1.0 + 10.0 / count) + 1.0 / count),
            max_warn_tps: expected * calibration.max_ratio.powf(0.8),
        }
    }

    /// explicit expectations win over the calibration table, having neither is a config error
    pub fn resolve(
        config: &RunGroupConfig,
        store: &CalibrationStore,
        noise: &NoiseLimits,
    ) -> Result<Self, ConfigErrors> {
        if let Some(expected_tps) = config.expected_tps {
            warn!("using uncalibrated TPS for {}", config.key);

            Ok(Self::from_expected(expected_tps, noise))
        } else {
            store
                .get(&config.key)
                .map(Self::from_calibration)
                .ok_or_else(|| ConfigErrors::Uncalibrated(config.key.clone()))
        }
    }

    /// block size used for the run, never larger than the expected throughput
    pub fn block_size(&self, max_block_size: usize) -> usize {
        self.expected_tps.min(max_block_size as f64) as usize
    }
}
