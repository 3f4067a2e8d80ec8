use crate::{
    catalog::{ExecutorType, RunGroupKey},
    config::ConfigErrors,
};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use tracing::debug;

// columns are addressed from the end of the line
const CALIBRATED_TPS_INDEX: usize = 1;
const CALIBRATED_MAX_RATIO_INDEX: usize = 2;
const CALIBRATED_MIN_RATIO_INDEX: usize = 3;
const CALIBRATED_COUNT_INDEX: usize = 4;
const CALIBRATION_SEPARATOR: char = '\t';

// Numbers are based on the machine spec used by the CI runners, local machines will differ.
// Calibrate with the median over the last runs exported from the log sink. If only a few run
// groups need a recalibration, update only their lines so the others don't drift.
//
// transaction_type	module_working_set_size	executor_type	count	min_ratio	max_ratio	median
const CALIBRATION: &str = "
no-op	1	VM	57	0.758	1.079	40390.5
no-op	1000	VM	57	0.740	1.040	22473.1
apt-fa-transfer	1	VM	57	0.762	1.070	28769.8
apt-fa-transfer	1	NativeVM	57	0.762	1.070	28769.8
apt_fa_transfer_by_stages	1	VM	57	0.762	1.070	30000.
apt_fa_transfer_by_stages	1	NativeVM	57	0.762	1.070	30000.
apt_fa_transfer_by_stages	1	NativeSpeculative	57	0.762	1.070	30000.
apt_fa_transfer_by_stages	1	NativeNoStorageSpeculative	57	0.762	1.070	30000.
apt_fa_transfer_sequential_by_stages	1	VM	57	0.762	1.070	10000.
apt_fa_transfer_sequential_by_stages	1	NativeVM	57	0.762	1.070	10000.
apt_fa_transfer_sequential_by_stages	1	NativeSpeculative	57	0.762	1.070	10000.
apt_fa_transfer_sequential_by_stages	1	NativeNoStorageSpeculative	57	0.762	1.070	10000.
account-generation	1	VM	57	0.774	1.055	23332.3
account-resource32-b	1	VM	57	0.799	1.084	35822.6
modify-global-resource	1	VM	57	0.810	1.022	2789.1
modify-global-resource	100	VM	57	0.757	1.040	35206.7
publish-package	1	VM	57	0.899	1.055	144.8
mix_publish_transfer	1	VM	57	0.921	1.094	2141.3
batch100-transfer	1	VM	58	0.727	1.022	740.9
vector-picture30k	1	VM	58	0.858	1.030	111.0
vector-picture30k	100	VM	58	0.546	1.041	2021.7
smart-table-picture30-k-with200-change	1	VM	58	0.944	1.056	21.3
smart-table-picture30-k-with200-change	100	VM	58	0.895	1.039	402.8
modify-global-resource-agg-v2	1	VM	58	0.773	1.085	37354.2
modify-global-flag-agg-v2	1	VM	58	0.866	1.022	5508.5
modify-global-bounded-agg-v2	1	VM	58	0.872	1.091	9731.3
modify-global-milestone-agg-v2	1	VM	58	0.813	1.037	28612.4
resource-groups-global-write-tag1-kb	1	VM	58	0.800	1.048	9180.8
resource-groups-global-write-and-read-tag1-kb	1	VM	58	0.849	1.025	6196.8
resource-groups-sender-write-tag1-kb	1	VM	58	0.886	1.180	19936.8
resource-groups-sender-multi-change1-kb	1	VM	58	0.819	1.088	16466.1
token-v1ft-mint-and-transfer	1	VM	58	0.810	1.039	1262.2
token-v1ft-mint-and-transfer	100	VM	58	0.772	1.032	18083.7
token-v1nft-mint-and-transfer-sequential	1	VM	58	0.809	1.023	795.5
token-v1nft-mint-and-transfer-sequential	100	VM	58	0.759	1.035	12888.4
coin-init-and-mint	1	VM	58	0.814	1.083	29357.5
coin-init-and-mint	100	VM	58	0.777	1.064	24307.2
fungible-asset-mint	1	VM	58	0.799	1.037	26666.4
fungible-asset-mint	100	VM	58	0.810	1.045	21562.8
no-op5-signers	1	VM	58	0.811	1.085	40094.5
token-v2-ambassador-mint	1	VM	58	0.784	1.050	17603.3
token-v2-ambassador-mint	100	VM	58	0.796	1.042	16110.4
liquidity-pool-swap	1	VM	58	0.810	1.027	961.3
liquidity-pool-swap	100	VM	58	0.770	1.029	11256.7
liquidity-pool-swap-stable	1	VM	58	0.794	1.026	936.3
liquidity-pool-swap-stable	100	VM	58	0.783	1.031	10977.4
deserialize-u256	1	VM	58	0.775	1.071	39288.2
no-op-fee-payer	1	VM	58	0.823	1.038	2095.4
no-op-fee-payer	100	VM	58	0.799	1.038	27842.9
";

/// Statistical baseline of a run group from prior runs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationData {
    /// median throughput
    pub expected_tps: f64,
    /// number of historical samples
    pub count: u32,
    /// smallest observed actual/median ratio
    pub min_ratio: f64,
    /// largest observed actual/median ratio
    pub max_ratio: f64,
}

impl CalibrationData {
    /// holds `count >= 1` and `0 < min_ratio <= 1 <= max_ratio`
    pub fn check(&self) -> Result<(), String> {
        if self.count == 0 {
            Err("count must be at least 1".to_string())
        } else if !(self.min_ratio > 0.0 && self.min_ratio <= 1.0) {
            Err(format!("min_ratio {} must be in (0, 1]", self.min_ratio))
        } else if !(self.max_ratio >= 1.0 && self.max_ratio.is_finite()) {
            Err(format!("max_ratio {} must be at least 1", self.max_ratio))
        } else if !(self.expected_tps > 0.0 && self.expected_tps.is_finite()) {
            Err(format!("median {} must be positive", self.expected_tps))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CalibrationStore {
    entries: BTreeMap<RunGroupKey, CalibrationData>,
}

static BUILTIN: Lazy<Result<CalibrationStore, String>> =
    Lazy::new(|| CalibrationStore::parse(CALIBRATION).map_err(|error| error.to_string()));

fn field<'a>(parts: &[&'a str], from_end: usize) -> Option<&'a str> {
    parts.len().checked_sub(from_end).map(|index| parts[index])
}

fn number<T: std::str::FromStr>(
    value: Option<&str>,
    name: &str,
    line: usize,
) -> Result<T, ConfigErrors> {
    value
        .and_then(|value| value.parse::<T>().ok())
        .ok_or_else(|| ConfigErrors::MalformedCalibration {
            line,
            reason: format!("column {name} is missing or not a number"),
        })
}

impl CalibrationStore {
    /// the table compiled into the harness
    pub fn builtin() -> Result<Self, ConfigErrors> {
        match &*BUILTIN {
            Ok(store) => Ok(store.clone()),
            // only reachable if the embedded table was edited into an invalid state
            Err(reason) => Err(ConfigErrors::MalformedCalibration {
                line: 0,
                reason: reason.clone(),
            }),
        }
    }

    /// parse a tab separated calibration table, blank lines are skipped
    pub fn parse(table: &str) -> Result<Self, ConfigErrors> {
        let mut entries = BTreeMap::new();

        for (line_number, line) in table.lines().enumerate() {
            let parts = line
                .trim()
                .split(CALIBRATION_SEPARATOR)
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>();

            if parts.is_empty() {
                continue;
            }

            if parts.len() < 7 {
                return Err(ConfigErrors::MalformedCalibration {
                    line: line_number,
                    reason: format!("expected 7 columns, found {}", parts.len()),
                });
            }

            let executor_type = parts[2].parse::<ExecutorType>().map_err(|reason| {
                ConfigErrors::MalformedCalibration {
                    line: line_number,
                    reason,
                }
            })?;
            let key = RunGroupKey::new(parts[0])
                .with_module_working_set_size(number(
                    parts.get(1).copied(),
                    "module_working_set_size",
                    line_number,
                )?)
                .with_executor(executor_type);

            let data = CalibrationData {
                expected_tps: number(field(&parts, CALIBRATED_TPS_INDEX), "median", line_number)?,
                count: number(field(&parts, CALIBRATED_COUNT_INDEX), "count", line_number)?,
                min_ratio: number(field(&parts, CALIBRATED_MIN_RATIO_INDEX), "min_ratio", line_number)?,
                max_ratio: number(field(&parts, CALIBRATED_MAX_RATIO_INDEX), "max_ratio", line_number)?,
            };

            entries.insert(key, data);
        }

        Ok(Self { entries })
    }

    /// check every entry holds the calibration invariants
    pub fn validate(&self) -> Result<(), ConfigErrors> {
        for (key, data) in self.entries.iter() {
            data.check()
                .map_err(|reason| ConfigErrors::InvalidCalibration {
                    key: key.clone(),
                    reason,
                })?;
        }

        debug!(entries = self.entries.len(), "Calibration table loaded");
        for (key, data) in self.entries.iter() {
            debug!("{key}: {data:?}");
        }

        Ok(())
    }

    pub fn get(&self, key: &RunGroupKey) -> Option<&CalibrationData> {
        self.entries.get(key)
    }
}
