use crate::config::HarnessConfig;
use clap::ValueEnum;
use serde::Serialize;
use std::{fmt, ops::BitOr, str::FromStr};

/// Named execution contexts, each run group declares the set of flows it takes part in
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Flow {
    /// run on every PR
    #[value(name = "LAND_BLOCKING")]
    LandBlocking,
    /// run continuously on main
    #[value(name = "CONTINUOUS")]
    Continuous,
    /// smaller representative mode, i.e. for measuring the speed of a machine
    #[value(name = "REPRESENTATIVE")]
    Representative,
    /// mainnet hardware evaluation
    #[value(name = "MAINNET")]
    Mainnet,
    #[value(name = "MAINNET_LARGE_DB")]
    MainnetLargeDb,
    #[value(name = "AGG_V2")]
    AggV2,
    #[value(name = "RESOURCE_GROUPS")]
    ResourceGroups,
}

impl Flow {
    const fn bit(self) -> u8 {
        1 << (self as u8)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LandBlocking => "LAND_BLOCKING",
            Self::Continuous => "CONTINUOUS",
            Self::Representative => "REPRESENTATIVE",
            Self::Mainnet => "MAINNET",
            Self::MainnetLargeDb => "MAINNET_LARGE_DB",
            Self::AggV2 => "AGG_V2",
            Self::ResourceGroups => "RESOURCE_GROUPS",
        }
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of flows, membership is tested by intersection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlowSet(u8);

impl FlowSet {
    /// member of no flow, i.e. declared but never run
    pub const EMPTY: Self = Self(0);

    pub const fn only(flow: Flow) -> Self {
        Self(flow.bit())
    }

    pub const fn with(self, flow: Flow) -> Self {
        Self(self.0 | flow.bit())
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn contains(self, flow: Flow) -> bool {
        self.0 & flow.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl From<Flow> for FlowSet {
    fn from(flow: Flow) -> Self {
        Self::only(flow)
    }
}

impl BitOr for Flow {
    type Output = FlowSet;

    fn bitor(self, rhs: Self) -> FlowSet {
        FlowSet::only(self).with(rhs)
    }
}

impl BitOr<Flow> for FlowSet {
    type Output = FlowSet;

    fn bitor(self, rhs: Flow) -> FlowSet {
        self.with(rhs)
    }
}

impl BitOr for FlowSet {
    type Output = FlowSet;

    fn bitor(self, rhs: Self) -> FlowSet {
        self.union(rhs)
    }
}

impl BitOr<FlowSet> for Flow {
    type Output = FlowSet;

    fn bitor(self, rhs: FlowSet) -> FlowSet {
        rhs.with(self)
    }
}

/// Run on PRs and continuously on main
pub const LAND_BLOCKING_AND_C: FlowSet = FlowSet::only(Flow::LandBlocking).with(Flow::Continuous);

pub const DEFAULT_MODULE_WORKING_SET_SIZE: usize = 100;

/// Block executor variant the engine is asked to use
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ExecutorType {
    #[serde(rename = "VM")]
    Vm,
    #[serde(rename = "NativeVM")]
    NativeVm,
    #[serde(rename = "NativeSpeculative")]
    NativeSpeculative,
    #[serde(rename = "NativeNoStorageSpeculative")]
    NativeNoStorageSpeculative,
    #[serde(rename = "sharded")]
    Sharded,
}

impl ExecutorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vm => "VM",
            Self::NativeVm => "NativeVM",
            Self::NativeSpeculative => "NativeSpeculative",
            Self::NativeNoStorageSpeculative => "NativeNoStorageSpeculative",
            Self::Sharded => "sharded",
        }
    }
}

impl fmt::Display for ExecutorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutorType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "VM" => Ok(Self::Vm),
            "NativeVM" => Ok(Self::NativeVm),
            "NativeSpeculative" => Ok(Self::NativeSpeculative),
            "NativeNoStorageSpeculative" => Ok(Self::NativeNoStorageSpeculative),
            "sharded" => Ok(Self::Sharded),
            other => Err(format!("executor type not supported {other}")),
        }
    }
}

/// Identity of a run group, also the key into the calibration table
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RunGroupKey {
    pub transaction_type: String,
    pub module_working_set_size: usize,
    pub executor_type: ExecutorType,
}

impl RunGroupKey {
    pub fn new(transaction_type: impl Into<String>) -> Self {
        Self {
            transaction_type: transaction_type.into(),
            module_working_set_size: 1,
            executor_type: ExecutorType::Vm,
        }
    }

    pub fn with_module_working_set_size(mut self, size: usize) -> Self {
        self.module_working_set_size = size;
        self
    }

    pub fn with_executor(mut self, executor_type: ExecutorType) -> Self {
        self.executor_type = executor_type;
        self
    }

    /// key of the pseudo run group reported for one stage of a staged execution
    pub fn stage(&self, stage: usize) -> Self {
        Self {
            transaction_type: format!("{} [stage {stage}]", self.transaction_type),
            ..self.clone()
        }
    }
}

impl fmt::Display for RunGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RunGroupKey(transaction_type='{}', module_working_set_size={}, executor_type='{}')",
            self.transaction_type, self.module_working_set_size, self.executor_type
        )
    }
}

/// Optional overrides, `None` means the value is derived from the key or the global config
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunGroupKeyExtra {
    /// `Some("")` disables the workload arguments altogether
    pub transaction_type_override: Option<String>,
    pub transaction_weights_override: Option<String>,
    pub sharding_traffic_flags: Option<String>,
    pub sig_verify_num_threads_override: Option<usize>,
    pub execution_num_threads_override: Option<usize>,
    pub split_stages_override: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunGroupConfig {
    pub key: RunGroupKey,
    pub included_in: FlowSet,
    /// only for run groups that are not calibrated yet
    pub expected_tps: Option<f64>,
    pub key_extra: RunGroupKeyExtra,
    /// failures are reported as warnings
    pub waived: bool,
}

impl RunGroupConfig {
    pub fn new(key: RunGroupKey, included_in: impl Into<FlowSet>) -> Self {
        Self {
            key,
            included_in: included_in.into(),
            expected_tps: None,
            key_extra: RunGroupKeyExtra::default(),
            waived: false,
        }
    }

    pub fn expected(mut self, expected_tps: f64) -> Self {
        self.expected_tps = Some(expected_tps);
        self
    }

    pub fn extra(mut self, key_extra: RunGroupKeyExtra) -> Self {
        self.key_extra = key_extra;
        self
    }

    pub fn waived(mut self) -> Self {
        self.waived = true;
        self
    }

    pub fn is_selected(&self, flows: impl Into<FlowSet>) -> bool {
        self.included_in.intersects(flows.into())
    }
}

/// entries of the catalog selected for `flows`, in catalog order and with their catalog index
pub fn select(
    catalog: &[RunGroupConfig],
    flows: impl Into<FlowSet>,
) -> impl Iterator<Item = (usize, &RunGroupConfig)> {
    let flows = flows.into();

    catalog
        .iter()
        .enumerate()
        .filter(move |(_, config)| config.is_selected(flows))
}

fn by_stages(executor_type: ExecutorType, threads: usize) -> RunGroupConfig {
    RunGroupConfig::new(
        RunGroupKey::new("apt_fa_transfer_by_stages").with_executor(executor_type),
        LAND_BLOCKING_AND_C,
    )
    .extra(RunGroupKeyExtra {
        transaction_type_override: Some("apt-fa-transfer".to_string()),
        split_stages_override: true,
        sig_verify_num_threads_override: Some(threads),
        ..Default::default()
    })
}

fn sequential_by_stages(executor_type: ExecutorType) -> RunGroupConfig {
    RunGroupConfig::new(
        RunGroupKey::new("apt_fa_transfer_sequential_by_stages").with_executor(executor_type),
        LAND_BLOCKING_AND_C,
    )
    .extra(RunGroupKeyExtra {
        transaction_type_override: Some("apt-fa-transfer".to_string()),
        sig_verify_num_threads_override: Some(1),
        execution_num_threads_override: Some(1),
        split_stages_override: true,
        ..Default::default()
    })
}

fn sharded(name: &str, traffic: &str, expected_tps: f64, included_in: FlowSet) -> RunGroupConfig {
    RunGroupConfig::new(
        RunGroupKey::new(name).with_executor(ExecutorType::Sharded),
        included_in,
    )
    .expected(expected_tps)
    .extra(RunGroupKeyExtra {
        sharding_traffic_flags: Some(traffic.to_string()),
        transaction_type_override: Some(String::new()),
        ..Default::default()
    })
    .waived()
}

/// The ordered list of run groups. The report keeps this order.
///
/// When adding a new run group, add an estimated `expected` together with `waived`, and
/// replace both by a calibration entry after a day or two of runs.
pub fn catalog(config: &HarnessConfig) -> Vec<RunGroupConfig> {
    use ExecutorType::*;

    let threads = config.number_of_execution_threads;
    let large = DEFAULT_MODULE_WORKING_SET_SIZE;

    vec![
        RunGroupConfig::new(
            RunGroupKey::new("apt-fa-transfer"),
            LAND_BLOCKING_AND_C | Flow::Representative | Flow::Mainnet,
        ),
        by_stages(Vm, threads),
        by_stages(NativeVm, threads),
        by_stages(NativeSpeculative, threads),
        by_stages(NativeNoStorageSpeculative, threads),
        sequential_by_stages(Vm),
        sequential_by_stages(NativeVm),
        sequential_by_stages(NativeSpeculative),
        sequential_by_stages(NativeNoStorageSpeculative),
        RunGroupConfig::new(
            RunGroupKey::new("modify-global-resource-agg-v2"),
            Flow::AggV2,
        ),
        RunGroupConfig::new(
            RunGroupKey::new("modify-global-resource-agg-v2").with_module_working_set_size(large),
            Flow::AggV2,
        )
        .expected(10000.0)
        .waived(),
        RunGroupConfig::new(RunGroupKey::new("modify-global-flag-agg-v2"), Flow::AggV2),
        RunGroupConfig::new(
            RunGroupKey::new("modify-global-bounded-agg-v2"),
            Flow::AggV2,
        ),
        RunGroupConfig::new(
            RunGroupKey::new("modify-global-milestone-agg-v2"),
            Flow::AggV2,
        ),
        RunGroupConfig::new(
            RunGroupKey::new("resource-groups-global-write-tag1-kb"),
            Flow::ResourceGroups,
        ),
        RunGroupConfig::new(
            RunGroupKey::new("resource-groups-global-write-tag1-kb")
                .with_module_working_set_size(large),
            Flow::ResourceGroups,
        )
        .expected(8000.0)
        .waived(),
        RunGroupConfig::new(
            RunGroupKey::new("resource-groups-sender-write-tag1-kb"),
            Flow::ResourceGroups,
        ),
        RunGroupConfig::new(
            RunGroupKey::new("resource-groups-sender-multi-change1-kb"),
            Flow::ResourceGroups,
        ),
        RunGroupConfig::new(RunGroupKey::new("vector-picture40"), FlowSet::EMPTY)
            .expected(100.0)
            .waived(),
        sharded(
            "coin_transfer_connected_components",
            "--connected-tx-grps 5000",
            50000.0,
            Flow::Representative.into(),
        ),
        sharded(
            "coin_transfer_hotspot",
            "--hotspot-probability 0.8",
            50000.0,
            Flow::Representative.into(),
        ),
        // set separately for previewnet, as it runs on a different number of cores
        RunGroupConfig::new(RunGroupKey::new("apt-fa-transfer"), Flow::MainnetLargeDb)
            .expected(20000.0),
        RunGroupConfig::new(RunGroupKey::new("account-generation"), Flow::MainnetLargeDb)
            .expected(15000.0),
        RunGroupConfig::new(RunGroupKey::new("publish-package"), Flow::MainnetLargeDb)
            .expected(60.0),
        RunGroupConfig::new(
            RunGroupKey::new("token-v2-ambassador-mint"),
            Flow::MainnetLargeDb,
        )
        .expected(6800.0),
    ]
}
