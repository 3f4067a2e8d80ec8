use crate::{
    catalog::{Flow, RunGroupKey},
    criteria::NoiseLimits,
};
use clap::{builder::FalseyValueParser, Parser, ValueEnum};
use std::{fmt, path::PathBuf};
use thiserror::Error;
use tracing::{error, info};

/// bump after a perf improvement, so runs on top of that commit are easy to tell apart
pub const CODE_PERF_VERSION: &str = "v6";

/// execution thread counts used for the micro-profiling sweep when `DETAILED` is set
pub const DETAILED_EXECUTION_THREADS: [usize; 8] = [1, 2, 4, 8, 16, 32, 48, 60];

/// number of blocks each sweep invocation executes
pub const NUM_BLOCKS_DETAILED: usize = 10;

const DB_CONFIG_FLAGS: &str = "--enable-storage-sharding";
const FEATURE_FLAGS: &str = "--enable-feature NEW_ACCOUNTS_DEFAULT_TO_FA_APT_STORE --enable-feature OPERATIONS_DEFAULT_TO_FA_APT_STORE";
const DB_PRUNER_FLAGS: &str = "--enable-state-pruner --enable-ledger-pruner --enable-epoch-snapshot-pruner --ledger-pruning-batch-size 10000 --state-prune-window 3000000 --epoch-snapshot-prune-window 3000000 --ledger-prune-window 3000000";

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Calibration line {line} is malformed: {reason}")]
    MalformedCalibration { line: usize, reason: String },
    #[error("Calibration for {key} is invalid: {reason}")]
    InvalidCalibration { key: RunGroupKey, reason: String },
    #[error("{0} is selected but has neither an expected_tps nor a calibration entry")]
    Uncalibrated(RunGroupKey),
    #[error("Configuration failed preflight checks")]
    Preflight,
}

/// where the run was triggered from, forwarded verbatim into the structured records
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    #[value(name = "ADHOC")]
    Adhoc,
    #[value(name = "CI")]
    Ci,
    #[value(name = "LOCAL")]
    Local,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Adhoc => "ADHOC",
            Self::Ci => "CI",
            Self::Local => "LOCAL",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw knobs, every one of them settable through the environment.
///
/// Switches are on for any value except the empty string and `0`, `false`, `no`, `off`, `n`, `f`.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "perfgate",
    version,
    about = "Single node executor benchmark with calibrated regression thresholds"
)]
pub struct Args {
    /// flow selecting which run groups are executed
    #[arg(long, env = "FLOW", value_enum, default_value = "LAND_BLOCKING")]
    pub flow: Flow,

    #[arg(long, env = "SOURCE", value_enum, default_value = "LOCAL")]
    pub source: Source,

    #[arg(long, env = "RUNNER_NAME", default_value = "none")]
    pub runner_name: String,

    #[arg(long, env = "MAX_BLOCK_SIZE", default_value_t = 30000)]
    pub max_block_size: usize,

    #[arg(long = "num-blocks-per-test", env = "NUM_BLOCKS_PER_TEST", default_value_t = 15)]
    pub num_blocks: usize,

    /// requested number of warmup accounts, defaults depend on the flow
    #[arg(long, env = "NUM_INIT_ACCOUNTS")]
    pub num_init_accounts: Option<usize>,

    /// thread count used for the graded run
    #[arg(long, env = "NUMBER_OF_EXECUTION_THREADS", default_value_t = 32)]
    pub number_of_execution_threads: usize,

    /// additionally sweep execution-only runs over a fixed set of thread counts
    #[arg(long, env = "DETAILED", value_parser = FalseyValueParser::new())]
    pub detailed: bool,

    #[arg(long, env = "RELEASE_BUILD", value_parser = FalseyValueParser::new())]
    pub release_build: bool,

    #[arg(long, env = "PROD_DB_FLAGS", value_parser = FalseyValueParser::new())]
    pub prod_db_flags: bool,

    #[arg(long, env = "DISABLE_FA_APT", value_parser = FalseyValueParser::new())]
    pub disable_fa_apt: bool,

    #[arg(long, env = "ENABLE_PRUNER", value_parser = FalseyValueParser::new())]
    pub enable_pruner: bool,

    /// do not stream engine output, only print the final table
    #[arg(long, env = "HIDE_OUTPUT", value_parser = FalseyValueParser::new())]
    pub hide_output: bool,

    #[arg(long, env = "SKIP_MOVE_E2E", value_parser = FalseyValueParser::new())]
    pub skip_move_e2e: bool,

    /// directory cargo and the benchmark binaries are invoked from
    #[arg(long, env = "ENGINE_ROOT", default_value = ".")]
    pub engine_root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildProfile {
    pub flag: &'static str,
    pub folder: &'static str,
}

impl BuildProfile {
    pub fn new(release: bool) -> Self {
        if release {
            Self {
                flag: "--release",
                folder: "target/release",
            }
        } else {
            Self {
                flag: "--profile performance",
                folder: "target/performance",
            }
        }
    }
}

/// Immutable harness configuration, built once from `Args` and passed around by reference
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub flow: Flow,
    pub source: Source,
    pub runner_name: String,
    pub is_mainnet: bool,

    pub max_block_size: usize,
    pub num_blocks: usize,
    pub num_blocks_detailed: usize,
    pub num_accounts: usize,
    pub main_signer_accounts: usize,
    pub additional_dst_pool_accounts: usize,

    pub number_of_execution_threads: usize,
    pub execution_only_number_of_threads: Vec<usize>,

    pub noise: NoiseLimits,
    pub skip_perf_improvement_notice: bool,
    pub code_perf_version: &'static str,

    pub build: BuildProfile,
    pub db_config_flags: &'static str,
    pub feature_flags: &'static str,
    pub db_pruner_flags: &'static str,

    pub hide_output: bool,
    pub skip_move_e2e: bool,
    pub engine_root: PathBuf,
}

impl HarnessConfig {
    /// derive every process wide value and run the preflight checks
    pub fn from_args(args: Args) -> Result<Self, ConfigErrors> {
        let is_mainnet = matches!(args.flow, Flow::Mainnet | Flow::MainnetLargeDb);
        let default_accounts = if args.flow == Flow::MainnetLargeDb {
            100_000_000
        } else {
            2_000_000
        };
        let requested_accounts = args.num_init_accounts.unwrap_or(default_accounts);

        let config = Self {
            flow: args.flow,
            source: args.source,
            runner_name: args.runner_name,
            is_mainnet,

            max_block_size: args.max_block_size,
            num_blocks: args.num_blocks,
            num_blocks_detailed: NUM_BLOCKS_DETAILED,
            // the run needs fresh accounts for every block of the warmup and the tests
            num_accounts: requested_accounts
                .max((2 + 2 * args.num_blocks) * args.max_block_size),
            main_signer_accounts: 2 * args.max_block_size,
            additional_dst_pool_accounts: 2 * args.max_block_size * args.num_blocks,

            number_of_execution_threads: args.number_of_execution_threads,
            execution_only_number_of_threads: if args.detailed {
                DETAILED_EXECUTION_THREADS.to_vec()
            } else {
                Vec::new()
            },

            noise: NoiseLimits::new(is_mainnet),
            skip_perf_improvement_notice: is_mainnet,
            code_perf_version: CODE_PERF_VERSION,

            build: BuildProfile::new(args.release_build),
            db_config_flags: if args.prod_db_flags { "" } else { DB_CONFIG_FLAGS },
            feature_flags: if args.disable_fa_apt { "" } else { FEATURE_FLAGS },
            db_pruner_flags: if args.enable_pruner { DB_PRUNER_FLAGS } else { "" },

            hide_output: args.hide_output,
            skip_move_e2e: args.skip_move_e2e,
            engine_root: args.engine_root,
        };

        if config.preflight_checks() {
            Err(ConfigErrors::Preflight)
        } else {
            info!("Executing flow: {}", config.flow);

            Ok(config)
        }
    }

    /// check all values first and report every problem, returns true if any was found
    pub fn preflight_checks(&self) -> bool {
        let mut contains_error = false;

        if self.max_block_size == 0 {
            error!("MAX_BLOCK_SIZE must be positive, a block can't be empty");
            contains_error = true;
        }

        if self.num_blocks == 0 {
            error!("NUM_BLOCKS_PER_TEST must be positive, otherwise nothing is measured");
            contains_error = true;
        }

        if self.number_of_execution_threads == 0 {
            error!("NUMBER_OF_EXECUTION_THREADS must be positive");
            contains_error = true;
        }

        if !self.engine_root.is_dir() {
            error!(
                "ENGINE_ROOT {} is not a directory",
                self.engine_root.to_string_lossy()
            );
            contains_error = true;
        }

        contains_error
    }
}

/// config built from command line flags only, for tests of the other modules
#[cfg(test)]
pub(crate) fn test_config(extra: &[&str]) -> HarnessConfig {
    let mut argv = vec!["perfgate"];
    argv.extend_from_slice(extra);

    HarnessConfig::from_args(Args::try_parse_from(argv).expect("arguments should parse"))
        .expect("configuration should pass preflight")
}
