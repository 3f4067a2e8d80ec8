use crate::{
    catalog::{ExecutorType, RunGroupKey, RunGroupKeyExtra},
    config::HarnessConfig,
    driver::RunPlan,
};
use itertools::Itertools;
use std::path::{Path, PathBuf};

pub const E2E_BENCHMARK_PACKAGE: &str = "aptos-move-e2e-benchmark";
pub const EXECUTOR_BENCHMARK_PACKAGE: &str = "aptos-executor-benchmark";

/// short runs generate all blocks upfront so generation does not skew the measurement
const GENERATE_THEN_EXECUTE_MAX_BLOCKS: usize = 200;

/// join command fragments with single spaces, empty fragments are dropped
fn join<S: AsRef<str>>(fragments: impl IntoIterator<Item = S>) -> String {
    fragments
        .into_iter()
        .filter_map(|fragment| {
            let fragment = fragment.as_ref().trim();
            (!fragment.is_empty()).then(|| fragment.to_string())
        })
        .join(" ")
}

/// engine flags selecting the block executor, sharded execution uses one shard per thread
pub fn executor_args(
    executor_type: ExecutorType,
    threads: usize,
    sharding_traffic_flags: Option<&str>,
) -> String {
    let block_executor = match executor_type {
        ExecutorType::Vm => "aptos-vm-with-block-stm",
        ExecutorType::NativeVm => "native-vm-with-block-stm",
        ExecutorType::NativeSpeculative => "native-loose-speculative",
        ExecutorType::NativeNoStorageSpeculative => "native-no-storage-loose-speculative",
        ExecutorType::Sharded => {
            return join([
                format!("--num-executor-shards {threads}"),
                sharding_traffic_flags.unwrap_or_default().to_string(),
            ]);
        }
    };

    format!("--block-executor-type {block_executor} --transactions-per-sender 1")
}

pub fn pipeline_args(extra: &RunGroupKeyExtra, num_blocks: usize) -> String {
    let mut args = Vec::new();

    if let Some(threads) = extra.sig_verify_num_threads_override {
        args.push(format!("--sig-verify-num-threads {threads}"));
    }

    if extra.split_stages_override {
        args.push("--split-stages".to_string());
    }

    if num_blocks < GENERATE_THEN_EXECUTE_MAX_BLOCKS {
        args.push("--generate-then-execute".to_string());
    }

    join(args)
}

/// an empty transaction type override leaves the workload to the executor flags
pub fn workload_args(key: &RunGroupKey, extra: &RunGroupKeyExtra) -> String {
    match extra.transaction_type_override.as_deref() {
        Some("") => String::new(),
        transaction_type => format!(
            "--transaction-type {} --transaction-weights {}",
            transaction_type.unwrap_or(&key.transaction_type),
            extra
                .transaction_weights_override
                .as_deref()
                .filter(|weights| !weights.is_empty())
                .unwrap_or("1")
        ),
    }
}

/// Builds the shell command lines handed to the executor. The engine keeps its database and
/// checkpoints below `work_dir`.
#[derive(Debug, Clone)]
pub struct CommandBuilder<'a> {
    config: &'a HarnessConfig,
    work_dir: PathBuf,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(config: &'a HarnessConfig, work_dir: &Path) -> Self {
        Self {
            config,
            work_dir: work_dir.to_path_buf(),
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.work_dir.join("db")
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.work_dir.join("cp")
    }

    fn binary(&self, package: &str) -> String {
        format!("RUST_BACKTRACE=1 {}/{package}", self.config.build.folder)
    }

    pub fn cargo_build(&self, package: &str) -> String {
        format!("cargo build {} --package {package}", self.config.build.flag)
    }

    pub fn e2e_benchmark(&self) -> String {
        self.binary(E2E_BENCHMARK_PACKAGE)
    }

    pub fn create_db(&self) -> String {
        let config = self.config;

        join([
            self.binary(EXECUTOR_BENCHMARK_PACKAGE),
            "--block-executor-type aptos-vm-with-block-stm".to_string(),
            format!("--block-size {}", config.max_block_size),
            format!("--execution-threads {}", config.number_of_execution_threads),
            config.db_config_flags.to_string(),
            config.db_pruner_flags.to_string(),
            "create-db".to_string(),
            config.feature_flags.to_string(),
            format!("--data-dir {}", self.data_dir().display()),
            format!("--num-accounts {}", config.num_accounts),
        ])
    }

    /// one benchmark invocation of `plan`, sweeps pass their own thread count and skip commit
    pub fn run_executor(
        &self,
        plan: &RunPlan,
        threads: usize,
        skip_commit: bool,
        blocks: usize,
    ) -> String {
        let config = self.config;

        join([
            self.binary(EXECUTOR_BENCHMARK_PACKAGE),
            format!("--execution-threads {threads}"),
            if skip_commit {
                "--skip-commit".to_string()
            } else {
                String::new()
            },
            plan.executor_args.clone(),
            plan.pipeline_args.clone(),
            format!("--block-size {}", plan.block_size),
            config.db_config_flags.to_string(),
            config.db_pruner_flags.to_string(),
            "run-executor".to_string(),
            config.feature_flags.to_string(),
            plan.workload_args.clone(),
            format!(
                "--module-working-set-size {}",
                plan.key.module_working_set_size
            ),
            format!("--main-signer-accounts {}", config.main_signer_accounts),
            format!(
                "--additional-dst-pool-accounts {}",
                config.additional_dst_pool_accounts
            ),
            format!("--data-dir {}", self.data_dir().display()),
            format!("--checkpoint-dir {}", self.checkpoint_dir().display()),
            format!("--blocks {blocks}"),
        ])
    }
}
