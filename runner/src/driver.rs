use crate::{
    calibration::CalibrationStore,
    catalog::{Flow, RunGroupConfig, RunGroupKey},
    command::{
        executor_args, pipeline_args, workload_args, CommandBuilder, E2E_BENCHMARK_PACKAGE,
        EXECUTOR_BENCHMARK_PACKAGE,
    },
    config::{ConfigErrors, HarnessConfig},
    criteria::Criteria,
    executors::{Executor, ExecutorError},
    ingest::{
        extract_create_db_results, extract_run_results, extract_stages, IngestorError,
        RunResults,
    },
    report::RunGroupInstance,
};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// metrics prefix of the graded run
pub const AUTHORITATIVE_PREFIX: &str = "Overall";
/// metrics prefix of the execution only sweep runs
pub const SWEEP_PREFIX: &str = "Overall execution";

#[derive(Error, Debug)]
pub enum DriverError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error(transparent)]
    Ingest(#[from] IngestorError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error("Move E2E benchmark failed, exiting")]
    E2eBenchmark(#[source] ExecutorError),
    #[error("Failed to serialize the run record")]
    Record(#[from] serde_json::Error),
    #[error("Failed to create the temporary working directory")]
    WorkDir(#[source] std::io::Error),
}

/// Values resolved for one configuration before anything is executed
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    pub key: RunGroupKey,
    pub criteria: Criteria,
    pub block_size: usize,
    pub execution_threads: usize,
    pub executor_args: String,
    pub pipeline_args: String,
    pub workload_args: String,
}

impl RunPlan {
    pub fn resolve(
        config: &RunGroupConfig,
        harness: &HarnessConfig,
        store: &CalibrationStore,
    ) -> Result<Self, ConfigErrors> {
        let criteria = Criteria::resolve(config, store, &harness.noise)?;
        let extra = &config.key_extra;
        let execution_threads = extra
            .execution_num_threads_override
            .unwrap_or(harness.number_of_execution_threads);

        Ok(Self {
            key: config.key.clone(),
            block_size: criteria.block_size(harness.max_block_size),
            criteria,
            execution_threads,
            executor_args: executor_args(
                config.key.executor_type,
                execution_threads,
                extra.sharding_traffic_flags.as_deref(),
            ),
            pipeline_args: pipeline_args(extra, harness.num_blocks),
            workload_args: workload_args(&config.key, extra),
        })
    }
}

/// Everything one configuration produced
#[derive(Debug, Clone)]
pub struct GroupOutcome {
    pub plan: RunPlan,
    /// result of the authoritative run, the one that is graded
    pub result: RunResults,
    /// the configuration row followed by one row per stage
    pub instances: Vec<RunGroupInstance>,
}

/// Issues the engine invocations strictly one after another, the engine owns the shared
/// database directory for the duration of each of them
pub struct Driver<'a, E: Executor> {
    executor: E,
    config: &'a HarnessConfig,
    store: &'a CalibrationStore,
    commands: CommandBuilder<'a>,
}

impl<'a, E: Executor> Driver<'a, E> {
    pub fn new(
        executor: E,
        config: &'a HarnessConfig,
        store: &'a CalibrationStore,
        commands: CommandBuilder<'a>,
    ) -> Self {
        Self {
            executor,
            config,
            store,
            commands,
        }
    }

    /// Run the end to end validity benchmark and build the executor benchmark.
    ///
    /// Returns whether the validity benchmark failed without aborting, which has to fail the
    /// invocation once every configuration ran.
    pub fn prepare(&mut self) -> Result<bool, DriverError> {
        let mut e2e_failed = false;

        if !self.config.skip_move_e2e {
            self.executor
                .execute(&self.commands.cargo_build(E2E_BENCHMARK_PACKAGE))?;

            if let Err(error) = self.executor.execute(&self.commands.e2e_benchmark()) {
                // fail fast on PRs, elsewhere run everything and fail at the end
                if self.config.flow == Flow::LandBlocking {
                    error!("Move E2E benchmark failed, exiting");
                    return Err(DriverError::E2eBenchmark(error));
                }

                warn!(error = %error, "Move E2E benchmark failed, continuing with the run groups");
                e2e_failed = true;
            }
        }

        self.executor
            .execute(&self.commands.cargo_build(EXECUTOR_BENCHMARK_PACKAGE))?;

        Ok(e2e_failed)
    }

    /// populate the database, reported as the synthetic `warmup` row
    pub fn warmup(&mut self) -> Result<RunGroupInstance, DriverError> {
        info!(
            "Warmup - creating DB with {} accounts",
            self.config.num_accounts
        );
        let output = self.executor.execute(&self.commands.create_db())?;

        Ok(RunGroupInstance {
            key: RunGroupKey::new("warmup"),
            single_node_result: extract_create_db_results(&output.stdout)?,
            number_of_threads_results: BTreeMap::new(),
            block_size: self.config.max_block_size,
            expected_tps: 0.0,
        })
    }

    #[instrument(skip_all, fields(index = index, key = %config.key))]
    pub fn run_group(
        &mut self,
        index: usize,
        config: &RunGroupConfig,
    ) -> Result<GroupOutcome, DriverError> {
        let harness = self.config;
        let plan = RunPlan::resolve(config, harness, self.store)?;
        info!("Testing {}", config.key);

        let mut number_of_threads_results = BTreeMap::new();
        for &threads in &harness.execution_only_number_of_threads {
            let command =
                self.commands
                    .run_executor(&plan, threads, true, harness.num_blocks_detailed);
            let output = self.executor.execute(&command)?;

            number_of_threads_results.insert(
                threads,
                extract_run_results(&output.stdout, SWEEP_PREFIX)?,
            );
        }

        let command = self.commands.run_executor(
            &plan,
            plan.execution_threads,
            false,
            harness.num_blocks,
        );
        let output = self.executor.execute(&command)?;

        let result = extract_run_results(&output.stdout, AUTHORITATIVE_PREFIX)?;
        let stages = extract_stages(&output.stdout)?;
        debug!(
            tps = result.tps,
            stages = stages.len(),
            "Authoritative run finished in {} ms",
            output.runtime.as_millis()
        );

        let mut instances = vec![RunGroupInstance::new(
            config.key.clone(),
            result,
            number_of_threads_results.clone(),
            &plan,
        )];
        instances.extend(stages.into_iter().map(|(stage, stage_result)| {
            RunGroupInstance::new(
                config.key.stage(stage),
                stage_result,
                number_of_threads_results.clone(),
                &plan,
            )
        }));

        Ok(GroupOutcome {
            plan,
            result,
            instances,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::{catalog, ExecutorType, RunGroupKeyExtra},
        config::test_config,
        ingest::{metrics::stage_prefix, RunOutput},
    };
    use std::{cell::RefCell, path::Path, rc::Rc};

    fn block(prefix: &str, tps: f64) -> String {
        format!(
            "{prefix} TPS: {tps} txn/s
{prefix} GPS: 100 gas/s
{prefix} effectiveGPS: 90 gas/s
{prefix} ioGPS: 50 gas/s
{prefix} executionGPS: 40 gas/s
{prefix} GPT: 10 gas/txn
{prefix} Storage fee: 2 octas/txn
{prefix} output: 1000 bytes/s
{prefix} fraction of total: 0.1 in signature verification
{prefix} fraction of total: 0.5 in execution
{prefix} fraction of execution 0.8 in block executor
{prefix} fraction of execution 0.7 in inner block executor
{prefix} fraction of total: 0.2 in ledger update
{prefix} fraction of total: 0.2 in commit
"
        )
    }

    type Script = Box<dyn FnMut(&str) -> Result<String, ExecutorError>>;

    /// answers every command with canned engine output and remembers what it was asked
    struct Scripted {
        script: Script,
        commands: Rc<RefCell<Vec<String>>>,
    }

    impl Executor for Scripted {
        fn execute(&mut self, command: &str) -> Result<RunOutput, ExecutorError> {
            self.commands.borrow_mut().push(command.to_string());

            (self.script)(command).map(|stdout| RunOutput {
                stdout,
                ..RunOutput::default()
            })
        }
    }

    fn scripted(script: Script) -> (Scripted, Rc<RefCell<Vec<String>>>) {
        let commands = Rc::new(RefCell::new(Vec::new()));

        (
            Scripted {
                script,
                commands: commands.clone(),
            },
            commands,
        )
    }

    fn engine(command: &str) -> Result<String, ExecutorError> {
        if command.contains("create-db") {
            Ok("Overall TPS: create_db: account creation: 5000 txn/s\n".to_string())
        } else if command.contains("--skip-commit") {
            let threads = command
                .split("--execution-threads ")
                .nth(1)
                .and_then(|rest| rest.split(' ').next())
                .unwrap();
            Ok(block(SWEEP_PREFIX, threads.parse::<f64>().unwrap() * 100.0))
        } else if command.contains("--split-stages") {
            Ok(format!(
                "{}{}{}",
                block(AUTHORITATIVE_PREFIX, 9000.0),
                block(&stage_prefix(0), 7000.0),
                block(&stage_prefix(1), 8000.0)
            ))
        } else if command.contains("run-executor") {
            Ok(block(AUTHORITATIVE_PREFIX, 9000.0))
        } else {
            Ok(String::new())
        }
    }

    fn failure(command: &str) -> ExecutorError {
        ExecutorError::NonZeroExit {
            command: command.to_string(),
            code: 1,
            output: String::new(),
        }
    }

    /// the e2e benchmark builds fine but its run fails
    fn failing_e2e(command: &str) -> Result<String, ExecutorError> {
        if !command.starts_with("cargo build") && command.ends_with(E2E_BENCHMARK_PACKAGE) {
            Err(failure(command))
        } else {
            engine(command)
        }
    }

    #[test]
    fn every_catalog_entry_resolves_against_the_builtin_table() {
        let config = test_config(&[]);
        let store = CalibrationStore::builtin().unwrap();

        for entry in catalog(&config) {
            let plan = RunPlan::resolve(&entry, &config, &store).unwrap();

            assert!(plan.block_size > 0);
            assert!(plan.block_size <= config.max_block_size);
        }
    }

    #[test]
    fn plan_applies_thread_overrides() {
        let config = test_config(&[]);
        let store = CalibrationStore::default();
        let entry = RunGroupConfig::new(
            RunGroupKey::new("coin_transfer_hotspot").with_executor(ExecutorType::Sharded),
            Flow::Representative,
        )
        .expected(50000.0)
        .extra(RunGroupKeyExtra {
            execution_num_threads_override: Some(8),
            sharding_traffic_flags: Some("--hotspot-probability 0.8".to_string()),
            transaction_type_override: Some(String::new()),
            ..Default::default()
        });

        let plan = RunPlan::resolve(&entry, &config, &store).unwrap();

        assert_eq!(plan.execution_threads, 8);
        assert_eq!(plan.block_size, 30000);
        assert_eq!(
            plan.executor_args,
            "--num-executor-shards 8 --hotspot-probability 0.8"
        );
        assert_eq!(plan.workload_args, "");
    }

    #[test]
    fn prepare_skips_e2e_when_requested() {
        let config = test_config(&["--skip-move-e2e"]);
        let store = CalibrationStore::default();
        let (executor, commands) = scripted(Box::new(engine));
        let mut driver = Driver::new(
            executor,
            &config,
            &store,
            CommandBuilder::new(&config, Path::new("/w")),
        );

        assert!(!driver.prepare().unwrap());
        assert_eq!(
            *commands.borrow(),
            vec!["cargo build --profile performance --package aptos-executor-benchmark"]
        );
    }

    #[test]
    fn e2e_failure_aborts_land_blocking() {
        let config = test_config(&["--flow", "LAND_BLOCKING"]);
        let store = CalibrationStore::default();
        let (executor, commands) = scripted(Box::new(failing_e2e));
        let mut driver = Driver::new(
            executor,
            &config,
            &store,
            CommandBuilder::new(&config, Path::new("/w")),
        );

        assert!(matches!(
            driver.prepare(),
            Err(DriverError::E2eBenchmark(_))
        ));
        // the executor benchmark is never built
        assert_eq!(
            *commands.borrow(),
            vec![
                "cargo build --profile performance --package aptos-move-e2e-benchmark",
                "RUST_BACKTRACE=1 target/performance/aptos-move-e2e-benchmark",
            ]
        );
    }

    #[test]
    fn e2e_failure_is_deferred_elsewhere() {
        let config = test_config(&["--flow", "CONTINUOUS"]);
        let store = CalibrationStore::default();
        let (executor, commands) = scripted(Box::new(failing_e2e));
        let mut driver = Driver::new(
            executor,
            &config,
            &store,
            CommandBuilder::new(&config, Path::new("/w")),
        );

        assert!(driver.prepare().unwrap());
        assert_eq!(commands.borrow().len(), 3);
        assert_eq!(
            commands.borrow()[2],
            "cargo build --profile performance --package aptos-executor-benchmark"
        );
    }

    #[test]
    fn build_failure_is_fatal_everywhere() {
        let config = test_config(&["--flow", "CONTINUOUS", "--skip-move-e2e"]);
        let store = CalibrationStore::default();
        let (executor, _) = scripted(Box::new(
            |command: &str| -> Result<String, ExecutorError> { Err(failure(command)) },
        ));
        let mut driver = Driver::new(
            executor,
            &config,
            &store,
            CommandBuilder::new(&config, Path::new("/w")),
        );

        assert!(matches!(
            driver.prepare(),
            Err(DriverError::Executor(ExecutorError::NonZeroExit { .. }))
        ));
    }

    #[test]
    fn warmup_reports_account_creation() {
        let config = test_config(&[]);
        let store = CalibrationStore::default();
        let (executor, _) = scripted(Box::new(engine));
        let mut driver = Driver::new(
            executor,
            &config,
            &store,
            CommandBuilder::new(&config, Path::new("/w")),
        );

        let warmup = driver.warmup().unwrap();

        assert_eq!(warmup.key, RunGroupKey::new("warmup"));
        assert_eq!(warmup.single_node_result.tps, 5000.0);
        assert_eq!(warmup.single_node_result.gps, 0.0);
        assert_eq!(warmup.block_size, 30000);
        assert_eq!(warmup.expected_tps, 0.0);
        assert!(warmup.number_of_threads_results.is_empty());
    }

    #[test]
    fn run_group_sweeps_then_grades() {
        let config = test_config(&["--detailed"]);
        let store = CalibrationStore::default();
        let (executor, commands) = scripted(Box::new(engine));
        let mut driver = Driver::new(
            executor,
            &config,
            &store,
            CommandBuilder::new(&config, Path::new("/w")),
        );
        let entry = RunGroupConfig::new(RunGroupKey::new("no-op"), Flow::LandBlocking)
            .expected(12000.0);

        let outcome = driver.run_group(3, &entry).unwrap();

        let commands = commands.borrow();
        assert_eq!(commands.len(), 9);
        assert!(commands[..8].iter().all(|command| command.contains("--skip-commit")));
        assert!(commands[..8].iter().all(|command| command.ends_with("--blocks 10")));
        assert!(commands[8].contains("--execution-threads 32 --block-executor-type"));
        assert!(commands[8].ends_with("--blocks 15"));

        assert_eq!(outcome.result.tps, 9000.0);
        assert_eq!(outcome.plan.block_size, 12000);
        assert_eq!(outcome.instances.len(), 1);

        let sweep = &outcome.instances[0].number_of_threads_results;
        assert_eq!(sweep.keys().copied().collect::<Vec<_>>(), vec![1, 2, 4, 8, 16, 32, 48, 60]);
        assert_eq!(sweep[&4].tps, 400.0);
    }

    #[test]
    fn staged_output_adds_stage_rows() {
        let config = test_config(&[]);
        let store = CalibrationStore::builtin().unwrap();
        let (executor, commands) = scripted(Box::new(engine));
        let mut driver = Driver::new(
            executor,
            &config,
            &store,
            CommandBuilder::new(&config, Path::new("/w")),
        );
        let entry = catalog(&config)
            .into_iter()
            .find(|entry| entry.key.transaction_type == "apt_fa_transfer_by_stages")
            .unwrap();

        let outcome = driver.run_group(1, &entry).unwrap();

        assert_eq!(commands.borrow().len(), 1);
        assert_eq!(
            outcome
                .instances
                .iter()
                .map(|instance| (instance.key.transaction_type.as_str(), instance.single_node_result.tps))
                .collect::<Vec<_>>(),
            vec![
                ("apt_fa_transfer_by_stages", 9000.0),
                ("apt_fa_transfer_by_stages [stage 0]", 7000.0),
                ("apt_fa_transfer_by_stages [stage 1]", 8000.0),
            ]
        );
        assert!(outcome
            .instances
            .iter()
            .all(|instance| instance.expected_tps == 30000.0 && instance.block_size == 30000));
    }

    #[test]
    fn uncalibrated_entry_fails_before_running() {
        let config = test_config(&[]);
        let store = CalibrationStore::default();
        let (executor, commands) = scripted(Box::new(engine));
        let mut driver = Driver::new(
            executor,
            &config,
            &store,
            CommandBuilder::new(&config, Path::new("/w")),
        );
        let entry = RunGroupConfig::new(RunGroupKey::new("unknown"), Flow::LandBlocking);

        assert!(matches!(
            driver.run_group(0, &entry),
            Err(DriverError::Config(ConfigErrors::Uncalibrated(_)))
        ));
        assert!(commands.borrow().is_empty());
    }

    #[test]
    fn ambiguous_output_is_fatal() {
        let config = test_config(&[]);
        let store = CalibrationStore::default();
        let (executor, _) = scripted(Box::new(|_: &str| -> Result<String, ExecutorError> {
            Ok(format!(
                "{}{}",
                block(AUTHORITATIVE_PREFIX, 1.0),
                block(AUTHORITATIVE_PREFIX, 2.0)
            ))
        }));
        let mut driver = Driver::new(
            executor,
            &config,
            &store,
            CommandBuilder::new(&config, Path::new("/w")),
        );
        let entry =
            RunGroupConfig::new(RunGroupKey::new("no-op"), Flow::LandBlocking).expected(100.0);

        assert!(matches!(
            driver.run_group(0, &entry),
            Err(DriverError::Ingest(IngestorError::AmbiguousMetric { .. }))
        ));
    }
}
