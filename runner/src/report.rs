use crate::{
    catalog::{ExecutorType, RunGroupConfig, RunGroupKey},
    config::HarnessConfig,
    driver::RunPlan,
    ingest::RunResults,
};
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use serde::Serialize;
use std::collections::BTreeMap;

/// marker the log sink filters the records on
pub const RECORD_GREP: &str = "grep_json_single_node_perf";

/// One reported row: a configuration, or one stage of it
#[derive(Debug, Clone, PartialEq)]
pub struct RunGroupInstance {
    pub key: RunGroupKey,
    pub single_node_result: RunResults,
    /// execution only sweep results by thread count, empty if no sweep ran
    pub number_of_threads_results: BTreeMap<usize, RunResults>,
    pub block_size: usize,
    pub expected_tps: f64,
}

impl RunGroupInstance {
    pub fn new(
        key: RunGroupKey,
        single_node_result: RunResults,
        number_of_threads_results: BTreeMap<usize, RunResults>,
        plan: &RunPlan,
    ) -> Self {
        Self {
            key,
            single_node_result,
            number_of_threads_results,
            block_size: plan.block_size,
            expected_tps: plan.criteria.expected_tps,
        }
    }
}

type Column = (&'static str, fn(&RunGroupInstance) -> String);

fn whole(value: f64) -> String {
    format!("{value:.0}")
}

fn fraction(value: f64) -> String {
    format!("{value:.3}")
}

fn rate(value: f64) -> String {
    format!("{value:.1}")
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS);

    table
}

fn key_cells(instance: &RunGroupInstance) -> Vec<String> {
    vec![
        instance.key.transaction_type.clone(),
        instance.key.module_working_set_size.to_string(),
        instance.key.executor_type.to_string(),
    ]
}

const KEY_HEADERS: [&str; 3] = ["transaction_type", "module_working_set", "executor"];

const THROUGHPUT_COLUMNS: [Column; 3] = [
    ("block_size", |r| r.block_size.to_string()),
    ("expected t/s", |r| r.expected_tps.to_string()),
    ("t/s", |r| whole(r.single_node_result.tps)),
];

const GAS_COLUMNS: [Column; 3] = [
    ("g/s", |r| whole(r.single_node_result.gps)),
    ("gas/txn", |r| whole(r.single_node_result.gpt)),
    ("storage fee/txn", |r| whole(r.single_node_result.storage_fee_pt)),
];

const FRACTION_COLUMNS: [Column; 5] = [
    ("sigver/total", |r| fraction(r.single_node_result.fraction_in_sig_verify)),
    ("exe/total", |r| fraction(r.single_node_result.fraction_in_execution)),
    ("block_exe/exe", |r| {
        fraction(r.single_node_result.fraction_of_execution_in_block_executor)
    }),
    ("ledger/total", |r| fraction(r.single_node_result.fraction_in_ledger_update)),
    ("commit/total", |r| fraction(r.single_node_result.fraction_in_commit)),
];

const PHASE_COLUMNS: [Column; 6] = [
    ("sigver tps", |r| rate(r.single_node_result.sig_verify_tps())),
    ("exe tps", |r| rate(r.single_node_result.execution_tps())),
    ("block exe tps", |r| rate(r.single_node_result.block_executor_tps())),
    ("inner block exe tps", |r| rate(r.single_node_result.inner_block_executor_tps())),
    ("ledger tps", |r| rate(r.single_node_result.ledger_update_tps())),
    ("commit tps", |r| rate(r.single_node_result.commit_tps())),
];

const FULL_COLUMNS: [Column; 14] = [
    ("block_size", |r| r.block_size.to_string()),
    ("expected t/s", |r| r.expected_tps.to_string()),
    ("t/s", |r| whole(r.single_node_result.tps)),
    ("sigver/total", |r| fraction(r.single_node_result.fraction_in_sig_verify)),
    ("exe/total", |r| fraction(r.single_node_result.fraction_in_execution)),
    ("block_exe/exe", |r| {
        fraction(r.single_node_result.fraction_of_execution_in_block_executor)
    }),
    ("commit/total", |r| fraction(r.single_node_result.fraction_in_commit)),
    ("g/s", |r| whole(r.single_node_result.gps)),
    ("eff g/s", |r| whole(r.single_node_result.effective_gps)),
    ("io g/s", |r| whole(r.single_node_result.io_gps)),
    ("exe g/s", |r| whole(r.single_node_result.execution_gps)),
    ("g/t", |r| whole(r.single_node_result.gpt)),
    ("fee/t", |r| whole(r.single_node_result.storage_fee_pt)),
    ("out B/s", |r| whole(r.single_node_result.output_bps)),
];

/// Owns every reported row of the invocation, in the order they were produced
#[derive(Debug, Clone)]
pub struct Reporter {
    instances: Vec<RunGroupInstance>,
    sweep_threads: Vec<usize>,
}

impl Reporter {
    pub fn new(warmup: RunGroupInstance, sweep_threads: Vec<usize>) -> Self {
        Self {
            instances: vec![warmup],
            sweep_threads,
        }
    }

    pub fn push_group(&mut self, instances: impl IntoIterator<Item = RunGroupInstance>) {
        self.instances.extend(instances);
    }

    fn without_warmup(&self) -> &[RunGroupInstance] {
        self.instances.get(1..).unwrap_or(&[])
    }

    /// table with one execution only throughput column per swept thread count
    fn sweep_table(&self, rows: &[RunGroupInstance], columns: &[Column]) -> Table {
        let mut table = new_table();

        let mut header = KEY_HEADERS.map(String::from).to_vec();
        header.extend(
            self.sweep_threads
                .iter()
                .map(|threads| format!("exe_only {threads}")),
        );
        header.extend(columns.iter().map(|(name, _)| name.to_string()));
        table.set_header(header);

        for instance in rows {
            let mut row = key_cells(instance);
            row.extend(self.sweep_threads.iter().map(|threads| {
                instance
                    .number_of_threads_results
                    .get(threads)
                    .map(|results| whole(results.tps))
                    .unwrap_or_else(|| "-".to_string())
            }));
            row.extend(columns.iter().map(|(_, value)| value(instance)));
            table.add_row(row);
        }

        table
    }

    pub fn throughput_table(&self) -> Table {
        self.sweep_table(&self.instances, &THROUGHPUT_COLUMNS)
    }

    pub fn gas_table(&self) -> Table {
        self.sweep_table(self.without_warmup(), &GAS_COLUMNS)
    }

    pub fn fraction_table(&self) -> Table {
        self.sweep_table(self.without_warmup(), &FRACTION_COLUMNS)
    }

    pub fn phase_throughput_table(&self) -> Table {
        self.sweep_table(self.without_warmup(), &PHASE_COLUMNS)
    }

    /// every raw metric of every row, without sweep columns
    pub fn full_table(&self) -> Table {
        let mut table = new_table();

        let mut header = KEY_HEADERS.map(String::from).to_vec();
        header.extend(FULL_COLUMNS.iter().map(|(name, _)| name.to_string()));
        table.set_header(header);

        for instance in &self.instances {
            let mut row = key_cells(instance);
            row.extend(FULL_COLUMNS.iter().map(|(_, value)| value(instance)));
            table.add_row(row);
        }

        table
    }

    pub fn print_views(&self) {
        println!("{}", self.throughput_table());
        println!("{}", self.gas_table());
        println!("{}", self.fraction_table());
        println!("{}", self.phase_throughput_table());
        println!("{}", self.full_table());
    }

    pub fn print_full_table(&self) {
        println!("{}", self.full_table());
    }
}

/// Flat record of one configuration for the external log sink, printed as one JSON line
#[derive(Debug, Clone, Serialize)]
pub struct PerfRecord<'a> {
    pub grep: &'static str,
    pub source: &'static str,
    pub runner_name: &'a str,
    pub transaction_type: &'a str,
    pub module_working_set_size: usize,
    pub executor_type: ExecutorType,
    pub block_size: usize,
    pub execution_threads: usize,
    pub warmup_num_accounts: usize,
    pub expected_tps: f64,
    pub expected_min_tps: f64,
    pub expected_max_tps: f64,
    pub waived: bool,
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
    pub sig_verify_tps: f64,
    pub execution_tps: f64,
    pub block_executor_tps: f64,
    pub inner_block_executor_tps: f64,
    pub ledger_update_tps: f64,
    pub commit_tps: f64,
    pub code_perf_version: &'static str,
    pub flow: String,
    pub test_index: usize,
}

impl<'a> PerfRecord<'a> {
    pub fn new(
        test_index: usize,
        config: &'a RunGroupConfig,
        plan: &RunPlan,
        result: &RunResults,
        harness: &'a HarnessConfig,
    ) -> Self {
        Self {
            grep: RECORD_GREP,
            source: harness.source.as_str(),
            runner_name: &harness.runner_name,
            transaction_type: &config.key.transaction_type,
            module_working_set_size: config.key.module_working_set_size,
            executor_type: config.key.executor_type,
            block_size: plan.block_size,
            execution_threads: plan.execution_threads,
            warmup_num_accounts: harness.num_accounts,
            expected_tps: plan.criteria.expected_tps,
            expected_min_tps: plan.criteria.min_tps,
            expected_max_tps: plan.criteria.max_tps,
            waived: config.waived,
            tps: result.tps,
            gps: result.gps,
            effective_gps: result.effective_gps,
            io_gps: result.io_gps,
            execution_gps: result.execution_gps,
            gpt: result.gpt,
            storage_fee_pt: result.storage_fee_pt,
            output_bps: result.output_bps,
            fraction_in_sig_verify: result.fraction_in_sig_verify,
            fraction_in_execution: result.fraction_in_execution,
            fraction_of_execution_in_block_executor: result
                .fraction_of_execution_in_block_executor,
            fraction_of_execution_in_inner_block_executor: result
                .fraction_of_execution_in_inner_block_executor,
            fraction_in_ledger_update: result.fraction_in_ledger_update,
            fraction_in_commit: result.fraction_in_commit,
            sig_verify_tps: result.sig_verify_tps(),
            execution_tps: result.execution_tps(),
            block_executor_tps: result.block_executor_tps(),
            inner_block_executor_tps: result.inner_block_executor_tps(),
            ledger_update_tps: result.ledger_update_tps(),
            commit_tps: result.commit_tps(),
            code_perf_version: harness.code_perf_version,
            flow: format!("Flow.{}", harness.flow),
            test_index,
        }
    }

    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
