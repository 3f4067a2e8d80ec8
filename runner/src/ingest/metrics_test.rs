use super::{
    extract_create_db_results, extract_run_results, extract_stages, metrics::stage_prefix,
    IngestorError, RunResults,
};

/// engine output for one set of metrics, in the format the executor benchmark prints them
fn block(prefix: &str, tps: f64, storage_fee: f64) -> String {
    format!(
        "{prefix} TPS: {tps} txn/s
{prefix} GPS: 12345.5 gas/s
{prefix} effectiveGPS: 11000 gas/s
{prefix} ioGPS: 6000.25 gas/s
{prefix} executionGPS: 5000.75 gas/s
{prefix} GPT: 42.5 gas/txn
{prefix} Storage fee: {storage_fee} octas/txn
{prefix} output: 987654.3 bytes/s
{prefix} fraction of total: 0.11 in signature verification
{prefix} fraction of total: 0.55 in execution
{prefix} fraction of execution 0.8 in block executor
{prefix} fraction of execution 0.6 in inner block executor
{prefix} fraction of total: 0.2 in ledger update
{prefix} fraction of total: 0.14 in commit
"
    )
}

fn expected(tps: f64, storage_fee: f64) -> RunResults {
    RunResults {
        tps,
        gps: 12345.5,
        effective_gps: 11000.0,
        io_gps: 6000.25,
        execution_gps: 5000.75,
        gpt: 42.5,
        storage_fee_pt: storage_fee,
        output_bps: 987654.3,
        fraction_in_sig_verify: 0.11,
        fraction_in_execution: 0.55,
        fraction_of_execution_in_block_executor: 0.8,
        fraction_of_execution_in_inner_block_executor: 0.6,
        fraction_in_ledger_update: 0.2,
        fraction_in_commit: 0.14,
    }
}

#[test]
pub fn extracts_every_field() {
    let output = format!(
        "2024-01-01T00:00:00 INFO starting\n{}some trailing noise\n",
        block("Overall", 28769.8, 512.0)
    );

    assert_eq!(
        extract_run_results(&output, "Overall").unwrap(),
        expected(28769.8, 512.0)
    );
}

#[test]
pub fn storage_fee_may_be_negative() {
    let output = block("Overall", 100.0, -3.5);

    assert_eq!(
        extract_run_results(&output, "Overall").unwrap().storage_fee_pt,
        -3.5
    );
}

#[test]
pub fn prefixes_do_not_bleed_into_each_other() {
    let output = format!(
        "{}{}",
        block("Overall execution", 50000.0, 1.0),
        block("Overall", 20000.0, 2.0)
    );

    assert_eq!(
        extract_run_results(&output, "Overall").unwrap(),
        expected(20000.0, 2.0)
    );
    assert_eq!(
        extract_run_results(&output, "Overall execution").unwrap(),
        expected(50000.0, 1.0)
    );
}

#[test]
pub fn duplicated_single_valued_label_is_rejected() {
    let output = format!("{}Overall TPS: 1.5 txn/s\n", block("Overall", 100.0, 1.0));

    match extract_run_results(&output, "Overall") {
        Err(IngestorError::AmbiguousMetric { label, matches }) => {
            assert_eq!(label, "Overall TPS:");
            assert_eq!(matches, vec!["100".to_string(), "1.5".to_string()]);
        }
        other => panic!("expected an ambiguity error, got {other:?}"),
    }
}

#[test]
pub fn missing_single_valued_label_is_rejected() {
    let output = block("Overall", 100.0, 1.0).replace("Overall GPT: 42.5 gas/txn\n", "");

    assert!(matches!(
        extract_run_results(&output, "Overall"),
        Err(IngestorError::MissingMetric { label }) if label == "Overall GPT:"
    ));
}

#[test]
pub fn last_fraction_wins() {
    let output = format!(
        "Overall fraction of total: 0.9 in commit\n{}Overall fraction of total: 0.33 in commit\n",
        block("Overall", 100.0, 1.0)
    );

    assert_eq!(
        extract_run_results(&output, "Overall").unwrap().fraction_in_commit,
        0.33
    );
}

#[test]
pub fn missing_fraction_is_rejected() {
    let output = block("Overall", 100.0, 1.0)
        .replace("Overall fraction of total: 0.2 in ledger update\n", "");

    assert!(matches!(
        extract_run_results(&output, "Overall"),
        Err(IngestorError::MissingMetric { .. })
    ));
}

#[test]
pub fn block_executor_fraction_accepts_a_colon() {
    let output = block("Overall", 100.0, 1.0).replace(
        "fraction of execution 0.8 in block executor",
        "fraction of execution: 0.7 in block executor",
    );
    let results = extract_run_results(&output, "Overall").unwrap();

    assert_eq!(results.fraction_of_execution_in_block_executor, 0.7);
    assert_eq!(results.fraction_of_execution_in_inner_block_executor, 0.6);
}

#[test]
pub fn create_db_only_reports_throughput() {
    let output = "Overall TPS: create_db: account creation: 43210.5 txn/s\nOverall TPS: 1 txn/s\n";

    assert_eq!(
        extract_create_db_results(output).unwrap(),
        RunResults {
            tps: 43210.5,
            ..RunResults::default()
        }
    );
    assert!(matches!(
        extract_create_db_results("nothing here"),
        Err(IngestorError::MissingMetric { .. })
    ));
}

#[test]
pub fn stages_are_extracted_in_order() {
    let output = format!(
        "{}{}{}",
        block("Overall", 100.0, 1.0),
        block(&stage_prefix(0), 300.0, 1.0),
        block(&stage_prefix(1), 200.0, 1.0)
    );
    let stages = extract_stages(&output).unwrap();

    assert_eq!(
        stages.iter().map(|(stage, results)| (*stage, results.tps)).collect::<Vec<_>>(),
        vec![(0, 300.0), (1, 200.0)]
    );
}

#[test]
pub fn stage_scan_stops_at_first_gap() {
    let output = format!(
        "{}{}{}",
        block(&stage_prefix(0), 300.0, 1.0),
        block(&stage_prefix(1), 200.0, 1.0),
        block(&stage_prefix(3), 100.0, 1.0)
    );
    let stages = extract_stages(&output).unwrap();

    assert_eq!(stages.len(), 2);
    assert_eq!(stages[1].0, 1);
}

#[test]
pub fn no_stages_without_split_pipeline() {
    let output = format!(
        "{}{}",
        block("Overall", 100.0, 1.0),
        block(&stage_prefix(1), 200.0, 1.0)
    );

    assert!(extract_stages(&output).unwrap().is_empty());
}

#[test]
pub fn derived_phase_throughput_clamps_small_fractions() {
    let results = RunResults {
        tps: 1000.0,
        fraction_in_execution: 0.5,
        fraction_of_execution_in_block_executor: 0.25,
        ..RunResults::default()
    };

    assert_eq!(results.execution_tps(), 2000.0);
    assert_eq!(results.block_executor_tps(), 8000.0);
    // zero fraction is clamped to 0.001
    assert_eq!(results.commit_tps(), 1_000_000.0);
}
