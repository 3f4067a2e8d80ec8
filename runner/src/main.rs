mod calibration;
mod catalog;
mod command;
mod config;
mod criteria;
mod driver;
mod executors;
mod ingest;
mod report;
mod verdict;

use crate::{
    calibration::CalibrationStore,
    catalog::{catalog, select},
    command::CommandBuilder,
    config::{Args, HarnessConfig},
    driver::{Driver, DriverError},
    executors::local::LocalExecutor,
    report::{PerfRecord, Reporter},
    verdict::Verdicts,
};
use clap::Parser;
use std::{error::Error, process::ExitCode};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Runs every selected run group and returns the exit status. The working directory is removed
/// when this returns, on success and on every error.
fn run(config: &HarnessConfig) -> Result<u8, DriverError> {
    let store = CalibrationStore::builtin()?;
    store.validate()?;

    let work_dir = tempfile::tempdir().map_err(DriverError::WorkDir)?;
    info!(work_dir = %work_dir.path().display(), "Created engine working directory");

    let commands = CommandBuilder::new(config, work_dir.path());
    let mut driver = Driver::new(LocalExecutor::load(config), config, &store, commands);

    let e2e_failed = driver.prepare()?;
    let mut reporter = Reporter::new(
        driver.warmup()?,
        config.execution_only_number_of_threads.clone(),
    );
    let mut verdicts = Verdicts::new();

    let catalog = catalog(config);
    for (index, entry) in select(&catalog, config.flow) {
        let outcome = driver.run_group(index, entry)?;

        // consumed by the external log sink, one line per run group
        let record = PerfRecord::new(index, entry, &outcome.plan, &outcome.result, config);
        println!("{}", record.to_json_line()?);

        verdicts.record(
            &entry.key,
            entry.waived,
            outcome.result.tps,
            &outcome.plan.criteria,
            config.skip_perf_improvement_notice,
        );
        reporter.push_group(outcome.instances);

        if !config.hide_output {
            reporter.print_views();
        }
    }

    if config.hide_output {
        reporter.print_full_table();
    }

    verdicts.print_summary(e2e_failed);

    Ok(verdicts.exit_status(e2e_failed))
}

fn log_error(error: &dyn Error) {
    error!("{error}");

    let mut source = error.source();
    while let Some(cause) = source {
        error!("caused by: {cause}");
        source = cause.source();
    }
}

fn main() -> ExitCode {
    // stdout carries the engine output, the tables and the records
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match HarnessConfig::from_args(Args::parse()) {
        Ok(config) => config,
        Err(error) => {
            log_error(&error);
            return ExitCode::from(1);
        }
    };

    match run(&config) {
        Ok(status) => ExitCode::from(status),
        Err(error) => {
            log_error(&error);
            ExitCode::from(1)
        }
    }
}
