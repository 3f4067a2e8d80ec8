use super::{Executor, ExecutorError};
use crate::{config::HarnessConfig, ingest::RunOutput};
use std::{
    io::{BufRead, BufReader},
    path::PathBuf,
    process::{Child, Command, Stdio},
    time::Instant,
};
use tracing::{debug, error, info, instrument, warn};
use tracing_unwrap::OptionExt;

/// log lines of the engine at error level, their presence fails the run
pub const ERROR_MARKER: &str = " ERROR ";

/// Executor that runs commands through `sh` on the local machine, one at a time
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    working_dir: PathBuf,
    hide_output: bool,
}

impl LocalExecutor {
    pub fn new(working_dir: PathBuf, hide_output: bool) -> Self {
        Self {
            working_dir,
            hide_output,
        }
    }

    pub fn load(config: &HarnessConfig) -> Self {
        Self::new(config.engine_root.clone(), config.hide_output)
    }
}

/// nobody reads the pipe anymore, kill the child and reap it
fn abandon(child: &mut Child) {
    if let Err(error) = child.kill() {
        debug!("Failed to kill child {}: {error}", child.id());
    }
    if let Err(error) = child.wait() {
        warn!("Failed to reap child {}: {error}", child.id());
    }
}

impl Executor for LocalExecutor {
    /// stream the output while the command runs and return it in full once it exited
    #[instrument(skip(self), level = "debug")]
    fn execute(&mut self, command: &str) -> Result<RunOutput, ExecutorError> {
        info!("Executing command:\n\t{command}\nand waiting for it to finish...");
        let start = Instant::now();

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.working_dir)
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| ExecutorError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let stdout = child.stdout.take().unwrap_or_log();
        let mut lines = Vec::new();

        for line in BufReader::new(stdout).split(b'\n') {
            let line = match line {
                Ok(line) => String::from_utf8_lossy(&line).into_owned(),
                Err(source) => {
                    abandon(&mut child);

                    return Err(ExecutorError::Io {
                        command: command.to_string(),
                        source,
                    });
                }
            };

            if !self.hide_output {
                println!("{line}");
            }
            lines.push(line);
        }

        let status = child.wait().map_err(|source| ExecutorError::Io {
            command: command.to_string(),
            source,
        })?;
        let runtime = start.elapsed();
        let stdout = lines.join("\n");

        debug!(
            "Finished in {} ms | status: {}",
            runtime.as_millis(),
            status.success()
        );

        if !status.success() {
            if self.hide_output {
                println!("{stdout}");
            }

            // killed by a signal if there is no code
            return Err(ExecutorError::NonZeroExit {
                command: command.to_string(),
                code: status.code().unwrap_or(-1),
                output: stdout,
            });
        }

        if stdout.contains(ERROR_MARKER) {
            error!("ERROR log line in execution");
            if self.hide_output {
                println!("{stdout}");
            }

            return Err(ExecutorError::ErrorMarker {
                command: command.to_string(),
                output: stdout,
            });
        }

        Ok(RunOutput { runtime, stdout })
    }
}
