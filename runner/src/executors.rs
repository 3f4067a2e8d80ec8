pub mod local;

use crate::ingest::RunOutput;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Failed to spawn `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read the output of `{command}`")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with status {code}")]
    NonZeroExit {
        command: String,
        code: i32,
        output: String,
    },
    #[error("ERROR log line in the output of `{command}`")]
    ErrorMarker { command: String, output: String },
}

/// Runs one shell command line to completion and returns everything it printed on stdout.
///
/// Implementations must block until the process exits, the engine owns the on-disk state for
/// the whole invocation.
pub trait Executor {
    fn execute(&mut self, command: &str) -> Result<RunOutput, ExecutorError>;
}
