use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Program {0} not found")]
    NotFound(String),

    #[error("Unable to run {program}: {reason}")]
    SpawnError { program: String, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs external programs: the linter, the function runtime and the project
/// test command.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
    ) -> Result<CommandOutput, Error>;
}

#[derive(Debug, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
    ) -> Result<CommandOutput, Error> {
        debug!(program, ?args, "Running command");

        let mut command = Command::new(program);
        command.args(args).kill_on_drop(true);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let output = match command.output().await {
            Ok(output) => output,
            Err(error) => match error.kind() {
                io::ErrorKind::NotFound => return Err(Error::NotFound(program.to_string())),
                _ => {
                    return Err(Error::SpawnError {
                        program: program.to_string(),
                        reason: error.to_string(),
                    })
                }
            },
        };

        return Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
}
