use std::{
    path::PathBuf,
    process::{Command, Output, Stdio},
};

use serde::{Deserialize, Serialize};

use crate::{Invocation, error::LSError};

/// Captured result of one PHPUnit process.
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl From<Output> for ProcessOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        }
    }
}

/// Executes an [`Invocation`] and captures its output.
pub trait ProcessRunner {
    fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, LSError>;
}

/// Runs invocations as child processes of the server.
#[derive(Debug, Default, Clone)]
pub struct SystemProcess {
    current_dir: Option<PathBuf>,
}

impl SystemProcess {
    #[must_use]
    pub fn new(current_dir: Option<PathBuf>) -> Self {
        Self { current_dir }
    }
}

impl ProcessRunner for SystemProcess {
    fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, LSError> {
        let mut command = Command::new(&invocation.command);
        command
            .args(&invocation.arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let output = command
            .output()
            .map_err(|e| LSError::CommandSpawn(format!("{}: {e}", invocation.command)))?;

        let output = ProcessOutput::from(output);
        if !output.stderr.is_empty() {
            log::debug!("phpunit stderr: {}", output.stderr);
        }
        Ok(output)
    }
}
