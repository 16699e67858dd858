use std::time::SystemTime;

use super::task::{CommandResult, validate};
use crate::config::ResultValidation;
use crate::engine::EventReceiver;
use crate::error::ExecError;
use crate::event::ExecutionEvent;

/// Result of a buffered run: the exit code plus all captured text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedCommandResult {
    pub result: CommandResult,
    /// Every stdout line, each followed by `\n`
    pub stdout: String,
    /// Every stderr line, each followed by `\n`
    pub stderr: String,
}

impl BufferedCommandResult {
    pub fn exit_code(&self) -> i32 {
        self.result.exit_code
    }
}

pub(crate) async fn collect_buffered(
    mut receiver: EventReceiver,
    command_line: String,
    validation: ResultValidation,
) -> Result<BufferedCommandResult, ExecError> {
    let started_at = SystemTime::now();
    let mut stdout = String::new();
    let mut stderr = String::new();

    while let Some(item) = receiver.next().await {
        match item? {
            ExecutionEvent::StandardOutputLine { text } => {
                stdout.push_str(&text);
                stdout.push('\n');
            }
            ExecutionEvent::StandardErrorLine { text } => {
                stderr.push_str(&text);
                stderr.push('\n');
            }
            ExecutionEvent::Started { .. } => {}
            ExecutionEvent::Exited { exit_code } => {
                let result = CommandResult {
                    exit_code,
                    started_at,
                    exited_at: SystemTime::now(),
                };
                let result = validate(result, &command_line, validation, Some(stderr.clone()))?;
                return Ok(BufferedCommandResult {
                    result,
                    stdout,
                    stderr,
                });
            }
        }
    }

    Err(ExecError::process_error("run ended without reporting an outcome"))
}
