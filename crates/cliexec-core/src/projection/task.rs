use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ResultValidation;
use crate::engine::EventReceiver;
use crate::error::ExecError;
use crate::event::ExecutionEvent;
use crate::process::ProcessId;

/// Result of a run that completed on its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub started_at: SystemTime,
    pub exited_at: SystemTime,
}

impl CommandResult {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn run_time(&self) -> Duration {
        self.exited_at
            .duration_since(self.started_at)
            .unwrap_or_default()
    }
}

/// Apply the command's validation to a completed run
pub(crate) fn validate(
    result: CommandResult,
    command_line: &str,
    validation: ResultValidation,
    stderr: Option<String>,
) -> Result<CommandResult, ExecError> {
    if validation == ResultValidation::ZeroExitCode && !result.is_success() {
        return Err(ExecError::NonZeroExit {
            command: command_line.to_string(),
            exit_code: result.exit_code,
            stderr,
        });
    }
    Ok(result)
}

/// A started run, awaitable to its [`CommandResult`].
///
/// The run keeps going if the task is dropped; stop it through its
/// cancellation signals.
pub struct CommandTask {
    process_id: watch::Receiver<Option<ProcessId>>,
    result: JoinHandle<Result<CommandResult, ExecError>>,
}

impl CommandTask {
    pub(crate) fn spawn(
        mut receiver: EventReceiver,
        command_line: String,
        validation: ResultValidation,
    ) -> Self {
        let (pid_tx, pid_rx) = watch::channel(None);
        let started_at = SystemTime::now();

        let result = tokio::spawn(async move {
            while let Some(item) = receiver.next().await {
                match item? {
                    ExecutionEvent::Started { process_id } => {
                        pid_tx.send_replace(Some(process_id));
                    }
                    ExecutionEvent::Exited { exit_code } => {
                        let result = CommandResult {
                            exit_code,
                            started_at,
                            exited_at: SystemTime::now(),
                        };
                        return validate(result, &command_line, validation, None);
                    }
                    _ => {}
                }
            }
            Err(ExecError::process_error("run ended without reporting an outcome"))
        });

        Self {
            process_id: pid_rx,
            result,
        }
    }

    /// Id of the process, once it has started
    pub fn process_id(&self) -> Option<ProcessId> {
        *self.process_id.borrow()
    }

    pub fn is_started(&self) -> bool {
        self.process_id().is_some()
    }

    /// Wait until the process has started. Returns `None` if the run ended
    /// without ever starting it.
    pub async fn started(&mut self) -> Option<ProcessId> {
        match self.process_id.wait_for(Option::is_some).await {
            Ok(pid) => *pid,
            Err(_) => None,
        }
    }
}

impl IntoFuture for CommandTask {
    type Output = Result<CommandResult, ExecError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            match self.result.await {
                Ok(result) => result,
                Err(e) => Err(ExecError::process_error(format!(
                    "execution task failed: {e}"
                ))),
            }
        })
    }
}
