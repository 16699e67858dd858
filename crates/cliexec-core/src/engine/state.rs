use tracing::debug;

use crate::error::{CancelKind, ExecError};
use crate::signals::CancelSignals;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed(i32),
    CanceledForcefully,
    CanceledGracefully,
}

impl Outcome {
    /// Map the outcome to what the caller sees: the exit code, or a
    /// cancellation failure carrying the responsible token.
    pub fn into_result(self, signals: &CancelSignals) -> Result<i32, ExecError> {
        match self {
            Outcome::Completed(exit_code) => Ok(exit_code),
            Outcome::CanceledForcefully => {
                Err(ExecError::canceled(CancelKind::Forceful, &signals.forceful))
            }
            Outcome::CanceledGracefully => {
                Err(ExecError::canceled(CancelKind::Graceful, &signals.graceful))
            }
        }
    }
}

/// Why a running process is being stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Graceful,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Starting,
    Running,
    Stopping(StopReason),
    Terminated(Outcome),
}

/// Lifecycle of one run.
///
/// Forceful cancellation is accepted from every non-terminal state and always
/// ends the run. Graceful cancellation only moves `Running` to `Stopping`;
/// the run then terminates as `CanceledGracefully` however the process exits.
#[derive(Debug)]
pub struct RunStateMachine {
    state: RunState,
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStateMachine {
    pub fn new() -> Self {
        Self {
            state: RunState::Starting,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_stopping(&self) -> bool {
        matches!(self.state, RunState::Stopping(_))
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.state, RunState::Terminated(_))
    }

    /// The process was spawned and is being watched
    pub fn started(&mut self) {
        if self.state == RunState::Starting {
            self.transition(RunState::Running);
        }
    }

    /// Returns `true` when the request moved the run to `Stopping`, meaning
    /// the graceful-stop signal should now be sent to the process.
    pub fn graceful_requested(&mut self) -> bool {
        if self.state == RunState::Running {
            self.transition(RunState::Stopping(StopReason::Graceful));
            true
        } else {
            false
        }
    }

    pub fn forceful_requested(&mut self) -> Outcome {
        self.terminate(Outcome::CanceledForcefully)
    }

    /// The process exited and its pipes are drained
    pub fn completed(&mut self, exit_code: i32) -> Outcome {
        let outcome = match self.state {
            RunState::Stopping(StopReason::Graceful) => Outcome::CanceledGracefully,
            _ => Outcome::Completed(exit_code),
        };
        self.terminate(outcome)
    }

    fn terminate(&mut self, outcome: Outcome) -> Outcome {
        match self.state {
            RunState::Terminated(existing) => existing,
            _ => {
                self.transition(RunState::Terminated(outcome));
                outcome
            }
        }
    }

    fn transition(&mut self, next: RunState) {
        debug!(from = ?self.state, to = ?next, "Run state transition");
        self.state = next;
    }
}
