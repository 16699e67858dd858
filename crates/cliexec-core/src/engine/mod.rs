//! The execution engine.
//!
//! Every run is driven by a single spawned task that owns the process handle,
//! pumps the pipes and applies the cancellation protocol. The task reports
//! through one bounded channel of [`RunItem`]s: `Started`, output lines, and
//! a terminal item that is either `Exited` or the failure that ended the run.
//! All result projections read from that channel.

mod run;
mod state;

pub use state::{Outcome, RunState, RunStateMachine, StopReason};

use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::Command;
use crate::error::ExecError;
use crate::event::ExecutionEvent;
use crate::pipe::TextEncoding;
use crate::process::ProcessLifecycle;
use crate::projection::{
    BufferedCommandResult, CommandResult, CommandTask, EventObservable, EventStream,
    collect_buffered,
};
use crate::signals::CancelSignals;
use run::Run;

/// One item of a run's event sequence. The last item is `Ok(Exited)` or the
/// error that ended the run.
pub type RunItem = Result<ExecutionEvent, ExecError>;

/// Encodings used to decode output lines, per stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamEncodings {
    pub stdout: TextEncoding,
    pub stderr: TextEncoding,
}

impl StreamEncodings {
    pub fn new(stdout: TextEncoding, stderr: TextEncoding) -> Self {
        Self { stdout, stderr }
    }

    pub fn uniform(encoding: TextEncoding) -> Self {
        Self::new(encoding, encoding)
    }
}

/// Starts runs of commands on one platform's process manager.
///
/// All methods that start a run must be called from within a Tokio runtime.
pub struct ExecutionEngine<M> {
    manager: Arc<M>,
}

impl<M> Clone for ExecutionEngine<M> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
        }
    }
}

impl<M: ProcessLifecycle + 'static> ExecutionEngine<M> {
    pub fn new(manager: M) -> Self {
        Self::from_shared(Arc::new(manager))
    }

    pub fn from_shared(manager: Arc<M>) -> Self {
        Self { manager }
    }

    /// Spawn the run task and return the receiving end of its event sequence
    pub fn spawn_run(
        &self,
        command: Command,
        signals: CancelSignals,
        encodings: StreamEncodings,
    ) -> EventReceiver {
        let (tx, rx) = mpsc::channel(command.config.event_channel_capacity.max(1));
        let run = Run {
            manager: self.manager.clone(),
            command,
            signals,
            encodings,
            events: tx.clone(),
        };

        tokio::spawn(async move {
            let terminal = run
                .execute()
                .await
                .map(|exit_code| ExecutionEvent::Exited { exit_code });
            if let Err(e) = &terminal {
                debug!(error = %e, "Run ended with failure");
            }
            let _ = tx.send(terminal).await;
        });

        EventReceiver::new(rx)
    }

    /// Start a run; the returned task resolves to the exit code
    pub fn start(&self, command: Command, signals: CancelSignals) -> CommandTask {
        let command_line = command.display_line();
        let validation = command.validation;
        let receiver = self.spawn_run(command, signals, StreamEncodings::default());
        CommandTask::spawn(receiver, command_line, validation)
    }

    /// Run to completion and return the exit code
    pub async fn execute(
        &self,
        command: Command,
        signals: CancelSignals,
    ) -> Result<CommandResult, ExecError> {
        self.start(command, signals).await
    }

    /// Run to completion, capturing stdout and stderr as UTF-8 text
    pub async fn execute_buffered(
        &self,
        command: Command,
        signals: CancelSignals,
    ) -> Result<BufferedCommandResult, ExecError> {
        self.execute_buffered_with(command, signals, StreamEncodings::default())
            .await
    }

    /// Run to completion, capturing stdout and stderr with the given encodings
    pub async fn execute_buffered_with(
        &self,
        command: Command,
        signals: CancelSignals,
        encodings: StreamEncodings,
    ) -> Result<BufferedCommandResult, ExecError> {
        let command_line = command.display_line();
        let validation = command.validation;
        let receiver = self.spawn_run(command, signals, encodings);
        collect_buffered(receiver, command_line, validation).await
    }

    /// Lazy pull-based event sequence. The run starts on first poll.
    pub fn stream(&self, command: Command, signals: CancelSignals) -> EventStream {
        let engine = self.clone();
        EventStream::new(Box::new(move || {
            engine.spawn_run(command, signals, StreamEncodings::default())
        }))
    }

    /// Hot push-based event stream. The run starts on `connect`.
    pub fn observe(&self, command: Command, signals: CancelSignals) -> EventObservable {
        let engine = self.clone();
        EventObservable::new(Box::new(move || {
            engine.spawn_run(command, signals, StreamEncodings::default())
        }))
    }
}

/// Receiving end of one run's event sequence.
///
/// Yields items until the terminal one, then `None`. If the run task dies
/// without reporting an outcome a process error is yielded as terminal item.
pub struct EventReceiver {
    rx: mpsc::Receiver<RunItem>,
    finished: bool,
}

impl EventReceiver {
    fn new(rx: mpsc::Receiver<RunItem>) -> Self {
        Self {
            rx,
            finished: false,
        }
    }

    pub async fn next(&mut self) -> Option<RunItem> {
        std::future::poll_fn(|cx| self.poll_next_item(cx)).await
    }

    pub fn poll_next_item(&mut self, cx: &mut Context<'_>) -> Poll<Option<RunItem>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match ready!(self.rx.poll_recv(cx)) {
            Some(item) => {
                if item.as_ref().map_or(true, ExecutionEvent::is_exited) {
                    self.finished = true;
                    self.rx.close();
                }
                Poll::Ready(Some(item))
            }
            None => {
                self.finished = true;
                Poll::Ready(Some(Err(ExecError::process_error(
                    "run ended without reporting an outcome",
                ))))
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
