use std::future::Future;
use std::sync::OnceLock;

use cliexec_core::{
    BufferedCommandResult, CancelSignals, Command, CommandResult, CommandTask, EventObservable,
    EventStream, ExecError, ExecutionEngine,
};

use crate::factory::{PlatformProcessManager, engine};

static SHARED_ENGINE: OnceLock<ExecutionEngine<PlatformProcessManager>> = OnceLock::new();

fn shared_engine() -> &'static ExecutionEngine<PlatformProcessManager> {
    SHARED_ENGINE.get_or_init(engine)
}

/// Run a [`Command`] on the platform engine in any of the four result shapes.
///
/// `signals` accepts a [`CancelSignals`] or a bare `CancellationToken`, which
/// then acts as the forceful signal.
pub trait CommandExt {
    /// Start the run; await the task for its result
    fn start(self, signals: impl Into<CancelSignals>) -> CommandTask;

    fn execute(
        self,
        signals: impl Into<CancelSignals>,
    ) -> impl Future<Output = Result<CommandResult, ExecError>> + Send;

    fn execute_buffered(
        self,
        signals: impl Into<CancelSignals>,
    ) -> impl Future<Output = Result<BufferedCommandResult, ExecError>> + Send;

    /// Lazy pull-based events; the run starts on first poll
    fn stream(self, signals: impl Into<CancelSignals>) -> EventStream;

    /// Hot push-based events; the run starts on `connect`
    fn observe(self, signals: impl Into<CancelSignals>) -> EventObservable;
}

impl CommandExt for Command {
    fn start(self, signals: impl Into<CancelSignals>) -> CommandTask {
        shared_engine().start(self, signals.into())
    }

    fn execute(
        self,
        signals: impl Into<CancelSignals>,
    ) -> impl Future<Output = Result<CommandResult, ExecError>> + Send {
        shared_engine().execute(self, signals.into())
    }

    fn execute_buffered(
        self,
        signals: impl Into<CancelSignals>,
    ) -> impl Future<Output = Result<BufferedCommandResult, ExecError>> + Send {
        shared_engine().execute_buffered(self, signals.into())
    }

    fn stream(self, signals: impl Into<CancelSignals>) -> EventStream {
        shared_engine().stream(self, signals.into())
    }

    fn observe(self, signals: impl Into<CancelSignals>) -> EventObservable {
        shared_engine().observe(self, signals.into())
    }
}
