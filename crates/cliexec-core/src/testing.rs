//! Scriptable fake process manager for engine tests.
//!
//! A fake process writes its scripted output into in-memory pipes, then waits
//! for its lifetime to elapse, a graceful stop request, or a kill.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::{Notify, watch};
use tokio::time::Instant;

use crate::config::{Command, GracefulSignal};
use crate::error::ExecError;
use crate::process::{
    ProcessHandle, ProcessId, ProcessLifecycle, ProcessStatus, ProcessStdio, TerminationResult,
};

pub(crate) const FAKE_PID: ProcessId = 4242;
const PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub(crate) enum OnGraceful {
    Ignore,
    Exit { farewell: String, exit_code: i32 },
}

#[derive(Clone, Debug)]
pub(crate) struct FakeScript {
    stdout: Vec<String>,
    stderr: Vec<String>,
    final_stdout: Vec<String>,
    lifetime: Option<Duration>,
    exit_code: i32,
    on_graceful: OnGraceful,
    echo_stdin: bool,
    spawn_error: Option<std::io::ErrorKind>,
}

impl FakeScript {
    /// Exits immediately with code 0 and no output
    pub(crate) fn new() -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            final_stdout: Vec::new(),
            lifetime: Some(Duration::ZERO),
            exit_code: 0,
            on_graceful: OnGraceful::Ignore,
            echo_stdin: false,
            spawn_error: None,
        }
    }

    /// The usual sleeper: announces itself, sleeps, prints "Done."
    pub(crate) fn sleeper(lifetime: Option<Duration>) -> Self {
        Self::new()
            .stdout(["Sleeping for 20 seconds..."])
            .final_stdout(["Done."])
            .lifetime(lifetime)
    }

    pub(crate) fn stdout(mut self, lines: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.stdout = lines.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn stderr<const N: usize>(mut self, lines: [&str; N]) -> Self {
        self.stderr = lines.iter().map(|s| s.to_string()).collect();
        self
    }

    pub(crate) fn final_stdout<const N: usize>(mut self, lines: [&str; N]) -> Self {
        self.final_stdout = lines.iter().map(|s| s.to_string()).collect();
        self
    }

    pub(crate) fn lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub(crate) fn exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub(crate) fn exit_on_graceful(mut self, farewell: &str, exit_code: i32) -> Self {
        self.on_graceful = OnGraceful::Exit {
            farewell: farewell.to_string(),
            exit_code,
        };
        self
    }

    pub(crate) fn echo_stdin(mut self) -> Self {
        self.echo_stdin = true;
        self
    }

    pub(crate) fn fail_spawn(mut self, kind: std::io::ErrorKind) -> Self {
        self.spawn_error = Some(kind);
        self
    }
}

/// Counters of what the engine asked the fake to do
#[derive(Default, Debug)]
pub(crate) struct FakeLog {
    pub(crate) spawned: AtomicUsize,
    pub(crate) interrupts: AtomicUsize,
    pub(crate) kills: AtomicUsize,
}

impl FakeLog {
    pub(crate) fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    pub(crate) fn interrupts(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    pub(crate) fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

pub(crate) struct FakeProcessManager {
    script: FakeScript,
    log: Arc<FakeLog>,
}

impl FakeProcessManager {
    pub(crate) fn new(script: FakeScript) -> (Self, Arc<FakeLog>) {
        let log = Arc::new(FakeLog::default());
        (
            Self {
                script,
                log: log.clone(),
            },
            log,
        )
    }
}

#[async_trait]
impl ProcessLifecycle for FakeProcessManager {
    type Handle = FakeProcessHandle;

    async fn spawn_process(&self, command: &Command) -> Result<Self::Handle, ExecError> {
        if let Some(kind) = self.script.spawn_error {
            return Err(ExecError::start_failure(
                command.target_path.clone(),
                std::io::Error::from(kind),
            ));
        }

        self.log.spawned.fetch_add(1, Ordering::SeqCst);
        Ok(FakeProcessHandle::launch(
            self.script.clone(),
            self.log.clone(),
            command,
        ))
    }
}

pub(crate) struct FakeProcessHandle {
    pid: Option<ProcessId>,
    command: String,
    args: Vec<String>,
    stdin: Option<DuplexStream>,
    stdout: Option<DuplexStream>,
    stderr: Option<DuplexStream>,
    status: watch::Receiver<Option<ProcessStatus>>,
    graceful: Arc<Notify>,
    kill: Arc<Notify>,
    log: Arc<FakeLog>,
}

impl FakeProcessHandle {
    fn launch(script: FakeScript, log: Arc<FakeLog>, command: &Command) -> Self {
        let (stdin, child_stdin) = tokio::io::duplex(PIPE_CAPACITY);
        let (child_stdout, stdout) = tokio::io::duplex(PIPE_CAPACITY);
        let (child_stderr, stderr) = tokio::io::duplex(PIPE_CAPACITY);
        let (status_tx, status_rx) = watch::channel(None);
        let graceful = Arc::new(Notify::new());
        let kill = Arc::new(Notify::new());

        let pipes = ChildPipes {
            stdin: child_stdin,
            stdout: child_stdout,
            stderr: child_stderr,
        };
        let (graceful_rx, kill_rx) = (graceful.clone(), kill.clone());
        tokio::spawn(async move {
            let status = simulate(script, pipes, graceful_rx, kill_rx).await;
            status_tx.send_replace(Some(status));
        });

        Self {
            pid: Some(FAKE_PID),
            command: command.target_path.clone(),
            args: command.args.clone(),
            stdin: Some(stdin),
            stdout: Some(stdout),
            stderr: Some(stderr),
            status: status_rx,
            graceful,
            kill,
            log,
        }
    }

    fn has_exited(&self) -> bool {
        self.status.borrow().is_some()
    }
}

struct ChildPipes {
    stdin: DuplexStream,
    stdout: DuplexStream,
    stderr: DuplexStream,
}

async fn write_lines(pipe: &mut DuplexStream, lines: &[String]) {
    for line in lines {
        let _ = pipe.write_all(format!("{line}\n").as_bytes()).await;
    }
}

async fn simulate(
    script: FakeScript,
    mut pipes: ChildPipes,
    graceful: Arc<Notify>,
    kill: Arc<Notify>,
) -> ProcessStatus {
    write_lines(&mut pipes.stdout, &script.stdout).await;
    write_lines(&mut pipes.stderr, &script.stderr).await;

    if script.echo_stdin {
        let mut input = Vec::new();
        let _ = pipes.stdin.read_to_end(&mut input).await;
        let _ = pipes.stdout.write_all(&input).await;
    }

    let deadline = script.lifetime.map(|lifetime| Instant::now() + lifetime);
    loop {
        tokio::select! {
            biased;

            _ = kill.notified() => return ProcessStatus::Signaled(9),

            _ = graceful.notified() => match &script.on_graceful {
                OnGraceful::Ignore => continue,
                OnGraceful::Exit { farewell, exit_code } => {
                    write_lines(&mut pipes.stdout, std::slice::from_ref(farewell)).await;
                    return ProcessStatus::Exited(*exit_code);
                }
            },

            _ = sleep_until(deadline) => {
                write_lines(&mut pipes.stdout, &script.final_stdout).await;
                return ProcessStatus::Exited(script.exit_code);
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[async_trait]
impl ProcessHandle for FakeProcessHandle {
    fn get_pid(&self) -> Option<ProcessId> {
        self.pid
    }

    fn get_command(&self) -> &str {
        &self.command
    }

    fn get_args(&self) -> &[String] {
        &self.args
    }

    fn take_stdio(&mut self) -> ProcessStdio {
        ProcessStdio {
            stdin: self
                .stdin
                .take()
                .map(|s| Box::new(s) as Box<dyn AsyncWrite + Send + Unpin>),
            stdout: self.stdout.take().map(|s| Box::new(s) as _),
            stderr: self.stderr.take().map(|s| Box::new(s) as _),
        }
    }

    async fn is_running(&self) -> bool {
        !self.has_exited()
    }

    async fn try_wait(&mut self) -> Result<Option<ProcessStatus>> {
        Ok(*self.status.borrow())
    }

    async fn wait(&mut self) -> Result<ProcessStatus> {
        let status = self
            .status
            .wait_for(Option::is_some)
            .await
            .map_err(|_| anyhow::anyhow!("fake process vanished"))?
            .unwrap_or(ProcessStatus::Running);
        self.pid = None;
        Ok(status)
    }

    async fn request_graceful_stop(&mut self, _signal: GracefulSignal) -> TerminationResult {
        if self.has_exited() {
            return TerminationResult::ProcessNotFound;
        }
        self.log.interrupts.fetch_add(1, Ordering::SeqCst);
        self.graceful.notify_one();
        TerminationResult::Success
    }

    async fn kill(&mut self, _include_descendants: bool) -> TerminationResult {
        self.log.kills.fetch_add(1, Ordering::SeqCst);
        if self.has_exited() {
            self.pid = None;
            return TerminationResult::ProcessNotFound;
        }
        self.kill.notify_one();
        match self.wait().await {
            Ok(_) => TerminationResult::Success,
            Err(e) => TerminationResult::Failed(e.to_string()),
        }
    }
}
