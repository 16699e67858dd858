use anyhow::Result;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::{Command, GracefulSignal};
use crate::error::ExecError;

/// Unique identifier for a process
pub type ProcessId = u32;

/// Status of a process as reported by the OS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Process is currently running
    Running,
    /// Process exited on its own with the given exit code
    Exited(i32),
    /// Process was terminated by the given signal (Unix)
    Signaled(i32),
}

impl ProcessStatus {
    /// Exit code in shell convention: signal deaths map to `128 + signal`
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProcessStatus::Running => None,
            ProcessStatus::Exited(code) => Some(*code),
            ProcessStatus::Signaled(signal) => Some(128 + signal),
        }
    }
}

/// Result of a process termination operation
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationResult {
    /// Signal delivered or process terminated
    Success,
    /// Process was not found (already exited)
    ProcessNotFound,
    /// Permission denied (insufficient privileges)
    AccessDenied,
    /// Operation failed with specific error message
    Failed(String),
}

impl TerminationResult {
    /// Whether the process is known not to outlive the operation
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            TerminationResult::Success | TerminationResult::ProcessNotFound
        )
    }
}

/// The child's standard streams, detached from its handle
#[derive(Default)]
pub struct ProcessStdio {
    pub stdin: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    pub stdout: Option<Box<dyn AsyncRead + Send + Unpin>>,
    pub stderr: Option<Box<dyn AsyncRead + Send + Unpin>>,
}

impl ProcessStdio {
    pub fn from_child(child: &mut tokio::process::Child) -> Self {
        Self {
            stdin: child
                .stdin
                .take()
                .map(|s| Box::new(s) as Box<dyn AsyncWrite + Send + Unpin>),
            stdout: child
                .stdout
                .take()
                .map(|s| Box::new(s) as Box<dyn AsyncRead + Send + Unpin>),
            stderr: child
                .stderr
                .take()
                .map(|s| Box::new(s) as Box<dyn AsyncRead + Send + Unpin>),
        }
    }
}

/// Trait representing a handle to one running OS process.
///
/// A handle owns its process: dropping it must not leave the process running.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Get the process ID (None once the process has been reaped)
    fn get_pid(&self) -> Option<ProcessId>;

    /// Get the command that started this process
    fn get_command(&self) -> &str;

    /// Get the arguments passed to this process
    fn get_args(&self) -> &[String];

    /// Detach the standard streams. Later calls return empty slots.
    fn take_stdio(&mut self) -> ProcessStdio;

    /// Check if the process is still running (non-blocking)
    async fn is_running(&self) -> bool;

    /// Try to get exit status without blocking
    async fn try_wait(&mut self) -> Result<Option<ProcessStatus>>;

    /// Wait for the process to exit. Cancel safe.
    async fn wait(&mut self) -> Result<ProcessStatus>;

    /// Ask the process to shut down without forcing it
    async fn request_graceful_stop(&mut self, signal: GracefulSignal) -> TerminationResult;

    /// Kill the process, and its descendants if `include_descendants`, then
    /// reap it. A no-op on a process that already exited.
    async fn kill(&mut self, include_descendants: bool) -> TerminationResult;
}

/// Core trait for launching processes on one platform
#[async_trait]
pub trait ProcessLifecycle: Send + Sync {
    /// The type of process handle this lifecycle manager produces
    type Handle: ProcessHandle + 'static;

    /// Spawn a new process for `command` with all three standard streams piped
    async fn spawn_process(&self, command: &Command) -> Result<Self::Handle, ExecError>;
}

/// Factory trait for creating platform-specific process managers
pub trait ProcessManagerFactory {
    /// The type of process manager this factory creates
    type Manager: ProcessLifecycle + 'static;

    /// Create a process manager for the current platform
    fn create_process_manager() -> Self::Manager;

    /// Get the platform name for logging and debugging
    fn platform_name() -> &'static str;
}

/// Build the tokio command shared by every platform: target, arguments,
/// working directory, environment, piped stdio and kill-on-drop.
pub fn prepare_command(command: &Command) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(&command.target_path);
    cmd.args(&command.args);

    if let Some(dir) = &command.working_directory {
        cmd.current_dir(dir);
    }

    for (key, value) in &command.env {
        cmd.env(key, value);
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    cmd
}

/// Reject commands that cannot start before asking the OS, so the caller gets
/// a precise message instead of a bare `ENOENT`.
pub fn check_startable(command: &Command) -> Result<(), ExecError> {
    if command.target_path.is_empty() {
        return Err(ExecError::start_failure(
            "",
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "target path must not be empty",
            ),
        ));
    }

    if let Some(dir) = &command.working_directory {
        if !dir.is_dir() {
            return Err(ExecError::start_failure(
                command.target_path.clone(),
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("working directory {} does not exist", dir.display()),
                ),
            ));
        }
    }

    command
        .config
        .validate()
        .map_err(|e| ExecError::Configuration(e.to_string()))
}
