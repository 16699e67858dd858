use anyhow::Result;
use async_trait::async_trait;
use std::process::Stdio;
use sysinfo::System;
use tokio::process::Child;
use tracing::{info, warn};

use cliexec_core::*;

// CREATE_NO_WINDOW - Creates a process without a console window
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Windows-specific process handle implementation
pub struct WindowsProcessHandle {
    child: Child,
    pid: ProcessId,
    command: String,
    args: Vec<String>,
}

impl WindowsProcessHandle {
    fn new(child: Child, pid: ProcessId, command: &Command) -> Self {
        Self {
            child,
            pid,
            command: command.target_path.clone(),
            args: command.args.clone(),
        }
    }
}

/// Collect every descendant of `root` from a fresh process table snapshot.
/// Windows keeps the parent id of orphans, so this still works once the root
/// has exited. Blocking.
fn find_descendants(root: ProcessId) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes_specifics(
        sysinfo::ProcessesToUpdate::All,
        true,
        sysinfo::ProcessRefreshKind::default(),
    );

    let mut descendants = Vec::new();
    find_children_recursive(&system, root, &mut descendants);
    descendants
}

/// Force kill leftover descendants of `root` one by one
async fn kill_descendants(root: ProcessId) {
    let descendants = match tokio::task::spawn_blocking(move || find_descendants(root)).await {
        Ok(descendants) => descendants,
        Err(e) => {
            warn!(pid = root, error = %e, "Descendant scan failed");
            return;
        }
    };

    for pid in descendants {
        match taskkill(&["/F", "/PID", &pid.to_string()]).await {
            Ok(true) => info!(pid, "Force killed descendant process"),
            Ok(false) => {}
            Err(e) => warn!(pid, error = %e, "Failed to force kill descendant process"),
        }
    }
}

/// Run taskkill with `args`; `Ok(false)` when the process was not found
async fn taskkill(args: &[&str]) -> Result<bool> {
    let output = tokio::process::Command::new("taskkill")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .creation_flags(CREATE_NO_WINDOW)
        .output()
        .await?;

    Ok(output.status.success())
}

/// Recursively find all child processes, grandchildren first
fn find_children_recursive(system: &System, parent_pid: u32, result: &mut Vec<u32>) {
    for (pid, process) in system.processes() {
        if process.parent().is_some_and(|ppid| ppid.as_u32() == parent_pid) {
            let child_pid = pid.as_u32();
            find_children_recursive(system, child_pid, result);
            result.push(child_pid);
        }
    }
}

fn to_status(status: std::process::ExitStatus) -> ProcessStatus {
    ProcessStatus::Exited(status.code().unwrap_or(-1))
}

#[async_trait]
impl ProcessHandle for WindowsProcessHandle {
    fn get_pid(&self) -> Option<ProcessId> {
        self.child.id()
    }

    fn get_command(&self) -> &str {
        &self.command
    }

    fn get_args(&self) -> &[String] {
        &self.args
    }

    fn take_stdio(&mut self) -> ProcessStdio {
        ProcessStdio::from_child(&mut self.child)
    }

    async fn is_running(&self) -> bool {
        let Some(pid) = self.get_pid() else {
            return false;
        };

        tokio::task::spawn_blocking(move || {
            let pid = sysinfo::Pid::from_u32(pid);
            let mut system = System::new();
            system.refresh_processes_specifics(
                sysinfo::ProcessesToUpdate::Some(&[pid]),
                true,
                sysinfo::ProcessRefreshKind::default(),
            );
            system.process(pid).is_some()
        })
        .await
        .unwrap_or(false)
    }

    async fn try_wait(&mut self) -> Result<Option<ProcessStatus>> {
        Ok(self.child.try_wait()?.map(to_status))
    }

    async fn wait(&mut self) -> Result<ProcessStatus> {
        let status = self.child.wait().await?;
        Ok(to_status(status))
    }

    async fn request_graceful_stop(&mut self, signal: GracefulSignal) -> TerminationResult {
        let Some(pid) = self.get_pid() else {
            return TerminationResult::ProcessNotFound;
        };

        // Both signals map to a close request for the tree; console programs
        // without a window may ignore it.
        info!(pid, ?signal, "Requesting graceful termination");
        match taskkill(&["/T", "/PID", &pid.to_string()]).await {
            Ok(true) => TerminationResult::Success,
            Ok(false) => {
                warn!(pid, "Process not found for graceful termination");
                TerminationResult::ProcessNotFound
            }
            Err(e) => {
                warn!(pid, error = %e, "Failed to gracefully terminate process");
                TerminationResult::Failed(format!("Graceful termination failed: {e}"))
            }
        }
    }

    async fn kill(&mut self, include_descendants: bool) -> TerminationResult {
        let already_exited = matches!(self.child.try_wait(), Ok(Some(_)));

        if already_exited {
            if include_descendants {
                kill_descendants(self.pid).await;
            }
            return TerminationResult::ProcessNotFound;
        }

        if include_descendants {
            let pid = self.pid.to_string();
            match taskkill(&["/F", "/T", "/PID", &pid]).await {
                Ok(true) => info!(pid = self.pid, "Force killed process tree"),
                Ok(false) => kill_descendants(self.pid).await,
                Err(e) => {
                    warn!(pid = self.pid, error = %e, "Force kill via taskkill failed; killing tree manually");
                    kill_descendants(self.pid).await;
                }
            }
        }

        // Reaps the root; a no-op kill if taskkill already got it
        match self.child.kill().await {
            Ok(()) => TerminationResult::Success,
            Err(e) => match self.child.try_wait() {
                Ok(Some(_)) => TerminationResult::Success,
                _ => {
                    warn!(pid = self.pid, error = %e, "Failed to force kill process");
                    TerminationResult::Failed(format!("Force kill failed: {e}"))
                }
            },
        }
    }
}

/// Windows-specific process manager with process tree management
pub struct WindowsProcessManager;

impl Default for WindowsProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowsProcessManager {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessLifecycle for WindowsProcessManager {
    type Handle = WindowsProcessHandle;

    async fn spawn_process(&self, command: &Command) -> Result<WindowsProcessHandle, ExecError> {
        if command.credentials.is_some() {
            return Err(ExecError::start_failure(
                command.target_path.clone(),
                std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "running as another user is not supported on Windows",
                ),
            ));
        }

        let mut cmd = prepare_command(command);
        // Background execution without a console popup
        cmd.creation_flags(CREATE_NO_WINDOW);

        let child = cmd
            .spawn()
            .map_err(|e| ExecError::start_failure(command.target_path.clone(), e))?;
        let pid = child
            .id()
            .ok_or_else(|| ExecError::process_error("spawned process has no id"))?;

        info!(
            pid = %pid,
            command = %command.target_path,
            args = ?command.args,
            "Spawned Windows process"
        );

        Ok(WindowsProcessHandle::new(child, pid, command))
    }
}
