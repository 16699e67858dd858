use anyhow::Result;
use async_trait::async_trait;
use cliexec_core::{
    Command, ExecError, GracefulSignal, ProcessHandle, ProcessId, ProcessLifecycle, ProcessStatus,
    ProcessStdio, TerminationResult, prepare_command,
};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid as NixPid;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use sysinfo::System;
use tokio::process::Child;
use tracing::{debug, info, warn};

/// Unix-specific process handle.
///
/// The child leads its own process group, so the whole tree can be signalled
/// through the group id even after the leader has been reaped.
pub struct UnixProcessHandle {
    child: Child,
    group: ProcessId,
    command: String,
    args: Vec<String>,
}

impl UnixProcessHandle {
    fn new(child: Child, group: ProcessId, command: &Command) -> Self {
        Self {
            child,
            group,
            command: command.target_path.clone(),
            args: command.args.clone(),
        }
    }
}

fn to_status(status: ExitStatus) -> ProcessStatus {
    match (status.code(), status.signal()) {
        (Some(code), _) => ProcessStatus::Exited(code),
        (None, Some(signal)) => ProcessStatus::Signaled(signal),
        (None, None) => ProcessStatus::Exited(-1),
    }
}

fn signal_result(target: &str, pid: ProcessId, signal: Signal, result: nix::Result<()>) -> TerminationResult {
    match result {
        Ok(()) => {
            debug!(pid, ?signal, target, "Signal sent");
            TerminationResult::Success
        }
        Err(nix::errno::Errno::ESRCH) => {
            debug!(pid, target, "Not found (already terminated)");
            TerminationResult::ProcessNotFound
        }
        Err(nix::errno::Errno::EPERM) => {
            warn!(pid, ?signal, target, "Permission denied");
            TerminationResult::AccessDenied
        }
        Err(e) => {
            warn!(pid, ?signal, target, error = %e, "Failed to send signal");
            TerminationResult::Failed(format!("{signal:?} to {target} {pid} failed: {e}"))
        }
    }
}

fn send_signal(pid: ProcessId, signal: Signal) -> TerminationResult {
    let result = signal::kill(NixPid::from_raw(pid as i32), signal);
    signal_result("process", pid, signal, result)
}

fn send_group_signal(pgid: ProcessId, signal: Signal) -> TerminationResult {
    let result = signal::killpg(NixPid::from_raw(pgid as i32), signal);
    signal_result("process group", pgid, signal, result)
}

/// SIGKILL descendants of `root` that may have left its process group
async fn kill_descendants(root: ProcessId) {
    let descendants = match tokio::task::spawn_blocking(move || find_descendants(root)).await {
        Ok(descendants) => descendants,
        Err(e) => {
            warn!(pid = root, error = %e, "Descendant scan failed");
            return;
        }
    };

    if !descendants.is_empty() {
        debug!(pid = root, count = descendants.len(), "Killing descendants");
    }
    for pid in descendants {
        let result = send_signal(pid, Signal::SIGKILL);
        if !result.is_success() {
            warn!(pid, ?result, "Failed to kill descendant");
        }
    }
}

/// Scan the process table for every descendant of `root`.
/// Blocking; each call takes its own snapshot.
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

#[async_trait]
impl ProcessHandle for UnixProcessHandle {
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
        match self.get_pid() {
            // Signal 0 only checks that the process exists
            Some(pid) => signal::kill(NixPid::from_raw(pid as i32), None).is_ok(),
            None => false,
        }
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

        let signal = match signal {
            GracefulSignal::Interrupt => Signal::SIGINT,
            GracefulSignal::Terminate => Signal::SIGTERM,
        };
        info!(pid, ?signal, "Requesting graceful stop");
        send_signal(pid, signal)
    }

    async fn kill(&mut self, include_descendants: bool) -> TerminationResult {
        let already_exited = matches!(self.child.try_wait(), Ok(Some(_)));

        if include_descendants {
            // Descendants may still hold the pipes after the leader is gone.
            kill_descendants(self.group).await;
            let result = send_group_signal(self.group, Signal::SIGKILL);
            if already_exited {
                return TerminationResult::ProcessNotFound;
            }
            if !result.is_success() {
                return result;
            }
        } else if already_exited {
            return TerminationResult::ProcessNotFound;
        } else {
            let result = send_signal(self.group, Signal::SIGKILL);
            if !result.is_success() {
                return result;
            }
        }

        match self.child.wait().await {
            Ok(status) => {
                info!(pid = self.group, ?status, "Process killed");
                TerminationResult::Success
            }
            Err(e) => {
                warn!(pid = self.group, error = %e, "Failed to reap killed process");
                TerminationResult::Failed(format!("Failed to reap process: {e}"))
            }
        }
    }
}

/// Unix-specific process manager with process tree management
pub struct UnixProcessManager;

impl Default for UnixProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

impl UnixProcessManager {
    pub fn new() -> Self {
        debug!("Initializing Unix process manager");
        Self
    }
}

#[async_trait]
impl ProcessLifecycle for UnixProcessManager {
    type Handle = UnixProcessHandle;

    async fn spawn_process(&self, command: &Command) -> Result<UnixProcessHandle, ExecError> {
        let mut cmd = prepare_command(command);

        // New process group for process tree management
        cmd.process_group(0);

        if let Some(credentials) = &command.credentials {
            if let Some(uid) = credentials.uid {
                cmd.uid(uid);
            }
            if let Some(gid) = credentials.gid {
                cmd.gid(gid);
            }
        }

        let child = cmd
            .spawn()
            .map_err(|e| ExecError::start_failure(command.target_path.clone(), e))?;
        let pid = child
            .id()
            .ok_or_else(|| ExecError::process_error("spawned process has no id"))?;

        info!(
            pid,
            command = %command.target_path,
            args = ?command.args,
            "Spawned Unix process"
        );

        Ok(UnixProcessHandle::new(child, pid, command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn sh(script: &str) -> Command {
        Command::builder()
            .target_path("sh")
            .args(["-c", script])
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_exit_code_and_output() {
        let manager = UnixProcessManager::new();
        let mut handle = manager
            .spawn_process(&sh("echo hello; exit 3"))
            .await
            .unwrap();
        let mut stdout = handle.take_stdio().stdout.unwrap();

        let mut output = String::new();
        stdout.read_to_string(&mut output).await.unwrap();
        assert_eq!(output, "hello\n");
        assert_eq!(handle.wait().await.unwrap(), ProcessStatus::Exited(3));
        assert!(handle.get_pid().is_none());
    }

    #[tokio::test]
    async fn test_missing_binary_is_start_failure() {
        let manager = UnixProcessManager::new();
        let command = Command::builder()
            .target_path("/definitely/not/a/binary")
            .build()
            .unwrap();

        let err = manager.spawn_process(&command).await.err().unwrap();
        assert!(matches!(err, ExecError::StartFailure { .. }));
    }

    #[tokio::test]
    async fn test_graceful_stop_sends_signal() {
        let manager = UnixProcessManager::new();
        let mut handle = manager.spawn_process(&sh("exec sleep 30")).await.unwrap();
        assert!(handle.is_running().await);

        let result = handle.request_graceful_stop(GracefulSignal::Terminate).await;
        assert_eq!(result, TerminationResult::Success);
        assert_eq!(handle.wait().await.unwrap(), ProcessStatus::Signaled(15));
    }

    #[tokio::test]
    async fn test_kill_is_idempotent() {
        let manager = UnixProcessManager::new();
        let mut handle = manager.spawn_process(&sh("exec sleep 30")).await.unwrap();

        assert_eq!(handle.kill(true).await, TerminationResult::Success);
        assert!(handle.get_pid().is_none());
        assert!(!handle.is_running().await);
        assert_eq!(handle.kill(true).await, TerminationResult::ProcessNotFound);
        assert_eq!(handle.kill(false).await, TerminationResult::ProcessNotFound);
        assert_eq!(
            handle.request_graceful_stop(GracefulSignal::Interrupt).await,
            TerminationResult::ProcessNotFound
        );
    }

    #[tokio::test]
    async fn test_kill_reaches_background_children() {
        let manager = UnixProcessManager::new();
        let mut handle = manager
            .spawn_process(&sh("sleep 30 & echo started; wait"))
            .await
            .unwrap();
        let mut stdout = handle.take_stdio().stdout.unwrap();

        let mut first = [0u8; 8];
        stdout.read_exact(&mut first).await.unwrap();
        assert_eq!(&first, b"started\n");

        assert_eq!(handle.kill(true).await, TerminationResult::Success);

        // The background sleep shares the pipe; EOF means it died too.
        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), stdout.read_to_end(&mut rest))
            .await
            .expect("background child kept the pipe open")
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_tree_kills_are_independent() {
        let manager = UnixProcessManager::new();
        let script = "sleep 30 & echo started; wait";
        let mut first = manager.spawn_process(&sh(script)).await.unwrap();
        let mut second = manager.spawn_process(&sh(script)).await.unwrap();
        let mut first_out = first.take_stdio().stdout.unwrap();
        let mut second_out = second.take_stdio().stdout.unwrap();

        let mut line = [0u8; 8];
        first_out.read_exact(&mut line).await.unwrap();
        second_out.read_exact(&mut line).await.unwrap();

        let (a, b) = tokio::join!(first.kill(true), second.kill(true));
        assert_eq!(a, TerminationResult::Success);
        assert_eq!(b, TerminationResult::Success);

        for mut stdout in [first_out, second_out] {
            let mut rest = Vec::new();
            tokio::time::timeout(Duration::from_secs(5), stdout.read_to_end(&mut rest))
                .await
                .expect("background child survived the kill")
                .unwrap();
        }
    }
}
