#![allow(dead_code)]

use cliexec::{Command, CommandBuilder, ProcessId};
use std::time::Duration;

/// Prints a line, then sleeps in a background child. SIGINT makes it kill the
/// child, print "Canceled." and exit 0; left alone it prints "Done.".
pub const SLEEPER: &str = "trap 'kill $pid 2>/dev/null; echo Canceled.; exit 0' INT; \
     echo 'Sleeping for 20 seconds'; \
     sleep 20 </dev/null >/dev/null 2>&1 & pid=$!; \
     wait $pid; \
     echo Done.";

/// Like [`SLEEPER`] but ignores SIGINT and reports the child's pid
pub const STUBBORN: &str = "trap '' INT; \
     sleep 20 & echo \"child $!\"; \
     wait";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_thread_ids(false)
        .with_target(false)
        .with_line_number(true)
        .with_test_writer()
        .try_init();
}

pub fn sh_builder(script: &str) -> CommandBuilder {
    let mut builder = Command::builder();
    builder.target_path("sh").args(["-c", script]);
    builder
}

pub fn sh(script: &str) -> Command {
    sh_builder(script).build().unwrap()
}

/// Whether `pid` names a live, non-zombie process
pub fn is_alive(pid: ProcessId) -> bool {
    let exists = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok();
    if !exists {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        // The state follows the parenthesised command name
        Ok(stat) => stat
            .rsplit_once(')')
            .map(|(_, rest)| !rest.trim_start().starts_with('Z'))
            .unwrap_or(true),
        Err(_) => true,
    }
}

/// Poll until `pid` is gone or `timeout` elapses
pub async fn wait_until_dead(pid: ProcessId, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if !is_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    !is_alive(pid)
}
