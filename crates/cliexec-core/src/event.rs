use std::fmt;

use crate::process::ProcessId;

/// One step of a run, in emission order.
///
/// A run yields exactly one `Started` first, then output lines, then exactly
/// one `Exited`. Lines keep their order within a stream; stdout and stderr
/// lines may interleave arbitrarily.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    Started { process_id: ProcessId },
    StandardOutputLine { text: String },
    StandardErrorLine { text: String },
    Exited { exit_code: i32 },
}

impl ExecutionEvent {
    pub fn is_exited(&self) -> bool {
        matches!(self, ExecutionEvent::Exited { .. })
    }
}

impl fmt::Display for ExecutionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionEvent::Started { process_id } => write!(f, "Process started; ID: {process_id}"),
            ExecutionEvent::StandardOutputLine { text } => write!(f, "Out> {text}"),
            ExecutionEvent::StandardErrorLine { text } => write!(f, "Err> {text}"),
            ExecutionEvent::Exited { exit_code } => write!(f, "Process exited; Code: {exit_code}"),
        }
    }
}
