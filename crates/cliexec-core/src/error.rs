use std::fmt;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Which of the two standard streams a pipe failure happened on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    StandardInput,
    StandardOutput,
    StandardError,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::StandardInput => f.write_str("stdin"),
            StreamKind::StandardOutput => f.write_str("stdout"),
            StreamKind::StandardError => f.write_str("stderr"),
        }
    }
}

/// The cancellation signal that stopped a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelKind {
    Forceful,
    Graceful,
}

impl fmt::Display for CancelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelKind::Forceful => f.write_str("forcefully"),
            CancelKind::Graceful => f.write_str("gracefully"),
        }
    }
}

/// Cancellation failure payload.
///
/// Carries the token that was responsible for the stop so the caller can tell
/// which of its two signals asked for it.
#[derive(Debug, Clone)]
pub struct Cancellation {
    kind: CancelKind,
    token: CancellationToken,
}

impl Cancellation {
    pub fn new(kind: CancelKind, token: CancellationToken) -> Self {
        Self { kind, token }
    }

    pub fn kind(&self) -> CancelKind {
        self.kind
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Error types for command execution
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Failed to start process '{command}': {source}")]
    StartFailure {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{command}' exited with non-zero exit code {exit_code}{}", format_stderr(.stderr))]
    NonZeroExit {
        command: String,
        exit_code: i32,
        stderr: Option<String>,
    },

    #[error("Command execution was canceled {}", .0.kind())]
    Canceled(Cancellation),

    #[error("Pipe failure on {stream}: {source}")]
    Pipe {
        stream: StreamKind,
        #[source]
        source: anyhow::Error,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Process management error: {0}")]
    Process(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

fn format_stderr(stderr: &Option<String>) -> String {
    match stderr.as_deref().map(str::trim_end) {
        Some(text) if !text.is_empty() => format!("\n\nStandard error:\n{text}"),
        _ => String::new(),
    }
}

impl ExecError {
    pub fn start_failure(command: impl Into<String>, source: std::io::Error) -> Self {
        ExecError::StartFailure {
            command: command.into(),
            source,
        }
    }

    pub fn canceled(kind: CancelKind, token: &CancellationToken) -> Self {
        ExecError::Canceled(Cancellation::new(kind, token.clone()))
    }

    pub fn pipe(stream: StreamKind, source: impl Into<anyhow::Error>) -> Self {
        ExecError::Pipe {
            stream,
            source: source.into(),
        }
    }

    pub fn process_error(message: impl Into<String>) -> Self {
        ExecError::Process(message.into())
    }

    /// Check if the run was stopped by one of its cancellation signals
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ExecError::Canceled(_))
    }

    pub fn cancellation(&self) -> Option<&Cancellation> {
        match self {
            ExecError::Canceled(cancellation) => Some(cancellation),
            _ => None,
        }
    }

    /// Check if re-running the same command cannot succeed without changes
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ExecError::StartFailure { .. } | ExecError::Configuration(_)
        )
    }
}
