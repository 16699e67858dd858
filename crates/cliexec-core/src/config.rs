use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::pipe::{PipeSource, PipeTarget};

/// Signal delivered to the child when graceful cancellation is requested
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GracefulSignal {
    /// Ctrl+C equivalent (SIGINT on Unix)
    #[default]
    Interrupt,
    /// Polite termination request (SIGTERM on Unix)
    Terminate,
}

/// Engine tuning shared by every run of a command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionConfig {
    /// Signal used for graceful stop requests
    #[serde(default)]
    pub graceful_signal: GracefulSignal,

    /// Whether a forceful stop also kills the processes the child spawned
    #[serde(default = "default_kill_process_tree")]
    pub kill_process_tree: bool,

    /// Bytes requested per read from stdout/stderr
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Bound of the internal event channel between the run and its consumer
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            graceful_signal: GracefulSignal::default(),
            kill_process_tree: default_kill_process_tree(),
            read_buffer_size: default_read_buffer_size(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl ExecutionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.read_buffer_size == 0 {
            return Err(anyhow::anyhow!("read_buffer_size must be positive"));
        }

        if self.read_buffer_size > MAX_READ_BUFFER_SIZE {
            return Err(anyhow::anyhow!(
                "read_buffer_size should not exceed {MAX_READ_BUFFER_SIZE} bytes"
            ));
        }

        if self.event_channel_capacity == 0 {
            return Err(anyhow::anyhow!("event_channel_capacity must be positive"));
        }

        Ok(())
    }
}

const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

fn default_kill_process_tree() -> bool {
    true
}
fn default_read_buffer_size() -> usize {
    4096
}
fn default_event_channel_capacity() -> usize {
    256
}

/// Identity the child runs as. Only honored on Unix.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

/// How the awaitable and buffered results treat the exit code
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultValidation {
    /// Non-zero exit codes fail the run with `ExecError::NonZeroExit`
    #[default]
    ZeroExitCode,
    /// Any exit code is reported as a result
    None,
}

/// Fully resolved description of one process invocation
#[derive(Debug, Clone, Builder)]
#[builder(setter(into, strip_option))]
pub struct Command {
    pub target_path: String,
    #[builder(default)]
    #[builder(setter(custom))]
    pub args: Vec<String>,
    #[builder(default)]
    pub working_directory: Option<PathBuf>,
    #[builder(default)]
    #[builder(setter(custom))]
    pub env: HashMap<String, String>,
    #[builder(default)]
    pub credentials: Option<Credentials>,
    #[builder(default)]
    pub stdin: PipeSource,
    #[builder(default)]
    pub stdout: PipeTarget,
    #[builder(default)]
    pub stderr: PipeTarget,
    #[builder(default)]
    pub validation: ResultValidation,
    #[builder(default)]
    pub config: ExecutionConfig,
}

impl Command {
    pub fn builder() -> CommandBuilder {
        CommandBuilder::default()
    }

    /// Target path followed by the arguments, for logs and error messages
    pub fn display_line(&self) -> String {
        std::iter::once(self.target_path.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl CommandBuilder {
    pub fn args<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        let args: Vec<String> = iter.into_iter().map(|s| s.to_string()).collect();
        self.args = Some(args);
        self
    }

    pub fn env<T: ToString>(&mut self, key: T, value: T) -> &mut Self {
        let map = self.env.get_or_insert_with(HashMap::new);
        map.insert(key.to_string(), value.to_string());

        self
    }

    pub fn env_multi<T: ToString, I: IntoIterator<Item = (T, T)>>(&mut self, iter: I) -> &mut Self {
        let env = self.env.get_or_insert_with(HashMap::new);
        for (key, value) in iter {
            env.insert(key.to_string(), value.to_string());
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ExecutionConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.kill_process_tree);
        assert_eq!(config.graceful_signal, GracefulSignal::Interrupt);
    }

    #[test]
    fn test_invalid_config() {
        let mut config = ExecutionConfig {
            read_buffer_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.read_buffer_size = 2 * 1024 * 1024;
        assert!(config.validate().is_err());

        config.read_buffer_size = 1024;
        config.event_channel_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serialization() {
        let config: ExecutionConfig =
            serde_json::from_str(r#"{"gracefulSignal":"terminate","readBufferSize":512}"#).unwrap();
        assert_eq!(config.graceful_signal, GracefulSignal::Terminate);
        assert_eq!(config.read_buffer_size, 512);
        assert_eq!(config.event_channel_capacity, 256);

        let json = serde_json::to_string(&config).unwrap();
        let deserialized: ExecutionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_command_builder() {
        let command = Command::builder()
            .target_path("git")
            .args(["status", "--short"])
            .working_directory("/tmp")
            .env("GIT_PAGER", "cat")
            .env_multi([("LANG", "C"), ("GIT_PAGER", "less")])
            .build()
            .unwrap();

        assert_eq!(command.args, vec!["status", "--short"]);
        assert_eq!(command.working_directory, Some(PathBuf::from("/tmp")));
        assert_eq!(command.env.get("GIT_PAGER").map(String::as_str), Some("less"));
        assert_eq!(command.env.len(), 2);
        assert_eq!(command.validation, ResultValidation::ZeroExitCode);
        assert!(command.stdin.is_null());
        assert!(command.stdout.is_null());
        assert_eq!(command.display_line(), "git status --short");
    }

    #[test]
    fn test_command_builder_requires_target() {
        assert!(Command::builder().args(["-la"]).build().is_err());
    }
}
