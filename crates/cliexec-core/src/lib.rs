//! cliexec core - Platform-independent command execution
//!
//! This crate provides the command descriptor, pipe adapters, process traits,
//! the execution engine with its cancellation protocol, and the result
//! projections. Platform crates implement [`ProcessLifecycle`] and
//! [`ProcessHandle`].

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod pipe;
pub mod process;
pub mod projection;
pub mod signals;

#[cfg(test)]
mod testing;

pub use config::*;
pub use engine::{EventReceiver, ExecutionEngine, Outcome, RunItem, RunState, StreamEncodings};
pub use error::*;
pub use event::*;
pub use pipe::*;
pub use process::*;
pub use projection::*;
pub use signals::*;

pub use tokio_util::sync::CancellationToken;
