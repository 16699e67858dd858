//! cliexec - run external commands with graceful and forceful cancellation
//!
//! Build a [`Command`], then run it through [`engine()`] or the
//! [`CommandExt`] shortcuts as an awaitable task, a buffered result, a pull
//! stream, or a hot observable. The process manager for the current platform
//! is selected at compile time.

mod command_ext;
mod factory;
mod logging;

pub use command_ext::CommandExt;
pub use factory::{PlatformProcessManager, PlatformProcessManagerFactory, engine};
pub use logging::{LOG_ENV, LogFormat, init_tracing};

// Re-export core functionality
pub use cliexec_core::*;
