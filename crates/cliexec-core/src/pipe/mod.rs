//! Standard-stream endpoints.
//!
//! A [`PipeSource`] feeds the child's stdin; a [`PipeTarget`] consumes its
//! stdout or stderr. Both are cheap cloneable handles over a trait object so
//! commands can be cloned and reused across runs.

mod lines;
mod source;
mod target;

pub use lines::{LineDecoder, TextEncoding};
pub use source::{InputSource, PipeSource};
pub use target::{AsyncLineHandler, OutputBuffer, OutputSink, OutputTarget, PipeTarget};
