//! Consumption shapes over a run's event sequence.
//!
//! Each projection only reads [`RunItem`](crate::engine::RunItem)s; the
//! cancellation protocol lives in the engine alone, so all four report the
//! same outcome for the same run.

mod buffered;
mod observable;
mod stream;
mod task;

pub(crate) use buffered::collect_buffered;
pub use buffered::BufferedCommandResult;
pub use observable::{EventObservable, Notification, Subscription};
pub use stream::EventStream;
pub use task::{CommandResult, CommandTask};
