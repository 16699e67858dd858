use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_stream::Stream;

use crate::engine::{EventReceiver, RunItem};

/// Starts a run and hands back its event sequence
pub(crate) type Launch = Box<dyn FnOnce() -> EventReceiver + Send>;

enum StreamState {
    Pending(Option<Launch>),
    Running(EventReceiver),
}

/// Pull-based, single-pass sequence of a run's events.
///
/// Nothing happens until the first poll, which starts the process. Each item
/// is `Ok(event)` until `Exited` ends the sequence; a failed run (including
/// cancellation) ends it with one `Err` instead. Start a new stream to retry.
pub struct EventStream {
    state: StreamState,
}

impl EventStream {
    pub(crate) fn new(launch: Launch) -> Self {
        Self {
            state: StreamState::Pending(Some(launch)),
        }
    }

    /// Whether polling has started the run
    pub fn is_started(&self) -> bool {
        matches!(self.state, StreamState::Running(_))
    }
}

impl Stream for EventStream {
    type Item = RunItem;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let StreamState::Pending(launch) = &mut this.state {
            let Some(launch) = launch.take() else {
                return Poll::Ready(None);
            };
            this.state = StreamState::Running(launch());
        }

        match &mut this.state {
            StreamState::Running(receiver) => receiver.poll_next_item(cx),
            StreamState::Pending(_) => Poll::Ready(None),
        }
    }
}
