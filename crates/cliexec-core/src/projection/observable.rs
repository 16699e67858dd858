use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::stream::Launch;
use crate::error::ExecError;
use crate::event::ExecutionEvent;

/// What subscribers of an [`EventObservable`] receive
#[derive(Debug, Clone)]
pub enum Notification {
    Next(ExecutionEvent),
    /// The run failed; no further notifications follow
    Error(Arc<ExecError>),
    /// Sent right after `Next(Exited)`; no further notifications follow
    Completed,
}

impl Notification {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Notification::Error(_) | Notification::Completed)
    }
}

/// Hot, multicast stream of a run's events.
///
/// Subscribers attach with [`subscribe`](Self::subscribe); the run starts on
/// [`connect`](Self::connect). Subscribing late does not replay earlier
/// events, and dropping subscribers or the observable does not stop the run.
/// Every subscriber gets its own unbounded queue, so a slow reader sees every
/// notification published after it subscribed. A subscription taken after the
/// run ended yields nothing.
pub struct EventObservable {
    subject: Arc<Subject>,
    launch: Option<Launch>,
}

/// Live subscribers of one run
#[derive(Default)]
struct Subject {
    state: Mutex<SubjectState>,
}

#[derive(Default)]
struct SubjectState {
    subscribers: Vec<mpsc::UnboundedSender<Notification>>,
    ended: bool,
}

impl Subject {
    fn lock(&self) -> MutexGuard<'_, SubjectState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deliver to every live subscriber; the terminal notification closes them all
    fn publish(&self, notification: Notification) {
        let mut state = self.lock();
        let terminal = notification.is_terminal();
        state
            .subscribers
            .retain(|subscriber| subscriber.send(notification.clone()).is_ok());
        if terminal {
            state.ended = true;
            state.subscribers.clear();
        }
    }
}

impl EventObservable {
    pub(crate) fn new(launch: Launch) -> Self {
        Self {
            subject: Arc::new(Subject::default()),
            launch: Some(launch),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.subject.lock();
        if !state.ended {
            state.subscribers.push(tx);
        }
        // Dropping `tx` for an ended run closes the subscription right away.
        Subscription { rx, finished: false }
    }

    pub fn is_connected(&self) -> bool {
        self.launch.is_none()
    }

    /// Start the run and begin publishing. Returns `None` if already
    /// connected; otherwise the publishing task, which ends with the run.
    pub fn connect(&mut self) -> Option<JoinHandle<()>> {
        let launch = self.launch.take()?;
        let mut receiver = launch();
        let subject = self.subject.clone();

        Some(tokio::spawn(async move {
            while let Some(item) = receiver.next().await {
                match item {
                    Ok(event) => {
                        let exited = event.is_exited();
                        subject.publish(Notification::Next(event));
                        if exited {
                            subject.publish(Notification::Completed);
                        }
                    }
                    Err(e) => subject.publish(Notification::Error(Arc::new(e))),
                }
            }
        }))
    }
}

/// One subscriber's view of an [`EventObservable`]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Notification>,
    finished: bool,
}

impl Subscription {
    /// Next notification, or `None` after a terminal one
    pub async fn next(&mut self) -> Option<Notification> {
        if self.finished {
            return None;
        }

        match self.rx.recv().await {
            Some(notification) => {
                self.finished = notification.is_terminal();
                Some(notification)
            }
            None => {
                self.finished = true;
                None
            }
        }
    }
}
