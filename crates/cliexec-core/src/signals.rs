use tokio_util::sync::CancellationToken;

/// The two independent cancellation signals observed by a run.
///
/// `forceful` kills the process (and its descendants) immediately.
/// `graceful` asks the process to shut down and keeps collecting its output
/// until it exits. Forceful always wins when both fire. The same token may be
/// passed for both.
#[derive(Debug, Clone, Default)]
pub struct CancelSignals {
    pub forceful: CancellationToken,
    pub graceful: CancellationToken,
}

impl CancelSignals {
    pub fn new(forceful: CancellationToken, graceful: CancellationToken) -> Self {
        Self { forceful, graceful }
    }

    /// Signals that are never triggered
    pub fn none() -> Self {
        Self::default()
    }

    pub fn forceful(token: CancellationToken) -> Self {
        Self {
            forceful: token,
            graceful: CancellationToken::new(),
        }
    }

    pub fn graceful(token: CancellationToken) -> Self {
        Self {
            forceful: CancellationToken::new(),
            graceful: token,
        }
    }
}

impl From<CancellationToken> for CancelSignals {
    fn from(token: CancellationToken) -> Self {
        CancelSignals::forceful(token)
    }
}
