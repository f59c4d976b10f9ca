use std::sync::mpsc::Sender;

use super::UploadState;

/// Snapshot emitted after every state transition and chunk acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub state: UploadState,
    pub bytes_transferred: u64,
    pub total_bytes: Option<u64>,
}

impl ProgressEvent {
    /// Fraction complete in `[0, 1]`, when the total is known.
    pub fn fraction(&self) -> Option<f64> {
        match self.total_bytes {
            Some(0) => Some(1.0),
            Some(total) => Some(self.bytes_transferred as f64 / total as f64),
            None => None,
        }
    }
}

/// Receives progress events synchronously on the upload thread.
///
/// Implementations must return promptly; slow work belongs on another thread
/// (see [`ChannelObserver`]).
pub trait ProgressObserver {
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F: Fn(&ProgressEvent)> ProgressObserver for F {
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Ignores all events.
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

/// Forwards events over an unbounded channel so rendering never stalls the
/// upload. Each event is tagged with a job index.
pub struct ChannelObserver {
    job: usize,
    tx: Sender<(usize, ProgressEvent)>,
}

impl ChannelObserver {
    pub fn new(job: usize, tx: Sender<(usize, ProgressEvent)>) -> Self {
        Self { job, tx }
    }
}

impl ProgressObserver for ChannelObserver {
    fn on_progress(&self, event: &ProgressEvent) {
        // A dropped receiver only means nobody is watching.
        let _ = self.tx.send((self.job, *event));
    }
}
