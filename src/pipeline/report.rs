use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::upload::progress::{ChannelObserver, ProgressEvent};
use crate::upload::UploadState;

/// Renders progress for a batch of uploads on its own thread.
///
/// Upload threads only push events into a channel, so a slow terminal never
/// holds up a chunk.
pub struct ProgressReporter {
    tx: Sender<(usize, ProgressEvent)>,
    handle: JoinHandle<()>,
}

impl ProgressReporter {
    /// One bar per label, drawn to stderr.
    pub fn spawn(labels: &[String]) -> Self {
        Self::with_target(labels, MultiProgress::new())
    }

    /// Same bookkeeping, nothing drawn.
    pub fn hidden(labels: &[String]) -> Self {
        Self::with_target(labels, MultiProgress::with_draw_target(ProgressDrawTarget::hidden()))
    }

    fn with_target(labels: &[String], multi: MultiProgress) -> Self {
        let style = ProgressStyle::default_bar()
            .template("{prefix:24!} [{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} {msg}")
            .unwrap()
            .progress_chars("##-");

        let bars: Vec<ProgressBar> = labels
            .iter()
            .map(|label| {
                let bar = multi.add(ProgressBar::new(0));
                bar.set_style(style.clone());
                bar.set_prefix(label.clone());
                bar.set_message("queued");
                bar
            })
            .collect();

        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || render(rx, bars));
        Self { tx, handle }
    }

    /// Observer for job `index`.
    pub fn observer(&self, index: usize) -> ChannelObserver {
        ChannelObserver::new(index, self.tx.clone())
    }

    /// Wait until every event has been drawn.
    pub fn finish(self) {
        drop(self.tx);
        let _ = self.handle.join();
    }
}

fn render(rx: Receiver<(usize, ProgressEvent)>, bars: Vec<ProgressBar>) {
    // Ends once every observer and the reporter's own sender are dropped.
    for (job, event) in rx {
        let Some(bar) = bars.get(job) else {
            continue;
        };
        if let Some(total) = event.total_bytes {
            bar.set_length(total);
        }
        bar.set_position(event.bytes_transferred);
        match event.state {
            UploadState::NotStarted => bar.set_message("queued"),
            UploadState::Initiating => bar.set_message("initiating"),
            UploadState::InProgress => bar.set_message("uploading"),
            UploadState::Complete => bar.finish_with_message("done"),
            UploadState::Failed => bar.abandon_with_message("failed"),
            UploadState::Cancelled => bar.abandon_with_message("cancelled"),
        }
    }
}
