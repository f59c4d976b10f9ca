pub mod report;

use std::path::{Path, PathBuf};

use log::{info, warn};
use rayon::prelude::*;

use crate::auth::CredentialProvider;
use crate::chunker;
use crate::integrity;
use crate::metadata::{MediaDescriptor, UploadResult};
use crate::transport::HttpTransport;
use crate::upload::cancel::CancellationToken;
use crate::upload::progress::ProgressObserver;
use crate::upload::{UploadError, Uploader};
use report::ProgressReporter;

/// One file to upload with its metadata.
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub path: PathBuf,
    pub descriptor: MediaDescriptor,
}

/// Outcome of one job.
#[derive(Debug)]
pub struct FileReport {
    pub path: PathBuf,
    /// SHA-256 hex digest of the local file, if it could be read.
    pub sha256: Option<String>,
    pub outcome: Result<UploadResult, UploadError>,
}

/// Upload every job in its own session, in parallel.
///
/// Sessions share only the read-only uploader. With `fail_fast`, the first
/// fatal error cancels every other session at its next chunk boundary.
/// Reports come back in job order.
pub fn upload_files<T, C>(
    uploader: &Uploader<T, C>,
    jobs: Vec<UploadJob>,
    reporter: &ProgressReporter,
    cancel: &CancellationToken,
    fail_fast: bool,
) -> Vec<FileReport>
where
    T: HttpTransport,
    C: CredentialProvider,
{
    let observers: Vec<_> = (0..jobs.len()).map(|i| reporter.observer(i)).collect();

    jobs.into_par_iter()
        .zip(observers)
        .map(|(job, observer)| {
            let report = upload_one(uploader, job, &observer, cancel);
            if let Err(e) = &report.outcome {
                if fail_fast && !matches!(e, UploadError::Cancelled { .. }) {
                    warn!("{}: {}; cancelling remaining uploads", report.path.display(), e);
                    cancel.cancel();
                }
            }
            report
        })
        .collect()
}

fn upload_one<T, C, O>(
    uploader: &Uploader<T, C>,
    job: UploadJob,
    observer: &O,
    cancel: &CancellationToken,
) -> FileReport
where
    T: HttpTransport,
    C: CredentialProvider,
    O: ProgressObserver + ?Sized,
{
    let UploadJob { path, descriptor } = job;

    let sha256 = match integrity::sha256_file(&path) {
        Ok(digest) => digest,
        Err(e) => {
            return FileReport {
                path,
                sha256: None,
                outcome: Err(e.into()),
            }
        }
    };
    info!("{}: sha256 {}", path.display(), sha256);

    let outcome = chunker::open_file(&path)
        .map_err(UploadError::from)
        .and_then(|source| uploader.upload(&descriptor, source, observer, cancel));

    FileReport {
        path,
        sha256: Some(sha256),
        outcome,
    }
}

/// Short label for progress bars.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
