//! Resumable upload orchestrator.
//!
//! One call to [`Uploader::upload`] drives one session:
//!
//! ```text
//! NotStarted → Initiating ──(session URI)──→ InProgress ──(200/201)──→ Complete
//!                   │                          │  ▲
//!                   │                    308   │  │ next chunk from the
//!                   │                 Range=N  └──┘ server-confirmed offset
//!                   └──────────(fatal error)──────────→ Failed
//! ```
//!
//! After a transient failure the acknowledged offset is always re-derived from a
//! status probe before anything else is sent, so no byte range reaches the
//! durable resource twice and none is skipped.

pub mod cancel;
pub mod progress;
pub mod retry;

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use reqwest::{Method, Url};
use thiserror::Error;

use crate::auth::{AuthError, CredentialProvider};
use crate::chunker::MediaSource;
use crate::config::UploadConfig;
use crate::metadata::{MediaDescriptor, UploadResult, Video};
use crate::protocol::{self, ResponseClass};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};

use cancel::CancellationToken;
use progress::{ProgressEvent, ProgressObserver};
use retry::BackoffPolicy;

/// Longest stretch a backoff sleeps without looking at the cancellation token.
const BACKOFF_SLICE: Duration = Duration::from_millis(50);

/// Lifecycle of one upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    NotStarted,
    Initiating,
    InProgress,
    Complete,
    Failed,
    Cancelled,
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("metadata rejected: {0}")]
    Validation(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("upload rejected by server ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("gave up after {attempts} attempts with {acknowledged} bytes acknowledged: {last}")]
    RetriesExhausted {
        attempts: u32,
        acknowledged: u64,
        last: String,
    },
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("upload cancelled after {acknowledged} bytes")]
    Cancelled { acknowledged: u64 },
    #[error("failed to read payload: {0}")]
    Source(#[from] io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl UploadError {
    pub fn is_transient(&self) -> bool {
        matches!(self, UploadError::Transient(_))
    }

    /// Bytes the server held when the upload stopped, where that is known.
    pub fn acknowledged(&self) -> Option<u64> {
        match self {
            UploadError::RetriesExhausted { acknowledged, .. }
            | UploadError::Cancelled { acknowledged } => Some(*acknowledged),
            _ => None,
        }
    }
}

impl From<TransportError> for UploadError {
    fn from(e: TransportError) -> Self {
        if e.is_transient() {
            UploadError::Transient(e.to_string())
        } else {
            UploadError::Protocol(e.to_string())
        }
    }
}

/// State of one resumable session. Owned by a single `upload` call.
#[derive(Debug)]
pub struct UploadSession {
    uri: Url,
    total: Option<u64>,
    acknowledged: u64,
    state: UploadState,
}

impl UploadSession {
    pub fn new(uri: Url, total: Option<u64>) -> Self {
        Self {
            uri,
            total,
            acknowledged: 0,
            state: UploadState::InProgress,
        }
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn acknowledged(&self) -> u64 {
        self.acknowledged
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Record the server's confirmed byte count. Returns whether it advanced.
    ///
    /// The count may be below what was just sent, but never below what was
    /// confirmed before and never past the known total.
    pub fn acknowledge(&mut self, received: u64) -> Result<bool, UploadError> {
        if received < self.acknowledged {
            return Err(UploadError::Protocol(format!(
                "server confirmed {} bytes after previously confirming {}",
                received, self.acknowledged
            )));
        }
        if let Some(total) = self.total {
            if received > total {
                return Err(UploadError::Protocol(format!(
                    "server confirmed {} bytes of a {}-byte payload",
                    received, total
                )));
            }
        }
        let advanced = received > self.acknowledged;
        self.acknowledged = received;
        Ok(advanced)
    }

    /// Fix the total once a stream reaches its end.
    pub fn learn_total(&mut self, total: u64) -> Result<(), UploadError> {
        match self.total {
            Some(known) if known != total => Err(UploadError::Source(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("payload is {} bytes but {} were declared", total, known),
            ))),
            _ => {
                self.total = Some(total);
                Ok(())
            }
        }
    }

    /// Leave the session in `Cancelled` or `Failed`, matching `error`.
    fn stop(&mut self, error: &UploadError) {
        self.state = terminal_state(error);
    }

    fn complete(&mut self) {
        if let Some(total) = self.total {
            self.acknowledged = total;
        }
        self.state = UploadState::Complete;
    }
}

fn terminal_state(error: &UploadError) -> UploadState {
    match error {
        UploadError::Cancelled { .. } => UploadState::Cancelled,
        _ => UploadState::Failed,
    }
}

/// Emit the terminal event for a stopped upload and hand the error back.
///
/// `acknowledged` is the last count the observer saw, so the bar never moves backwards.
fn report_stopped<O>(observer: &O, error: UploadError, acknowledged: u64, total: Option<u64>) -> UploadError
where
    O: ProgressObserver + ?Sized,
{
    observer.on_progress(&ProgressEvent {
        state: terminal_state(&error),
        bytes_transferred: acknowledged,
        total_bytes: total,
    });
    error
}

/// Sleep for `delay` in short slices, returning early once `cancel` fires.
fn backoff_sleep(delay: Duration, cancel: &CancellationToken) {
    let deadline = Instant::now() + delay;
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(BACKOFF_SLICE));
    }
}

enum ChunkReply {
    Complete(Video),
    Incomplete(u64),
}

fn header_value(value: &str) -> Result<HeaderValue, UploadError> {
    HeaderValue::from_str(value)
        .map_err(|_| UploadError::Protocol(format!("invalid header value: {value}")))
}

fn parse_video(response: &HttpResponse) -> Result<Video, UploadError> {
    serde_json::from_slice(&response.body)
        .map_err(|e| UploadError::Protocol(format!("unreadable video resource: {}", e)))
}

/// Drives resumable (or, when configured, direct) uploads.
///
/// Holds no per-upload state, so one uploader can serve many concurrent sessions.
pub struct Uploader<T, C> {
    transport: T,
    credentials: C,
    config: UploadConfig,
    backoff: BackoffPolicy,
    endpoint: Url,
}

impl<T: HttpTransport, C: CredentialProvider> Uploader<T, C> {
    pub fn new(transport: T, credentials: C, config: UploadConfig) -> Result<Self, UploadError> {
        config.validate().map_err(UploadError::Config)?;
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| UploadError::Config(format!("invalid upload endpoint: {}", e)))?;
        Ok(Self {
            transport,
            credentials,
            backoff: BackoffPolicy::from_config(&config),
            config,
            endpoint,
        })
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Upload `source` with `descriptor` attached.
    ///
    /// The source is consumed and dropped before this returns, whatever the outcome.
    pub fn upload<S, O>(
        &self,
        descriptor: &MediaDescriptor,
        source: S,
        observer: &O,
        cancel: &CancellationToken,
    ) -> Result<UploadResult, UploadError>
    where
        S: MediaSource,
        O: ProgressObserver + ?Sized,
    {
        let total = source.total_len();
        observer.on_progress(&ProgressEvent {
            state: UploadState::NotStarted,
            bytes_transferred: 0,
            total_bytes: total,
        });

        let result = match descriptor.validate() {
            Err(msg) => Err(report_stopped(observer, UploadError::Validation(msg), 0, total)),
            Ok(()) if self.config.direct => self
                .upload_direct(descriptor, source, observer, cancel)
                .map_err(|e| report_stopped(observer, e, 0, total)),
            Ok(()) => self.upload_resumable(descriptor, source, observer, cancel),
        };

        match &result {
            Ok(r) => info!("upload complete: video {} ({} bytes)", r.id, r.bytes),
            Err(e) => match e {
                UploadError::Cancelled { .. } => info!("upload cancelled"),
                _ => warn!("upload failed: {}", e),
            },
        }
        result
    }

    fn upload_resumable<S, O>(
        &self,
        descriptor: &MediaDescriptor,
        mut source: S,
        observer: &O,
        cancel: &CancellationToken,
    ) -> Result<UploadResult, UploadError>
    where
        S: MediaSource,
        O: ProgressObserver + ?Sized,
    {
        let total = source.total_len();
        let mut bearer = self
            .credentials
            .bearer_token()
            .map_err(|e| report_stopped(observer, e.into(), 0, total))?;

        observer.on_progress(&ProgressEvent {
            state: UploadState::Initiating,
            bytes_transferred: 0,
            total_bytes: total,
        });
        let uri = self
            .initiate_with_retry(&mut bearer, descriptor, total, cancel)
            .map_err(|e| report_stopped(observer, e, 0, total))?;
        info!("resumable session opened: {}", uri);

        let mut session = UploadSession::new(uri, total);
        observer.on_progress(&ProgressEvent {
            state: UploadState::InProgress,
            bytes_transferred: 0,
            total_bytes: total,
        });

        let outcome = self.run_session(
            &mut bearer,
            &mut session,
            &mut source,
            &descriptor.content_type,
            observer,
            cancel,
        );
        drop(source);
        let video = match outcome {
            Ok(video) => video,
            Err(e) => {
                session.stop(&e);
                return Err(report_stopped(
                    observer,
                    e,
                    session.acknowledged(),
                    session.total(),
                ));
            }
        };

        session.complete();
        observer.on_progress(&ProgressEvent {
            state: UploadState::Complete,
            bytes_transferred: session.acknowledged(),
            total_bytes: session.total(),
        });
        Ok(UploadResult {
            id: video.id.clone(),
            video,
            bytes: session.acknowledged(),
        })
    }

    fn initiate_with_retry(
        &self,
        bearer: &mut String,
        descriptor: &MediaDescriptor,
        total: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<Url, UploadError> {
        let mut failures = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled { acknowledged: 0 });
            }
            match self.initiate(bearer, descriptor, total) {
                Err(e) if e.is_transient() => {
                    failures += 1;
                    if !self.backoff.allows_retry(failures) {
                        return Err(UploadError::RetriesExhausted {
                            attempts: failures,
                            acknowledged: 0,
                            last: e.to_string(),
                        });
                    }
                    let delay = self.backoff.delay(failures);
                    warn!("initiation failed ({}), retrying in {:?}", e, delay);
                    backoff_sleep(delay, cancel);
                }
                other => return other,
            }
        }
    }

    fn initiate(
        &self,
        bearer: &mut String,
        descriptor: &MediaDescriptor,
        total: Option<u64>,
    ) -> Result<Url, UploadError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("uploadType", "resumable")
            .append_pair("part", &self.config.parts);

        let mut request = HttpRequest::new(Method::POST, url);
        request.body = serde_json::to_vec(&descriptor.to_resource())
            .map_err(|e| UploadError::Protocol(e.to_string()))?;
        request.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=UTF-8"),
        );
        request
            .headers
            .insert("X-Upload-Content-Type", header_value(&descriptor.content_type)?);
        if let Some(total) = total {
            request
                .headers
                .insert("X-Upload-Content-Length", HeaderValue::from(total));
        }

        let response = self.send_authorized(bearer, request)?;
        match protocol::classify(response.status) {
            ResponseClass::Complete => {
                let location = response.header(LOCATION.as_str()).ok_or_else(|| {
                    UploadError::Protocol("initiation response carried no session URI".to_string())
                })?;
                self.endpoint
                    .join(location)
                    .map_err(|e| UploadError::Protocol(format!("bad session URI {}: {}", location, e)))
            }
            ResponseClass::Transient => Err(UploadError::Transient(protocol::error_message(&response))),
            ResponseClass::Unauthorized => Err(AuthError::Rejected.into()),
            ResponseClass::Incomplete => Err(UploadError::Protocol(format!(
                "unexpected {} answering initiation",
                response.status
            ))),
            ResponseClass::SessionGone | ResponseClass::Fatal => {
                Err(UploadError::Validation(protocol::error_message(&response)))
            }
        }
    }

    fn run_session<S, O>(
        &self,
        bearer: &mut String,
        session: &mut UploadSession,
        source: &mut S,
        content_type: &str,
        observer: &O,
        cancel: &CancellationToken,
    ) -> Result<Video, UploadError>
    where
        S: MediaSource,
        O: ProgressObserver + ?Sized,
    {
        let mut failures = 0;
        let mut needs_probe = false;
        loop {
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled {
                    acknowledged: session.acknowledged(),
                });
            }

            let probed = needs_probe;
            let reply = if needs_probe {
                self.probe(bearer, session)
            } else {
                let chunk = source.read_chunk(session.acknowledged(), self.config.chunk_size)?;
                if chunk.is_last {
                    session.learn_total(chunk.end())?;
                }
                let range = protocol::content_range(chunk.offset, chunk.data.len(), session.total());
                debug!("sending {}", range);
                let mut request = HttpRequest::new(Method::PUT, session.uri().clone());
                request.headers.insert(CONTENT_RANGE, header_value(&range)?);
                request.headers.insert(CONTENT_TYPE, header_value(content_type)?);
                request.body = chunk.data;
                self.send_authorized(bearer, request)
                    .and_then(|response| self.interpret(&response))
            };

            let error = match reply {
                Ok(ChunkReply::Complete(video)) => return Ok(video),
                Ok(ChunkReply::Incomplete(received)) => {
                    needs_probe = false;
                    let advanced = session.acknowledge(received)?;
                    observer.on_progress(&ProgressEvent {
                        state: UploadState::InProgress,
                        bytes_transferred: session.acknowledged(),
                        total_bytes: session.total(),
                    });
                    if advanced {
                        failures = 0;
                        continue;
                    }
                    if probed {
                        // The probe only told us where to resume.
                        continue;
                    }
                    UploadError::Transient(format!(
                        "server made no progress past byte {}",
                        session.acknowledged()
                    ))
                }
                Err(e) if e.is_transient() => {
                    needs_probe = true;
                    e
                }
                Err(e) => return Err(e),
            };

            failures += 1;
            if !self.backoff.allows_retry(failures) {
                return Err(UploadError::RetriesExhausted {
                    attempts: failures,
                    acknowledged: session.acknowledged(),
                    last: error.to_string(),
                });
            }
            let delay = self.backoff.delay(failures);
            warn!(
                "{} at byte {}, retrying in {:?} ({}/{})",
                error,
                session.acknowledged(),
                delay,
                failures,
                self.backoff.max_attempts
            );
            backoff_sleep(delay, cancel);
        }
    }

    /// Ask the server how many bytes of the session it holds.
    fn probe(&self, bearer: &mut String, session: &UploadSession) -> Result<ChunkReply, UploadError> {
        let range = protocol::probe_range(session.total());
        debug!("probing session status: {}", range);
        let mut request = HttpRequest::new(Method::PUT, session.uri().clone());
        request.headers.insert(CONTENT_RANGE, header_value(&range)?);
        let response = self.send_authorized(bearer, request)?;
        self.interpret(&response)
    }

    fn interpret(&self, response: &HttpResponse) -> Result<ChunkReply, UploadError> {
        match protocol::classify(response.status) {
            ResponseClass::Complete => Ok(ChunkReply::Complete(parse_video(response)?)),
            ResponseClass::Incomplete => protocol::parse_received(response.header(RANGE.as_str()))
                .map(ChunkReply::Incomplete)
                .map_err(UploadError::Protocol),
            ResponseClass::Unauthorized => Err(AuthError::Rejected.into()),
            ResponseClass::Transient => Err(UploadError::Transient(protocol::error_message(response))),
            ResponseClass::SessionGone => Err(UploadError::Rejected {
                status: response.status.as_u16(),
                message: format!("upload session expired: {}", protocol::error_message(response)),
            }),
            ResponseClass::Fatal => Err(UploadError::Rejected {
                status: response.status.as_u16(),
                message: protocol::error_message(response),
            }),
        }
    }

    /// Send with the current token; on 401 refresh once and resend the same request.
    fn send_authorized(
        &self,
        bearer: &mut String,
        request: HttpRequest,
    ) -> Result<HttpResponse, UploadError> {
        let response = self.send_with_token(bearer, request.clone())?;
        if protocol::classify(response.status) != ResponseClass::Unauthorized {
            return Ok(response);
        }

        warn!("access token rejected, refreshing");
        *bearer = self.credentials.refresh(bearer)?;
        let response = self.send_with_token(bearer, request)?;
        if protocol::classify(response.status) == ResponseClass::Unauthorized {
            return Err(AuthError::Rejected.into());
        }
        Ok(response)
    }

    fn send_with_token(&self, token: &str, mut request: HttpRequest) -> Result<HttpResponse, UploadError> {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| AuthError::InvalidToken)?;
        request.headers.insert(AUTHORIZATION, value);
        Ok(self.transport.send(request)?)
    }

    /// Single-request upload of a small payload. Any failure is final.
    fn upload_direct<S, O>(
        &self,
        descriptor: &MediaDescriptor,
        mut source: S,
        observer: &O,
        cancel: &CancellationToken,
    ) -> Result<UploadResult, UploadError>
    where
        S: MediaSource,
        O: ProgressObserver + ?Sized,
    {
        let total = source.total_len().ok_or_else(|| {
            UploadError::Config("direct upload needs a payload of known size".to_string())
        })?;
        if total > self.config.direct_upload_limit {
            return Err(UploadError::Config(format!(
                "payload of {} bytes exceeds the direct upload limit of {}",
                total, self.config.direct_upload_limit
            )));
        }
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled { acknowledged: 0 });
        }

        let bearer = self.credentials.bearer_token()?;
        observer.on_progress(&ProgressEvent {
            state: UploadState::InProgress,
            bytes_transferred: 0,
            total_bytes: Some(total),
        });

        let media = source.read_chunk(0, total as usize)?;
        drop(source);
        let metadata = serde_json::to_vec(&descriptor.to_resource())
            .map_err(|e| UploadError::Protocol(e.to_string()))?;
        let boundary = protocol::multipart_boundary();

        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("uploadType", "multipart")
            .append_pair("part", &self.config.parts);
        let mut request = HttpRequest::new(Method::POST, url);
        request.headers.insert(
            CONTENT_TYPE,
            header_value(&format!("multipart/related; boundary={}", boundary))?,
        );
        request.body =
            protocol::multipart_body(&boundary, &metadata, &descriptor.content_type, &media.data);

        let response = self.send_with_token(&bearer, request)?;
        match protocol::classify(response.status) {
            ResponseClass::Complete => {
                let video = parse_video(&response)?;
                observer.on_progress(&ProgressEvent {
                    state: UploadState::Complete,
                    bytes_transferred: total,
                    total_bytes: Some(total),
                });
                Ok(UploadResult {
                    id: video.id.clone(),
                    video,
                    bytes: total,
                })
            }
            ResponseClass::Unauthorized => Err(AuthError::Rejected.into()),
            ResponseClass::Transient => Err(UploadError::Transient(protocol::error_message(&response))),
            _ => Err(UploadError::Validation(protocol::error_message(&response))),
        }
    }
}

#[cfg(test)]
mod tests;
