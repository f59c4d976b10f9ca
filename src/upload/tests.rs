use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reqwest::header::HeaderValue;
use reqwest::StatusCode;

use super::*;
use crate::chunker::{Chunk, SeekableSource, StreamSource};
use crate::config::CHUNK_GRANULARITY;
use crate::upload::progress::NoopObserver;

const MIB: usize = 1_048_576;
const SESSION_PATH: &str = "/upload/youtube/v3/videos?upload_id=session-1";

/// What the fake server does to one chunk PUT.
#[derive(Debug, Clone, Copy)]
enum Fault {
    /// Persist the chunk, then lose the response.
    LoseResponse,
    /// Fail before anything reaches the server.
    Refuse,
    /// Answer with a status and leave state untouched.
    Status(u16),
    /// Persist only this many bytes of the chunk.
    Partial(usize),
    /// Rotate the accepted token and answer 401.
    ExpireToken(&'static str),
}

#[derive(Debug, Clone)]
struct Logged {
    method: Method,
    url: String,
    content_range: Option<String>,
    authorization: Option<String>,
    upload_length: Option<String>,
    body_len: usize,
}

struct ServerState {
    token: String,
    received: Vec<u8>,
    total: Option<u64>,
    complete: bool,
    chunk_puts: usize,
    chunk_faults: HashMap<usize, Fault>,
    init_statuses: Vec<u16>,
    direct_status: Option<u16>,
    log: Vec<Logged>,
}

/// In-memory resumable upload endpoint.
struct FakeServer {
    state: Mutex<ServerState>,
}

impl FakeServer {
    fn new() -> Self {
        Self {
            state: Mutex::new(ServerState {
                token: "t1".to_string(),
                received: Vec::new(),
                total: None,
                complete: false,
                chunk_puts: 0,
                chunk_faults: HashMap::new(),
                init_statuses: Vec::new(),
                direct_status: None,
                log: Vec::new(),
            }),
        }
    }

    /// `seq` counts chunk PUTs from zero; probes are not counted.
    fn fault(self, seq: usize, fault: Fault) -> Self {
        self.state.lock().unwrap().chunk_faults.insert(seq, fault);
        self
    }

    fn init_statuses(self, statuses: &[u16]) -> Self {
        self.state.lock().unwrap().init_statuses = statuses.to_vec();
        self
    }

    fn direct_status(self, status: u16) -> Self {
        self.state.lock().unwrap().direct_status = Some(status);
        self
    }

    fn log(&self) -> Vec<Logged> {
        self.state.lock().unwrap().log.clone()
    }

    fn received(&self) -> Vec<u8> {
        self.state.lock().unwrap().received.clone()
    }

    fn ranges(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|l| l.method == Method::PUT)
            .filter_map(|l| l.content_range)
            .collect()
    }
}

fn respond(status: u16) -> HttpResponse {
    HttpResponse::new(StatusCode::from_u16(status).unwrap())
}

fn video_response(status: u16) -> HttpResponse {
    let mut resp = respond(status);
    resp.body = br#"{"id":"vid-1","snippet":{"title":"Test","tags":["test"]},"status":{"privacyStatus":"private"},"statistics":{"viewCount":"0"}}"#.to_vec();
    resp
}

fn incomplete(received: usize) -> HttpResponse {
    let mut resp = respond(308);
    if received > 0 {
        let range = format!("bytes=0-{}", received - 1);
        resp.headers
            .insert(RANGE, HeaderValue::from_str(&range).unwrap());
    }
    resp
}

fn parse_content_range(value: &str) -> (Option<(u64, u64)>, Option<u64>) {
    let spec = value.strip_prefix("bytes ").unwrap();
    let (range, total) = spec.split_once('/').unwrap();
    let total = if total == "*" { None } else { Some(total.parse().unwrap()) };
    if range == "*" {
        return (None, total);
    }
    let (a, b) = range.split_once('-').unwrap();
    (Some((a.parse().unwrap(), b.parse().unwrap())), total)
}

impl ServerState {
    fn progress_reply(&mut self) -> HttpResponse {
        if self.total == Some(self.received.len() as u64) {
            self.complete = true;
            video_response(201)
        } else {
            incomplete(self.received.len())
        }
    }

    fn handle_put(&mut self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let range = request.header("content-range").unwrap().to_string();
        let (span, total) = parse_content_range(&range);
        if let Some(total) = total {
            self.total = Some(total);
        }
        if self.complete {
            return Ok(video_response(200));
        }

        let Some((first, last)) = span else {
            // Status probe or empty final chunk.
            return Ok(self.progress_reply());
        };

        let seq = self.chunk_puts;
        self.chunk_puts += 1;
        let mut data = request.body.clone();
        assert_eq!(data.len() as u64, last - first + 1, "body does not match {range}");

        match self.chunk_faults.get(&seq).copied() {
            Some(Fault::Refuse) => return Err(TransportError::Connect("connection reset".into())),
            Some(Fault::Status(code)) => return Ok(respond(code)),
            Some(Fault::ExpireToken(next)) => {
                self.token = next.to_string();
                return Ok(respond(401));
            }
            Some(Fault::Partial(n)) => data.truncate(n),
            Some(Fault::LoseResponse) | None => {}
        }

        if first != self.received.len() as u64 {
            // A gap or a retransmission of bytes we already hold.
            return Ok(respond(400));
        }
        self.received.extend_from_slice(&data);

        let reply = self.progress_reply();
        if let Some(Fault::LoseResponse) = self.chunk_faults.get(&seq) {
            return Err(TransportError::Timeout("response lost".into()));
        }
        Ok(reply)
    }
}

impl HttpTransport for FakeServer {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.log.push(Logged {
            method: request.method.clone(),
            url: request.url.to_string(),
            content_range: request.header("content-range").map(str::to_string),
            authorization: request.header("authorization").map(str::to_string),
            upload_length: request.header("x-upload-content-length").map(str::to_string),
            body_len: request.body.len(),
        });

        let expected = format!("Bearer {}", state.token);
        if request.header("authorization") != Some(expected.as_str()) {
            return Ok(respond(401));
        }

        if request.method == Method::PUT {
            return state.handle_put(&request);
        }
        if request.method != Method::POST {
            return Ok(respond(405));
        }
        if request.url.as_str().contains("uploadType=multipart") {
            return Ok(match state.direct_status {
                Some(code) => respond(code),
                None => video_response(200),
            });
        }
        if !state.init_statuses.is_empty() {
            let code = state.init_statuses.remove(0);
            return Ok(respond(code));
        }
        state.total = request
            .header("x-upload-content-length")
            .map(|v| v.parse().unwrap());
        let mut resp = respond(200);
        resp.headers
            .insert(LOCATION, HeaderValue::from_static(SESSION_PATH));
        Ok(resp)
    }
}

/// Hands out `t1`, then `t2` on refresh, counting refreshes.
struct RotatingCreds {
    refreshes: AtomicUsize,
}

impl RotatingCreds {
    fn new() -> Self {
        Self {
            refreshes: AtomicUsize::new(0),
        }
    }
}

impl CredentialProvider for RotatingCreds {
    fn bearer_token(&self) -> Result<String, AuthError> {
        Ok("t1".to_string())
    }

    fn refresh(&self, _rejected: &str) -> Result<String, AuthError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok("t2".to_string())
    }
}

fn test_config(chunk_size: usize) -> UploadConfig {
    UploadConfig {
        endpoint: "https://upload.example.com/upload/youtube/v3/videos".to_string(),
        chunk_size,
        max_attempts: 3,
        initial_backoff: Duration::ZERO,
        max_backoff: Duration::ZERO,
        ..Default::default()
    }
}

fn uploader(server: FakeServer, chunk_size: usize) -> Uploader<FakeServer, RotatingCreds> {
    Uploader::new(server, RotatingCreds::new(), test_config(chunk_size)).unwrap()
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 253) as u8).collect()
}

fn descriptor() -> MediaDescriptor {
    let mut d = MediaDescriptor::new("Test");
    d.tags = vec!["test".to_string()];
    d
}

fn seekable(data: &[u8]) -> SeekableSource<Cursor<Vec<u8>>> {
    SeekableSource::new(Cursor::new(data.to_vec())).unwrap()
}

/// Collects every event it sees.
#[derive(Default)]
struct Recorder(Mutex<Vec<ProgressEvent>>);

impl ProgressObserver for Recorder {
    fn on_progress(&self, event: &ProgressEvent) {
        self.0.lock().unwrap().push(*event);
    }
}

impl Recorder {
    fn events(&self) -> Vec<ProgressEvent> {
        self.0.lock().unwrap().clone()
    }
}

#[test]
fn test_clean_upload_in_chunks() {
    let data = payload(CHUNK_GRANULARITY * 2 + 1000);
    let up = uploader(FakeServer::new(), CHUNK_GRANULARITY);
    let rec = Recorder::default();

    let result = up
        .upload(&descriptor(), seekable(&data), &rec, &CancellationToken::new())
        .unwrap();
    assert_eq!(result.id, "vid-1");
    assert_eq!(result.bytes, data.len() as u64);
    assert_eq!(up.transport().received(), data);

    let log = up.transport().log();
    assert_eq!(log.len(), 4);
    assert!(log[0].url.contains("uploadType=resumable"));
    assert!(log[0].url.contains("part=snippet%2Cstatistics%2Cstatus"));
    assert_eq!(log[0].upload_length.as_deref(), Some("525288"));
    assert!(log[1].url.contains("upload_id=session-1"));
    assert_eq!(
        up.transport().ranges(),
        vec![
            "bytes 0-262143/525288",
            "bytes 262144-524287/525288",
            "bytes 524288-525287/525288",
        ]
    );

    let states: Vec<UploadState> = rec.events().iter().map(|e| e.state).collect();
    assert_eq!(states.first(), Some(&UploadState::NotStarted));
    assert_eq!(states[1], UploadState::Initiating);
    assert_eq!(states.last(), Some(&UploadState::Complete));
}

#[test]
fn test_lost_response_resumes_from_probed_offset() {
    // 10 MiB in 4 MiB chunks; chunk 2 lands but its response never arrives.
    let data = payload(10 * MIB);
    let server = FakeServer::new().fault(1, Fault::LoseResponse);
    let up = uploader(server, 4 * MIB);

    up.upload(&descriptor(), seekable(&data), &NoopObserver, &CancellationToken::new())
        .unwrap();

    assert_eq!(
        up.transport().ranges(),
        vec![
            "bytes 0-4194303/10485760",
            "bytes 4194304-8388607/10485760",
            "bytes */10485760",
            "bytes 8388608-10485759/10485760",
        ]
    );
    assert_eq!(up.transport().received(), data);
}

#[test]
fn test_refused_chunk_is_resent_from_same_offset() {
    let data = payload(CHUNK_GRANULARITY * 3);
    let server = FakeServer::new().fault(1, Fault::Refuse);
    let up = uploader(server, CHUNK_GRANULARITY);

    up.upload(&descriptor(), seekable(&data), &NoopObserver, &CancellationToken::new())
        .unwrap();

    assert_eq!(
        up.transport().ranges(),
        vec![
            "bytes 0-262143/786432",
            "bytes 262144-524287/786432",
            "bytes */786432",
            "bytes 262144-524287/786432",
            "bytes 524288-786431/786432",
        ]
    );
    assert_eq!(up.transport().received(), data);
}

#[test]
fn test_server_error_then_probe() {
    let data = payload(CHUNK_GRANULARITY * 2);
    let server = FakeServer::new().fault(0, Fault::Status(503));
    let up = uploader(server, CHUNK_GRANULARITY);

    up.upload(&descriptor(), seekable(&data), &NoopObserver, &CancellationToken::new())
        .unwrap();
    assert_eq!(
        up.transport().ranges(),
        vec![
            "bytes 0-262143/524288",
            "bytes */524288",
            "bytes 0-262143/524288",
            "bytes 262144-524287/524288",
        ]
    );
}

#[test]
fn test_partial_acknowledgment_sets_next_offset() {
    let data = payload(CHUNK_GRANULARITY * 2);
    let server = FakeServer::new().fault(0, Fault::Partial(1000));
    let up = uploader(server, CHUNK_GRANULARITY);

    up.upload(&descriptor(), seekable(&data), &NoopObserver, &CancellationToken::new())
        .unwrap();
    let ranges = up.transport().ranges();
    assert_eq!(ranges[1], "bytes 1000-263143/524288");
    assert_eq!(up.transport().received(), data);
}

#[test]
fn test_progress_is_monotonic_and_bounded() {
    let data = payload(CHUNK_GRANULARITY * 4 + 17);
    let server = FakeServer::new()
        .fault(0, Fault::Partial(10))
        .fault(2, Fault::LoseResponse)
        .fault(3, Fault::Refuse);
    let up = uploader(server, CHUNK_GRANULARITY);
    let rec = Recorder::default();

    up.upload(&descriptor(), seekable(&data), &rec, &CancellationToken::new())
        .unwrap();

    let events = rec.events();
    let mut last = 0;
    for e in &events {
        assert!(e.bytes_transferred >= last, "{events:?}");
        assert!(e.bytes_transferred <= data.len() as u64);
        last = e.bytes_transferred;
    }
    assert_eq!(last, data.len() as u64);
    assert_eq!(up.transport().received(), data);
}

#[test]
fn test_completion_sends_nothing_further() {
    let data = payload(1000);
    let up = uploader(FakeServer::new(), CHUNK_GRANULARITY);
    let rec = Recorder::default();

    up.upload(&descriptor(), seekable(&data), &rec, &CancellationToken::new())
        .unwrap();
    assert_eq!(up.transport().log().len(), 2);
    let completions = rec
        .events()
        .iter()
        .filter(|e| e.state == UploadState::Complete)
        .count();
    assert_eq!(completions, 1);
}

#[test]
fn test_completion_discovered_by_probe() {
    // The final chunk is persisted but its 201 is lost.
    let data = payload(CHUNK_GRANULARITY + 5);
    let server = FakeServer::new().fault(1, Fault::LoseResponse);
    let up = uploader(server, CHUNK_GRANULARITY);

    let result = up
        .upload(&descriptor(), seekable(&data), &NoopObserver, &CancellationToken::new())
        .unwrap();
    assert_eq!(result.bytes, data.len() as u64);
    assert_eq!(up.transport().ranges().last().unwrap(), "bytes */262149");
}

#[test]
fn test_unauthorized_refreshes_once_and_retries_same_chunk() {
    let data = payload(CHUNK_GRANULARITY * 3);
    let server = FakeServer::new().fault(1, Fault::ExpireToken("t2"));
    let up = uploader(server, CHUNK_GRANULARITY);

    up.upload(&descriptor(), seekable(&data), &NoopObserver, &CancellationToken::new())
        .unwrap();
    assert_eq!(up.credentials.refreshes.load(Ordering::SeqCst), 1);

    let puts: Vec<Logged> = up
        .transport()
        .log()
        .into_iter()
        .filter(|l| l.method == Method::PUT)
        .collect();
    assert_eq!(puts[1].content_range, puts[2].content_range);
    assert_eq!(puts[1].authorization.as_deref(), Some("Bearer t1"));
    assert_eq!(puts[2].authorization.as_deref(), Some("Bearer t2"));
    assert_eq!(puts.len(), 4);
    assert_eq!(up.transport().received(), data);
}

#[test]
fn test_second_unauthorized_is_fatal() {
    struct StaleCreds;
    impl CredentialProvider for StaleCreds {
        fn bearer_token(&self) -> Result<String, AuthError> {
            Ok("t1".to_string())
        }
        fn refresh(&self, _rejected: &str) -> Result<String, AuthError> {
            Ok("still-wrong".to_string())
        }
    }

    let data = payload(CHUNK_GRANULARITY * 2);
    let server = FakeServer::new().fault(0, Fault::ExpireToken("t9"));
    let up = Uploader::new(server, StaleCreds, test_config(CHUNK_GRANULARITY)).unwrap();

    let err = up
        .upload(&descriptor(), seekable(&data), &NoopObserver, &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, UploadError::Auth(AuthError::Rejected)), "{err}");
}

#[test]
fn test_cancel_stops_at_chunk_boundary_and_releases_source() {
    struct DropFlag<S> {
        inner: S,
        dropped: Arc<AtomicBool>,
    }
    impl<S: MediaSource> MediaSource for DropFlag<S> {
        fn total_len(&self) -> Option<u64> {
            self.inner.total_len()
        }
        fn read_chunk(&mut self, offset: u64, max: usize) -> std::io::Result<Chunk> {
            self.inner.read_chunk(offset, max)
        }
    }
    impl<S> Drop for DropFlag<S> {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    let data = payload(CHUNK_GRANULARITY * 4);
    let up = uploader(FakeServer::new(), CHUNK_GRANULARITY);
    let cancel = CancellationToken::new();
    let dropped = Arc::new(AtomicBool::new(false));
    let source = DropFlag {
        inner: seekable(&data),
        dropped: dropped.clone(),
    };

    let trigger = cancel.clone();
    let observer = move |e: &ProgressEvent| {
        if e.state == UploadState::InProgress && e.bytes_transferred > 0 {
            trigger.cancel();
        }
    };
    let err = up.upload(&descriptor(), source, &observer, &cancel).unwrap_err();

    assert!(matches!(err, UploadError::Cancelled { acknowledged } if acknowledged == CHUNK_GRANULARITY as u64));
    assert!(dropped.load(Ordering::SeqCst));
    // Initiation plus the one chunk that was in flight.
    assert_eq!(up.transport().log().len(), 2);
}

#[test]
fn test_retry_budget_exhausted_reports_offset() {
    let data = payload(CHUNK_GRANULARITY * 3);
    let server = FakeServer::new()
        .fault(1, Fault::Refuse)
        .fault(2, Fault::Refuse)
        .fault(3, Fault::Refuse);
    let up = uploader(server, CHUNK_GRANULARITY);

    let err = up
        .upload(&descriptor(), seekable(&data), &NoopObserver, &CancellationToken::new())
        .unwrap_err();
    match err {
        UploadError::RetriesExhausted {
            attempts,
            acknowledged,
            ..
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(acknowledged, CHUNK_GRANULARITY as u64);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_client_error_mid_session_is_fatal() {
    let data = payload(CHUNK_GRANULARITY * 2);
    let server = FakeServer::new().fault(1, Fault::Status(403));
    let up = uploader(server, CHUNK_GRANULARITY);
    let rec = Recorder::default();

    let err = up
        .upload(&descriptor(), seekable(&data), &rec, &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, UploadError::Rejected { status: 403, .. }), "{err}");
    assert_eq!(rec.events().last().unwrap().state, UploadState::Failed);
    assert_eq!(up.transport().ranges().len(), 2);
}

#[test]
fn test_fatal_error_reports_last_acknowledged_bytes() {
    let data = payload(CHUNK_GRANULARITY * 2);
    let server = FakeServer::new().fault(1, Fault::Status(403));
    let up = uploader(server, CHUNK_GRANULARITY);
    let rec = Recorder::default();

    up.upload(&descriptor(), seekable(&data), &rec, &CancellationToken::new())
        .unwrap_err();
    let events = rec.events();
    for pair in events.windows(2) {
        assert!(pair[1].bytes_transferred >= pair[0].bytes_transferred, "{events:?}");
    }
    let last = events.last().unwrap();
    assert_eq!(last.state, UploadState::Failed);
    assert_eq!(last.bytes_transferred, CHUNK_GRANULARITY as u64);
}

#[test]
fn test_session_records_how_it_stopped() {
    let uri = Url::parse("https://upload.example.com/s/1").unwrap();
    let mut session = UploadSession::new(uri.clone(), Some(10));
    assert_eq!(session.state(), UploadState::InProgress);
    session.stop(&UploadError::Cancelled { acknowledged: 0 });
    assert_eq!(session.state(), UploadState::Cancelled);

    let mut session = UploadSession::new(uri, Some(10));
    session.stop(&UploadError::Protocol("bad".to_string()));
    assert_eq!(session.state(), UploadState::Failed);
}

#[test]
fn test_cancel_interrupts_backoff() {
    let data = payload(CHUNK_GRANULARITY);
    let server = FakeServer::new().fault(0, Fault::Status(503));
    let config = UploadConfig {
        initial_backoff: Duration::from_secs(30),
        max_backoff: Duration::from_secs(30),
        ..test_config(CHUNK_GRANULARITY)
    };
    let up = Uploader::new(server, RotatingCreds::new(), config).unwrap();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        trigger.cancel();
    });
    let started = Instant::now();
    let err = up
        .upload(&descriptor(), seekable(&data), &NoopObserver, &cancel)
        .unwrap_err();
    canceller.join().unwrap();

    assert!(matches!(err, UploadError::Cancelled { acknowledged: 0 }), "{err}");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_initiation_retries_transient_and_rejects_metadata() {
    let data = payload(1000);
    let server = FakeServer::new().init_statuses(&[503, 429]);
    let up = uploader(server, CHUNK_GRANULARITY);
    up.upload(&descriptor(), seekable(&data), &NoopObserver, &CancellationToken::new())
        .unwrap();
    assert_eq!(up.transport().log().len(), 4);

    let server = FakeServer::new().init_statuses(&[400]);
    let up = uploader(server, CHUNK_GRANULARITY);
    let err = up
        .upload(&descriptor(), seekable(&data), &NoopObserver, &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, UploadError::Validation(_)), "{err}");
    assert_eq!(up.transport().log().len(), 1);
}

#[test]
fn test_local_validation_precedes_network() {
    let up = uploader(FakeServer::new(), CHUNK_GRANULARITY);
    let err = up
        .upload(
            &MediaDescriptor::new(""),
            seekable(&payload(10)),
            &NoopObserver,
            &CancellationToken::new(),
        )
        .unwrap_err();
    assert!(matches!(err, UploadError::Validation(_)));
    assert!(up.transport().log().is_empty());
}

#[test]
fn test_unknown_length_stream() {
    let data = payload(CHUNK_GRANULARITY * 2 + 300);
    let server = FakeServer::new().fault(1, Fault::Partial(5));
    let up = uploader(server, CHUNK_GRANULARITY);

    let result = up
        .upload(
            &descriptor(),
            StreamSource::new(Cursor::new(data.clone())),
            &NoopObserver,
            &CancellationToken::new(),
        )
        .unwrap();
    assert_eq!(result.bytes, data.len() as u64);
    assert_eq!(up.transport().received(), data);

    let log = up.transport().log();
    assert_eq!(log[0].upload_length, None);
    let ranges = up.transport().ranges();
    assert_eq!(ranges[0], "bytes 0-262143/*");
    assert_eq!(ranges[1], "bytes 262144-524287/*");
    assert_eq!(ranges[2], "bytes 262149-524292/*");
    assert_eq!(ranges.last().unwrap(), "bytes 524293-524587/524588");
}

#[test]
fn test_stream_ending_on_chunk_boundary_announces_total() {
    let data = payload(CHUNK_GRANULARITY);
    let up = uploader(FakeServer::new(), CHUNK_GRANULARITY);

    up.upload(
        &descriptor(),
        StreamSource::new(Cursor::new(data.clone())),
        &NoopObserver,
        &CancellationToken::new(),
    )
    .unwrap();
    // Lookahead sees the end, so the single chunk already carries the total.
    assert_eq!(up.transport().ranges(), vec!["bytes 0-262143/262144"]);
}

#[test]
fn test_direct_mode_single_request() {
    let data = payload(4096);
    let config = UploadConfig {
        direct: true,
        ..test_config(CHUNK_GRANULARITY)
    };
    let up = Uploader::new(FakeServer::new(), RotatingCreds::new(), config).unwrap();

    let result = up
        .upload(&descriptor(), seekable(&data), &NoopObserver, &CancellationToken::new())
        .unwrap();
    assert_eq!(result.id, "vid-1");
    let log = up.transport().log();
    assert_eq!(log.len(), 1);
    assert!(log[0].url.contains("uploadType=multipart"));
    assert!(log[0].body_len > data.len());
}

#[test]
fn test_direct_mode_failures_are_terminal() {
    let config = UploadConfig {
        direct: true,
        ..test_config(CHUNK_GRANULARITY)
    };
    let up = Uploader::new(FakeServer::new().direct_status(503), RotatingCreds::new(), config.clone())
        .unwrap();
    let err = up
        .upload(&descriptor(), seekable(&payload(10)), &NoopObserver, &CancellationToken::new())
        .unwrap_err();
    assert!(err.is_transient());
    assert_eq!(up.transport().log().len(), 1);

    let small = UploadConfig {
        direct_upload_limit: 5,
        ..config
    };
    let up = Uploader::new(FakeServer::new(), RotatingCreds::new(), small).unwrap();
    let err = up
        .upload(&descriptor(), seekable(&payload(10)), &NoopObserver, &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, UploadError::Config(_)));
    assert!(up.transport().log().is_empty());
}

#[test]
fn test_session_rejects_regression_and_overflow() {
    let uri = Url::parse("https://upload.example.com/s").unwrap();
    let mut session = UploadSession::new(uri, Some(100));
    assert!(session.acknowledge(40).unwrap());
    assert!(!session.acknowledge(40).unwrap());
    assert!(matches!(session.acknowledge(39), Err(UploadError::Protocol(_))));
    assert!(matches!(session.acknowledge(101), Err(UploadError::Protocol(_))));
    assert_eq!(session.acknowledged(), 40);
    assert!(session.learn_total(100).is_ok());
    assert!(session.learn_total(99).is_err());
}

#[test]
fn test_invalid_config_rejected() {
    let err = Uploader::new(FakeServer::new(), RotatingCreds::new(), test_config(1000));
    assert!(matches!(err, Err(UploadError::Config(_))));
}
