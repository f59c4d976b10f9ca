//! Wire details of the resumable upload protocol.

use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::transport::HttpResponse;

/// How the orchestrator should treat a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// 200/201: the resource was created.
    Complete,
    /// 308: the session is open, more bytes expected.
    Incomplete,
    /// 401: the bearer token was rejected.
    Unauthorized,
    /// 404/410: the session URI is gone.
    SessionGone,
    /// 408, 429, 5xx: worth retrying.
    Transient,
    /// Any other 4xx, or an unexpected status.
    Fatal,
}

pub fn classify(status: StatusCode) -> ResponseClass {
    match status.as_u16() {
        200 | 201 => ResponseClass::Complete,
        308 => ResponseClass::Incomplete,
        401 => ResponseClass::Unauthorized,
        404 | 410 => ResponseClass::SessionGone,
        408 | 429 => ResponseClass::Transient,
        500..=599 => ResponseClass::Transient,
        _ => ResponseClass::Fatal,
    }
}

/// `Content-Range` for a chunk starting at `offset` with `len` bytes.
/// `total` is `None` while the stream length is unknown.
pub fn content_range(offset: u64, len: usize, total: Option<u64>) -> String {
    let total = total.map_or_else(|| "*".to_string(), |t| t.to_string());
    if len == 0 {
        format!("bytes */{}", total)
    } else {
        format!("bytes {}-{}/{}", offset, offset + len as u64 - 1, total)
    }
}

/// `Content-Range` for a status probe.
pub fn probe_range(total: Option<u64>) -> String {
    content_range(0, 0, total)
}

/// Number of bytes the server holds, from a `Range: bytes=0-N` header.
/// A missing header means nothing was persisted yet.
pub fn parse_received(range: Option<&str>) -> Result<u64, String> {
    let Some(range) = range else {
        return Ok(0);
    };
    let spec = range
        .trim()
        .strip_prefix("bytes=")
        .ok_or_else(|| format!("unexpected Range header: {range}"))?;
    let (first, last) = spec
        .split_once('-')
        .ok_or_else(|| format!("unexpected Range header: {range}"))?;
    let first: u64 = first
        .trim()
        .parse()
        .map_err(|_| format!("unexpected Range header: {range}"))?;
    let last: u64 = last
        .trim()
        .parse()
        .map_err(|_| format!("unexpected Range header: {range}"))?;
    if first != 0 || last < first {
        return Err(format!("Range header does not start at zero: {range}"));
    }
    last.checked_add(1)
        .ok_or_else(|| format!("unexpected Range header: {range}"))
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Deserialize)]
struct ErrorItem {
    reason: Option<String>,
}

/// A readable message for an error response, using the platform's JSON error
/// body when there is one.
pub fn error_message(response: &HttpResponse) -> String {
    if let Ok(env) = serde_json::from_slice::<ErrorEnvelope>(&response.body) {
        let reason = env.error.errors.iter().find_map(|e| e.reason.clone());
        return match (env.error.message, reason) {
            (Some(m), Some(r)) => format!("{} ({})", m, r),
            (Some(m), None) => m,
            (None, Some(r)) => r,
            (None, None) => response.status.to_string(),
        };
    }
    let text = response.body_text();
    let text = text.trim();
    if text.is_empty() {
        response.status.to_string()
    } else {
        format!("{}: {}", response.status, text)
    }
}

/// Random boundary for a `multipart/related` body.
pub fn multipart_boundary() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();
    format!("ytresume_{}", suffix)
}

/// Build a `multipart/related` body: JSON metadata first, media second.
pub fn multipart_body(boundary: &str, metadata: &[u8], content_type: &str, media: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(metadata.len() + media.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata);
    body.extend_from_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
    body.extend_from_slice(media);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}
