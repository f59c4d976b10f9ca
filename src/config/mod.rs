use std::time::Duration;

use reqwest::Url;

// Protocol parameters
pub const CHUNK_GRANULARITY: usize = 262_144; // 256 KiB, server-mandated
pub const DEFAULT_CHUNK_SIZE: usize = 8 * CHUNK_GRANULARITY; // 2 MiB
pub const DEFAULT_DIRECT_UPLOAD_LIMIT: u64 = 5 * 1_048_576; // 5 MiB

// Platform endpoint
pub const DEFAULT_UPLOAD_ENDPOINT: &str = "https://www.googleapis.com/upload/youtube/v3/videos";
pub const DEFAULT_PARTS: &str = "snippet,statistics,status";
pub const DEFAULT_CONTENT_TYPE: &str = "video/*";

// Retry parameters
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 32_000;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_RANDOMIZATION_FACTOR: f64 = 0.5;

// Per-call network timeout
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

// Metadata limits enforced by the platform
pub const MAX_TITLE_CHARS: usize = 100;
pub const MAX_DESCRIPTION_BYTES: usize = 5000;
pub const MAX_TAGS_CHARS: usize = 500;

/// Round a requested chunk size down to the server granularity, never below one granule.
pub fn align_chunk_size(requested: usize) -> usize {
    (requested / CHUNK_GRANULARITY).max(1) * CHUNK_GRANULARITY
}

/// Runtime configuration for an upload.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub endpoint: String,
    pub parts: String,
    pub chunk_size: usize,
    pub direct: bool,
    pub direct_upload_limit: u64,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    pub randomization_factor: f64,
    pub request_timeout: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_UPLOAD_ENDPOINT.to_string(),
            parts: DEFAULT_PARTS.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            direct: false,
            direct_upload_limit: DEFAULT_DIRECT_UPLOAD_LIMIT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            randomization_factor: DEFAULT_RANDOMIZATION_FACTOR,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl UploadConfig {
    /// Check the invariants the orchestrator relies on.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 || self.chunk_size % CHUNK_GRANULARITY != 0 {
            return Err(format!(
                "chunk size {} is not a positive multiple of {} bytes",
                self.chunk_size, CHUNK_GRANULARITY
            ));
        }
        if self.max_attempts == 0 {
            return Err("max attempts must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.randomization_factor) {
            return Err(format!(
                "randomization factor {} is outside [0, 1]",
                self.randomization_factor
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(format!(
                "backoff multiplier {} is below 1",
                self.backoff_multiplier
            ));
        }
        Url::parse(&self.endpoint)
            .map_err(|e| format!("invalid upload endpoint {}: {}", self.endpoint, e))?;
        Ok(())
    }
}
