use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config;

/// Visibility of the uploaded video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    Public,
    Unlisted,
    Private,
}

impl Privacy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Privacy::Public => "public",
            Privacy::Unlisted => "unlisted",
            Privacy::Private => "private",
        }
    }
}

impl fmt::Display for Privacy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Privacy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "public" => Ok(Privacy::Public),
            "unlisted" => Ok(Privacy::Unlisted),
            "private" => Ok(Privacy::Private),
            other => Err(format!("unknown privacy status: {other}")),
        }
    }
}

/// Metadata attached to an upload. Immutable once the upload begins.
#[derive(Debug, Clone)]
pub struct MediaDescriptor {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub privacy: Privacy,
    pub category_id: Option<String>,
    /// MIME type of the binary payload.
    pub content_type: String,
}

impl MediaDescriptor {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            tags: Vec::new(),
            privacy: Privacy::Private,
            category_id: None,
            content_type: config::DEFAULT_CONTENT_TYPE.to_string(),
        }
    }

    /// Reject metadata the platform is known to refuse, before any network call.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title must not be empty".to_string());
        }
        let title_chars = self.title.chars().count();
        if title_chars > config::MAX_TITLE_CHARS {
            return Err(format!(
                "title is {} characters, limit is {}",
                title_chars,
                config::MAX_TITLE_CHARS
            ));
        }
        if self.description.len() > config::MAX_DESCRIPTION_BYTES {
            return Err(format!(
                "description is {} bytes, limit is {}",
                self.description.len(),
                config::MAX_DESCRIPTION_BYTES
            ));
        }
        // Separating commas count against the limit too.
        let tag_chars: usize = self.tags.iter().map(|t| t.chars().count()).sum::<usize>()
            + self.tags.len().saturating_sub(1);
        if tag_chars > config::MAX_TAGS_CHARS {
            return Err(format!(
                "tags total {} characters, limit is {}",
                tag_chars,
                config::MAX_TAGS_CHARS
            ));
        }
        if self.content_type.trim().is_empty() {
            return Err("content type must not be empty".to_string());
        }
        Ok(())
    }

    /// The video resource sent alongside the media.
    pub fn to_resource(&self) -> Value {
        let mut snippet = json!({
            "title": self.title,
            "description": self.description,
            "tags": self.tags,
        });
        if let Some(category) = &self.category_id {
            snippet["categoryId"] = json!(category);
        }
        json!({
            "snippet": snippet,
            "status": { "privacyStatus": self.privacy.as_str() },
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSnippet {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub category_id: Option<String>,
    pub channel_id: Option<String>,
    pub published_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStatus {
    pub privacy_status: Option<String>,
    pub upload_status: Option<String>,
}

/// Counters arrive as decimal strings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStatistics {
    pub view_count: Option<String>,
    pub like_count: Option<String>,
    pub comment_count: Option<String>,
}

/// The video resource as confirmed by the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Video {
    pub id: String,
    pub snippet: Option<VideoSnippet>,
    pub status: Option<VideoStatus>,
    pub statistics: Option<VideoStatistics>,
}

/// Outcome of a completed upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadResult {
    pub id: String,
    pub video: Video,
    /// Total payload bytes the server acknowledged.
    pub bytes: u64,
}
