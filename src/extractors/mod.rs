use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

pub mod instagram;
pub mod youtube;

use crate::ErrorKind;

static INSTAGRAM_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i:https?://(?:www\.)?instagram\.com)/(?:p|reel)/[A-Za-z0-9_-]+/?(?:\?.*)?$")
        .expect("instagram url pattern is valid")
});

static YOUTUBE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?i:https?://(?:(?:www\.|m\.)?youtube\.com/(?:watch\?(?:[^#]*&)?v=|shorts/|embed/)|youtu\.be/))[A-Za-z0-9_-]{11}(?:[?&#/].*)?$",
    )
    .expect("youtube url pattern is valid")
});

/// Source platform a URL belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Instagram,
    #[serde(rename = "youtube")]
    YouTube,
}

/// The platform a [`SourceContent`] was fetched from
pub type SourceType = Platform;

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Instagram => "instagram",
            Platform::YouTube => "youtube",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Instagram => "Instagram",
            Platform::YouTube => "YouTube",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Decide which platform a URL points at, if any. Pure string matching, no network.
///
/// Instagram is tried first; the two host patterns are disjoint so at most one matches.
pub fn classify(url: &str) -> Option<Platform> {
    let url = url.trim();
    if INSTAGRAM_URL_RE.is_match(url) {
        Some(Platform::Instagram)
    } else if YOUTUBE_URL_RE.is_match(url) {
        Some(Platform::YouTube)
    } else {
        None
    }
}

/// Kind of media attached to a post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

/// Normalized source data produced by a fetcher and consumed once per request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceContent {
    /// Caption, or title and description joined by a blank line
    pub text: String,

    pub source_type: SourceType,

    pub media_type: MediaType,

    /// Downloadable media, used for transcription of videos
    pub media_ref: Option<String>,

    /// Username or channel title
    pub author: Option<String>,

    pub published_at: Option<DateTime<Utc>>,

    pub video_id: Option<String>,

    pub thumbnail: Option<String>,

    /// YouTube only
    pub title: Option<String>,

    /// YouTube only
    pub description: Option<String>,

    /// Captions delivered by the platform itself (YouTube)
    pub transcript: Option<String>,
}

/// Diagnostics returned by a platform API alongside an error
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApiDiagnostics {
    pub code: Option<i64>,
    pub error_type: Option<String>,
    pub subcode: Option<i64>,
    pub trace_id: Option<String>,
}

/// Errors raised while resolving a URL to [`SourceContent`]
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("Invalid {platform} URL format: {url}")]
    InvalidUrl { platform: Platform, url: String },

    #[error("{platform} API authentication failed: {message}")]
    Authentication { platform: Platform, message: String },

    #[error("{platform} API rate limit exceeded. Please try again later.")]
    RateLimited { platform: Platform },

    #[error("Network error while fetching {platform} data: {message}")]
    Network { platform: Platform, message: String },

    #[error("Failed to download media: {message}")]
    Download { status: Option<u16>, message: String },

    #[error("Video not found or unavailable: {video_id}")]
    VideoUnavailable { video_id: String },

    #[error("Failed to fetch transcript for video {video_id}: {message}")]
    TranscriptUnavailable { video_id: String, message: String },

    #[error("{platform} API error ({status}): {message}")]
    Api {
        platform: Platform,
        status: u16,
        message: String,
        diagnostics: ApiDiagnostics,
    },
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::InvalidUrl { .. } | FetchError::VideoUnavailable { .. } => {
                ErrorKind::InvalidInput
            }
            FetchError::Authentication { .. } => ErrorKind::Unauthorized,
            FetchError::RateLimited { .. } => ErrorKind::RateLimited,
            FetchError::Network { .. }
            | FetchError::Download { .. }
            | FetchError::TranscriptUnavailable { .. }
            | FetchError::Api { .. } => ErrorKind::UpstreamTransient,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            FetchError::InvalidUrl { .. } => "invalid_url",
            FetchError::Authentication { .. } => "authentication_failed",
            FetchError::RateLimited { .. } => "platform_rate_limited",
            FetchError::Network { .. } => "network_error",
            FetchError::Download { .. } => "download_error",
            FetchError::VideoUnavailable { .. } => "video_unavailable",
            FetchError::TranscriptUnavailable { .. } => "transcript_unavailable",
            FetchError::Api { .. } => "platform_api_error",
        }
    }

    /// True when an alternate, unauthenticated metadata source is worth trying
    pub fn allows_public_fallback(&self) -> bool {
        matches!(
            self,
            FetchError::Authentication { .. } | FetchError::Network { .. }
        )
    }
}

/// Re-type a transport failure from `reqwest`.
///
/// Structured flags on the error are checked first. Matching on the message text is a
/// best-effort heuristic kept as the last resort, because the transport gives no error
/// codes for rate limiting.
pub(crate) fn retype_transport_error(platform: Platform, err: reqwest::Error) -> FetchError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        return FetchError::Network {
            platform,
            message: err.to_string(),
        };
    }
    if let Some(status) = err.status() {
        if status.as_u16() == 429 {
            return FetchError::RateLimited { platform };
        }
    }

    let message = err.to_string();
    sniff_fetch_message(platform, &message).unwrap_or(FetchError::Api {
        platform,
        status: err.status().map(|s| s.as_u16()).unwrap_or(500),
        message,
        diagnostics: ApiDiagnostics::default(),
    })
}

/// Last-resort classification from free text
pub(crate) fn sniff_fetch_message(platform: Platform, message: &str) -> Option<FetchError> {
    let lower = message.to_lowercase();
    if lower.contains("rate limit") || lower.contains("rate_limit") {
        Some(FetchError::RateLimited { platform })
    } else if lower.contains("network") {
        Some(FetchError::Network {
            platform,
            message: message.to_string(),
        })
    } else {
        None
    }
}

/// Trait for resolving a post URL on one platform into [`SourceContent`]
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Resolve the URL
    async fn fetch(&self, url: &str) -> Result<SourceContent, FetchError>;

    /// The platform this fetcher serves
    fn platform(&self) -> Platform;

    /// Check if this fetcher supports the given URL
    fn supports_url(&self, url: &str) -> bool {
        classify(url) == Some(self.platform())
    }
}

/// Registry holding one fetcher per platform
pub struct FetcherRegistry {
    fetchers: Vec<Box<dyn SourceFetcher>>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self {
            fetchers: Vec::new(),
        }
    }

    /// Register a fetcher; a later registration for the same platform wins
    pub fn register(&mut self, fetcher: Box<dyn SourceFetcher>) {
        self.fetchers.retain(|f| f.platform() != fetcher.platform());
        self.fetchers.push(fetcher);
    }

    pub fn find(&self, platform: Platform) -> Option<&dyn SourceFetcher> {
        self.fetchers
            .iter()
            .find(|fetcher| fetcher.platform() == platform)
            .map(|boxed| boxed.as_ref())
    }

    /// List all supported platforms
    pub fn list_platforms(&self) -> Vec<Platform> {
        self.fetchers.iter().map(|f| f.platform()).collect()
    }
}

impl Default for FetcherRegistry {
    fn default() -> Self {
        Self::new()
    }
}
