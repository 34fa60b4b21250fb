use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;

use super::{
    retype_transport_error, ApiDiagnostics, FetchError, MediaType, Platform, SourceContent,
    SourceFetcher,
};

static VIDEO_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:youtu\.be/|/v/|/vi/|/embed/|/shorts/|[?&]v=)([A-Za-z0-9_-]{11})")
        .expect("video id pattern is valid")
});

const MOCK_TITLE: &str = "How to Improve Your Development Workflow";
const MOCK_DESCRIPTION: &str = "In this video, I share my top tips for improving your development workflow with these amazing tools! 🚀 #coding #productivity";
const MOCK_TRANSCRIPT: &str = "Hey everyone! Today I'm going to share some amazing tools that will help improve your development workflow. Let's dive in! First, let's talk about VS Code extensions that can boost your productivity. Next, I'll show you some CLI tools that I use every day. Finally, we'll look at some AI-powered tools that can help you write better code faster.";

/// Extract the 11 character video id from any supported YouTube URL shape
pub fn extract_video_id(url: &str) -> Option<String> {
    VIDEO_ID_RE
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Thumbnail that exists for every public video
fn default_thumbnail(video_id: &str) -> String {
    format!("https://i.ytimg.com/vi/{video_id}/hqdefault.jpg")
}

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    title: String,
    #[serde(default)]
    description: String,
    channel_title: Option<String>,
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    maxres: Option<Thumbnail>,
    high: Option<Thumbnail>,
    medium: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

impl Thumbnails {
    /// maxres → high → medium → the always-present default
    fn best(self, video_id: &str) -> String {
        self.maxres
            .or(self.high)
            .or(self.medium)
            .map(|t| t.url)
            .unwrap_or_else(|| default_thumbnail(video_id))
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorReason>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorReason {
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OEmbedResponse {
    title: Option<String>,
    author_name: Option<String>,
    thumbnail_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TimedText {
    #[serde(default)]
    events: Vec<TimedTextEvent>,
}

#[derive(Debug, Deserialize)]
struct TimedTextEvent {
    #[serde(default)]
    segs: Vec<TimedTextSeg>,
}

#[derive(Debug, Deserialize)]
struct TimedTextSeg {
    #[serde(default)]
    utf8: String,
}

/// Map a non-2xx Data API response to a typed error
fn classify_api_error(status: u16, body: &str) -> FetchError {
    let platform = Platform::YouTube;
    let (message, reason) = match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => {
            let reason = parsed
                .error
                .errors
                .into_iter()
                .find_map(|e| e.reason);
            (parsed.error.message, reason)
        }
        Err(_) => (format!("HTTP {status}"), None),
    };

    match reason.as_deref() {
        Some("quotaExceeded") | Some("rateLimitExceeded") | Some("userRateLimitExceeded") => {
            FetchError::RateLimited { platform }
        }
        Some("keyInvalid") | Some("keyExpired") | Some("forbidden") | Some("accessNotConfigured") => {
            FetchError::Authentication { platform, message }
        }
        _ => match status {
            403 | 401 => FetchError::Authentication { platform, message },
            429 => FetchError::RateLimited { platform },
            _ if status >= 500 => FetchError::Network { platform, message },
            _ => FetchError::Api {
                platform,
                status,
                message,
                diagnostics: ApiDiagnostics {
                    error_type: reason,
                    ..Default::default()
                },
            },
        },
    }
}

/// Join the text segments of a `json3` timed-text document. An empty body means no captions.
fn parse_timed_text(body: &str) -> Result<String, serde_json::Error> {
    if body.trim().is_empty() {
        return Ok(String::new());
    }

    let doc: TimedText = serde_json::from_str(body)?;
    let text = doc
        .events
        .iter()
        .flat_map(|event| event.segs.iter())
        .map(|seg| seg.utf8.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    Ok(text)
}

/// Video metadata without captions
struct VideoDetails {
    title: String,
    description: String,
    channel_title: Option<String>,
    published_at: Option<DateTime<Utc>>,
    thumbnail: String,
}

/// YouTube video fetcher backed by the Data API, with oEmbed and timed-text lookups
pub struct YoutubeFetcher {
    client: Client,
    api_key: Option<String>,
    api_base_url: String,
    oembed_base_url: String,
    timedtext_base_url: String,
    mock_latency: Duration,
}

impl YoutubeFetcher {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            api_base_url: "https://www.googleapis.com/youtube/v3".to_string(),
            oembed_base_url: "https://www.youtube.com/oembed".to_string(),
            timedtext_base_url: "https://www.youtube.com/api/timedtext".to_string(),
            mock_latency: Duration::from_millis(500),
        }
    }

    pub fn with_mock_latency(mut self, latency: Duration) -> Self {
        self.mock_latency = latency;
        self
    }

    async fn mock_content(&self, video_id: String) -> SourceContent {
        tracing::warn!("YouTube API not configured, using mock data");
        tokio::time::sleep(self.mock_latency).await;

        SourceContent {
            text: format!("{MOCK_TITLE}\n\n{MOCK_DESCRIPTION}"),
            source_type: Platform::YouTube,
            media_type: MediaType::Video,
            media_ref: None,
            author: Some("CodeWithMe".to_string()),
            published_at: Some(Utc::now()),
            thumbnail: Some(format!(
                "https://i.ytimg.com/vi/{video_id}/maxresdefault.jpg"
            )),
            video_id: Some(video_id),
            title: Some(MOCK_TITLE.to_string()),
            description: Some(MOCK_DESCRIPTION.to_string()),
            transcript: Some(MOCK_TRANSCRIPT.to_string()),
        }
    }

    #[tracing::instrument(skip(self, api_key))]
    async fn fetch_video_details(
        &self,
        video_id: &str,
        api_key: &str,
    ) -> Result<VideoDetails, FetchError> {
        let response = self
            .client
            .get(format!("{}/videos", self.api_base_url))
            .query(&[("part", "snippet"), ("id", video_id), ("key", api_key)])
            .send()
            .await
            .map_err(|e| retype_transport_error(Platform::YouTube, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_api_error(status.as_u16(), &body));
        }

        let list: VideoListResponse = response
            .json()
            .await
            .map_err(|e| retype_transport_error(Platform::YouTube, e))?;

        let item = list
            .items
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::VideoUnavailable {
                video_id: video_id.to_string(),
            })?;

        let snippet = item.snippet;
        Ok(VideoDetails {
            thumbnail: snippet.thumbnails.best(video_id),
            title: snippet.title,
            description: snippet.description,
            channel_title: snippet.channel_title,
            published_at: snippet.published_at,
        })
    }

    /// Public metadata lookup, used when the Data API is unavailable
    #[tracing::instrument(skip(self))]
    async fn fetch_oembed(&self, video_id: &str) -> Result<VideoDetails, FetchError> {
        let watch_url = format!("https://www.youtube.com/watch?v={video_id}");
        let response = self
            .client
            .get(&self.oembed_base_url)
            .query(&[("url", watch_url.as_str()), ("format", "json")])
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| retype_transport_error(Platform::YouTube, e))?;

        match response.status().as_u16() {
            200..=299 => {}
            401 | 404 => {
                return Err(FetchError::VideoUnavailable {
                    video_id: video_id.to_string(),
                })
            }
            status => {
                return Err(FetchError::Network {
                    platform: Platform::YouTube,
                    message: format!("oEmbed HTTP {status}"),
                })
            }
        }

        let data: OEmbedResponse = response
            .json()
            .await
            .map_err(|e| retype_transport_error(Platform::YouTube, e))?;

        Ok(VideoDetails {
            title: data.title.unwrap_or_default(),
            description: String::new(),
            channel_title: data.author_name,
            published_at: None,
            thumbnail: data
                .thumbnail_url
                .unwrap_or_else(|| default_thumbnail(video_id)),
        })
    }

    /// Best-effort caption retrieval.
    ///
    /// An empty string means the video has no captions and is not an error; only transport
    /// or parse failures are.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_captions(&self, video_id: &str) -> Result<String, FetchError> {
        let attempts: [&[(&str, &str)]; 2] = [
            &[("lang", "en"), ("fmt", "json3")],
            &[("lang", "en"), ("kind", "asr"), ("fmt", "json3")],
        ];

        for params in attempts {
            let response = self
                .client
                .get(&self.timedtext_base_url)
                .query(&[("v", video_id)])
                .query(params)
                .send()
                .await
                .map_err(|e| FetchError::TranscriptUnavailable {
                    video_id: video_id.to_string(),
                    message: e.to_string(),
                })?;

            if !response.status().is_success() {
                tracing::debug!(status = %response.status(), "Timed-text track not available");
                continue;
            }

            let body = response
                .text()
                .await
                .map_err(|e| FetchError::TranscriptUnavailable {
                    video_id: video_id.to_string(),
                    message: e.to_string(),
                })?;

            let text = parse_timed_text(&body).map_err(|e| FetchError::TranscriptUnavailable {
                video_id: video_id.to_string(),
                message: format!("unparsable caption track: {e}"),
            })?;

            if !text.is_empty() {
                return Ok(text);
            }
        }

        tracing::warn!(video_id, "Transcript not available for video");
        Ok(String::new())
    }
}

#[async_trait]
impl SourceFetcher for YoutubeFetcher {
    async fn fetch(&self, url: &str) -> Result<SourceContent, FetchError> {
        let video_id = extract_video_id(url).ok_or_else(|| FetchError::InvalidUrl {
            platform: Platform::YouTube,
            url: url.to_string(),
        })?;

        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(self.mock_content(video_id).await);
        };

        let details = match self.fetch_video_details(&video_id, api_key).await {
            Ok(details) => details,
            Err(err) if err.allows_public_fallback() => {
                tracing::warn!(error = %err, "Data API unavailable, trying public oEmbed");
                self.fetch_oembed(&video_id).await.map_err(|fallback_err| {
                    tracing::warn!(error = %fallback_err, "oEmbed fallback failed");
                    err
                })?
            }
            Err(err) => return Err(err),
        };

        // Captions are optional enrichment; metadata alone is enough to generate from
        let transcript = match self.fetch_captions(&video_id).await {
            Ok(text) if !text.is_empty() => Some(text),
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(error = %err, "Caption lookup failed, continuing without transcript");
                None
            }
        };

        let text = if details.description.is_empty() {
            details.title.clone()
        } else {
            format!("{}\n\n{}", details.title, details.description)
        };

        Ok(SourceContent {
            text,
            source_type: Platform::YouTube,
            media_type: MediaType::Video,
            media_ref: None,
            author: details.channel_title,
            published_at: details.published_at,
            video_id: Some(video_id),
            thumbnail: Some(details.thumbnail),
            title: Some(details.title),
            description: Some(details.description),
            transcript,
        })
    }

    fn platform(&self) -> Platform {
        Platform::YouTube
    }
}
