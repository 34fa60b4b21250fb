use async_trait::async_trait;
use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;

use super::{
    retype_transport_error, sniff_fetch_message, ApiDiagnostics, FetchError, MediaType, Platform,
    SourceContent, SourceFetcher,
};

/// Alphabet used by Instagram shortcodes, one character per base-64 digit
const SHORTCODE_ALPHABET: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

const GRAPH_FIELDS: &str = "id,media_type,media_url,permalink,caption,timestamp,thumbnail_url,username";

const USER_AGENT: &str = "repurposer/0.1";

const MOCK_CAPTION: &str = "🚀 Explaining how I boosted developer productivity by 10× with Space-Tech hacks. #coding #productivity #spaceslam";

static SHORTCODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)instagram\.com/(?:p|reel)/([A-Za-z0-9_-]+)")
        .expect("shortcode pattern is valid")
});

/// Extract the shortcode from `/p/<code>` and `/reel/<code>` URLs
pub fn extract_shortcode(url: &str) -> Option<String> {
    SHORTCODE_RE
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Convert a shortcode to the numeric media id used by the Graph API.
///
/// `id = Σ digit_i * 64^(n-1-i)`. Shortcodes routinely exceed 64 bits, so this is
/// computed with an arbitrary precision integer.
pub fn shortcode_to_media_id(shortcode: &str) -> Result<BigUint, FetchError> {
    let mut media_id = BigUint::from(0u32);

    for ch in shortcode.chars() {
        let digit = SHORTCODE_ALPHABET
            .find(ch)
            .ok_or_else(|| FetchError::InvalidUrl {
                platform: Platform::Instagram,
                url: format!("invalid character '{ch}' in shortcode {shortcode}"),
            })?;
        media_id = media_id * 64u32 + digit as u32;
    }

    Ok(media_id)
}

/// Whether a post URL most likely points at a video
fn looks_like_video(url: &str) -> bool {
    url.contains("/reel/") || url.contains("video")
}

#[derive(Debug, Deserialize)]
struct GraphMedia {
    media_type: Option<String>,
    media_url: Option<String>,
    caption: Option<String>,
    timestamp: Option<String>,
    thumbnail_url: Option<String>,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    error: GraphErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GraphErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
    code: Option<i64>,
    error_subcode: Option<i64>,
    fbtrace_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OEmbedResponse {
    title: Option<String>,
    author_name: Option<String>,
    thumbnail_url: Option<String>,
}

/// Map a non-2xx Graph API response to a typed error
fn classify_graph_error(status: u16, body: &str) -> FetchError {
    let platform = Platform::Instagram;

    let Ok(parsed) = serde_json::from_str::<GraphErrorBody>(body) else {
        return match status {
            401 | 403 => FetchError::Authentication {
                platform,
                message: format!("HTTP {status}"),
            },
            429 => FetchError::RateLimited { platform },
            _ => FetchError::Api {
                platform,
                status,
                message: format!("HTTP {status}"),
                diagnostics: ApiDiagnostics::default(),
            },
        };
    };

    let detail = parsed.error;
    let diagnostics = ApiDiagnostics {
        code: detail.code,
        error_type: detail.error_type.clone(),
        subcode: detail.error_subcode,
        trace_id: detail.fbtrace_id.clone(),
    };
    tracing::error!(
        status,
        code = ?diagnostics.code,
        error_type = ?diagnostics.error_type,
        subcode = ?diagnostics.subcode,
        trace_id = ?diagnostics.trace_id,
        "Graph API error: {}",
        detail.message
    );

    // Graph codes: 190 expired/invalid token, 102 session, 4/17/32/613 throttling
    match detail.code {
        Some(190) | Some(102) => FetchError::Authentication {
            platform,
            message: detail.message,
        },
        Some(4) | Some(17) | Some(32) | Some(613) => FetchError::RateLimited { platform },
        _ if status == 429 => FetchError::RateLimited { platform },
        _ if detail.error_type.as_deref() == Some("OAuthException") && status == 401 => {
            FetchError::Authentication {
                platform,
                message: detail.message,
            }
        }
        _ => sniff_fetch_message(platform, &detail.message).unwrap_or(FetchError::Api {
            platform,
            status,
            message: detail.message,
            diagnostics,
        }),
    }
}

fn parse_graph_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_rfc3339(ts))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Instagram post fetcher backed by the Graph API, with an oEmbed fallback and a mock mode
pub struct InstagramFetcher {
    client: Client,
    access_token: Option<String>,
    graph_base_url: String,
    oembed_base_url: String,
    mock_latency: Duration,
}

impl InstagramFetcher {
    pub fn new(access_token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            access_token,
            graph_base_url: "https://graph.instagram.com".to_string(),
            oembed_base_url: "https://api.instagram.com/oembed".to_string(),
            mock_latency: Duration::from_millis(500),
        }
    }

    pub fn with_mock_latency(mut self, latency: Duration) -> Self {
        self.mock_latency = latency;
        self
    }

    /// Deterministic content used when no access token is configured
    async fn mock_content(&self, url: &str) -> SourceContent {
        tracing::warn!("Meta Graph API not configured, using mock data");
        tokio::time::sleep(self.mock_latency).await;

        let is_video = looks_like_video(url);
        SourceContent {
            text: MOCK_CAPTION.to_string(),
            source_type: Platform::Instagram,
            media_type: if is_video {
                MediaType::Video
            } else {
                MediaType::Image
            },
            media_ref: Some(if is_video {
                "https://example.com/mock-video.mp4".to_string()
            } else {
                "https://example.com/mock-image.jpg".to_string()
            }),
            author: Some("spaceslam_official".to_string()),
            published_at: Some(Utc::now()),
            video_id: None,
            thumbnail: Some("https://example.com/mock-thumbnail.jpg".to_string()),
            title: None,
            description: None,
            transcript: None,
        }
    }

    /// Authenticated lookup through the Graph API
    #[tracing::instrument(skip(self, access_token))]
    async fn lookup_media(
        &self,
        shortcode: &str,
        access_token: &str,
    ) -> Result<SourceContent, FetchError> {
        let media_id = shortcode_to_media_id(shortcode)?;
        let graph_url = format!("{}/{}", self.graph_base_url, media_id);

        let response = self
            .client
            .get(&graph_url)
            .query(&[("fields", GRAPH_FIELDS), ("access_token", access_token)])
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|e| retype_transport_error(Platform::Instagram, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_graph_error(status.as_u16(), &body));
        }

        let media: GraphMedia = response
            .json()
            .await
            .map_err(|e| retype_transport_error(Platform::Instagram, e))?;

        let media_type = match media.media_type.as_deref() {
            Some("VIDEO") => MediaType::Video,
            _ => MediaType::Image,
        };

        Ok(SourceContent {
            text: media.caption.unwrap_or_default(),
            source_type: Platform::Instagram,
            media_type,
            media_ref: media.media_url,
            author: media.username,
            published_at: media.timestamp.as_deref().and_then(parse_graph_timestamp),
            video_id: None,
            thumbnail: media.thumbnail_url,
            title: None,
            description: None,
            transcript: None,
        })
    }

    /// Public oEmbed lookup, used when the authenticated path is unavailable
    #[tracing::instrument(skip(self))]
    async fn lookup_oembed(&self, url: &str) -> Result<SourceContent, FetchError> {
        let response = self
            .client
            .get(&self.oembed_base_url)
            .query(&[("url", url)])
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|e| retype_transport_error(Platform::Instagram, e))?;

        if !response.status().is_success() {
            return Err(FetchError::Api {
                platform: Platform::Instagram,
                status: response.status().as_u16(),
                message: "oEmbed lookup failed".to_string(),
                diagnostics: ApiDiagnostics::default(),
            });
        }

        let data: OEmbedResponse = response
            .json()
            .await
            .map_err(|e| retype_transport_error(Platform::Instagram, e))?;

        Ok(SourceContent {
            text: data.title.unwrap_or_default(),
            source_type: Platform::Instagram,
            media_type: if looks_like_video(url) {
                MediaType::Video
            } else {
                MediaType::Image
            },
            // oEmbed does not expose the media file itself
            media_ref: None,
            author: data.author_name,
            published_at: None,
            video_id: None,
            thumbnail: data.thumbnail_url,
            title: None,
            description: None,
            transcript: None,
        })
    }
}

#[async_trait]
impl SourceFetcher for InstagramFetcher {
    async fn fetch(&self, url: &str) -> Result<SourceContent, FetchError> {
        let shortcode = extract_shortcode(url).ok_or_else(|| FetchError::InvalidUrl {
            platform: Platform::Instagram,
            url: url.to_string(),
        })?;

        let Some(access_token) = self.access_token.as_deref() else {
            return Ok(self.mock_content(url).await);
        };

        match self.lookup_media(&shortcode, access_token).await {
            Ok(content) => Ok(content),
            Err(err) if err.allows_public_fallback() => {
                tracing::warn!(error = %err, "Graph API unavailable, trying public oEmbed");
                self.lookup_oembed(url).await.map_err(|fallback_err| {
                    tracing::warn!(error = %fallback_err, "oEmbed fallback failed");
                    err
                })
            }
            Err(err) => Err(err),
        }
    }

    fn platform(&self) -> Platform {
        Platform::Instagram
    }
}
