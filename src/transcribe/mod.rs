use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::backends::{SpeechTranscriber, TranscriptionOptions, UpstreamClass, UpstreamError};
use crate::config::Config;

pub mod media;

pub use media::{sniff_container, validate_media, validate_size, MediaContainer};

pub const MOCK_TRANSCRIPT: &str = "Mock transcript: Welcome to this amazing space-tech tutorial! Today we're exploring how developers can ship faster with the right tools. First, automate the boring parts. Second, measure what matters. Finally, share what you learn with your community.";

/// Errors raised while turning a media reference into text
#[derive(thiserror::Error, Debug)]
pub enum TranscriptionError {
    #[error("Failed to download media{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Download { status: Option<u16>, message: String },

    #[error("Media is {size} bytes, above the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },

    #[error("Unsupported media container, expected MP4, WebM or FLV")]
    UnsupportedFormat,

    #[error("Temporary media file error: {0}")]
    TempFile(#[from] std::io::Error),

    #[error("Transcription rate limit exceeded. Please try again later.")]
    RateLimited,

    #[error("Transcription quota exceeded. Please check your billing details.")]
    QuotaExceeded,

    #[error("Invalid audio file for transcription: {0}")]
    InvalidAudio(String),

    #[error("Transcription backend failed: {0}")]
    Upstream(UpstreamError),
}

impl From<UpstreamError> for TranscriptionError {
    fn from(err: UpstreamError) -> Self {
        match err.class() {
            UpstreamClass::RateLimited => TranscriptionError::RateLimited,
            UpstreamClass::QuotaExceeded => TranscriptionError::QuotaExceeded,
            UpstreamClass::InvalidRequest => TranscriptionError::InvalidAudio(err.message),
            UpstreamClass::Network | UpstreamClass::Other => TranscriptionError::Upstream(err),
        }
    }
}

/// Fetches a media file into memory, refusing anything above `max_bytes`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    async fn download(&self, url: &str, max_bytes: u64) -> Result<Vec<u8>, TranscriptionError>;
}

/// Streaming HTTP downloader with an early `Content-Length` check
pub struct HttpMediaDownloader {
    client: Client,
}

impl HttpMediaDownloader {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for HttpMediaDownloader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDownloader for HttpMediaDownloader {
    #[tracing::instrument(skip(self))]
    async fn download(&self, url: &str, max_bytes: u64) -> Result<Vec<u8>, TranscriptionError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TranscriptionError::Download {
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(TranscriptionError::Download {
                status: Some(response.status().as_u16()),
                message: response
                    .status()
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string(),
            });
        }

        if let Some(content_type) = response.headers().get(reqwest::header::CONTENT_TYPE) {
            tracing::debug!(content_type = ?content_type, "Media content type");
        }

        if let Some(len) = response.content_length() {
            validate_size(len, max_bytes)?;
        }

        let mut buffer = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| TranscriptionError::Download {
                status: None,
                message: e.to_string(),
            })?;
            buffer.extend_from_slice(&chunk);
            validate_size(buffer.len() as u64, max_bytes)?;
        }

        tracing::debug!(
            "Downloaded {}",
            crate::utils::format_file_size(buffer.len() as u64)
        );
        Ok(buffer)
    }
}

/// Downloads media, validates it, and runs speech-to-text over a scoped temp file
pub struct TranscriptionAdapter {
    speech: Option<Arc<dyn SpeechTranscriber>>,
    downloader: Arc<dyn MediaDownloader>,
    options: TranscriptionOptions,
    max_bytes: u64,
    temp_dir: Option<PathBuf>,
    mock_latency: Duration,
}

impl TranscriptionAdapter {
    pub fn new(
        speech: Option<Arc<dyn SpeechTranscriber>>,
        downloader: Arc<dyn MediaDownloader>,
    ) -> Self {
        let defaults = crate::config::TranscriptionConfig::default();
        Self {
            speech,
            downloader,
            options: TranscriptionOptions::default(),
            max_bytes: defaults.max_bytes,
            temp_dir: None,
            mock_latency: Duration::ZERO,
        }
    }

    pub fn from_config(
        config: &Config,
        speech: Option<Arc<dyn SpeechTranscriber>>,
        downloader: Arc<dyn MediaDownloader>,
    ) -> Self {
        Self {
            options: TranscriptionOptions {
                language: config.transcription.language.clone(),
                temperature: config.transcription.temperature,
            },
            max_bytes: config.transcription.max_bytes,
            temp_dir: config.transcription.temp_dir.clone(),
            mock_latency: Duration::from_millis(config.app.mock_latency_ms),
            ..Self::new(speech, downloader)
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Transcribe the media behind `media_url`
    #[tracing::instrument(skip(self))]
    pub async fn transcribe(&self, media_url: &str) -> Result<String, TranscriptionError> {
        let Some(speech) = self.speech.as_ref() else {
            tracing::warn!("Speech backend not configured, using mock transcript");
            tokio::time::sleep(self.mock_latency).await;
            return Ok(MOCK_TRANSCRIPT.to_string());
        };

        let bytes = self.downloader.download(media_url, self.max_bytes).await?;
        let container = validate_media(&bytes, self.max_bytes)?;
        tracing::info!(
            container = container.extension(),
            "Transcribing {}",
            crate::utils::format_file_size(bytes.len() as u64)
        );

        // Deleted when dropped, on every exit path below
        let mut builder = tempfile::Builder::new();
        let prefix = format!("media_{}", uuid::Uuid::new_v4());
        let suffix = format!(".{}", container.extension());
        builder.prefix(&prefix).suffix(&suffix).rand_bytes(0);
        let temp = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        tokio::fs::write(temp.path(), &bytes).await?;
        drop(bytes);

        let text = speech.transcribe_file(temp.path(), &self.options).await?;
        Ok(text)
    }

    /// Transcribe, converting any failure into an absent transcript
    pub async fn transcribe_or_none(&self, media_url: &str) -> Option<String> {
        match self.transcribe(media_url).await {
            Ok(text) if text.trim().is_empty() => None,
            Ok(text) => Some(text),
            Err(err) => {
                tracing::warn!(error = %err, "Transcription failed, continuing without transcript");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockSpeechTranscriber;
    use std::path::Path;
    use std::sync::Mutex;

    fn mp4_bytes() -> Vec<u8> {
        let mut bytes = vec![0x00, 0x00, 0x00, 0x18, b'f', b't', b'y', b'p'];
        bytes.extend_from_slice(&[0u8; 64]);
        bytes
    }

    fn downloader_returning(bytes: Vec<u8>) -> Arc<dyn MediaDownloader> {
        let mut downloader = MockMediaDownloader::new();
        downloader
            .expect_download()
            .returning(move |_, _| Ok(bytes.clone()));
        Arc::new(downloader)
    }

    #[tokio::test]
    async fn test_mock_mode_skips_download() {
        let mut downloader = MockMediaDownloader::new();
        downloader.expect_download().never();

        let adapter = TranscriptionAdapter::new(None, Arc::new(downloader));
        let text = adapter.transcribe("https://example.com/v.mp4").await.unwrap();
        assert!(text.starts_with("Mock transcript:"));
    }

    #[tokio::test]
    async fn test_temp_file_is_streamed_then_removed() {
        let seen: Arc<Mutex<Option<PathBuf>>> = Arc::new(Mutex::new(None));
        let seen_inner = seen.clone();

        let mut speech = MockSpeechTranscriber::new();
        speech
            .expect_transcribe_file()
            .withf(|_, options| options.language == "en" && options.temperature == 0.0)
            .returning(move |path: &Path, _| {
                assert!(path.exists());
                let name = path.file_name().unwrap().to_string_lossy().to_string();
                assert!(name.starts_with("media_") && name.ends_with(".mp4"));
                *seen_inner.lock().unwrap() = Some(path.to_path_buf());
                Ok("hello world".to_string())
            });

        let adapter = TranscriptionAdapter::new(Some(Arc::new(speech)), downloader_returning(mp4_bytes()));
        let text = adapter.transcribe("https://example.com/v.mp4").await.unwrap();
        assert_eq!(text, "hello world");

        let path = seen.lock().unwrap().clone().unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_written_media_is_complete_before_upload() {
        let mut media = mp4_bytes();
        media.extend((0..3 * 1024 * 1024).map(|i| (i % 251) as u8));
        let expected = media.clone();

        let mut speech = MockSpeechTranscriber::new();
        speech
            .expect_transcribe_file()
            .times(1)
            .returning(move |path: &Path, _| {
                assert_eq!(std::fs::read(path).unwrap(), expected);
                Ok("complete".to_string())
            });

        let adapter = TranscriptionAdapter::new(Some(Arc::new(speech)), downloader_returning(media));
        let text = adapter.transcribe("https://example.com/v.mp4").await.unwrap();
        assert_eq!(text, "complete");
    }

    #[tokio::test]
    async fn test_temp_file_removed_on_failure() {
        let seen: Arc<Mutex<Option<PathBuf>>> = Arc::new(Mutex::new(None));
        let seen_inner = seen.clone();

        let mut speech = MockSpeechTranscriber::new();
        speech.expect_transcribe_file().returning(move |path: &Path, _| {
            *seen_inner.lock().unwrap() = Some(path.to_path_buf());
            Err(UpstreamError::api(429, "Rate limit reached"))
        });

        let adapter = TranscriptionAdapter::new(Some(Arc::new(speech)), downloader_returning(mp4_bytes()));
        let err = adapter.transcribe("https://example.com/v.mp4").await.unwrap_err();
        assert!(matches!(err, TranscriptionError::RateLimited));

        let path = seen.lock().unwrap().clone().unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_invalid_container_never_reaches_backend() {
        let mut speech = MockSpeechTranscriber::new();
        speech.expect_transcribe_file().never();

        let adapter = TranscriptionAdapter::new(
            Some(Arc::new(speech)),
            downloader_returning(b"<html>not media</html>".to_vec()),
        );
        assert!(matches!(
            adapter.transcribe("https://example.com/v.mp4").await,
            Err(TranscriptionError::UnsupportedFormat)
        ));
        assert!(adapter
            .transcribe_or_none("https://example.com/v.mp4")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_oversized_media_rejected() {
        let mut speech = MockSpeechTranscriber::new();
        speech.expect_transcribe_file().never();

        let adapter = TranscriptionAdapter::new(Some(Arc::new(speech)), downloader_returning(mp4_bytes()))
            .with_max_bytes(16);
        assert!(matches!(
            adapter.transcribe("https://example.com/v.mp4").await,
            Err(TranscriptionError::TooLarge { limit: 16, .. })
        ));
    }

    #[test]
    fn test_upstream_retyping() {
        let quota = UpstreamError {
            code: Some("insufficient_quota".into()),
            ..UpstreamError::api(429, "quota")
        };
        assert!(matches!(
            TranscriptionError::from(quota),
            TranscriptionError::QuotaExceeded
        ));

        let invalid = UpstreamError {
            error_type: Some("invalid_request_error".into()),
            ..UpstreamError::api(400, "Invalid file format.")
        };
        assert!(matches!(
            TranscriptionError::from(invalid),
            TranscriptionError::InvalidAudio(msg) if msg == "Invalid file format."
        ));
    }
}
