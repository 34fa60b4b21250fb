use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::backends::{BackendAvailability, Backends, ImageGenerator, SpeechTranscriber, TextGenerator};
use crate::config::Config;
use crate::extractors::instagram::InstagramFetcher;
use crate::extractors::youtube::YoutubeFetcher;
use crate::extractors::{
    classify, FetchError, FetcherRegistry, MediaType, Platform, SourceContent, SourceFetcher,
};
use crate::generate::{BrandVoiceProfile, CarouselSlide, ContentGenerator, GeneratedContent, GenerationError};
use crate::images::{ImageAugmenter, ImageOptions};
use crate::ratelimit::RateLimiter;
use crate::transcribe::{HttpMediaDownloader, MediaDownloader, TranscriptionAdapter};
use crate::ErrorKind;

/// Short random id tying a client-visible error to server logs
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Terminal failure of a pipeline request
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("Invalid URL format. Please provide a valid Instagram or YouTube URL.")]
    UnsupportedUrl { url: String },

    #[error("{0}")]
    InvalidInput(String),

    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited { remaining: u32 },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("Internal error, reference {request_id}")]
    Internal { request_id: String, message: String },
}

impl PipelineError {
    pub fn internal(message: impl Into<String>) -> Self {
        let request_id = new_request_id();
        let message = message.into();
        tracing::error!(request_id = %request_id, "Internal error: {}", message);
        PipelineError::Internal {
            request_id,
            message,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::UnsupportedUrl { .. } | PipelineError::InvalidInput(_) => {
                ErrorKind::InvalidInput
            }
            PipelineError::RateLimited { .. } => ErrorKind::RateLimited,
            PipelineError::Fetch(e) => e.kind(),
            PipelineError::Generation(e) => e.kind(),
            PipelineError::Internal { .. } => ErrorKind::Internal,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            PipelineError::UnsupportedUrl { .. } => "unsupported_url",
            PipelineError::InvalidInput(_) => "invalid_input",
            PipelineError::RateLimited { .. } => "rate_limited",
            PipelineError::Fetch(e) => e.reason(),
            PipelineError::Generation(e) => e.reason(),
            PipelineError::Internal { .. } => "internal_error",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            PipelineError::Generation(e) => e.status_code(),
            other => other.kind().status_code(),
        }
    }

    /// Correlation id already logged for this error, if any
    pub fn request_id(&self) -> Option<&str> {
        match self {
            PipelineError::Internal { request_id, .. } => Some(request_id),
            _ => None,
        }
    }
}

/// Metadata returned alongside generated content
#[derive(Debug, Clone, Serialize)]
pub struct ProcessMetadata {
    pub source_url: String,
    pub source_type: Platform,
    pub media_type: MediaType,
    pub username: Option<String>,
    pub has_transcript: bool,
    pub transcript_length: usize,
    pub timestamp: DateTime<Utc>,
    pub video_id: Option<String>,
}

/// Successful result of [`Pipeline::process`]
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub content: GeneratedContent,
    pub metadata: ProcessMetadata,
    /// Requests left in the caller's rate-limit window
    pub remaining: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstagramPreview {
    pub username: Option<String>,
    pub media_type: MediaType,
    pub caption: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YoutubePreview {
    pub title: String,
    pub channel_title: Option<String>,
    pub description: String,
    pub published_at: Option<DateTime<Utc>>,
    pub thumbnail: Option<String>,
}

/// Source summary shown before processing, tagged by platform
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum PreviewData {
    Instagram(InstagramPreview),
    Youtube(YoutubePreview),
}

impl From<SourceContent> for PreviewData {
    fn from(source: SourceContent) -> Self {
        match source.source_type {
            Platform::Instagram => PreviewData::Instagram(InstagramPreview {
                username: source.author,
                media_type: source.media_type,
                caption: source.text,
                timestamp: source.published_at,
                thumbnail: source.thumbnail,
            }),
            Platform::YouTube => PreviewData::Youtube(YoutubePreview {
                title: source.title.unwrap_or_default(),
                channel_title: source.author,
                description: source.description.unwrap_or_default(),
                published_at: source.published_at,
                thumbnail: source.thumbnail,
            }),
        }
    }
}

/// The whole repurposing flow: classify, fetch, transcribe, generate, illustrate
pub struct Pipeline {
    fetchers: FetcherRegistry,
    transcriber: TranscriptionAdapter,
    generator: ContentGenerator,
    augmenter: ImageAugmenter,
    limiter: RateLimiter,
    default_voice: BrandVoiceProfile,
    image_options: ImageOptions,
    synthesize_prompts: bool,
    auto_images: bool,
    availability: BackendAvailability,
}

impl Pipeline {
    pub fn builder(config: Config) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// Pipeline with real backends wherever credentials are configured
    pub fn from_config(config: Config) -> Self {
        let backends = Backends::from_config(&config);
        PipelineBuilder::new(config).backends(backends).build()
    }

    pub fn availability(&self) -> BackendAvailability {
        self.availability
    }

    pub fn image_options(&self) -> &ImageOptions {
        &self.image_options
    }

    pub fn rate_limit(&self) -> u32 {
        self.limiter.limit()
    }

    pub fn platforms(&self) -> Vec<Platform> {
        self.fetchers.list_platforms()
    }

    fn classify(&self, url: &str) -> Result<Platform, PipelineError> {
        classify(url).ok_or_else(|| PipelineError::UnsupportedUrl {
            url: url.to_string(),
        })
    }

    fn fetcher(&self, platform: Platform) -> Result<&dyn SourceFetcher, PipelineError> {
        self.fetchers
            .find(platform)
            .ok_or_else(|| PipelineError::internal(format!("no fetcher registered for {platform}")))
    }

    /// Run one request end to end.
    ///
    /// Source fetch and generation failures end the request. Transcription and image
    /// failures only degrade the result.
    #[tracing::instrument(skip(self, voice), fields(client = %client_key))]
    pub async fn process(
        &self,
        client_key: &str,
        url: &str,
        voice: Option<&BrandVoiceProfile>,
    ) -> Result<ProcessOutcome, PipelineError> {
        let url = url.trim();
        let platform = self.classify(url)?;

        let decision = self.limiter.check(client_key).await;
        if !decision.allowed {
            tracing::warn!("Rate limit exceeded");
            return Err(PipelineError::RateLimited {
                remaining: decision.remaining,
            });
        }

        tracing::info!(%platform, "Fetching source content");
        let source = self.fetcher(platform)?.fetch(url).await?;

        let transcript = self.resolve_transcript(&source).await;
        let voice = voice.unwrap_or(&self.default_voice);

        tracing::info!(mock = self.generator.is_mock(), "Generating content");
        let mut content = self
            .generator
            .generate(&source.text, transcript.as_deref(), voice)
            .await?;
        content.carousel = self.augment(content.carousel).await;

        Ok(ProcessOutcome {
            metadata: ProcessMetadata {
                source_url: url.to_string(),
                source_type: source.source_type,
                media_type: source.media_type,
                username: source.author,
                has_transcript: transcript.is_some(),
                transcript_length: transcript.as_ref().map(|t| t.chars().count()).unwrap_or(0),
                timestamp: Utc::now(),
                video_id: source.video_id,
            },
            content,
            remaining: decision.remaining,
        })
    }

    /// Platform captions first, else speech-to-text over the attached video
    async fn resolve_transcript(&self, source: &SourceContent) -> Option<String> {
        if let Some(transcript) = source.transcript.as_ref().filter(|t| !t.trim().is_empty()) {
            return Some(transcript.clone());
        }
        match (source.media_type, source.media_ref.as_deref()) {
            (MediaType::Video, Some(media_url)) => {
                tracing::info!("Starting video transcription");
                self.transcriber.transcribe_or_none(media_url).await
            }
            _ => None,
        }
    }

    async fn augment(&self, slides: Vec<CarouselSlide>) -> Vec<CarouselSlide> {
        let slides = if self.synthesize_prompts {
            self.augmenter
                .synthesize_prompts(slides, &self.image_options)
                .await
        } else {
            slides
        };

        if self.auto_images {
            self.augmenter
                .synthesize_images(slides, &self.image_options)
                .await
        } else {
            slides
        }
    }

    /// Resolve a URL to a platform-tagged preview without generating anything
    #[tracing::instrument(skip(self))]
    pub async fn preview(&self, url: &str) -> Result<PreviewData, PipelineError> {
        let url = url.trim();
        let platform = self.classify(url)?;
        let source = self.fetcher(platform)?.fetch(url).await?;
        Ok(source.into())
    }

    /// Deferred image generation for slides the caller already holds
    pub async fn generate_images(
        &self,
        slides: Vec<CarouselSlide>,
        options: &ImageOptions,
    ) -> Vec<CarouselSlide> {
        let slides = self.augmenter.synthesize_prompts(slides, options).await;
        self.augmenter.synthesize_images(slides, options).await
    }
}

/// Assembles a [`Pipeline`], letting tests swap any backend
pub struct PipelineBuilder {
    config: Config,
    backends: Backends,
    downloader: Option<Arc<dyn MediaDownloader>>,
    fetchers: Vec<Box<dyn SourceFetcher>>,
    limiter: Option<RateLimiter>,
    availability: BackendAvailability,
}

impl PipelineBuilder {
    /// Starts with every generative backend in mock mode
    pub fn new(config: Config) -> Self {
        Self {
            availability: BackendAvailability::from_config(&config),
            config,
            backends: Backends::mock(),
            downloader: None,
            fetchers: Vec::new(),
            limiter: None,
        }
    }

    /// Override which platforms are treated as reachable.
    ///
    /// Generative flags are always recomputed from the injected backends at build time.
    pub fn availability(mut self, availability: BackendAvailability) -> Self {
        self.availability = availability;
        self
    }

    pub fn backends(mut self, backends: Backends) -> Self {
        self.backends = backends;
        self
    }

    pub fn text(mut self, text: Arc<dyn TextGenerator>) -> Self {
        self.backends.text = Some(text);
        self
    }

    pub fn image(mut self, image: Arc<dyn ImageGenerator>) -> Self {
        self.backends.image = Some(image);
        self
    }

    pub fn speech(mut self, speech: Arc<dyn SpeechTranscriber>) -> Self {
        self.backends.speech = Some(speech);
        self
    }

    pub fn downloader(mut self, downloader: Arc<dyn MediaDownloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    /// Replace the built-in fetcher for the fetcher's platform
    pub fn fetcher(mut self, fetcher: Box<dyn SourceFetcher>) -> Self {
        self.fetchers.push(fetcher);
        self
    }

    pub fn rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn build(self) -> Pipeline {
        let config = self.config;
        let mock_latency = Duration::from_millis(config.app.mock_latency_ms);

        let mut availability = self.availability;
        availability.text = self.backends.text.is_some();
        availability.image = self.backends.image.is_some();
        availability.speech = self.backends.speech.is_some();

        let sources = availability.source_credentials(&config.credentials);
        let mut fetchers = FetcherRegistry::new();
        fetchers.register(Box::new(
            InstagramFetcher::new(sources.instagram).with_mock_latency(mock_latency),
        ));
        fetchers.register(Box::new(
            YoutubeFetcher::new(sources.youtube).with_mock_latency(mock_latency),
        ));
        for fetcher in self.fetchers {
            fetchers.register(fetcher);
        }

        let downloader = self
            .downloader
            .unwrap_or_else(|| Arc::new(HttpMediaDownloader::new()));

        Pipeline {
            fetchers,
            transcriber: TranscriptionAdapter::from_config(
                &config,
                self.backends.speech.clone(),
                downloader,
            ),
            generator: ContentGenerator::from_config(&config, self.backends.text.clone()),
            augmenter: ImageAugmenter::new(self.backends.text, self.backends.image),
            limiter: self
                .limiter
                .unwrap_or_else(|| RateLimiter::from_config(&config)),
            default_voice: config.brand_voice.clone().unwrap_or_default(),
            image_options: ImageOptions::from_config(&config.images),
            synthesize_prompts: config.images.synthesize_prompts,
            auto_images: config.images.auto_generate,
            availability,
        }
    }
}
