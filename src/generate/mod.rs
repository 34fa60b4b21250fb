use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::backends::{CompletionRequest, TextGenerator, UpstreamClass, UpstreamError};
use crate::config::Config;
use crate::utils::truncate_chars;
use crate::ErrorKind;

pub mod schema;

pub use schema::{
    normalize_carousel, parse_generated, CarouselSlide, GeneratedContent, RichSlide, CAROUSEL_LEN,
    THREADS_SOFT_LIMIT,
};

/// Named set of tone and style parameters that conditions generated copy.
///
/// Owned by whoever stores user profiles; the pipeline only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrandVoiceProfile {
    pub id: String,
    pub name: String,
    pub tone: String,
    pub style: String,
    pub vocabulary: String,
    pub audience: String,
    pub hashtags: Vec<String>,
    pub cta_style: String,
}

impl Default for BrandVoiceProfile {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            name: "Default".to_string(),
            tone: "confident, helpful, friendly".to_string(),
            style: "concise, structured, benefits-first".to_string(),
            vocabulary: "plain language with light emojis".to_string(),
            audience: "creators and developers".to_string(),
            hashtags: vec!["#BrandVoiceAI".to_string()],
            cta_style: "invite conversation".to_string(),
        }
    }
}

impl BrandVoiceProfile {
    /// Hashtags joined for inline use
    pub fn tag_line(&self) -> String {
        self.hashtags.join(" ")
    }

    /// Voice block placed at the top of the system instruction
    pub fn prompt_header(&self) -> String {
        format!(
            "Use this Brand Voice exactly:\n\
             - Name: {}\n\
             - Tone: {}\n\
             - Style: {}\n\
             - Vocabulary: {}\n\
             - Audience: {}\n\
             - CTA Style: {}\n\
             - Hashtags to consider: {}",
            self.name,
            self.tone,
            self.style,
            self.vocabulary,
            self.audience,
            self.cta_style,
            self.hashtags.join(", ")
        )
    }
}

/// Errors raised while producing [`GeneratedContent`]
#[derive(thiserror::Error, Debug)]
pub enum GenerationError {
    #[error("Content generation timed out after {secs} seconds")]
    Timeout { secs: u64 },

    #[error("AI rate limit exceeded. Please try again later.")]
    RateLimited,

    #[error("AI quota exceeded. Please check your billing details.")]
    QuotaExceeded,

    #[error("Content generation failed: {0}")]
    Upstream(UpstreamError),

    #[error("No content generated by the model")]
    Empty,

    #[error("AI response was not valid JSON: {0}")]
    MalformedJson(String),

    #[error("AI response missing required field '{0}'")]
    MissingField(&'static str),

    #[error("AI response field '{0}' has the wrong type")]
    WrongType(&'static str),

    #[error("Carousel slide {} has neither heading nor body", .index + 1)]
    InvalidSlide { index: usize },
}

impl From<UpstreamError> for GenerationError {
    fn from(err: UpstreamError) -> Self {
        match err.class() {
            UpstreamClass::RateLimited => GenerationError::RateLimited,
            UpstreamClass::QuotaExceeded => GenerationError::QuotaExceeded,
            _ => GenerationError::Upstream(err),
        }
    }
}

impl GenerationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GenerationError::Timeout { .. }
            | GenerationError::RateLimited
            | GenerationError::QuotaExceeded
            | GenerationError::Upstream(_) => ErrorKind::UpstreamTransient,
            GenerationError::Empty
            | GenerationError::MalformedJson(_)
            | GenerationError::MissingField(_)
            | GenerationError::WrongType(_)
            | GenerationError::InvalidSlide { .. } => ErrorKind::UpstreamMalformed,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            GenerationError::Timeout { .. } => "generation_timeout",
            GenerationError::RateLimited => "upstream_rate_limited",
            GenerationError::QuotaExceeded => "upstream_quota_exceeded",
            GenerationError::Upstream(_) => "upstream_error",
            GenerationError::Empty => "empty_response",
            GenerationError::MalformedJson(_) => "malformed_json",
            GenerationError::MissingField(_) => "missing_field",
            GenerationError::WrongType(_) => "wrong_field_type",
            GenerationError::InvalidSlide { .. } => "invalid_slide",
        }
    }

    /// HTTP status; a timeout is reported as a gateway timeout
    pub fn status_code(&self) -> u16 {
        match self {
            GenerationError::Timeout { .. } => 504,
            other => other.kind().status_code(),
        }
    }
}

const WRITER_INSTRUCTION: &str = "You are a brand copywriter. Rewrite and transform the source content according to the Brand Voice above. Return JSON only, as one object with exactly these keys: \"linkedin\" (string), \"carousel\" (array of 5 objects with \"heading\" and \"body\"), \"threads\" (string, at most 500 characters), \"video_script\" (string).";

/// System instruction for the copy call
pub fn build_system_prompt(voice: &BrandVoiceProfile) -> String {
    format!("{}\n\n{}", voice.prompt_header(), WRITER_INSTRUCTION)
}

/// User instruction; the transcript section is only present when there is one
pub fn build_user_prompt(source_text: &str, transcript: Option<&str>) -> String {
    let transcript = transcript
        .filter(|t| !t.trim().is_empty())
        .map(|t| format!("\n\nTranscript (optional):\n{t}"))
        .unwrap_or_default();
    format!(
        "Source Caption:\n{source_text}{transcript}\n\nGenerate cross-platform content in the saved voice."
    )
}

/// Fixed reply used when no text model is configured, shaped like a real one
pub fn mock_content(
    source_text: &str,
    transcript: Option<&str>,
    voice: &BrandVoiceProfile,
) -> GeneratedContent {
    let tag_line = voice.tag_line();
    let snippet = truncate_chars(source_text, 120);

    let insight = transcript
        .map(|t| format!("\n\nVideo insight: \"{}...\"", truncate_chars(t, 150)))
        .unwrap_or_default();

    GeneratedContent {
        linkedin: format!("🚀 {} Take:\n\n{source_text}{insight}\n\n{tag_line}", voice.name),
        carousel: vec![
            CarouselSlide::rich("Key Idea", format!("{snippet}...")),
            CarouselSlide::rich(
                "Why It Matters",
                "Clear benefit-focused explanation in the saved voice.",
            ),
            CarouselSlide::rich(
                "How To Use It",
                "Practical next steps the audience can take today.",
            ),
            CarouselSlide::rich(
                "Common Pitfall",
                "One mistake to avoid, phrased in the saved voice.",
            ),
            CarouselSlide::rich("Call To Action", voice.cta_style.clone()),
        ],
        threads: format!("Quick takeaway → {snippet}… {tag_line}"),
        video_script: format!(
            "Intro → Hook in saved voice\nBody → 2–3 benefit points\nCTA → {}",
            voice.cta_style
        ),
    }
}

/// Turns source text into brand-voice copy through a text model
pub struct ContentGenerator {
    text: Option<Arc<dyn TextGenerator>>,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
    mock_latency: Duration,
}

impl ContentGenerator {
    pub fn new(text: Option<Arc<dyn TextGenerator>>) -> Self {
        let defaults = crate::config::GenerationConfig::default();
        Self {
            text,
            temperature: defaults.temperature,
            max_tokens: defaults.max_tokens,
            timeout: Duration::from_secs(defaults.timeout_secs),
            mock_latency: Duration::ZERO,
        }
    }

    pub fn from_config(config: &Config, text: Option<Arc<dyn TextGenerator>>) -> Self {
        Self {
            temperature: config.generation.temperature,
            max_tokens: config.generation.max_tokens,
            timeout: Duration::from_secs(config.generation.timeout_secs),
            mock_latency: Duration::from_millis(config.app.mock_latency_ms),
            ..Self::new(text)
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_mock(&self) -> bool {
        self.text.is_none()
    }

    /// Generate the four channel outputs for one piece of source content
    #[tracing::instrument(skip_all, fields(voice = %voice.name, has_transcript = transcript.is_some()))]
    pub async fn generate(
        &self,
        source_text: &str,
        transcript: Option<&str>,
        voice: &BrandVoiceProfile,
    ) -> Result<GeneratedContent, GenerationError> {
        let Some(text) = self.text.as_ref() else {
            tracing::info!("Text model not configured, using mock content");
            tokio::time::sleep(self.mock_latency).await;
            return Ok(mock_content(source_text, transcript, voice));
        };

        let request = CompletionRequest {
            system: build_system_prompt(voice),
            user: build_user_prompt(source_text, transcript),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            json_mode: true,
        };

        let raw = tokio::time::timeout(self.timeout, text.complete(&request))
            .await
            .map_err(|_| GenerationError::Timeout {
                secs: self.timeout.as_secs(),
            })??;

        parse_generated(&raw).inspect_err(|e| {
            tracing::error!(error = %e, raw_len = raw.len(), "Model reply failed validation");
        })
    }
}
