//! Capability interfaces for the external generative backends.
//!
//! The pipeline never talks to a model API directly. It holds one optional handle per
//! capability; a missing handle means that capability runs in mock mode. Which handles
//! exist is decided once, from the credentials in [`Config`], and injected.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::config::{Config, Credentials};
use crate::openai::OpenAIClient;

/// One chat-completion call
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask for a single JSON object
    pub json_mode: bool,
}

/// Fixed decoding parameters for speech-to-text
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionOptions {
    pub language: String,
    pub temperature: f32,
}

impl Default for TranscriptionOptions {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            temperature: 0.0,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Return the raw text of the first choice
    async fn complete(&self, request: &CompletionRequest) -> Result<String, UpstreamError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Return one base64 encoded PNG for the prompt
    async fn generate_image(&self, prompt: &str, size: &str) -> Result<String, UpstreamError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechTranscriber: Send + Sync {
    /// Transcribe the media file at `path`, streaming it from disk
    async fn transcribe_file(
        &self,
        path: &Path,
        options: &TranscriptionOptions,
    ) -> Result<String, UpstreamError>;
}

/// How an upstream failure should be reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamClass {
    RateLimited,
    QuotaExceeded,
    InvalidRequest,
    Network,
    Other,
}

/// Failure reported by a generative backend
#[derive(thiserror::Error, Debug, Clone)]
#[error("upstream error: {message}")]
pub struct UpstreamError {
    pub status: Option<u16>,
    pub code: Option<String>,
    pub error_type: Option<String>,
    pub message: String,
    /// The request never produced an HTTP response
    pub transport: bool,
}

impl UpstreamError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            error_type: None,
            message: message.into(),
            transport: true,
        }
    }

    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code: None,
            error_type: None,
            message: message.into(),
            transport: false,
        }
    }

    /// Classify from the structured fields first, falling back to the message text
    pub fn class(&self) -> UpstreamClass {
        match self.code.as_deref() {
            Some("insufficient_quota") => return UpstreamClass::QuotaExceeded,
            Some("rate_limit_exceeded") => return UpstreamClass::RateLimited,
            _ => {}
        }
        match self.error_type.as_deref() {
            Some("insufficient_quota") => return UpstreamClass::QuotaExceeded,
            Some("rate_limit_exceeded") | Some("requests") | Some("tokens") => {
                return UpstreamClass::RateLimited
            }
            Some("invalid_request_error") => return UpstreamClass::InvalidRequest,
            _ => {}
        }
        if self.status == Some(429) {
            return UpstreamClass::RateLimited;
        }
        if self.transport {
            return UpstreamClass::Network;
        }
        if self.code.is_none() && self.error_type.is_none() {
            if let Some(class) = sniff_upstream_message(&self.message) {
                return class;
            }
        }
        UpstreamClass::Other
    }
}

/// Last-resort classification for backends that return unstructured errors
pub(crate) fn sniff_upstream_message(message: &str) -> Option<UpstreamClass> {
    let lower = message.to_lowercase();
    if lower.contains("insufficient_quota") || lower.contains("quota") {
        Some(UpstreamClass::QuotaExceeded)
    } else if lower.contains("rate_limit") || lower.contains("rate limit") {
        Some(UpstreamClass::RateLimited)
    } else if lower.contains("network") {
        Some(UpstreamClass::Network)
    } else {
        None
    }
}

/// Which external services have credentials, computed once at start-up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct BackendAvailability {
    pub text: bool,
    pub image: bool,
    pub speech: bool,
    pub instagram: bool,
    pub youtube: bool,
    pub counter_store: bool,
}

impl BackendAvailability {
    pub fn from_config(config: &Config) -> Self {
        let creds = &config.credentials;
        let openai = creds.openai_api_key.is_some();
        Self {
            text: openai,
            image: openai,
            speech: openai,
            instagram: creds.meta_access_token.is_some(),
            youtube: creds.youtube_api_key.is_some(),
            counter_store: creds.upstash_url.is_some() && creds.upstash_token.is_some(),
        }
    }

    /// True when nothing needs a network credential
    pub fn fully_mocked(&self) -> bool {
        !(self.text || self.image || self.speech || self.instagram || self.youtube)
    }

    /// Platform credentials for the fetchers. A platform marked unavailable gets none and
    /// runs in mock mode, whatever the credential set holds.
    pub fn source_credentials(&self, creds: &Credentials) -> SourceCredentials {
        SourceCredentials {
            instagram: creds.meta_access_token.clone().filter(|_| self.instagram),
            youtube: creds.youtube_api_key.clone().filter(|_| self.youtube),
        }
    }
}

/// Per-platform fetcher credentials after availability gating
#[derive(Clone, Default)]
pub struct SourceCredentials {
    pub instagram: Option<String>,
    pub youtube: Option<String>,
}

/// Injected generative backends. `None` selects the deterministic mock path.
#[derive(Clone, Default)]
pub struct Backends {
    pub text: Option<Arc<dyn TextGenerator>>,
    pub image: Option<Arc<dyn ImageGenerator>>,
    pub speech: Option<Arc<dyn SpeechTranscriber>>,
}

impl Backends {
    /// All capabilities in mock mode
    pub fn mock() -> Self {
        Self::default()
    }

    /// Build one shared OpenAI client when a key is configured
    pub fn from_config(config: &Config) -> Self {
        let Some(api_key) = config.credentials.openai_api_key.clone() else {
            tracing::warn!("OPENAI_API_KEY not set, generative backends run in mock mode");
            return Self::mock();
        };

        let client = Arc::new(
            OpenAIClient::new(api_key)
                .with_base_url(config.openai.base_url.clone())
                .with_models(
                    config.openai.text_model.clone(),
                    config.openai.image_model.clone(),
                    config.openai.speech_model.clone(),
                ),
        );

        Self {
            text: Some(client.clone()),
            image: Some(client.clone()),
            speech: Some(client),
        }
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("text", &self.text.is_some())
            .field("image", &self.image.is_some())
            .field("speech", &self.speech.is_some())
            .finish()
    }
}
