//! Repurposer - turn a social post into copy for other channels
//!
//! This library resolves an Instagram or YouTube URL to its source content, optionally
//! transcribes the embedded media, and asks a generative model to rewrite it in a brand
//! voice as a LinkedIn post, a five-slide carousel, a Threads post and a video script.

pub mod backends;
pub mod cli;
pub mod config;
pub mod extractors;
pub mod generate;
pub mod images;
pub mod openai;
pub mod output;
pub mod pipeline;
pub mod ratelimit;
pub mod server;
pub mod transcribe;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use backends::{BackendAvailability, Backends};
pub use cli::{Cli, Commands, OutputFormat};
pub use config::Config;
pub use extractors::{classify, MediaType, Platform, SourceContent, SourceType};
pub use generate::{BrandVoiceProfile, CarouselSlide, ContentGenerator, GeneratedContent};
pub use images::{ImageAugmenter, ImageOptions, StorageMode};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineError, ProcessOutcome};
pub use ratelimit::{RateLimitDecision, RateLimiter};
pub use transcribe::TranscriptionAdapter;

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Coarse classification of every error that can reach a caller.
///
/// The HTTP layer maps each kind to a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or unsupported input, the caller has to fix it
    InvalidInput,
    /// A platform or the local caller was denied
    Unauthorized,
    /// Too many requests, locally or upstream
    RateLimited,
    /// Network, rate-limit or timeout trouble in a third-party backend
    UpstreamTransient,
    /// The generative model returned something we could not repair
    UpstreamMalformed,
    /// Anything unexpected
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::UpstreamTransient => "upstream_transient",
            ErrorKind::UpstreamMalformed => "upstream_malformed",
            ErrorKind::Internal => "internal",
        }
    }

    /// HTTP status code for this kind
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::InvalidInput => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::RateLimited => 429,
            ErrorKind::UpstreamTransient => 502,
            ErrorKind::UpstreamMalformed => 500,
            ErrorKind::Internal => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
