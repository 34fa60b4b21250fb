use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};

use repurposer::backends::{
    CompletionRequest, ImageGenerator, SpeechTranscriber, TextGenerator, TranscriptionOptions,
    UpstreamError,
};

/// Well-formed model reply with `slides` carousel entries
pub fn content_json(slides: usize) -> String {
    let carousel: Vec<_> = (0..slides)
        .map(|i| serde_json::json!({ "heading": format!("Heading {}", i + 1), "body": "Body" }))
        .collect();
    serde_json::json!({
        "linkedin": "A LinkedIn post",
        "carousel": carousel,
        "threads": "A short thread",
        "video_script": "Hook. Story. CTA.",
    })
    .to_string()
}

/// Answers JSON-mode requests with `content_reply` and everything else with `prompt_reply`
#[derive(Clone)]
pub struct MockTextBackend {
    pub content_reply: String,
    pub prompt_reply: String,
    pub calls: Arc<Mutex<Vec<CompletionRequest>>>,
    pub fail_with: Option<UpstreamError>,
}

impl MockTextBackend {
    pub fn new(content_reply: impl Into<String>) -> Self {
        Self {
            content_reply: content_reply.into(),
            prompt_reply: "  A glowing nebula over a laptop  ".to_string(),
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_with: None,
        }
    }

    pub fn failing(err: UpstreamError) -> Self {
        Self {
            fail_with: Some(err),
            ..Self::new("")
        }
    }

    pub fn json_calls(&self) -> usize {
        self.calls.lock().unwrap().iter().filter(|r| r.json_mode).count()
    }
}

#[async_trait]
impl TextGenerator for MockTextBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, UpstreamError> {
        self.calls.lock().unwrap().push(request.clone());
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        if request.json_mode {
            Ok(self.content_reply.clone())
        } else {
            Ok(self.prompt_reply.clone())
        }
    }
}

/// Returns a tiny base64 payload for every prompt
#[derive(Clone, Default)]
pub struct MockImageBackend {
    pub prompts: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ImageGenerator for MockImageBackend {
    async fn generate_image(&self, prompt: &str, _size: &str) -> Result<String, UpstreamError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok("aW1hZ2U=".to_string())
    }
}

/// Speech backend that always fails
#[derive(Clone)]
pub struct FailingSpeechBackend {
    pub calls: Arc<Mutex<usize>>,
    pub error: UpstreamError,
}

impl FailingSpeechBackend {
    pub fn new(error: UpstreamError) -> Self {
        Self {
            calls: Arc::new(Mutex::new(0)),
            error,
        }
    }
}

#[async_trait]
impl SpeechTranscriber for FailingSpeechBackend {
    async fn transcribe_file(
        &self,
        _path: &Path,
        _options: &TranscriptionOptions,
    ) -> Result<String, UpstreamError> {
        *self.calls.lock().unwrap() += 1;
        Err(self.error.clone())
    }
}
