use async_trait::async_trait;
use reqwest::{multipart, Client, Response};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::backends::{
    CompletionRequest, ImageGenerator, SpeechTranscriber, TextGenerator, TranscriptionOptions,
    UpstreamError,
};

/// Client for an OpenAI-compatible API, implementing every generative capability
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    base_url: String,
    text_model: String,
    image_model: String,
    speech_model: String,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u8,
    size: &'a str,
    response_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    b64_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
    code: Option<serde_json::Value>,
}

/// Parse an error response into an [`UpstreamError`], keeping any structured code
pub(crate) fn parse_error_body(status: u16, body: &str) -> UpstreamError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => UpstreamError {
            status: Some(status),
            code: envelope.error.code.and_then(|code| match code {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            }),
            error_type: envelope.error.error_type,
            message: envelope.error.message,
            transport: false,
        },
        Err(_) => UpstreamError::api(status, body.trim().to_string()),
    }
}

impl OpenAIClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".into(),
            text_model: "gpt-4o-mini".into(),
            image_model: "dall-e-3".into(),
            speech_model: "whisper-1".into(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_models(
        mut self,
        text: impl Into<String>,
        image: impl Into<String>,
        speech: impl Into<String>,
    ) -> Self {
        self.text_model = text.into();
        self.image_model = image.into();
        self.speech_model = speech.into();
        self
    }

    async fn check(resp: Response) -> Result<Response, UpstreamError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        let err = parse_error_body(status, &body);
        tracing::error!(status, code = ?err.code, error_type = ?err.error_type, "Upstream API error");
        Err(err)
    }
}

fn transport_error(e: reqwest::Error) -> UpstreamError {
    tracing::error!(error = %e, "Failed to make http request");
    if e.is_decode() {
        UpstreamError {
            transport: false,
            ..UpstreamError::transport(e.to_string())
        }
    } else {
        UpstreamError::transport(e.to_string())
    }
}

#[async_trait]
impl TextGenerator for OpenAIClient {
    #[tracing::instrument(skip_all, fields(model = %self.text_model))]
    async fn complete(&self, request: &CompletionRequest) -> Result<String, UpstreamError> {
        let body = ChatRequest {
            model: &self.text_model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let response: ChatResponse = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(transport_error)?;

        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

#[async_trait]
impl ImageGenerator for OpenAIClient {
    #[tracing::instrument(skip_all, fields(model = %self.image_model, size = %size))]
    async fn generate_image(&self, prompt: &str, size: &str) -> Result<String, UpstreamError> {
        let body = ImageRequest {
            model: &self.image_model,
            prompt,
            n: 1,
            size,
            response_format: "b64_json",
        };

        let resp = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let response: ImageResponse = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(transport_error)?;

        response
            .data
            .into_iter()
            .next()
            .and_then(|d| d.b64_json)
            .ok_or_else(|| UpstreamError::api(200, "No image data returned"))
    }
}

#[async_trait]
impl SpeechTranscriber for OpenAIClient {
    #[tracing::instrument(skip_all, fields(model = %self.speech_model, path = %path.display()))]
    async fn transcribe_file(
        &self,
        path: &Path,
        options: &TranscriptionOptions,
    ) -> Result<String, UpstreamError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| UpstreamError::transport(format!("cannot open media file: {e}")))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| UpstreamError::transport(format!("cannot stat media file: {e}")))?
            .len();

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("media.mp4")
            .to_string();

        let part = multipart::Part::stream_with_length(reqwest::Body::from(file), len)
            .file_name(file_name);

        let form = multipart::Form::new()
            .text("model", self.speech_model.clone())
            .text("language", options.language.clone())
            .text("temperature", options.temperature.to_string())
            .text("response_format", "text")
            .part("file", part);

        let resp = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;

        let text = Self::check(resp)
            .await?
            .text()
            .await
            .map_err(transport_error)?;

        Ok(text.trim().to_string())
    }
}
