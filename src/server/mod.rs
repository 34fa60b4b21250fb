use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, ImagesConfig, StorageKind};
use crate::generate::{BrandVoiceProfile, CarouselSlide, GeneratedContent};
use crate::images::ImageOptions;
use crate::pipeline::{new_request_id, Pipeline, PipelineError, PreviewData, ProcessMetadata};

const RATE_LIMIT_HEADER: &str = "x-ratelimit-remaining";
const MAX_IMAGE_CONCURRENCY: usize = 4;

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    images: Arc<ImagesConfig>,
}

#[derive(Debug, Deserialize)]
struct ProcessRequest {
    url: Option<String>,
    /// Stands in for the profile an identity provider would attach
    voice: Option<BrandVoiceProfile>,
}

#[derive(Debug, Serialize)]
struct ProcessResponse {
    success: bool,
    data: GeneratedContent,
    metadata: ProcessMetadata,
}

#[derive(Debug, Deserialize)]
struct PreviewRequest {
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct PreviewResponse {
    success: bool,
    #[serde(flatten)]
    preview: PreviewData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImagesRequest {
    slides: Option<Vec<CarouselSlide>>,
    storage: Option<String>,
    concurrency: Option<usize>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ImagesResponse {
    success: bool,
    slides: Vec<CarouselSlide>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    reason: String,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
}

/// Build the HTTP router over a shared pipeline
pub fn router(pipeline: Arc<Pipeline>, config: &Config) -> Router {
    let state = AppState {
        pipeline,
        images: Arc::new(config.images.clone()),
    };

    Router::new()
        .route("/healthz", get(healthz))
        .route("/process", post(process_handler))
        .route("/preview", post(preview_handler))
        .route("/images/generate", post(images_handler))
        .with_state(state)
}

/// Bind and serve until Ctrl-C
pub async fn serve(pipeline: Arc<Pipeline>, config: &Config) -> Result<()> {
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind))?;

    let app = router(pipeline, config);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!("Listening on http://{}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
    })
    .await
    .context("server shutdown")?;

    Ok(())
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// First `X-Forwarded-For` hop, else the peer address, else `unknown`
fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn error_body(
    status: StatusCode,
    message: impl Into<String>,
    reason: &str,
    request_id: Option<String>,
) -> Response {
    let body = ErrorBody {
        success: false,
        error: message.into(),
        reason: reason.to_string(),
        request_id,
    };
    (status, Json(body)).into_response()
}

fn bad_request(message: impl Into<String>) -> Response {
    error_body(StatusCode::BAD_REQUEST, message, "invalid_input", None)
}

fn pipeline_error(err: PipelineError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let request_id = if status.is_server_error() {
        let id = err
            .request_id()
            .map(str::to_string)
            .unwrap_or_else(new_request_id);
        tracing::error!(request_id = %id, reason = err.reason(), error = ?err, "Request failed");
        Some(id)
    } else {
        tracing::warn!(reason = err.reason(), "Request rejected: {}", err);
        None
    };

    let remaining = match &err {
        PipelineError::RateLimited { remaining } => Some(*remaining),
        _ => None,
    };

    let mut response = error_body(status, err.to_string(), err.reason(), request_id);
    if let Some(remaining) = remaining {
        response
            .headers_mut()
            .insert(RATE_LIMIT_HEADER, HeaderValue::from(remaining));
    }
    response
}

fn json_rejection(rejection: JsonRejection) -> Response {
    tracing::debug!(error = %rejection, "Rejected request body");
    bad_request("Invalid JSON in request body")
}

fn required_url(url: Option<String>) -> Result<String, Response> {
    url.filter(|u| !u.trim().is_empty())
        .ok_or_else(|| bad_request("URL is required"))
}

async fn process_handler(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<ProcessRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return json_rejection(rejection),
    };
    let url = match required_url(request.url) {
        Ok(url) => url,
        Err(response) => return response,
    };

    let key = client_key(&headers, peer.map(|ConnectInfo(addr)| addr));
    match state
        .pipeline
        .process(&key, &url, request.voice.as_ref())
        .await
    {
        Ok(outcome) => {
            let mut response = Json(ProcessResponse {
                success: true,
                data: outcome.content,
                metadata: outcome.metadata,
            })
            .into_response();
            response
                .headers_mut()
                .insert(RATE_LIMIT_HEADER, HeaderValue::from(outcome.remaining));
            response
        }
        Err(err) => pipeline_error(err),
    }
}

async fn preview_handler(
    State(state): State<AppState>,
    body: Result<Json<PreviewRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return json_rejection(rejection),
    };
    let url = match required_url(request.url) {
        Ok(url) => url,
        Err(response) => return response,
    };

    match state.pipeline.preview(&url).await {
        Ok(preview) => Json(PreviewResponse {
            success: true,
            preview,
        })
        .into_response(),
        Err(err) => pipeline_error(err),
    }
}

fn image_options(config: &ImagesConfig, request: &ImagesRequest) -> Result<ImageOptions, Response> {
    let mut options = ImageOptions::from_config(config);

    if let Some(storage) = request.storage.as_deref() {
        let kind: StorageKind = storage
            .parse()
            .map_err(|_| bad_request("storage must be \"fs\" or \"data\""))?;
        options.storage = ImagesConfig {
            storage: kind,
            ..config.clone()
        }
        .storage_mode();
    }
    if let Some(concurrency) = request.concurrency {
        options.concurrency = concurrency.clamp(1, MAX_IMAGE_CONCURRENCY);
    }
    if let Some(timeout_ms) = request.timeout_ms.filter(|ms| *ms > 0) {
        options.timeout = Duration::from_millis(timeout_ms);
    }
    Ok(options)
}

async fn images_handler(
    State(state): State<AppState>,
    body: Result<Json<ImagesRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return json_rejection(rejection),
    };
    let options = match image_options(&state.images, &request) {
        Ok(options) => options,
        Err(response) => return response,
    };
    let Some(slides) = request.slides else {
        return bad_request("slides array is required");
    };

    let slides = state.pipeline.generate_images(slides, &options).await;
    Json(ImagesResponse {
        success: true,
        slides,
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_key_resolution() {
        let peer: SocketAddr = "192.0.2.10:5000".parse().unwrap();

        let mut headers = HeaderMap::new();
        assert_eq!(client_key(&headers, Some(peer)), "192.0.2.10");
        assert_eq!(client_key(&headers, None), "unknown");

        headers.insert("x-forwarded-for", "203.0.113.5, 10.0.0.1".parse().unwrap());
        assert_eq!(client_key(&headers, Some(peer)), "203.0.113.5");
    }

    #[test]
    fn test_image_options_overrides() {
        let config = ImagesConfig::default();
        let request = ImagesRequest {
            slides: None,
            storage: Some("data".into()),
            concurrency: Some(16),
            timeout_ms: Some(5000),
        };
        let options = image_options(&config, &request).unwrap();
        assert_eq!(options.storage, crate::images::StorageMode::DataUrl);
        assert_eq!(options.concurrency, MAX_IMAGE_CONCURRENCY);
        assert_eq!(options.timeout, Duration::from_millis(5000));

        let request = ImagesRequest {
            storage: Some("s3".into()),
            ..request
        };
        assert!(image_options(&config, &request).is_err());
    }
}
