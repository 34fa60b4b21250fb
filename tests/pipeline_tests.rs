mod mocks;

use mocks::backends::{content_json, FailingSpeechBackend, MockImageBackend, MockTextBackend};
use mocks::downloader::MockDownloader;
use mocks::fetcher::MockInstagramFetcher;
use std::sync::Arc;
use std::time::Duration;

use repurposer::backends::UpstreamError;
use repurposer::generate::CAROUSEL_LEN;
use repurposer::{
    CarouselSlide, Config, ErrorKind, ImageOptions, Pipeline, PipelineError, RateLimiter,
    StorageMode,
};

fn quiet_config() -> Config {
    let mut config = Config::default();
    config.app.mock_latency_ms = 0;
    config
}

// ─── Mock mode ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_mock_instagram_post_end_to_end() {
    let pipeline = Pipeline::builder(quiet_config()).build();

    let outcome = pipeline
        .process("client", "https://www.instagram.com/p/ABC123/", None)
        .await
        .unwrap();

    assert_eq!(outcome.content.carousel.len(), CAROUSEL_LEN);
    assert!(!outcome.content.linkedin.is_empty());
    assert!(!outcome.content.threads.is_empty());
    assert!(!outcome.content.video_script.is_empty());
    assert_eq!(outcome.metadata.source_url, "https://www.instagram.com/p/ABC123/");
    assert!(outcome
        .content
        .carousel
        .iter()
        .all(|slide| slide.image_prompt().is_some()));
}

#[tokio::test]
async fn test_mock_youtube_video_uses_platform_captions() {
    let pipeline = Pipeline::builder(quiet_config()).build();

    let outcome = pipeline
        .process("client", "https://youtu.be/dQw4w9WgXcQ", None)
        .await
        .unwrap();

    assert!(outcome.metadata.has_transcript);
    assert!(outcome.metadata.transcript_length > 0);
    assert_eq!(outcome.metadata.video_id.as_deref(), Some("dQw4w9WgXcQ"));
}

// ─── Invalid input ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_invalid_url_makes_no_backend_calls() {
    let fetcher = MockInstagramFetcher::new("caption");
    let downloader = MockDownloader::default();
    let text = MockTextBackend::new(content_json(5));

    let fetch_calls = fetcher.calls.clone();
    let download_calls = downloader.calls.clone();
    let text_calls = text.calls.clone();

    let pipeline = Pipeline::builder(quiet_config())
        .fetcher(Box::new(fetcher))
        .downloader(Arc::new(downloader))
        .text(Arc::new(text))
        .build();

    let err = pipeline.process("client", "not a url", None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(fetch_calls.lock().unwrap().is_empty());
    assert!(download_calls.lock().unwrap().is_empty());
    assert!(text_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_url_does_not_consume_rate_limit() {
    let pipeline = Pipeline::builder(quiet_config())
        .rate_limiter(RateLimiter::in_memory(1, Duration::from_secs(3600)))
        .build();

    for _ in 0..3 {
        assert!(pipeline
            .process("client", "https://example.com/watch", None)
            .await
            .is_err());
    }

    let outcome = pipeline
        .process("client", "https://www.instagram.com/reel/ABC123/", None)
        .await
        .unwrap();
    assert_eq!(outcome.remaining, 0);
}

// ─── Degraded transcription ──────────────────────────────────────────────────

#[tokio::test]
async fn test_failed_transcription_still_generates() {
    let fetcher = MockInstagramFetcher::new("Watch this #coding reel");
    let downloader = MockDownloader::default();
    let speech = FailingSpeechBackend::new(UpstreamError::api(500, "whisper exploded"));

    let download_calls = downloader.calls.clone();
    let speech_calls = speech.calls.clone();

    let pipeline = Pipeline::builder(quiet_config())
        .fetcher(Box::new(fetcher))
        .downloader(Arc::new(downloader))
        .speech(Arc::new(speech))
        .build();

    let outcome = pipeline
        .process("client", "https://www.instagram.com/reel/ABC123/", None)
        .await
        .unwrap();

    assert!(!outcome.metadata.has_transcript);
    assert_eq!(outcome.metadata.transcript_length, 0);
    assert_eq!(outcome.content.carousel.len(), CAROUSEL_LEN);
    assert_eq!(
        download_calls.lock().unwrap().as_slice(),
        ["https://cdn.example.com/reel.mp4"]
    );
    assert_eq!(*speech_calls.lock().unwrap(), 1);
}

// ─── Generation ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_missing_video_script_is_malformed() {
    let reply = serde_json::json!({
        "linkedin": "post",
        "carousel": ["a", "b", "c", "d", "e"],
        "threads": "thread",
    })
    .to_string();

    let pipeline = Pipeline::builder(quiet_config())
        .text(Arc::new(MockTextBackend::new(reply)))
        .build();

    let err = pipeline
        .process("client", "https://www.instagram.com/p/ABC123/", None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UpstreamMalformed);
    assert_eq!(err.reason(), "missing_field");
    assert!(matches!(err, PipelineError::Generation(_)));
}

#[tokio::test]
async fn test_carousel_is_always_five_slides() {
    for count in [0, 3, 8] {
        let text = MockTextBackend::new(content_json(count));
        let pipeline = Pipeline::builder(quiet_config())
            .text(Arc::new(text))
            .build();

        let outcome = pipeline
            .process("client", "https://www.instagram.com/p/ABC123/", None)
            .await
            .unwrap();

        let carousel = &outcome.content.carousel;
        assert_eq!(carousel.len(), CAROUSEL_LEN, "model returned {count} slides");
        if count == 8 {
            assert_eq!(carousel[4].heading(), Some("Heading 5"));
        }
        if count == 3 {
            assert_eq!(carousel[3].heading(), Some("Slide 4 Title"));
        }
    }
}

#[tokio::test]
async fn test_model_prompts_are_trimmed() {
    let text = MockTextBackend::new(content_json(5));
    let pipeline = Pipeline::builder(quiet_config())
        .text(Arc::new(text.clone()))
        .build();

    let outcome = pipeline
        .process("client", "https://www.instagram.com/p/ABC123/", None)
        .await
        .unwrap();

    assert_eq!(text.json_calls(), 1);
    assert!(outcome
        .content
        .carousel
        .iter()
        .all(|slide| slide.image_prompt() == Some("A glowing nebula over a laptop")));
}

#[tokio::test]
async fn test_upstream_rate_limit_is_transient() {
    let mut err = UpstreamError::api(429, "Too many requests");
    err.code = Some("rate_limit_exceeded".into());

    let pipeline = Pipeline::builder(quiet_config())
        .text(Arc::new(MockTextBackend::failing(err)))
        .build();

    let err = pipeline
        .process("client", "https://www.instagram.com/p/ABC123/", None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UpstreamTransient);
}

// ─── Images ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_generate_images_keeps_existing_urls() {
    let images = MockImageBackend::default();
    let prompts = images.prompts.clone();

    let pipeline = Pipeline::builder(quiet_config())
        .image(Arc::new(images))
        .build();

    let existing = CarouselSlide::rich("Kept", "Already illustrated")
        .with_image_url(0, "/generated-images/kept.png");
    let slides = vec![
        existing,
        CarouselSlide::Legacy("Second".into()),
        CarouselSlide::rich("Third", "Body"),
    ];

    let options = ImageOptions {
        storage: StorageMode::DataUrl,
        ..ImageOptions::default()
    };
    let first = pipeline.generate_images(slides, &options).await;

    assert_eq!(first[0].image_url(), Some("/generated-images/kept.png"));
    assert!(first[1..]
        .iter()
        .all(|slide| slide.image_url().is_some_and(|url| url.starts_with("data:image/png;base64,"))));
    assert_eq!(prompts.lock().unwrap().len(), 2);

    let second = pipeline.generate_images(first.clone(), &options).await;
    assert_eq!(second, first);
    assert_eq!(prompts.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_mock_images_use_placeholders() {
    let pipeline = Pipeline::builder(quiet_config()).build();
    let slides: Vec<_> = (0..5)
        .map(|i| CarouselSlide::rich(format!("H{i}"), "B"))
        .collect();

    let slides = pipeline
        .generate_images(slides, &ImageOptions::default())
        .await;

    assert_eq!(slides[0].image_url(), Some("/placeholder-1.jpg"));
    assert_eq!(slides[4].image_url(), Some("/placeholder-5.jpg"));
}

// ─── Rate limiting ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_thirty_first_request_is_rejected() {
    let pipeline = Pipeline::builder(quiet_config())
        .rate_limiter(RateLimiter::in_memory(30, Duration::from_secs(3600)))
        .build();
    let url = "https://www.instagram.com/p/ABC123/";

    for expected_remaining in (0..30).rev() {
        let outcome = pipeline.process("10.0.0.1", url, None).await.unwrap();
        assert_eq!(outcome.remaining, expected_remaining);
    }

    let err = pipeline.process("10.0.0.1", url, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RateLimited);
    assert_eq!(err.status_code(), 429);

    // Other clients keep their own budget
    assert!(pipeline.process("10.0.0.2", url, None).await.is_ok());
}
